//! Slowly changing dimension handling: classify each incoming row against
//! the current target row, then apply the resulting batch.

pub mod handler;
pub mod lookup;

use crate::transform::TransformedRow;
use model::{core::value::Value, execution::job::ScdType};
use std::collections::HashMap;

/// Current target state of one business key.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingRow {
    pub skey: Value,
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScdAction {
    Insert,
    NoOp,
    /// Overwrite the row with this surrogate key in place.
    Update { skey: Value },
    /// Close the row with this surrogate key and insert a new version.
    NewVersion { expire_skey: Value },
}

pub fn prepare_row_for_scd(
    scd_type: ScdType,
    existing: Option<&ExistingRow>,
    source_hash: &str,
) -> ScdAction {
    let Some(existing) = existing else {
        return ScdAction::Insert;
    };
    if existing.hash.as_deref() == Some(source_hash) {
        return ScdAction::NoOp;
    }
    match scd_type {
        ScdType::Type1 => ScdAction::Update {
            skey: existing.skey.clone(),
        },
        ScdType::Type2 => ScdAction::NewVersion {
            expire_skey: existing.skey.clone(),
        },
    }
}

/// Work for one batch, grouped by statement.
#[derive(Debug, Default, Clone)]
pub struct ScdBatch {
    pub inserts: Vec<TransformedRow>,
    pub updates: Vec<(Value, TransformedRow)>,
    pub expires: Vec<(Value, TransformedRow)>,
    pub unchanged: u64,
}

impl ScdBatch {
    pub fn push(&mut self, row: TransformedRow, action: ScdAction) {
        match action {
            ScdAction::Insert => self.inserts.push(row),
            ScdAction::NoOp => self.unchanged += 1,
            ScdAction::Update { skey } => self.updates.push((skey, row)),
            ScdAction::NewVersion { expire_skey } => {
                self.expires.push((expire_skey, row.clone()));
                self.inserts.push(row);
            }
        }
    }

    /// True when no statement needs to run.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.expires.is_empty()
    }
}

/// Classifies `rows` against the target rows found for their keys.
pub fn classify(
    scd_type: ScdType,
    rows: Vec<TransformedRow>,
    existing: &HashMap<String, ExistingRow>,
) -> ScdBatch {
    let mut batch = ScdBatch::default();
    for row in rows {
        let action = prepare_row_for_scd(scd_type, existing.get(&row.key_text), &row.hash);
        batch.push(row, action);
    }
    batch
}
