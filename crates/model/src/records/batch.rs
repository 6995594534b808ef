use crate::{core::value::Value, records::row::RowData};
use serde::{Deserialize, Serialize};

/// A target row that will be inserted as a new record or version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsertRow {
    pub key: String,
    pub row: RowData,
}

/// A changed row overwriting the record identified by `surrogate_key`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateRow {
    pub key: String,
    pub surrogate_key: Value,
    pub row: RowData,
}

/// An active dimension version that must be closed out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpireRow {
    pub key: String,
    pub surrogate_key: Value,
}

/// Work accumulated for one batch, applied as expire -> update -> insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScdBatch {
    pub inserts: Vec<InsertRow>,
    pub updates: Vec<UpdateRow>,
    pub expirations: Vec<ExpireRow>,
    pub unchanged: usize,
}

impl ScdBatch {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.expirations.is_empty()
    }

    pub fn pending_writes(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.expirations.len()
    }
}
