use crate::{
    error::ScdError,
    scd::{ExistingRow, handler::ScdHandler},
    transform::{extract_key, key_text},
};
use connectors::DbConnection;
use model::core::value::Value;
use planner::query::dml::lookup_statement;
use std::collections::HashMap;

/// Keys bound per lookup statement.
pub const LOOKUP_BATCH_SIZE: usize = 200;

impl ScdHandler {
    /// Current target rows for `keys`, indexed by key text. Dimensions only
    /// consider the active version of each key.
    pub async fn lookup_existing(
        &self,
        target: &mut dyn DbConnection,
        keys: &[Vec<Value>],
    ) -> Result<HashMap<String, ExistingRow>, ScdError> {
        let ctx = self.context();
        let job = &ctx.job;
        let audit = &job.audit;
        let key_columns = job.primary_key_targets();

        let mut select = vec![audit.surrogate_key.clone(), audit.row_hash.clone()];
        select.extend(key_columns.iter().cloned());

        let active = Value::String(audit.active_value.clone());
        let filter = job
            .is_dimension()
            .then_some((audit.active_flag.as_str(), &active));

        let mut found = HashMap::new();
        for group in keys.chunks(LOOKUP_BATCH_SIZE) {
            let sql = lookup_statement(
                ctx.target_dialect,
                self.table(),
                &select,
                &key_columns,
                group.len(),
                filter,
            );
            let params: Vec<Value> = group.iter().flatten().cloned().collect();
            let rows = target
                .query(&sql, &params)
                .await
                .map_err(|source| ScdError::Lookup {
                    table: self.table().to_string(),
                    source,
                })?;

            for row in rows {
                let key = key_text(&extract_key(&row, &key_columns));
                let existing = ExistingRow {
                    skey: row.get_value(&audit.surrogate_key),
                    hash: row.get_value(&audit.row_hash).as_string(),
                };
                found.insert(key, existing);
            }
        }
        Ok(found)
    }
}
