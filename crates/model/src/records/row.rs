use crate::core::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldValue {
    pub name: String,
    pub value: Value,
}

impl FieldValue {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldValue {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A row read from or written to a table. Field order is significant and
/// lookups by name are case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowData {
    pub entity: String,
    pub field_values: Vec<FieldValue>,
}

impl RowData {
    pub fn new(entity: &str, field_values: Vec<FieldValue>) -> Self {
        RowData {
            entity: entity.to_string(),
            field_values,
        }
    }

    pub fn from_pairs<N, V, I>(entity: &str, pairs: I) -> Self
    where
        N: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (N, V)>,
    {
        RowData::new(
            entity,
            pairs
                .into_iter()
                .map(|(name, value)| FieldValue::new(name, value))
                .collect(),
        )
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.field_values
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(field))
    }

    pub fn get_value(&self, field: &str) -> Value {
        self.get(field)
            .map(|f| f.value.clone())
            .unwrap_or(Value::Null)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Replaces the value of an existing field or appends a new one.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        let value = value.into();
        match self
            .field_values
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(field))
        {
            Some(existing) => existing.value = value,
            None => self.field_values.push(FieldValue::new(field, value)),
        }
    }

    pub fn columns(&self) -> Vec<&str> {
        self.field_values.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn values_for(&self, fields: &[String]) -> Vec<Value> {
        fields.iter().map(|f| self.get_value(f)).collect()
    }

    pub fn len(&self) -> usize {
        self.field_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.field_values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let row = RowData::from_pairs("orders", [("ORDER_ID", Value::Int(7))]);
        assert_eq!(row.get_value("order_id"), Value::Int(7));
        assert_eq!(row.get_value("missing"), Value::Null);
    }

    #[test]
    fn test_set_replaces_or_appends() {
        let mut row = RowData::from_pairs("t", [("a", 1i64)]);
        row.set("A", 2i64);
        row.set("b", "x");
        assert_eq!(row.columns(), vec!["a", "b"]);
        assert_eq!(row.get_value("a"), Value::Int(2));
    }
}
