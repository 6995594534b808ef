use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

pub const CHECKPOINT_DELIMITER: char = '|';

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStrategy {
    /// Resume after the last processed key (single or composite).
    Key,
    /// Resume by discarding the number of rows already consumed.
    RowSkip,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub strategy: CheckpointStrategy,
    pub columns: Vec<String>,
}

impl CheckpointConfig {
    pub fn disabled() -> Self {
        CheckpointConfig::default()
    }

    pub fn key(columns: &[&str]) -> Self {
        CheckpointConfig {
            enabled: true,
            strategy: CheckpointStrategy::Key,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn row_skip() -> Self {
        CheckpointConfig {
            enabled: true,
            strategy: CheckpointStrategy::RowSkip,
            columns: Vec::new(),
        }
    }

    /// The strategy that is actually in force.
    pub fn effective_strategy(&self) -> CheckpointStrategy {
        match (self.enabled, self.strategy) {
            (false, _) => CheckpointStrategy::None,
            (true, CheckpointStrategy::Key) if self.columns.is_empty() => CheckpointStrategy::None,
            (true, strategy) => strategy,
        }
    }
}

/// A (possibly composite) key position. Parts compare component-wise and
/// numerically whenever both sides look like numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointValue {
    parts: Vec<Value>,
}

impl CheckpointValue {
    pub fn new(parts: Vec<Value>) -> Self {
        CheckpointValue { parts }
    }

    pub fn single(value: impl Into<Value>) -> Self {
        CheckpointValue {
            parts: vec![value.into()],
        }
    }

    /// Parses a stored value. Returns `None` when the number of parts does
    /// not match `expected_parts`. Empty parts are nulls.
    pub fn parse(text: &str, expected_parts: usize) -> Option<Self> {
        let parts: Vec<Value> = text
            .split(CHECKPOINT_DELIMITER)
            .map(|part| {
                if part.is_empty() {
                    Value::Null
                } else {
                    Value::String(part.to_string())
                }
            })
            .collect();
        (parts.len() == expected_parts).then_some(CheckpointValue { parts })
    }

    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    pub fn serialize(&self) -> String {
        self.parts
            .iter()
            .map(|p| p.as_string().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(&CHECKPOINT_DELIMITER.to_string())
    }

    pub fn compare(&self, other: &CheckpointValue) -> Ordering {
        for (a, b) in self.parts.iter().zip(other.parts.iter()) {
            match compare_part(a, b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.parts.len().cmp(&other.parts.len())
    }

    /// Largest value of the iterator, or `None` if it is empty.
    pub fn max_of<'a, I>(values: I) -> Option<&'a CheckpointValue>
    where
        I: IntoIterator<Item = &'a CheckpointValue>,
    {
        values.into_iter().fold(None, |best, v| match best {
            Some(b) if b.compare(v) != Ordering::Less => Some(b),
            _ => Some(v),
        })
    }
}

fn compare_part(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    if let Some(ord) = a.compare(b) {
        return ord;
    }
    let (ta, tb) = (a.as_string().unwrap_or_default(), b.as_string().unwrap_or_default());
    if let (Ok(x), Ok(y)) = (ta.trim().parse::<i128>(), tb.trim().parse::<i128>()) {
        return x.cmp(&y);
    }
    if let (Ok(x), Ok(y)) = (ta.trim().parse::<f64>(), tb.trim().parse::<f64>()) {
        if let Some(ord) = x.partial_cmp(&y) {
            return ord;
        }
    }
    ta.cmp(&tb)
}

impl fmt::Display for CheckpointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_composite_with_null_part() {
        let v = CheckpointValue::parse("10||abc", 3).unwrap();
        assert_eq!(
            v.parts(),
            &[Value::String("10".into()), Value::Null, Value::String("abc".into())]
        );
        assert_eq!(v.serialize(), "10||abc");
        assert!(CheckpointValue::parse("10|20", 3).is_none());
    }

    #[test]
    fn test_numeric_strings_compare_numerically() {
        let a = CheckpointValue::parse("900", 1).unwrap();
        let b = CheckpointValue::parse("1000", 1).unwrap();
        assert_eq!(a.compare(&b), Ordering::Less);
    }

    #[test]
    fn test_max_of_picks_largest_chunk_value() {
        let values = vec![
            CheckpointValue::single(50_000i64),
            CheckpointValue::single(150_000i64),
            CheckpointValue::single(100_000i64),
        ];
        let max = CheckpointValue::max_of(&values).unwrap();
        assert_eq!(max.serialize(), "150000");
        assert!(CheckpointValue::max_of(std::iter::empty()).is_none());
    }

    #[test]
    fn test_composite_ordering_is_lexicographic() {
        let a = CheckpointValue::new(vec![Value::Int(1), Value::String("b".into())]);
        let b = CheckpointValue::new(vec![Value::Int(1), Value::String("c".into())]);
        let c = CheckpointValue::new(vec![Value::Int(2), Value::String("a".into())]);
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(c.compare(&b), Ordering::Greater);
    }

    #[test]
    fn test_effective_strategy() {
        assert_eq!(CheckpointConfig::disabled().effective_strategy(), CheckpointStrategy::None);
        assert_eq!(CheckpointConfig::key(&[]).effective_strategy(), CheckpointStrategy::None);
        assert_eq!(CheckpointConfig::row_skip().effective_strategy(), CheckpointStrategy::RowSkip);
    }
}
