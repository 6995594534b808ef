use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const PARAM_PROCESS_ID: &str = "processId";
pub const PARAM_SESSION_ID: &str = "sessionId";
/// Key under which the checkpoint value travels in the session parameters.
pub const PARAM_CHECKPOINT: &str = "param1";
/// Terminal checkpoint value written after a run consumed its whole source.
pub const CHECKPOINT_COMPLETED: &str = "COMPLETED";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionParamsError {
    #[error("Missing session parameter: {0}")]
    Missing(&'static str),

    #[error("Session parameter {0} is not an integer: {1}")]
    NotAnInteger(&'static str, String),
}

/// Parameters handed to a job routine by its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub process_id: i64,
    pub session_id: i64,
    #[serde(rename = "param1", default)]
    pub checkpoint_value: Option<String>,
}

impl SessionParams {
    pub fn new(process_id: i64, session_id: i64) -> Self {
        SessionParams {
            process_id,
            session_id,
            checkpoint_value: None,
        }
    }

    pub fn with_checkpoint(mut self, value: Option<String>) -> Self {
        self.checkpoint_value = value.filter(|v| !v.is_empty());
        self
    }

    pub fn from_map(map: &Map<String, JsonValue>) -> Result<Self, SessionParamsError> {
        let process_id = integer_param(map, PARAM_PROCESS_ID)?;
        let session_id = integer_param(map, PARAM_SESSION_ID)?;
        let checkpoint_value = match map.get(PARAM_CHECKPOINT) {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };
        Ok(SessionParams::new(process_id, session_id).with_checkpoint(checkpoint_value))
    }

    pub fn key(&self, mapref: &str) -> SessionKey {
        SessionKey {
            mapref: mapref.to_string(),
            process_id: self.process_id,
            session_id: self.session_id,
        }
    }
}

fn integer_param(map: &Map<String, JsonValue>, name: &'static str) -> Result<i64, SessionParamsError> {
    match map.get(name) {
        None | Some(JsonValue::Null) => Err(SessionParamsError::Missing(name)),
        Some(JsonValue::Number(n)) => n
            .as_i64()
            .ok_or_else(|| SessionParamsError::NotAnInteger(name, n.to_string())),
        Some(JsonValue::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| SessionParamsError::NotAnInteger(name, s.clone())),
        Some(other) => Err(SessionParamsError::NotAnInteger(name, other.to_string())),
    }
}

/// Identifies one run of one mapping in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub mapref: String,
    pub process_id: i64,
    pub session_id: i64,
}
