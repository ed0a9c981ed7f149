//! Envelopes exchanged between the cache and the storage worker.
//!
//! Requests: `{id, payload: {procedure, key, value?}}`.
//! Responses: `{id, error: {message} | null, result}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of a `GET` for a key that has never been written.
pub const NOT_FOUND: &str = "NOT FOUND";

/// Procedures the storage worker understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Procedure {
    Get,
    Set,
}

impl Procedure {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "GET" => Some(Procedure::Get),
            "SET" => Some(Procedure::Set),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Procedure::Get => "GET",
            Procedure::Set => "SET",
        }
    }
}

/// Procedure call body. `procedure` stays a plain string on the wire so an
/// unknown name can still be received and answered with an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub procedure: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Payload {
    pub fn get(key: impl Into<String>) -> Self {
        Self {
            procedure: Procedure::Get.as_str().to_string(),
            key: key.into(),
            value: None,
        }
    }

    pub fn set(key: impl Into<String>, value: String) -> Self {
        Self {
            procedure: Procedure::Set.as_str().to_string(),
            key: key.into(),
            value: Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub error: Option<ErrorBody>,
    pub result: Value,
}

impl Response {
    pub fn ok(id: u64, result: impl Into<Value>) -> Self {
        Self {
            id,
            error: None,
            result: result.into(),
        }
    }

    pub fn not_found(id: u64) -> Self {
        Self::ok(id, NOT_FOUND)
    }

    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(ErrorBody {
                message: message.into(),
            }),
            result: Value::Null,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.error.is_none() && self.result.as_str() == Some(NOT_FOUND)
    }
}
