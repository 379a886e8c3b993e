use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const RETRIEVE_ROUTE: &str = "/v1/retrieve";
pub const STATISTICS_ROUTE: &str = "/v1/statistics";
pub const INPUTS_ROUTE: &str = "/v1/inputs";
pub const HEALTH_ROUTE: &str = "/health";

pub type Metadata = BTreeMap<String, String>;

pub mod codes {
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const EMBEDDING_FAILED: &str = "embedding_failed";
    pub const INTERNAL: &str = "internal";
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, message)
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Body of `POST /v1/retrieve`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RetrieveRequest {
    pub query: String,
    pub k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_filter: Option<Metadata>,
}

const RETRIEVE_HINT: &str =
    r#"expected {"query": "<text>", "k": <positive integer>, "metadata_filter": {"<key>": "<value>"}}"#;

impl RetrieveRequest {
    /// Validate a raw JSON body.
    ///
    /// Scalar filter values are compared as strings, so `{"year": 2024}` matches the metadata
    /// value `"2024"`.
    pub fn from_value(value: &Value) -> std::result::Result<Self, ErrorEnvelope> {
        let Some(body) = value.as_object() else {
            return Err(ErrorEnvelope::invalid_request("request body must be a JSON object")
                .with_hint(RETRIEVE_HINT));
        };

        // Details name the offending field and echo what was received for it.
        let reject = |field: &str, received: Option<&Value>, message: &str| {
            let details = serde_json::json!({
                "field": field,
                "received": received.cloned().unwrap_or(Value::Null),
            });
            Err(ErrorEnvelope::invalid_request(message)
                .with_hint(RETRIEVE_HINT)
                .with_details(details))
        };

        let query = match body.get("query") {
            Some(Value::String(query)) => query.clone(),
            other @ Some(_) => return reject("query", other, "'query' must be a string"),
            None => return reject("query", None, "missing 'query'"),
        };

        let k_value = body.get("k");
        let k = match k_value {
            None | Some(Value::Null) => return reject("k", k_value, "missing 'k'"),
            Some(Value::Number(k)) => match k.as_u64() {
                Some(k) if k > 0 => usize::try_from(k).unwrap_or(usize::MAX),
                _ => return reject("k", k_value, "'k' must be a positive integer"),
            },
            Some(_) => return reject("k", k_value, "'k' must be a positive integer"),
        };

        let filter_value = body.get("metadata_filter");
        let metadata_filter = match filter_value {
            None | Some(Value::Null) => None,
            Some(Value::Object(filter)) => {
                let mut parsed = Metadata::new();
                for (key, value) in filter {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => {
                            return reject(
                                &format!("metadata_filter.{key}"),
                                Some(value),
                                "'metadata_filter' values must be scalars",
                            )
                        }
                    };
                    parsed.insert(key.clone(), value);
                }
                Some(parsed)
            }
            Some(_) => {
                return reject(
                    "metadata_filter",
                    filter_value,
                    "'metadata_filter' must be an object",
                )
            }
        };

        Ok(Self {
            query,
            k,
            metadata_filter,
        })
    }
}

/// One hydrated hit, ordered by descending `score`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk_id: u64,
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// Body returned by `POST /v1/statistics`
///
/// Timestamps are unix seconds; both are `None` until the first record is committed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StatisticsResponse {
    pub file_count: usize,
    pub chunk_count: usize,
    pub last_indexed: Option<u64>,
    pub last_modified: Option<u64>,
    pub dimension: usize,
    pub model: String,
}

/// One ingested record as listed by `POST /v1/inputs`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InputEntry {
    pub seq: u64,
    pub headline: String,
    pub chunk_count: usize,
}

pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}
