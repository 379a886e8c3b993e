use crate::reader::RawRecord;
use feedrag_chunker::ChunkMetadata;
use log::warn;
use serde_json::{Map, Value};

pub const BODY_FIELD: &str = "body";
pub const HEADLINE_FIELD: &str = "headline";

/// A record reduced to plain text plus string metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub seq: u64,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Document {
    #[must_use]
    pub fn headline(&self) -> &str {
        self.metadata
            .get(HEADLINE_FIELD)
            .map_or("", String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub document: Document,
    pub anomalies: Vec<String>,
}

/// Schema boundary between raw JSON records and the rest of the pipeline.
///
/// Every field it extracts comes out as a plain string. Anything that cannot be read as one
/// becomes `""` plus an anomaly; normalization itself never fails.
#[derive(Debug, Clone)]
pub struct Normalizer {
    text_field: String,
    metadata_fields: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(BODY_FIELD, [HEADLINE_FIELD])
    }
}

impl Normalizer {
    pub fn new<I, S>(text_field: impl Into<String>, metadata_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text_field: text_field.into(),
            metadata_fields: metadata_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn normalize(&self, record: &RawRecord) -> Normalized {
        let mut anomalies = Vec::new();
        let mut extract = |name: &str| {
            field_text(&record.fields, name).unwrap_or_else(|reason| {
                let anomaly = format!("record {}: field '{name}' {reason}", record.seq);
                warn!("{anomaly}");
                anomalies.push(anomaly);
                String::new()
            })
        };

        let text = extract(self.text_field.as_str());
        let metadata = self
            .metadata_fields
            .iter()
            .map(|name| (name.clone(), extract(name.as_str())))
            .collect();

        Normalized {
            document: Document {
                seq: record.seq,
                text,
                metadata,
            },
            anomalies,
        }
    }
}

fn field_text(fields: &Map<String, Value>, name: &str) -> Result<String, String> {
    match fields.get(name) {
        None => Err("is missing".to_string()),
        Some(value) => scalar_text(value),
    }
}

fn scalar_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        // Some encoders wrap a single value in a one-element array.
        Value::Array(items) if items.len() == 1 && !items[0].is_array() => scalar_text(&items[0]),
        Value::Array(items) => Err(format!("is an array of {} elements", items.len())),
        Value::Null => Err("is null".to_string()),
        Value::Object(_) => Err("is an object".to_string()),
    }
}
