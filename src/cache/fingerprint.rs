use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// SHA-256 digest of a request's canonical form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// The request fields that decide whether two requests are the same.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintInput<'a> {
    pub model: &'a str,
    pub messages: &'a [Value],
    pub system: Option<&'a str>,
    pub tools: Option<&'a [Value]>,
    pub tool_choice: Option<&'a Value>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub top_p: Option<f64>,
}

/// Hash the canonical JSON of the request. Object keys are sorted at every
/// depth, so key order in the caller's payload does not matter.
#[must_use]
pub fn compute_fingerprint(input: &FingerprintInput<'_>) -> Fingerprint {
    let mut payload = Map::new();
    payload.insert("model".to_string(), Value::from(input.model));
    payload.insert("messages".to_string(), Value::from(input.messages.to_vec()));
    payload.insert(
        "system".to_string(),
        input.system.map_or(Value::Null, Value::from),
    );
    payload.insert(
        "tools".to_string(),
        input
            .tools
            .map_or(Value::Null, |tools| Value::from(tools.to_vec())),
    );
    payload.insert(
        "tool_choice".to_string(),
        input.tool_choice.cloned().unwrap_or(Value::Null),
    );
    if input.temperature.is_some() || input.max_tokens.is_some() || input.top_p.is_some() {
        let mut sampling = Map::new();
        sampling.insert("max_tokens".to_string(), Value::from(input.max_tokens));
        sampling.insert("temperature".to_string(), Value::from(input.temperature));
        sampling.insert("top_p".to_string(), Value::from(input.top_p));
        payload.insert("sampling".to_string(), Value::Object(sampling));
    }

    let canonical = canonicalize(Value::Object(payload));
    let mut hasher = Sha256::new();
    // Writing a Value into a Vec cannot fail.
    let serialized = serde_json::to_vec(&canonical).unwrap_or_default();
    hasher.update(&serialized);
    Fingerprint(hasher.finalize().into())
}

/// Sort object keys recursively. `serde_json::Map` only sorts on its own while
/// the `preserve_order` feature is off, and any crate in the graph can turn it on.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, canonicalize(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
