//! Request and response envelopes.
//!
//! The request envelope is a map with a string `cmd`, optional `params` and
//! optional `auth`. The response is assembled incrementally with
//! first-write-wins semantics: once a key is set it is never replaced, so a
//! credential written before a handler runs survives whatever happens later.

use crate::domain::error::CodecError;
use rmpv::Value;

pub const KEY_CMD: &str = "cmd";
pub const KEY_PARAMS: &str = "params";
pub const KEY_AUTH: &str = "auth";

/// Returns a map key as text. Binary keys are accepted when they are UTF-8.
pub fn key_str(key: &Value) -> Option<&str> {
    match key {
        Value::String(s) => s.as_str(),
        Value::Binary(b) => std::str::from_utf8(b).ok(),
        _ => None,
    }
}

/// Decoded request envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub cmd: String,
    /// Command input. A nil value counts as absent.
    pub params: Option<Value>,
    /// Credential blob. A nil value counts as absent.
    pub auth: Option<Value>,
}

impl RequestEnvelope {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            params: None,
            auth: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_auth(mut self, auth: Value) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Validates the shape of a decoded value.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let entries = match value {
            Value::Map(entries) => entries,
            _ => return Err(CodecError::NotAMap),
        };

        let mut cmd = None;
        let mut params = None;
        let mut auth = None;
        for (key, value) in entries {
            let slot = match key_str(&key) {
                Some(KEY_CMD) => &mut cmd,
                Some(KEY_PARAMS) => &mut params,
                Some(KEY_AUTH) => &mut auth,
                _ => continue,
            };
            *slot = if value.is_nil() { None } else { Some(value) };
        }

        let cmd = match cmd {
            Some(Value::String(s)) => s.into_str().ok_or(CodecError::MissingCommand)?,
            _ => return Err(CodecError::MissingCommand),
        };

        Ok(Self { cmd, params, auth })
    }

    pub fn to_value(&self) -> Value {
        let mut entries = vec![(Value::from(KEY_CMD), Value::from(self.cmd.as_str()))];
        if let Some(params) = &self.params {
            entries.push((Value::from(KEY_PARAMS), params.clone()));
        }
        if let Some(auth) = &self.auth {
            entries.push((Value::from(KEY_AUTH), auth.clone()));
        }
        Value::Map(entries)
    }
}

/// Response map with insertion order and first-write-wins merging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseMap {
    entries: Vec<(String, Value)>,
}

impl ResponseMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` unless `key` is already present. Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if self.contains_key(&key) {
            return false;
        }
        self.entries.push((key, value));
        true
    }

    /// Builder form of [`ResponseMap::insert_if_absent`].
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insert_if_absent(key, value);
        self
    }

    /// Merges `other` into `self`; keys already present keep their value.
    pub fn merge(&mut self, other: ResponseMap) {
        for (key, value) in other.entries {
            self.insert_if_absent(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Map(
            self.entries
                .into_iter()
                .map(|(k, v)| (Value::from(k), v))
                .collect(),
        )
    }

    /// Reads a decoded response back. Non-text keys are skipped.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Map(entries) = value else {
            return None;
        };
        let mut map = ResponseMap::new();
        for (key, value) in entries {
            if let Some(key) = key_str(&key) {
                map.insert_if_absent(key.to_string(), value);
            }
        }
        Some(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::from(k), v))
                .collect(),
        )
    }

    #[test]
    fn test_minimal_envelope() {
        let env = RequestEnvelope::from_value(map(vec![("cmd", Value::from("directory"))])).unwrap();
        assert_eq!(env.cmd, "directory");
        assert!(env.params.is_none());
        assert!(env.auth.is_none());
    }

    #[test]
    fn test_nil_fields_are_absent() {
        let env = RequestEnvelope::from_value(map(vec![
            ("cmd", Value::from("get")),
            ("params", Value::Nil),
            ("auth", Value::Nil),
        ]))
        .unwrap();
        assert!(env.params.is_none());
        assert!(env.auth.is_none());
    }

    #[test]
    fn test_binary_keys_accepted() {
        let value = Value::Map(vec![
            (Value::Binary(b"cmd".to_vec()), Value::from("test")),
            (Value::Binary(b"auth".to_vec()), Value::from("a:b")),
        ]);
        let env = RequestEnvelope::from_value(value).unwrap();
        assert_eq!(env.cmd, "test");
        assert_eq!(env.auth, Some(Value::from("a:b")));
    }

    #[test]
    fn test_shape_errors() {
        assert_eq!(
            RequestEnvelope::from_value(Value::from(3)),
            Err(CodecError::NotAMap)
        );
        assert_eq!(
            RequestEnvelope::from_value(map(vec![("params", Value::from(1))])),
            Err(CodecError::MissingCommand)
        );
        assert_eq!(
            RequestEnvelope::from_value(map(vec![("cmd", Value::from(7))])),
            Err(CodecError::MissingCommand)
        );
        assert_eq!(
            RequestEnvelope::from_value(map(vec![("cmd", Value::Binary(b"init".to_vec()))])),
            Err(CodecError::MissingCommand)
        );
    }

    #[test]
    fn test_first_write_wins() {
        let mut response = ResponseMap::new();
        assert!(response.insert_if_absent("auth", Value::from("fresh")));
        assert!(!response.insert_if_absent("auth", Value::from("stale")));

        response.merge(
            ResponseMap::new()
                .with("auth", Value::from("handler"))
                .with("result", Value::from(1)),
        );

        assert_eq!(response.get("auth"), Some(&Value::from("fresh")));
        assert_eq!(response.get("result"), Some(&Value::from(1)));
        assert_eq!(response.keys().collect::<Vec<_>>(), vec!["auth", "result"]);
    }

    #[test]
    fn test_response_value_round_trip() {
        let response = ResponseMap::new()
            .with("auth", Value::from("s:v"))
            .with("content", Value::Binary(vec![0, 1, 2]));
        let back = ResponseMap::from_value(response.clone().into_value()).unwrap();
        assert_eq!(back, response);
    }
}
