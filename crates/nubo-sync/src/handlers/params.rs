//! Typed access to the untyped `params` value.
//!
//! A missing, nil or wrongly typed required parameter is `MISSING_PARAMETER`
//! with the parameter name as detail.

use crate::domain::envelope::key_str;
use crate::domain::error::{NuboError, NuboResult};
use rmpv::Value;

#[derive(Debug, Clone, Copy)]
pub struct Params<'a> {
    entries: &'a [(Value, Value)],
}

impl<'a> Params<'a> {
    /// Anything other than a map is treated as an empty parameter set.
    pub fn new(params: Option<&'a Value>) -> Self {
        let entries: &[(Value, Value)] = match params {
            Some(Value::Map(entries)) => entries.as_slice(),
            _ => &[],
        };
        Self { entries }
    }

    /// Raw value of `name`; nil counts as absent.
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(k, _)| key_str(k) == Some(name))
            .map(|(_, v)| v)
            .filter(|v| !v.is_nil())
    }

    pub fn str(&self, name: &str) -> NuboResult<&'a str> {
        self.get(name)
            .and_then(|v| match v {
                Value::String(s) => s.as_str(),
                Value::Binary(b) => std::str::from_utf8(b).ok(),
                _ => None,
            })
            .ok_or_else(|| NuboError::missing_parameter(name))
    }

    pub fn int(&self, name: &str) -> NuboResult<i64> {
        self.get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| NuboError::missing_parameter(name))
    }

    /// Byte content; text is accepted as its UTF-8 bytes.
    pub fn bytes(&self, name: &str) -> NuboResult<&'a [u8]> {
        self.get(name)
            .and_then(|v| match v {
                Value::Binary(b) => Some(b.as_slice()),
                Value::String(s) => Some(s.as_bytes()),
                _ => None,
            })
            .ok_or_else(|| NuboError::missing_parameter(name))
    }

    /// Loose truthiness: absent, nil, `false`, zero, `""` and `"0"` are false.
    pub fn flag(&self, name: &str) -> bool {
        match self.get(name) {
            None => false,
            Some(Value::Boolean(b)) => *b,
            Some(Value::Integer(i)) => i.as_i64() != Some(0),
            Some(Value::F32(f)) => *f != 0.0,
            Some(Value::F64(f)) => *f != 0.0,
            Some(Value::String(s)) => !matches!(s.as_str(), Some("") | Some("0")),
            Some(Value::Binary(b)) => !(b.is_empty() || b.as_slice() == b"0"),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Map(m)) => !m.is_empty(),
            Some(_) => true,
        }
    }
}
