//! MessagePack envelope codec backed by `rmpv`.

use crate::domain::error::CodecError;
use crate::ports::outbound::EnvelopeCodec;
use rmp::Marker;
use rmpv::Value;

pub const MSGPACK_CONTENT_TYPE: &str = "application/x-msgpack";

/// Dynamic MessagePack codec.
///
/// Decoding stops after the first complete value; whatever follows is ignored.
/// The reserved marker `0xc1` is refused at any depth.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackCodec;

impl MsgpackCodec {
    pub fn new() -> Self {
        Self
    }
}

impl EnvelopeCodec for MsgpackCodec {
    fn decode(&self, body: &[u8]) -> Result<Value, CodecError> {
        check_markers(body)?;
        let mut reader = body;
        rmpv::decode::read_value(&mut reader).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        rmpv::encode::write_value(&mut out, value)
            .map_err(|e| CodecError::Encode(format!("msgpack encode error: {e}")))?;
        Ok(out)
    }

    fn content_type(&self) -> &'static str {
        MSGPACK_CONTENT_TYPE
    }
}

/// Walks the markers of the first value in `body`. `rmpv` reads the reserved
/// marker as nil, so it has to be caught before decoding.
fn check_markers(body: &[u8]) -> Result<(), CodecError> {
    let mut rest = body;
    let mut pending: usize = 1;
    while pending > 0 {
        pending -= 1;
        let (&byte, tail) = rest.split_first().ok_or_else(truncated)?;
        rest = tail;

        let (skip, children) = match Marker::from_u8(byte) {
            Marker::Reserved => {
                return Err(CodecError::Decode(format!("reserved marker 0x{byte:02x}")))
            }
            Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => {
                (0, 0)
            }
            Marker::U8 | Marker::I8 => (1, 0),
            Marker::U16 | Marker::I16 => (2, 0),
            Marker::U32 | Marker::I32 | Marker::F32 => (4, 0),
            Marker::U64 | Marker::I64 | Marker::F64 => (8, 0),
            Marker::FixStr(len) => (usize::from(len), 0),
            Marker::Str8 | Marker::Bin8 => (read_len(&mut rest, 1)?, 0),
            Marker::Str16 | Marker::Bin16 => (read_len(&mut rest, 2)?, 0),
            Marker::Str32 | Marker::Bin32 => (read_len(&mut rest, 4)?, 0),
            Marker::FixArray(len) => (0, usize::from(len)),
            Marker::Array16 => (0, read_len(&mut rest, 2)?),
            Marker::Array32 => (0, read_len(&mut rest, 4)?),
            Marker::FixMap(len) => (0, 2 * usize::from(len)),
            Marker::Map16 => (0, 2 * read_len(&mut rest, 2)?),
            Marker::Map32 => (0, read_len(&mut rest, 4)?.saturating_mul(2)),
            // Extension payloads carry a one-byte type tag.
            Marker::FixExt1 => (2, 0),
            Marker::FixExt2 => (3, 0),
            Marker::FixExt4 => (5, 0),
            Marker::FixExt8 => (9, 0),
            Marker::FixExt16 => (17, 0),
            Marker::Ext8 => (read_len(&mut rest, 1)?.saturating_add(1), 0),
            Marker::Ext16 => (read_len(&mut rest, 2)?.saturating_add(1), 0),
            Marker::Ext32 => (read_len(&mut rest, 4)?.saturating_add(1), 0),
        };

        rest = rest.get(skip..).ok_or_else(truncated)?;
        // Every value still owed takes at least one byte.
        pending = pending.saturating_add(children);
        if pending > rest.len() {
            return Err(truncated());
        }
    }
    Ok(())
}

fn read_len(rest: &mut &[u8], width: usize) -> Result<usize, CodecError> {
    if rest.len() < width {
        return Err(truncated());
    }
    let (head, tail) = rest.split_at(width);
    *rest = tail;
    Ok(head.iter().fold(0usize, |len, b| (len << 8) | usize::from(*b)))
}

fn truncated() -> CodecError {
    CodecError::Decode("truncated body".into())
}
