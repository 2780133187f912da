//! Schema-registry style payload framing.
//!
//! A framed payload starts with one magic byte (`0x00`) followed by the
//! schema id as a 4-byte big-endian integer. The remaining bytes are the
//! user payload.

use crate::error::{BridgeError, Result};

/// Magic byte written in front of the schema id.
pub const MAGIC_BYTE: u8 = 0x00;
/// Number of bytes reserved in front of a framed payload.
pub const FRAMING_LEN: usize = 5;
/// Largest schema id accepted by configuration and event constructors.
pub const MAX_SCHEMA_ID: u32 = 9999;

/// Check that a schema id is inside the accepted range.
pub fn validate_schema_id(schema_id: u32) -> Result<u32> {
    if schema_id > MAX_SCHEMA_ID {
        return Err(BridgeError::validation(format!(
            "schema id {} out of range 0..={}",
            schema_id, MAX_SCHEMA_ID
        )));
    }
    Ok(schema_id)
}

/// Parse a configured schema id. `-1` and empty strings mean "no schema".
pub fn parse_schema_id(raw: &str) -> Result<Option<u32>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let value: i64 = raw
        .parse()
        .map_err(|_| BridgeError::validation(format!("invalid schema id '{}'", raw)))?;
    match value {
        -1 => Ok(None),
        v if (0..=MAX_SCHEMA_ID as i64).contains(&v) => Ok(Some(v as u32)),
        v => Err(BridgeError::validation(format!(
            "schema id {} out of range 0..={}",
            v, MAX_SCHEMA_ID
        ))),
    }
}

/// Build a framed payload: magic byte, big-endian schema id, then `payload`.
pub fn frame(schema_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(FRAMING_LEN + payload.len());
    framed.push(MAGIC_BYTE);
    framed.extend_from_slice(&schema_id.to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Read the schema id from a framed payload.
///
/// Returns `None` when the buffer is too short to hold the framing.
pub fn read_schema_id(bytes: &[u8]) -> Option<u32> {
    let id: [u8; 4] = bytes.get(1..FRAMING_LEN)?.try_into().ok()?;
    Some(u32::from_be_bytes(id))
}

/// Overwrite the schema id of an already framed payload.
pub fn write_schema_id(bytes: &mut [u8], schema_id: u32) -> Result<()> {
    let slot = bytes.get_mut(1..FRAMING_LEN).ok_or_else(|| {
        BridgeError::validation("payload too short to hold schema framing")
    })?;
    slot.copy_from_slice(&schema_id.to_be_bytes());
    Ok(())
}
