//! Outbound message headers.

use crate::error::{BridgeError, Result};

/// Largest accepted header key or value, in bytes.
pub const MAX_HEADER_FIELD_LEN: usize = 1024 * 1024;

/// A single header entry. Keys and values are raw byte strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Header {
    /// Render as `key=value`, the form used for received headers.
    pub fn to_pair_string(&self) -> String {
        format!(
            "{}={}",
            String::from_utf8_lossy(&self.key),
            String::from_utf8_lossy(&self.value)
        )
    }
}

/// Ordered header set attached to an outbound event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub(crate) fn with_capacity(expected: usize) -> Self {
        Self {
            entries: Vec::with_capacity(expected.max(1)),
        }
    }

    pub(crate) fn push(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        check_field("key", key)?;
        check_field("value", value)?;
        self.entries.push(Header {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[Header] {
        &self.entries
    }
}

fn check_field(name: &str, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(BridgeError::validation(format!("header {} is empty", name)));
    }
    if bytes.len() > MAX_HEADER_FIELD_LEN {
        return Err(BridgeError::validation(format!(
            "header {} length {} exceeds {}",
            name,
            bytes.len(),
            MAX_HEADER_FIELD_LEN
        )));
    }
    Ok(())
}
