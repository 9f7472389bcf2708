//! Transport encoding for blob content
//!
//! Blob content travels as base64 of the file's UTF-8 bytes. Encoding works on
//! bytes, never on chars, so multi-byte sequences survive unchanged.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("invalid base64 content: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decoded content is not valid UTF-8")]
    NotUtf8(#[from] std::string::FromUtf8Error),
}

/// Base64-encoded blob content, as sent to and received from a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedContent(String);

impl EncodedContent {
    /// Wrap base64 text received from a host
    pub fn from_base64(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw bytes carried by this content
    ///
    /// Hosts wrap long base64 lines, so ASCII whitespace is ignored.
    pub fn decode_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        let compact: String = self
            .0
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        Ok(STANDARD.decode(compact)?)
    }

    /// Decode back to the original text
    pub fn decode(&self) -> Result<String, EncodingError> {
        Ok(String::from_utf8(self.decode_bytes()?)?)
    }
}

/// Encode text content for transport
pub fn encode(content: &str) -> EncodedContent {
    encode_bytes(content.as_bytes())
}

pub fn encode_bytes(bytes: &[u8]) -> EncodedContent {
    EncodedContent(STANDARD.encode(bytes))
}
