//! Text document codec shared by the manifest and the remote index.
//!
//! Documents are YAML. Every line feed is emitted as CRLF, which matches what
//! existing git-bin repositories already have checked in.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

/// Serialize `value` as a document.
pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    let yaml = serde_yaml::to_string(value)?;
    Ok(yaml.replace("\r\n", "\n").replace('\n', "\r\n"))
}

/// Parse a document.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_yaml::from_str(text)?)
}

/// Parse a document from raw bytes, giving up quietly on anything that is
/// not UTF-8 or not shaped like `T`.
pub fn probe<T: DeserializeOwned>(bytes: &[u8]) -> Option<T> {
    let text = std::str::from_utf8(bytes).ok()?;
    serde_yaml::from_str(text).ok()
}
