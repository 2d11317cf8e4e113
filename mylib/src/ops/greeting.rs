//! Greeting construction

use crate::types::{BridgeError, Result};

/// Build the greeting for `name`
pub fn hello(name: &str) -> String {
    log::trace!("hello({:?})", name);
    format!("Hello {}", name)
}

/// Build the greeting from raw bytes, rejecting anything that is not UTF-8
pub fn hello_utf8(name: &[u8]) -> Result<String> {
    let name = std::str::from_utf8(name)
        .map_err(|e| BridgeError::EncodingError(format!("greeting input: {}", e)))?;
    Ok(hello(name))
}
