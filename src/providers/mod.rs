//! Built-in resource providers
//!
//! All of them are local and deterministic, so stacks can be planned and
//! applied without cloud credentials:
//! - `core:*` - pass-through data resources
//! - `random:string` - derived identifiers
//! - `local:file` - files on disk

mod data;
mod file;
mod random;

pub use data::DataProvider;
pub use file::FileProvider;
pub use random::RandomProvider;

use declarative::{ErrorCategory, Inputs, ProviderError, ProviderRegistry};
use serde_json::Value;
use std::io;

/// Registry with every built-in family
pub fn registry() -> ProviderRegistry {
    ProviderRegistry::new()
        .with("core", DataProvider)
        .with("local", FileProvider)
        .with("random", RandomProvider)
}

/// Kind part of a `family:kind` type name
fn kind_of(resource_type: &str) -> &str {
    resource_type
        .split_once(':')
        .map_or(resource_type, |(_, kind)| kind)
}

fn str_input<'a>(inputs: &'a Inputs, key: &str) -> Result<Option<&'a str>, ProviderError> {
    match inputs.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ProviderError::invalid(format!(
            "`{key}` must be a string, got {other}"
        ))),
    }
}

fn bool_input(inputs: &Inputs, key: &str, default: bool) -> Result<bool, ProviderError> {
    match inputs.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ProviderError::invalid(format!(
            "`{key}` must be a boolean, got {other}"
        ))),
    }
}

/// Short stable digest of a set of inputs
fn digest(inputs: &Inputs) -> Result<blake3::Hash, ProviderError> {
    let bytes = serde_json::to_vec(inputs)
        .map_err(|e| ProviderError::invalid(format!("inputs are not serializable: {e}")))?;
    Ok(blake3::hash(&bytes))
}

fn io_error(context: &str, e: &io::Error) -> ProviderError {
    let category = match e.kind() {
        io::ErrorKind::PermissionDenied => ErrorCategory::PermissionDenied,
        io::ErrorKind::NotFound => ErrorCategory::NotFound,
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => {
            ErrorCategory::Network
        }
        _ => ErrorCategory::Other,
    };
    ProviderError::new(category, format!("{context}: {e}"))
}
