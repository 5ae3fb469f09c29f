//! `random:string` - derived identifiers
//!
//! The value is drawn from a blake3 output stream seeded with the inputs,
//! so it is stable for as long as the inputs (including `keepers`) are.

use super::{bool_input, digest, kind_of, str_input};
use declarative::{Inputs, Outputs, ProviderError, ResourceProvider, StateRecord};
use serde_json::Value;

const DEFAULT_LENGTH: u64 = 16;
const MAX_LENGTH: u64 = 1024;
const SPECIAL: &str = "!#$%&*()-_=+[]{}<>:?";

pub struct RandomProvider;

impl ResourceProvider for RandomProvider {
    fn create(&self, resource_type: &str, inputs: &Inputs) -> Result<Outputs, ProviderError> {
        match kind_of(resource_type) {
            "string" => random_string(inputs),
            _ => Err(ProviderError::invalid(format!(
                "unsupported random type `{resource_type}`"
            ))),
        }
    }

    fn delete(&self, _resource_type: &str, _prior: &StateRecord) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn random_string(inputs: &Inputs) -> Result<Outputs, ProviderError> {
    let length = match inputs.get("length") {
        None => DEFAULT_LENGTH,
        Some(value) => value
            .as_u64()
            .filter(|n| (1..=MAX_LENGTH).contains(n))
            .ok_or_else(|| {
                ProviderError::invalid(format!("`length` must be 1..={MAX_LENGTH}, got {value}"))
            })?,
    };

    let mut alphabet: Vec<char> = Vec::new();
    if bool_input(inputs, "lower", true)? {
        alphabet.extend('a'..='z');
    }
    if bool_input(inputs, "upper", true)? {
        alphabet.extend('A'..='Z');
    }
    if bool_input(inputs, "numeric", true)? {
        alphabet.extend('0'..='9');
    }
    if bool_input(inputs, "special", false)? {
        alphabet.extend(SPECIAL.chars());
    }
    if alphabet.is_empty() {
        return Err(ProviderError::invalid("every character class is disabled"));
    }

    let seed = digest(inputs)?;
    let mut reader = blake3::Hasher::new_derive_key("strata random:string")
        .update(seed.as_bytes())
        .finalize_xof();

    let mut result = str_input(inputs, "prefix")?.unwrap_or_default().to_string();
    let mut byte = [0u8; 1];
    for _ in 0..length {
        reader.fill(&mut byte);
        result.push(alphabet[usize::from(byte[0]) % alphabet.len()]);
    }

    Ok(Outputs::from([
        ("id".to_string(), Value::String(result.clone())),
        ("length".to_string(), Value::from(length)),
        ("result".to_string(), Value::String(result)),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(value: Value) -> Inputs {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_repository_suffix() {
        let declared = inputs(json!({ "length": 4, "upper": false, "special": false }));
        let out = RandomProvider.create("random:string", &declared).unwrap();
        let result = out["result"].as_str().unwrap();

        assert_eq!(result.len(), 4);
        assert!(result.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        // Stable across calls with the same inputs
        assert_eq!(RandomProvider.create("random:string", &declared).unwrap(), out);
    }

    #[test]
    fn test_keepers_change_result() {
        let a = RandomProvider
            .create("random:string", &inputs(json!({ "keepers": { "v": 1 } })))
            .unwrap();
        let b = RandomProvider
            .create("random:string", &inputs(json!({ "keepers": { "v": 2 } })))
            .unwrap();
        assert_ne!(a["result"], b["result"]);
        assert_eq!(a["result"].as_str().unwrap().len(), 16);
    }

    #[test]
    fn test_prefix() {
        let out = RandomProvider
            .create("random:string", &inputs(json!({ "length": 6, "prefix": "repo-" })))
            .unwrap();
        assert!(out["result"].as_str().unwrap().starts_with("repo-"));
        assert_eq!(out["result"].as_str().unwrap().len(), 11);
    }

    #[test]
    fn test_invalid_inputs() {
        let no_classes = inputs(json!({ "lower": false, "upper": false, "numeric": false }));
        assert!(RandomProvider.create("random:string", &no_classes).is_err());
        assert!(
            RandomProvider
                .create("random:string", &inputs(json!({ "length": 0 })))
                .is_err()
        );
        assert!(RandomProvider.create("random:uuid", &Inputs::new()).is_err());
    }
}
