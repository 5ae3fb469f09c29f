//! `core:*` - pass-through data resources
//!
//! Outputs echo the inputs plus a synthesized `id`. Useful for modelling
//! remote resources whose outputs are known up front.

use super::{digest, str_input};
use declarative::{ErrorCategory, Inputs, Outputs, ProviderError, ResourceProvider, StateRecord};
use serde_json::Value;

/// Input that makes the provider fail with the given error category
const FAIL_WITH: &str = "fail_with";

pub struct DataProvider;

impl DataProvider {
    fn outputs(resource_type: &str, inputs: &Inputs) -> Result<Outputs, ProviderError> {
        if let Some(value) = inputs.get(FAIL_WITH) {
            let category: ErrorCategory = serde_json::from_value(value.clone())
                .map_err(|_| ProviderError::invalid(format!("unknown error category {value}")))?;
            return Err(ProviderError::new(category, "failure requested by `fail_with`"));
        }

        let mut outputs = inputs.clone();
        if !outputs.contains_key("id") {
            let name = match str_input(inputs, "name")? {
                Some(name) => name.to_string(),
                None => digest(inputs)?.to_hex()[..12].to_string(),
            };
            outputs.insert("id".into(), Value::String(format!("{resource_type}/{name}")));
        }
        Ok(outputs)
    }
}

impl ResourceProvider for DataProvider {
    fn create(&self, resource_type: &str, inputs: &Inputs) -> Result<Outputs, ProviderError> {
        Self::outputs(resource_type, inputs)
    }

    fn delete(&self, resource_type: &str, prior: &StateRecord) -> Result<(), ProviderError> {
        log::debug!("{resource_type}: dropping {}", prior.node_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(value: Value) -> Inputs {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_outputs_echo_inputs_with_id() {
        let out = DataProvider
            .create("core:secret", &inputs(json!({ "name": "config", "replication": "auto" })))
            .unwrap();
        assert_eq!(out["id"], json!("core:secret/config"));
        assert_eq!(out["replication"], json!("auto"));
    }

    #[test]
    fn test_explicit_id_is_kept() {
        let out = DataProvider
            .create("core:secret", &inputs(json!({ "id": "projects/p/secrets/config" })))
            .unwrap();
        assert_eq!(out["id"], json!("projects/p/secrets/config"));
    }

    #[test]
    fn test_id_without_name_is_stable() {
        let a = DataProvider.create("core:account", &inputs(json!({ "x": 1 }))).unwrap();
        let b = DataProvider.create("core:account", &inputs(json!({ "x": 1 }))).unwrap();
        assert_eq!(a["id"], b["id"]);
        assert_eq!(a["id"].as_str().unwrap().len(), "core:account/".len() + 12);
    }

    #[test]
    fn test_fail_with() {
        let err = DataProvider
            .create("core:x", &inputs(json!({ "fail_with": "rate_limit" })))
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::RateLimit);

        let err = DataProvider
            .create("core:x", &inputs(json!({ "fail_with": "bogus" })))
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::InvalidConfig);
    }
}
