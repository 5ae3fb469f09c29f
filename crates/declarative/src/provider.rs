//! Resource provider interface
//!
//! A provider turns fully-resolved inputs into real infrastructure and
//! reports the resulting outputs. There is one provider per resource family;
//! the engine does not care how many exist. Types are named
//! `family:kind` (e.g., `random:string`) and the registry dispatches on the
//! family.

use crate::error::{ErrorCategory, ProviderError};
use crate::state::StateRecord;
use serde_json::Value;
use std::collections::BTreeMap;

/// Resolved inputs handed to a provider.
pub type Inputs = BTreeMap<String, Value>;

/// Outputs reported by a provider.
pub type Outputs = BTreeMap<String, Value>;

/// Core trait for resource families
///
/// Calls may block on I/O; the executor runs them on worker threads.
pub trait ResourceProvider: Send + Sync {
    /// Create a resource that has no prior state.
    fn create(&self, resource_type: &str, inputs: &Inputs) -> Result<Outputs, ProviderError>;

    /// Converge an existing resource to new inputs.
    ///
    /// Defaults to `create`, which suits providers whose create is an upsert.
    fn update(
        &self,
        resource_type: &str,
        inputs: &Inputs,
        _prior: &StateRecord,
    ) -> Result<Outputs, ProviderError> {
        self.create(resource_type, inputs)
    }

    /// Remove a resource that was previously applied.
    fn delete(&self, resource_type: &str, prior: &StateRecord) -> Result<(), ProviderError>;
}

/// Family part of a `family:kind` type name.
pub fn family_of(resource_type: &str) -> &str {
    resource_type
        .split_once(':')
        .map_or(resource_type, |(family, _)| family)
}

/// Dispatches calls to the provider registered for a type's family.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Box<dyn ResourceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the provider for a family.
    pub fn register(
        &mut self,
        family: impl Into<String>,
        provider: impl ResourceProvider + 'static,
    ) -> &mut Self {
        self.providers.insert(family.into(), Box::new(provider));
        self
    }

    pub fn with(
        mut self,
        family: impl Into<String>,
        provider: impl ResourceProvider + 'static,
    ) -> Self {
        self.register(family, provider);
        self
    }

    /// Registered family names.
    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    fn provider_for(&self, resource_type: &str) -> Result<&dyn ResourceProvider, ProviderError> {
        self.providers
            .get(family_of(resource_type))
            .map(|p| &**p)
            .ok_or_else(|| {
                ProviderError::new(
                    ErrorCategory::InvalidConfig,
                    format!("no provider registered for type `{resource_type}`"),
                )
            })
    }
}

impl ResourceProvider for ProviderRegistry {
    fn create(&self, resource_type: &str, inputs: &Inputs) -> Result<Outputs, ProviderError> {
        self.provider_for(resource_type)?.create(resource_type, inputs)
    }

    fn update(
        &self,
        resource_type: &str,
        inputs: &Inputs,
        prior: &StateRecord,
    ) -> Result<Outputs, ProviderError> {
        self.provider_for(resource_type)?
            .update(resource_type, inputs, prior)
    }

    fn delete(&self, resource_type: &str, prior: &StateRecord) -> Result<(), ProviderError> {
        self.provider_for(resource_type)?.delete(resource_type, prior)
    }
}
