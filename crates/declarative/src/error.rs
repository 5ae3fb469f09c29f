//! Error types for graph validation, provider calls and state persistence.
//!
//! Provider failures are categorized so the executor can decide whether an
//! operation is worth retrying. Everything else is either a static
//! validation error (reported before any provider call) or a per-node
//! failure that is contained to that node and its dependents.

use thiserror::Error;

/// Categories of provider errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Network-related errors (transient, retryable)
    Network,
    /// Rate limited by the remote API (transient, retryable)
    RateLimit,
    /// Quota temporarily exhausted (transient, retryable)
    Quota,
    /// The requested configuration is invalid
    InvalidConfig,
    /// The caller is not allowed to perform the operation
    PermissionDenied,
    /// The remote object does not exist
    NotFound,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::Quota)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::RateLimit => "Rate limited",
            Self::Quota => "Quota exhausted",
            Self::InvalidConfig => "Invalid configuration",
            Self::PermissionDenied => "Permission denied",
            Self::NotFound => "Resource not found",
            Self::Other => "Unexpected error",
        }
    }
}

/// Failure reported by a resource provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {message}", category.description())]
pub struct ProviderError {
    /// What kind of failure this is
    pub category: ErrorCategory,
    /// Provider-supplied detail
    pub message: String,
}

impl ProviderError {
    /// Create a provider error with an explicit category.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// A transient error that the executor will retry.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Network, message)
    }

    /// An invalid-configuration error that fails immediately.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InvalidConfig, message)
    }

    /// Whether the executor should retry the failed call.
    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

/// Errors produced by the provisioning engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The dependency graph contains a cycle
    #[error("dependency cycle between: {}", nodes.join(", "))]
    Cycle {
        /// Ids of the nodes taking part in the cycle
        nodes: Vec<String>,
    },

    /// A reference points at a node (or output key) that is not declared
    #[error("{node} references {source_id}.{key}, which is not declared")]
    DanglingReference {
        /// Node holding the reference
        node: String,
        /// Referenced node id
        source_id: String,
        /// Referenced output key
        key: String,
    },

    /// Two declarations share the same id
    #[error("resource id declared more than once: {0}")]
    DuplicateNode(String),

    /// A dependency finished without producing the referenced output
    #[error("{node}: output {source_id}.{key} is not available")]
    UnresolvedReference {
        /// Node whose inputs could not be resolved
        node: String,
        /// Referenced node id
        source_id: String,
        /// Referenced output key
        key: String,
    },

    /// A computed attribute rejected its inputs
    #[error("{node}: computed value `{function}` failed: {message}")]
    Compute {
        /// Node holding the computed value
        node: String,
        /// Name of the computation
        function: String,
        /// Why it failed
        message: String,
    },

    /// Provider call failed
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// State could not be loaded or persisted
    #[error("state store error: {message}")]
    StateStore {
        /// What went wrong
        message: String,
    },

    /// Worker pool could not be started
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a state store error.
    pub fn state(message: impl Into<String>) -> Self {
        Error::StateStore {
            message: message.into(),
        }
    }

    /// Whether this error was detected before anything was applied.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Cycle { .. } | Error::DanglingReference { .. } | Error::DuplicateNode(_)
        )
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
