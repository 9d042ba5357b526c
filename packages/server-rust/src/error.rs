//! Error taxonomy for connection, binding, and handle operations.

use crate::binding::DomainStatus;

/// Failure to establish a domain's backing-store connection.
///
/// `Clone` because one outcome is delivered to every caller coalesced onto
/// the same connect attempt. Retried only on the next explicit `connect`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("unknown domain: {domain}")]
    UnknownDomain { domain: String },
    #[error("no fallback connection is configured")]
    NoFallback,
    #[error("connection to domain '{domain}' timed out after {timeout_ms}ms")]
    Timeout { domain: String, timeout_ms: u64 },
    #[error("connection to domain '{domain}' failed: {reason}")]
    Failed { domain: String, reason: String },
    #[error("connect attempt for domain '{domain}' ended without a result")]
    Aborted { domain: String },
    #[error("connection registry is shut down")]
    ShutDown,
}

/// Non-blocking lookup failures on the connection registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown domain: {domain}")]
    UnknownDomain { domain: String },
    #[error("domain '{domain}' is not connected (status: {status})")]
    NotConnected { domain: String, status: DomainStatus },
}

/// Failure to produce a binding for a `(domain, entity)` pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("unknown entity: {entity}")]
    UnknownEntity { entity: String },
    #[error("unknown domain: {domain}")]
    UnknownDomain { domain: String },
    /// Neither the domain's connection nor the fallback could be used.
    /// Retryable: the domain may connect on a later attempt.
    #[error("no store available for {entity} in domain '{domain}': {reason}")]
    BindingUnavailable {
        domain: String,
        entity: String,
        reason: String,
    },
}

impl BindError {
    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BindingUnavailable { .. })
    }
}

/// Errors from operations issued through a `BoundHandle`.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error(transparent)]
    Binding(#[from] BindError),
    #[error("invalid {entity}: {}", errors.join("; "))]
    Invalid { entity: String, errors: Vec<String> },
    #[error("store error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_binding_unavailable_is_retryable() {
        let unavailable = BindError::BindingUnavailable {
            domain: "flowers".to_string(),
            entity: "order".to_string(),
            reason: "connecting".to_string(),
        };
        assert!(unavailable.is_retryable());
        assert!(!BindError::UnknownEntity {
            entity: "x".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn invalid_lists_every_error() {
        let err = HandleError::Invalid {
            entity: "product".to_string(),
            errors: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "invalid product: a; b");
    }

    #[test]
    fn not_connected_names_status() {
        let err = RegistryError::NotConnected {
            domain: "laptops".to_string(),
            status: DomainStatus::Connecting,
        };
        assert_eq!(
            err.to_string(),
            "domain 'laptops' is not connected (status: connecting)"
        );
    }
}
