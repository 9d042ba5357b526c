use crate::types::Principal;

/// Per-request context carrying the resolved domain, identity and tracing id.
/// Threaded from the HTTP layer into handlers for audit and domain isolation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Business domain the request was routed to.
    pub domain: String,
    /// Authenticated principal, if the request is authenticated.
    pub principal: Option<Principal>,
    /// Request identifier propagated in `x-request-id`.
    pub request_id: String,
}

impl RequestContext {
    #[must_use]
    pub fn new(domain: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            principal: None,
            request_id: request_id.into(),
        }
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Subject id of the principal, or `"anonymous"`.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.principal.as_ref().map_or("anonymous", |p| p.id.as_str())
    }
}
