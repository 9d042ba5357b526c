//! Request path to domain resolution.
//!
//! Longest configured prefix wins; prefixes only match on `/` segment
//! boundaries. Unmatched paths resolve to the default domain and never fail.

use tracing::{debug, warn};

/// Paths that legitimately carry no domain. Resolving one of these to the
/// default domain is expected and only logged at debug level.
pub const DEFAULT_INFRA_PATHS: &[&str] = &["/health", "/metrics", "/"];

/// One configured `prefix -> domain` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRoute {
    pub domain: String,
    pub prefix: String,
}

/// Outcome of resolving a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub domain: String,
    /// `false` when the default domain was substituted.
    pub matched: bool,
}

#[derive(Debug, Clone)]
pub struct DomainResolver {
    /// Sorted longest prefix first.
    routes: Vec<DomainRoute>,
    default_domain: String,
    infra_paths: Vec<String>,
}

impl DomainResolver {
    /// Builds a resolver from `(domain, prefix)` pairs.
    ///
    /// Prefixes are normalized to a leading `/` and no trailing `/`.
    #[must_use]
    pub fn new(
        routes: impl IntoIterator<Item = (String, String)>,
        default_domain: impl Into<String>,
    ) -> Self {
        let mut routes: Vec<DomainRoute> = routes
            .into_iter()
            .map(|(domain, prefix)| DomainRoute {
                domain,
                prefix: normalize(&prefix),
            })
            .collect();
        routes.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
        Self {
            routes,
            default_domain: default_domain.into(),
            infra_paths: DEFAULT_INFRA_PATHS.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    /// Replaces the infrastructure allow-list.
    #[must_use]
    pub fn with_infra_paths(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        self.infra_paths = paths.into_iter().map(|p| normalize(&p)).collect();
        self
    }

    #[must_use]
    pub fn default_domain(&self) -> &str {
        &self.default_domain
    }

    #[must_use]
    pub fn routes(&self) -> &[DomainRoute] {
        &self.routes
    }

    /// The route matching `path`, if any. No logging.
    #[must_use]
    pub fn route_for(&self, path: &str) -> Option<&DomainRoute> {
        let path = strip_query(path);
        self.routes
            .iter()
            .find(|route| matches_prefix(path, &route.prefix))
    }

    /// Resolves `path`, substituting the default domain when nothing matches.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Resolution {
        if let Some(route) = self.route_for(path) {
            return Resolution {
                domain: route.domain.clone(),
                matched: true,
            };
        }

        if self.is_infra(path) {
            debug!(path, domain = %self.default_domain, "no domain prefix, using default domain");
        } else {
            warn!(path, domain = %self.default_domain, "path matched no domain prefix, using default domain");
        }
        Resolution {
            domain: self.default_domain.clone(),
            matched: false,
        }
    }

    #[must_use]
    pub fn resolve_domain(&self, path: &str) -> String {
        self.resolve(path).domain
    }

    /// Whether `path` is on the infrastructure allow-list.
    #[must_use]
    pub fn is_infra(&self, path: &str) -> bool {
        let path = strip_query(path);
        self.infra_paths.iter().any(|infra| {
            if infra == "/" {
                path == "/" || path.is_empty()
            } else {
                matches_prefix(path, infra)
            }
        })
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

fn normalize(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
