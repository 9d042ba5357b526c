//! Process configuration: command line and environment, validated up front.
//!
//! Global settings come from [`Cli`] (each flag also reads a `STOREFRONT_*`
//! variable). Per-domain settings are keyed by domain name and read from the
//! environment directly:
//!
//! - `STOREFRONT_DOMAIN_<NAME>_URL` (required)
//! - `STOREFRONT_DOMAIN_<NAME>_PREFIX` (default `/api/<name>`)
//!
//! `<NAME>` is the domain name upper-cased with `-` replaced by `_`.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use clap::Parser;

use crate::network::NetworkConfig;
use crate::storage::ConnectionSpec;
use crate::telemetry::LogFormat;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no domains configured (set STOREFRONT_DOMAINS)")]
    NoDomains,
    #[error("missing required setting {var}")]
    Missing { var: String },
    #[error("invalid domain name '{name}': use lowercase letters, digits, '-' and '_'")]
    InvalidDomainName { name: String },
    #[error("domain '{name}' is listed more than once")]
    DuplicateDomain { name: String },
    #[error("route prefix '{prefix}' is used by more than one domain")]
    DuplicatePrefix { prefix: String },
    #[error("default domain '{domain}' is not a configured domain")]
    UnknownDefaultDomain { domain: String },
    #[error("{var} is not a connection URL (expected <scheme>://...)")]
    InvalidUrl { var: String },
    #[error("{var} '{prefix}' is not a route prefix: use '/'-separated segments of letters, digits, '-', '.', '_' and '~'")]
    InvalidPrefix { var: String, prefix: String },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Command-line and environment settings.
#[derive(Debug, Clone, Parser)]
#[command(name = "storefront-server", version, about = "Multi-domain storefront API server")]
pub struct Cli {
    /// Comma-separated domain names.
    #[arg(long, env = "STOREFRONT_DOMAINS", value_delimiter = ',')]
    pub domains: Vec<String>,

    /// Domain used for paths that match no domain prefix. Defaults to the first domain.
    #[arg(long, env = "STOREFRONT_DEFAULT_DOMAIN")]
    pub default_domain: Option<String>,

    /// HS256 secret used to verify bearer tokens.
    #[arg(long, env = "STOREFRONT_AUTH_SECRET", hide_env_values = true)]
    pub auth_secret: Option<String>,

    /// Connection URL of the fallback store used before a domain connects.
    #[arg(long, env = "STOREFRONT_FALLBACK_URL", hide_env_values = true)]
    pub fallback_url: Option<String>,

    /// Disable the fallback store; requests fail until their domain is connected.
    #[arg(long, env = "STOREFRONT_STRICT_BINDING")]
    pub strict_binding: bool,

    #[arg(long, env = "STOREFRONT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "STOREFRONT_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "STOREFRONT_CONNECT_TIMEOUT_MS", default_value_t = 10_000)]
    pub connect_timeout_ms: u64,

    #[arg(long, env = "STOREFRONT_REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub request_timeout_ms: u64,

    #[arg(long, env = "STOREFRONT_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub sweep_interval_secs: u64,

    /// Age after which a pending order is marked abandoned.
    #[arg(long, env = "STOREFRONT_ABANDON_AFTER_SECS", default_value_t = 86_400)]
    pub abandon_after_secs: u64,

    #[arg(long, env = "STOREFRONT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "STOREFRONT_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// One business domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConfig {
    pub name: String,
    pub url: ConnectionSpec,
    pub prefix: String,
}

/// Validated process configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub domains: Vec<DomainConfig>,
    pub default_domain: String,
    /// `None` in strict binding mode.
    pub fallback: Option<ConnectionSpec>,
    pub auth_secret: String,
    pub network: NetworkConfig,
    pub connect_timeout: Duration,
    pub sweep_interval: Duration,
    pub abandon_after: Duration,
    pub log_format: LogFormat,
    pub metrics_port: Option<u16>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("domains", &self.domains)
            .field("default_domain", &self.default_domain)
            .field("fallback", &self.fallback)
            .field("auth_secret", &"***")
            .field("network", &self.network)
            .field("connect_timeout", &self.connect_timeout)
            .field("sweep_interval", &self.sweep_interval)
            .field("abandon_after", &self.abandon_after)
            .field("log_format", &self.log_format)
            .field("metrics_port", &self.metrics_port)
            .finish()
    }
}

/// Environment variable holding `setting` for `domain`.
#[must_use]
pub fn domain_var(domain: &str, setting: &str) -> String {
    format!(
        "STOREFRONT_DOMAIN_{}_{setting}",
        domain.to_ascii_uppercase().replace('-', "_")
    )
}

fn is_valid_domain_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Each segment must be non-empty and unreserved; anything else is either
/// a route parameter or rejected by the router.
fn is_valid_prefix(prefix: &str) -> bool {
    prefix.strip_prefix('/').is_some_and(|rest| {
        rest.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        })
    })
}

fn parse_url(var: &str, value: Option<String>) -> Result<ConnectionSpec, ConfigError> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::Missing {
            var: var.to_string(),
        })?;
    let spec = ConnectionSpec::new(value);
    if spec.scheme().is_empty() || !spec.expose().contains("://") {
        return Err(ConfigError::InvalidUrl {
            var: var.to_string(),
        });
    }
    Ok(spec)
}

fn positive(field: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

impl AppConfig {
    /// Builds the configuration from `cli` and the process environment.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn from_env(cli: &Cli) -> Result<Self, ConfigError> {
        Self::from_lookup(cli, |var| std::env::var(var).ok())
    }

    /// Builds the configuration, reading per-domain variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn from_lookup(
        cli: &Cli,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let names: Vec<String> = cli
            .domains
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if names.is_empty() {
            return Err(ConfigError::NoDomains);
        }

        let mut seen = HashSet::new();
        let mut prefixes = HashSet::new();
        let mut domains = Vec::with_capacity(names.len());
        for name in names {
            if !is_valid_domain_name(&name) {
                return Err(ConfigError::InvalidDomainName { name });
            }
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateDomain { name });
            }

            let url_var = domain_var(&name, "URL");
            let url = parse_url(&url_var, lookup(&url_var))?;

            let prefix_var = domain_var(&name, "PREFIX");
            let prefix = lookup(&prefix_var)
                .map(|p| p.trim().trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .map_or_else(|| format!("/api/{name}"), |p| {
                    if p.starts_with('/') {
                        p
                    } else {
                        format!("/{p}")
                    }
                });
            if !is_valid_prefix(&prefix) {
                return Err(ConfigError::InvalidPrefix {
                    var: prefix_var,
                    prefix,
                });
            }
            if !prefixes.insert(prefix.clone()) {
                return Err(ConfigError::DuplicatePrefix { prefix });
            }

            domains.push(DomainConfig { name, url, prefix });
        }

        let default_domain = match &cli.default_domain {
            Some(domain) if !seen.contains(domain.trim()) => {
                return Err(ConfigError::UnknownDefaultDomain {
                    domain: domain.clone(),
                });
            }
            Some(domain) => domain.trim().to_string(),
            None => domains[0].name.clone(),
        };

        let auth_secret = cli
            .auth_secret
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing {
                var: "STOREFRONT_AUTH_SECRET".to_string(),
            })?;

        let fallback = if cli.strict_binding {
            None
        } else {
            Some(parse_url("STOREFRONT_FALLBACK_URL", cli.fallback_url.clone())?)
        };

        let network = NetworkConfig {
            host: cli.host.clone(),
            port: cli.port,
            request_timeout: Duration::from_millis(positive(
                "STOREFRONT_REQUEST_TIMEOUT_MS",
                cli.request_timeout_ms,
            )?),
            ..NetworkConfig::default()
        };

        Ok(Self {
            domains,
            default_domain,
            fallback,
            auth_secret,
            network,
            connect_timeout: Duration::from_millis(positive(
                "STOREFRONT_CONNECT_TIMEOUT_MS",
                cli.connect_timeout_ms,
            )?),
            sweep_interval: Duration::from_secs(positive(
                "STOREFRONT_SWEEP_INTERVAL_SECS",
                cli.sweep_interval_secs,
            )?),
            abandon_after: Duration::from_secs(positive(
                "STOREFRONT_ABANDON_AFTER_SECS",
                cli.abandon_after_secs,
            )?),
            log_format: cli.log_format,
            metrics_port: cli.metrics_port,
        })
    }

    /// `(domain, prefix)` pairs for the resolver.
    #[must_use]
    pub fn routes(&self) -> Vec<(String, String)> {
        self.domains
            .iter()
            .map(|d| (d.name.clone(), d.prefix.clone()))
            .collect()
    }

    /// `(domain, url)` pairs for the connection registry.
    #[must_use]
    pub fn connection_specs(&self) -> Vec<(String, ConnectionSpec)> {
        self.domains
            .iter()
            .map(|d| (d.name.clone(), d.url.clone()))
            .collect()
    }

    #[must_use]
    pub fn domain_names(&self) -> Vec<String> {
        self.domains.iter().map(|d| d.name.clone()).collect()
    }
}
