use std::fmt;

/// Opaque connection string for a backing store (e.g. `postgres://u:p@h/db`).
///
/// `Debug` and `Display` print the redacted form so specs can be logged
/// without leaking credentials.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionSpec(String);

impl ConnectionSpec {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw string, including any credentials. Only drivers should read this.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Text before `://`, lowercased. Empty if the spec has no scheme.
    #[must_use]
    pub fn scheme(&self) -> String {
        self.0
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Text after `://`, or the whole spec if it has no scheme.
    #[must_use]
    pub fn target(&self) -> &str {
        self.0.split_once("://").map_or(self.0.as_str(), |(_, rest)| rest)
    }

    /// The spec with any `user:password@` userinfo replaced by `***@`.
    #[must_use]
    pub fn redacted(&self) -> String {
        let Some((scheme, rest)) = self.0.split_once("://") else {
            return self.0.clone();
        };
        let authority_end = rest.find('/').unwrap_or(rest.len());
        match rest[..authority_end].rfind('@') {
            Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
            None => self.0.clone(),
        }
    }
}

impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionSpec").field(&self.redacted()).finish()
    }
}

impl fmt::Display for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}
