//! Qualified names

use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace-qualified name, rendered as `{namespace}local`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Namespace URI, empty when unqualified
    pub namespace: String,
    /// Local part
    pub local: String,
}

impl QualifiedName {
    /// Create a qualified name
    #[must_use]
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// Create a name without a namespace
    #[must_use]
    pub fn local(local: impl Into<String>) -> Self {
        Self::new("", local)
    }

    /// Parse the `{namespace}local` form; text without braces is a bare local name
    #[must_use]
    pub fn parse(text: &str) -> Self {
        if let Some(rest) = text.strip_prefix('{') {
            if let Some((namespace, local)) = rest.split_once('}') {
                return Self::new(namespace, local);
            }
        }
        Self::local(text)
    }

    /// Whether the namespace is empty
    #[inline]
    #[must_use]
    pub fn is_unqualified(&self) -> bool {
        self.namespace.is_empty()
    }

    /// Match against a recorded name
    ///
    /// Records written without a namespace match on the local part alone.
    #[must_use]
    pub fn matches_recorded(&self, recorded: &QualifiedName) -> bool {
        if recorded.is_unqualified() {
            self.local == recorded.local
        } else {
            self == recorded
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}
