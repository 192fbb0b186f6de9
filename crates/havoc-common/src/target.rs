//! ---
//! havoc_section: "01-core-functionality"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Workload identifiers monitored as part of the steady-state hypothesis."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a `namespace/name` string cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("monitored deployment '{input}' must be in namespace/name format")]
pub struct TargetParseError {
    /// The rejected input.
    pub input: String,
}

/// A workload whose replica readiness is part of the steady-state hypothesis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonitoredTarget {
    namespace: String,
    name: String,
}

impl MonitoredTarget {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for MonitoredTarget {
    type Err = TargetParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let reject = || TargetParseError {
            input: input.to_owned(),
        };
        let mut parts = input.split('/');
        let (Some(namespace), Some(name), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(reject());
        };
        let (namespace, name) = (namespace.trim(), name.trim());
        if namespace.is_empty() || name.is_empty() {
            return Err(reject());
        }
        Ok(Self::new(namespace, name))
    }
}

impl TryFrom<String> for MonitoredTarget {
    type Error = TargetParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonitoredTarget> for String {
    fn from(value: MonitoredTarget) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MonitoredTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
