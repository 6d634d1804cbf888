use serde::{Deserialize, Serialize};

/// Identifier of a transfer process, shared by the control and data planes.
///
/// Wraps the opaque string carried in signaling messages to provide type
/// safety and prevent mixing up process ids with other string-based
/// identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Creates a process id from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when the id carries no value.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the id, returning the underlying string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProcessId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ProcessId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of the runtime node currently owning a flow.
///
/// Recovery sweeps only consider flows stamped with the local runtime id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeId(String);

impl RuntimeId {
    /// Creates a runtime id from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RuntimeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RuntimeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
