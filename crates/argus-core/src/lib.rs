//! Core shared types for Argus.
//!
//! This crate is intentionally small; everything here is a plain identifier
//! shared across the backend crates.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Identifier of a logical analysis scope (a project or module).
///
/// Scope ids are opaque stable keys chosen by the client; Argus only ever
/// compares them for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ScopeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ScopeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a file within a scope, usually a URI.
///
/// Argus never opens the file itself; the analysis engine owns content
/// access. The identifier only has to be stable for the lifetime of the
/// scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The lowercase extension of the file, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.0.rsplit(['/', '\\']).next().unwrap_or(&self.0);
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for FileId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for FileId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a single analysis run, unique per backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisId(pub u64);

impl fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "analysis-{}", self.0)
    }
}

/// Identifier of a client-visible progress task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Best-effort extraction of a panic payload message.
pub fn panic_payload_to_str(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_extension_is_lowercased() {
        assert_eq!(
            FileId::new("file:///src/Main.JAVA").extension().as_deref(),
            Some("java")
        );
        assert_eq!(FileId::new("/a/b/Makefile").extension(), None);
        assert_eq!(FileId::new(".gitignore").extension(), None);
    }

    #[test]
    fn panic_payload_to_str_handles_common_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_payload_to_str(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("boom2"));
        assert_eq!(panic_payload_to_str(&*payload), "boom2");
        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_payload_to_str(&*payload), "unknown panic payload");
    }
}
