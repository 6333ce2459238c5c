//! Policy document storage.
//!
//! Holds the cross-domain policy served to clients:
//! - Loaded once at initialization, from a file or the built-in default
//! - NUL-terminated, as the Flash runtime requires
//! - Immutable and shared read-only by every connection handler

use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The request a client sends to ask for the policy document.
/// 23 bytes: the literal tag followed by a NUL terminator.
pub const POLICY_REQUEST: &[u8] = b"<policy-file-request/>\0";

/// Built-in policy granting localhost access to port 80.
const DEFAULT_POLICY: &str = r#"<?xml version="1.0"?>
<!DOCTYPE cross-domain-policy SYSTEM "/xml/dtds/cross-domain-policy.dtd">
<cross-domain-policy>
   <site-control permitted-cross-domain-policies="master-only"/>
   <allow-access-from domain="localhost" to-ports="80" />
</cross-domain-policy>"#;

/// The immutable, NUL-terminated policy document.
///
/// Cloning is cheap (shared buffer); handlers each hold their own clone.
#[derive(Debug, Clone)]
pub struct PolicyDocument {
    bytes: Bytes,
}

impl PolicyDocument {
    /// Load the policy document.
    ///
    /// With a path: read the file as text, concatenate all lines without
    /// inserted separators, and append one NUL byte. A read failure is a
    /// fatal initialization error and propagates.
    ///
    /// Without a path: the built-in default policy.
    pub fn load(path: Option<&Path>) -> Result<Self, PolicyError> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| PolicyError::Read(path.to_path_buf(), e))?;
                let mut doc: String = text.lines().collect();
                doc.push('\0');
                info!(path = %path.display(), bytes = doc.len(), "Loaded policy file");
                Ok(PolicyDocument {
                    bytes: Bytes::from(doc),
                })
            }
            None => {
                debug!("Using built-in default policy");
                Ok(PolicyDocument::default())
            }
        }
    }

    /// The full document, including the trailing NUL.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Document length in bytes, including the trailing NUL.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for PolicyDocument {
    fn default() -> Self {
        let mut doc = String::with_capacity(DEFAULT_POLICY.len() + 1);
        doc.push_str(DEFAULT_POLICY);
        doc.push('\0');
        PolicyDocument {
            bytes: Bytes::from(doc),
        }
    }
}

/// Policy loading errors
#[derive(Debug)]
pub enum PolicyError {
    Read(PathBuf, std::io::Error),
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::Read(path, e) => {
                write!(f, "Failed to read policy file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for PolicyError {}
