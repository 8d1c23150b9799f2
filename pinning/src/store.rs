//! Pinned-certificate resource resolution and loading.

use std::path::{Path, PathBuf};

/// The well-known primary API domain with a dedicated pin.
pub const PRIMARY_PIN_HOST: &str = "api.parse.com";

/// Logical resource name for the primary domain's pinned certificate.
pub const PRIMARY_PIN_RESOURCE: &str = "api.parse.com";

/// Logical resource name for every other host (custom/CNAME domains pointing
/// at the same backend).
pub const FALLBACK_PIN_RESOURCE: &str = "parse.com";

/// Resolves host names to pinned-certificate resources and loads their bytes.
///
/// Resources are DER certificates stored as `<dir>/<name>.cer`. They are read
/// lazily on each evaluation; the set is static and small, so no caching layer
/// is kept in front of the filesystem. A missing or unreadable resource is a
/// runtime "no pin available" condition, not a construction failure.
#[derive(Debug, Clone)]
pub struct PinStore {
    resource_dir: PathBuf,
}

impl PinStore {
    #[must_use]
    pub fn new(resource_dir: impl Into<PathBuf>) -> Self {
        Self {
            resource_dir: resource_dir.into(),
        }
    }

    /// Map a host to the logical name of its pinned-certificate resource.
    #[must_use]
    pub fn resource_for_host(host: &str) -> &'static str {
        if host.eq_ignore_ascii_case(PRIMARY_PIN_HOST) {
            PRIMARY_PIN_RESOURCE
        } else {
            FALLBACK_PIN_RESOURCE
        }
    }

    #[must_use]
    pub fn resource_path(&self, resource: &str) -> PathBuf {
        self.resource_dir.join(format!("{resource}.cer"))
    }

    /// Load the raw DER bytes pinned for `host`.
    ///
    /// Returns `None` when no pinned certificate can be read, which callers
    /// must treat as "no pinned key available" (and, for server-trust
    /// evaluation, as a rejection).
    #[must_use]
    pub fn load(&self, host: &str) -> Option<Vec<u8>> {
        let resource = Self::resource_for_host(host);
        let path = self.resource_path(resource);
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                tracing::warn!(
                    host,
                    resource,
                    path = %path.display(),
                    %error,
                    "pinned certificate resource unavailable"
                );
                None
            }
        }
    }

    #[must_use]
    pub fn resource_dir(&self) -> &Path {
        &self.resource_dir
    }
}
