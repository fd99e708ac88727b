//! Destination credential resolution.
//!
//! Precedence: per-request override, then credentials set at runtime through
//! [`CredentialProvider::configure`], then the settings default. The latter
//! two only apply when their registry matches the destination.

use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use imagesync_core::{credential_store, Credentials};

use crate::error::SyncError;

pub struct CredentialProvider {
    configured: RwLock<Option<Credentials>>,
    fallback: Option<Credentials>,
    /// Home directory for persistence. `None` keeps configuration in memory.
    home: Option<PathBuf>,
}

impl CredentialProvider {
    /// Provider with no persistence, used by tests and embedders.
    pub fn in_memory(fallback: Option<Credentials>) -> Self {
        Self {
            configured: RwLock::new(None),
            fallback,
            home: None,
        }
    }

    /// Provider backed by `<home>/.imagesync/credentials.yaml`, loading any
    /// previously configured credentials.
    pub fn persistent_at(home: PathBuf, fallback: Option<Credentials>) -> Result<Self, SyncError> {
        let stored = credential_store::load_at(&home)?;
        Ok(Self {
            configured: RwLock::new(stored),
            fallback,
            home: Some(home),
        })
    }

    /// Credentials a new task for `registry` should use.
    pub fn resolve(&self, registry: &str, explicit: Option<Credentials>) -> Option<Credentials> {
        if explicit.is_some() {
            return explicit;
        }
        let configured = self
            .configured
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        configured
            .filter(|c| c.applies_to(registry))
            .or_else(|| self.fallback.clone().filter(|c| c.applies_to(registry)))
    }

    /// Replace the runtime default. Tasks already running keep what they resolved.
    pub fn configure(&self, credentials: Credentials) -> Result<(), SyncError> {
        if let Some(home) = &self.home {
            credential_store::save_at(home, &credentials)?;
        }
        tracing::info!(
            registry = %credentials.registry,
            username = %credentials.username,
            "destination credentials configured"
        );
        *self
            .configured
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(credentials);
        Ok(())
    }

    /// Credentials currently in effect as the default, if any.
    pub fn current(&self) -> Option<Credentials> {
        self.configured
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .or_else(|| self.fallback.clone())
    }
}
