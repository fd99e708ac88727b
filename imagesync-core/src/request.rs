//! Sync requests and their validated form.

use serde::{Deserialize, Serialize};

use crate::error::RequestError;
use crate::reference::{DestinationRef, ImageReference, Platform, DEFAULT_PROJECT};
use crate::types::Credentials;

/// Username/password supplied with a single request, overriding configured defaults.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RequestCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Inbound sync request as accepted from callers.
///
/// Optional string fields treat `""` the same as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub source_image: String,
    pub target_registry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tag: Option<String>,
    #[serde(default)]
    pub platforms: Vec<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<RequestCredentials>,
}

impl SyncRequest {
    pub fn new(source_image: impl Into<String>, target_registry: impl Into<String>) -> Self {
        Self {
            source_image: source_image.into(),
            target_registry: target_registry.into(),
            target_project: None,
            target_image_name: None,
            target_tag: None,
            platforms: vec![Platform::new("linux", "amd64"), Platform::new("linux", "arm64")],
            credentials: None,
        }
    }

    /// Validate the request and resolve every default.
    ///
    /// Nothing is created when this returns an error.
    pub fn validate(&self) -> Result<SyncPlan, RequestError> {
        if self.source_image.trim().is_empty() {
            return Err(RequestError::MissingSource);
        }
        let registry = self.target_registry.trim().trim_end_matches('/');
        if registry.is_empty() {
            return Err(RequestError::MissingRegistry);
        }
        if registry.contains('/') || registry.chars().any(char::is_whitespace) {
            return Err(RequestError::InvalidDestination {
                field: "registry",
                value: self.target_registry.clone(),
            });
        }
        if self.platforms.is_empty() {
            return Err(RequestError::NoPlatforms);
        }

        let source = ImageReference::parse(&self.source_image)?;

        let project = non_empty(&self.target_project).unwrap_or(DEFAULT_PROJECT);
        let name = non_empty(&self.target_image_name).unwrap_or_else(|| source.short_name());
        let tag = non_empty(&self.target_tag).unwrap_or(source.tag.as_str());
        check_segment("project", project)?;
        check_segment("name", name)?;
        if tag.chars().any(|c| c == '/' || c == ':' || c.is_whitespace()) {
            return Err(RequestError::InvalidDestination {
                field: "tag",
                value: tag.to_string(),
            });
        }

        let mut platforms: Vec<Platform> = Vec::with_capacity(self.platforms.len());
        for platform in &self.platforms {
            if !platforms.contains(platform) {
                platforms.push(platform.clone());
            }
        }

        let credentials = match &self.credentials {
            Some(c) if c.username.is_empty() || c.password.is_empty() => {
                return Err(RequestError::IncompleteCredentials)
            }
            Some(c) => Some(Credentials {
                registry: registry.to_string(),
                username: c.username.clone(),
                password: c.password.clone(),
            }),
            None => None,
        };

        Ok(SyncPlan {
            destination: DestinationRef {
                registry: registry.to_string(),
                project: project.to_string(),
                name: name.to_string(),
                tag: tag.to_string(),
            },
            source,
            platforms,
            credentials,
        })
    }
}

/// A validated request with every default resolved. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub source: ImageReference,
    pub destination: DestinationRef,
    /// Requested platforms in request order, duplicates removed.
    pub platforms: Vec<Platform>,
    /// Per-request override, if any.
    pub credentials: Option<Credentials>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn check_segment(field: &'static str, value: &str) -> Result<(), RequestError> {
    let bad = value.contains(':')
        || value.starts_with('/')
        || value.ends_with('/')
        || value.chars().any(|c| c.is_whitespace() || c.is_ascii_uppercase());
    if bad {
        return Err(RequestError::InvalidDestination {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
