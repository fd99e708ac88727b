//! Image references, platforms, and destination composition.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RequestError;

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";
pub const DEFAULT_PROJECT: &str = "library";

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// An OS/architecture pair an image variant targets, e.g. `linux/amd64`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
    pub os: String,
    pub arch: String,
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            variant: None,
        }
    }

    /// Suffix appended to the destination tag for the per-platform image.
    ///
    /// `linux/amd64` → `amd64`, `linux/arm/v7` → `arm-v7`.
    pub fn tag_suffix(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}-{}", self.arch, variant),
            None => self.arch.clone(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}/{}/{}", self.os, self.arch, variant),
            None => write!(f, "{}/{}", self.os, self.arch),
        }
    }
}

impl FromStr for Platform {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RequestError::InvalidPlatform {
            value: s.to_string(),
        };
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.iter().any(|p| p.is_empty() || !is_platform_token(p)) {
            return Err(invalid());
        }
        match parts.as_slice() {
            [os, arch] => Ok(Self::new(*os, *arch)),
            [os, arch, variant] => Ok(Self {
                os: os.to_string(),
                arch: arch.to_string(),
                variant: Some(variant.to_string()),
            }),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Platform {
    type Error = RequestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Platform> for String {
    fn from(p: Platform) -> Self {
        p.to_string()
    }
}

fn is_platform_token(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ---------------------------------------------------------------------------
// ImageReference
// ---------------------------------------------------------------------------

/// A parsed `registry/repository:tag` source reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// Parse a user-supplied reference.
    ///
    /// The first path segment is treated as a registry host only when it looks
    /// like one (contains `.` or `:`, or is `localhost`). Official Docker Hub
    /// images gain the `library/` prefix.
    pub fn parse(input: &str) -> Result<Self, RequestError> {
        let raw = input.trim();
        let invalid = |reason: &str| RequestError::InvalidReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(RequestError::MissingSource);
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }
        if raw.contains('@') {
            return Err(invalid("digest references are not supported; use a tag"));
        }

        let mut registry = DEFAULT_REGISTRY.to_string();
        let mut remainder = raw;
        if let Some((first, rest)) = raw.split_once('/') {
            if first.contains('.') || first.contains(':') || first == "localhost" {
                registry = first.to_string();
                remainder = rest;
            }
        }

        // A ':' only separates a tag when it appears after the last '/'.
        let last_slash = remainder.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match remainder[last_slash..].rfind(':') {
            Some(idx) => {
                let split = last_slash + idx;
                (&remainder[..split], &remainder[split + 1..])
            }
            None => (remainder, DEFAULT_TAG),
        };

        if name.is_empty() || name.split('/').any(str::is_empty) {
            return Err(invalid("empty repository path segment"));
        }
        if tag.is_empty() {
            return Err(invalid("empty tag"));
        }
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("repository names must be lowercase"));
        }

        let repository = if registry == DEFAULT_REGISTRY && !name.contains('/') {
            format!("library/{name}")
        } else {
            name.to_string()
        };

        Ok(Self {
            registry,
            repository,
            tag: tag.to_string(),
        })
    }

    /// Repository with the implicit Docker Hub `library/` prefix removed.
    pub fn short_name(&self) -> &str {
        self.repository
            .strip_prefix("library/")
            .unwrap_or(&self.repository)
    }

    /// `docker://` transport form used by the fast-copy tool.
    pub fn transport(&self) -> String {
        format!("docker://{self}")
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

// ---------------------------------------------------------------------------
// DestinationRef
// ---------------------------------------------------------------------------

/// Fully resolved `{registry}/{project}/{name}:{tag}` destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRef {
    pub registry: String,
    pub project: String,
    pub name: String,
    pub tag: String,
}

impl DestinationRef {
    /// Per-platform image kept addressable until the manifest list groups it.
    pub fn platform_image(&self, platform: &Platform) -> String {
        format!("{self}-{}", platform.tag_suffix())
    }

    pub fn transport(&self) -> String {
        format!("docker://{self}")
    }
}

impl fmt::Display for DestinationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}",
            self.registry, self.project, self.name, self.tag
        )
    }
}
