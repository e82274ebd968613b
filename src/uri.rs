//! Tracking-server URI handling.
//!
//! A tracking URI tells the client where runs are recorded:
//!
//! - `file:///path/to/runs` - local store rooted at a directory
//! - `sqlite:///path/to/tracking.db` - local store at an explicit database
//! - `http(s)://host` - remote tracking server (parsed, not served)
//! - `databricks` - bare keyword understood by a hosted service
//!
//! # Example
//!
//! ```
//! use quipu::uri::TrackingUri;
//!
//! let uri = TrackingUri::parse("sqlite:///tmp/tracking.db").unwrap();
//! assert_eq!(uri.to_string(), "sqlite:///tmp/tracking.db");
//! ```

use crate::error::{QuipuError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Parsed tracking-server URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingUri {
    /// Local store rooted at a directory.
    File(PathBuf),
    /// Local store at an explicit `SQLite` database path.
    Sqlite(PathBuf),
    /// Remote HTTP(S) tracking server; the full URI is kept verbatim.
    Http(String),
    /// Bare keyword with no scheme (e.g. `databricks`), interpretation
    /// deferred to whoever consumes the URI.
    Keyword(String),
    /// URI with a scheme this crate does not know; passed through verbatim.
    Other(String),
}

impl TrackingUri {
    /// Parse a URI string leniently.
    ///
    /// A value without a scheme is kept as a [`TrackingUri::Keyword`]; this
    /// is the right reading for provider output, where a bare keyword is
    /// meaningful. Use [`TrackingUri::validate`] for user-configured values,
    /// where a bare value is a filesystem path.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(QuipuError::InvalidUri("empty URI".to_string()));
        }

        let Some(idx) = uri.find("://") else {
            return Ok(Self::Keyword(uri.to_string()));
        };

        let scheme = &uri[..idx];
        let rest = &uri[idx + 3..];
        match scheme.to_lowercase().as_str() {
            "file" => Ok(Self::File(PathBuf::from(rest))),
            "sqlite" => Ok(Self::Sqlite(PathBuf::from(rest))),
            "http" | "https" => Ok(Self::Http(uri.to_string())),
            "" => Err(QuipuError::InvalidUri(format!("missing scheme: {uri}"))),
            _ => Ok(Self::Other(uri.to_string())),
        }
    }

    /// Format a configured URI value to a concrete tracking URI.
    ///
    /// A relative path is anchored at `project_path` and converted to an
    /// absolute `file://` URI; an absolute path converts directly; anything
    /// carrying a scheme passes through [`TrackingUri::parse`].
    pub fn validate<P: AsRef<Path>>(project_path: P, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(QuipuError::InvalidUri("empty URI".to_string()));
        }

        if raw.contains("://") {
            return Self::parse(raw);
        }

        let path = Path::new(raw);
        if path.is_absolute() {
            return Ok(Self::File(path.to_path_buf()));
        }

        let absolute = project_path.as_ref().join(path);
        let uri = Self::File(absolute);
        info!(
            "the configured tracking uri is relative ('{raw}'); \
             it is converted to a valid uri: '{uri}'"
        );
        Ok(uri)
    }

    /// Local filesystem path, for the file and sqlite variants.
    #[must_use]
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::File(p) | Self::Sqlite(p) => Some(p),
            _ => None,
        }
    }

    /// Check whether this URI points at a local store.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::File(_) | Self::Sqlite(_))
    }

    /// Scheme name for error messages.
    #[must_use]
    pub fn scheme(&self) -> &str {
        match self {
            Self::File(_) => "file",
            Self::Sqlite(_) => "sqlite",
            Self::Http(_) => "http",
            Self::Keyword(_) => "keyword",
            Self::Other(uri) => uri.split("://").next().unwrap_or("unknown"),
        }
    }
}

impl fmt::Display for TrackingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(p) => write!(f, "file://{}", p.display()),
            Self::Sqlite(p) => write!(f, "sqlite://{}", p.display()),
            Self::Http(uri) | Self::Other(uri) => write!(f, "{uri}"),
            Self::Keyword(k) => write!(f, "{k}"),
        }
    }
}

impl FromStr for TrackingUri {
    type Err = QuipuError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
