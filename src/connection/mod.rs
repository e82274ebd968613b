//! Pluggable connection providers for tracking-server URIs.
//!
//! A [`Connection`] computes a tracking-server URI from credentials and
//! options. Providers are useful when a service generates dynamic URLs for
//! the server or when the logic to build the URL is complex. They are looked
//! up by name in a [`ConnectionRegistry`] populated at startup: built-ins
//! plus anything user code registers.
//!
//! # Example
//!
//! ```
//! use quipu::connection::ConnectionRegistry;
//! use std::collections::HashMap;
//!
//! let registry = ConnectionRegistry::with_builtins();
//! let uri = registry
//!     .resolve_tracking_uri("databricks", &HashMap::new(), &HashMap::new())
//!     .unwrap();
//! assert_eq!(uri, "databricks");
//! ```

mod azureml;
mod databricks;

pub use azureml::AzureMlConnection;
pub use databricks::DatabricksConnection;

use crate::error::{QuipuError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Credential or option mapping passed to providers.
pub type OptionMap = HashMap<String, String>;

/// A named strategy for computing tracking-server URIs.
///
/// Implementers only have to supply [`Connection::tracking_uri`]; the
/// registry URI defaults to the tracking URI.
pub trait Connection: Send + Sync {
    /// URI to use for tracking.
    fn tracking_uri(&self, credentials: &OptionMap, options: &OptionMap) -> Result<String>;

    /// URI to use for the model registry.
    fn registry_uri(&self, credentials: &OptionMap, options: &OptionMap) -> Result<String> {
        self.tracking_uri(credentials, options)
    }
}

/// Get a key from an options mapping or an environment variable.
///
/// The explicit option wins over the environment variable, which wins over
/// the default. With nothing found, fails with
/// [`QuipuError::MissingKey`] naming both lookups.
pub fn getkey(
    mapping: &OptionMap,
    key: &str,
    envkey: &str,
    default: Option<&str>,
) -> Result<String> {
    mapping
        .get(key)
        .cloned()
        .or_else(|| std::env::var(envkey).ok())
        .or_else(|| default.map(str::to_string))
        .ok_or_else(|| QuipuError::MissingKey {
            key: key.to_string(),
            envkey: envkey.to_string(),
        })
}

/// Registry of connection providers, keyed by name.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    providers: HashMap<String, Arc<dyn Connection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Create a registry pre-populated with the built-in providers
    /// (`databricks`, `azureml`).
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("databricks", Arc::new(DatabricksConnection));
        registry.register("azureml", Arc::new(AzureMlConnection));
        registry
    }

    /// Register a provider under a name. A later registration under the
    /// same name replaces the earlier one.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Connection>) {
        self.providers.insert(name.into(), provider);
    }

    /// Look up a provider by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Connection>> {
        self.providers.get(name)
    }

    /// Check whether a provider is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered provider names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a tracking URI through the provider registered under `name`.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when no provider is registered
    /// under `name`.
    pub fn resolve_tracking_uri(
        &self,
        name: &str,
        credentials: &OptionMap,
        options: &OptionMap,
    ) -> Result<String> {
        self.require(name)?.tracking_uri(credentials, options)
    }

    /// Resolve a registry URI through the provider registered under `name`.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when no provider is registered
    /// under `name`.
    pub fn resolve_registry_uri(
        &self,
        name: &str,
        credentials: &OptionMap,
        options: &OptionMap,
    ) -> Result<String> {
        self.require(name)?.registry_uri(credentials, options)
    }

    fn require(&self, name: &str) -> Result<&Arc<dyn Connection>> {
        self.providers.get(name).ok_or_else(|| {
            QuipuError::Configuration(format!(
                "no connection provider registered under '{name}'"
            ))
        })
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeConnection;

    impl Connection for FakeConnection {
        fn tracking_uri(&self, _credentials: &OptionMap, _options: &OptionMap) -> Result<String> {
            Ok("fake".to_string())
        }
    }

    #[test]
    fn test_connection_tracking_uri() {
        let conn = FakeConnection;
        assert_eq!(
            conn.tracking_uri(&OptionMap::new(), &OptionMap::new()).unwrap(),
            "fake"
        );
    }

    #[test]
    fn test_connection_registry_uri_defaults_to_tracking() {
        let conn = FakeConnection;
        assert_eq!(
            conn.registry_uri(&OptionMap::new(), &OptionMap::new()).unwrap(),
            "fake"
        );
    }

    #[test]
    fn test_getkey_sane() {
        let mut mapping = OptionMap::new();
        mapping.insert("key".to_string(), "value".to_string());
        assert_eq!(getkey(&mapping, "key", "QUIPU_TEST_UNSET", None).unwrap(), "value");
    }

    #[test]
    fn test_getkey_no_key() {
        let err = getkey(&OptionMap::new(), "key", "QUIPU_TEST_UNSET", None).unwrap_err();
        assert!(matches!(err, QuipuError::MissingKey { .. }));
    }

    #[test]
    fn test_getkey_env_fallback() {
        std::env::set_var("QUIPU_TEST_GETKEY_ENV", "from-env");
        let mut mapping = OptionMap::new();
        mapping.insert("key".to_string(), "from-options".to_string());

        // explicit option wins over the environment
        assert_eq!(
            getkey(&mapping, "key", "QUIPU_TEST_GETKEY_ENV", None).unwrap(),
            "from-options"
        );
        // environment used when the option is absent
        assert_eq!(
            getkey(&OptionMap::new(), "key", "QUIPU_TEST_GETKEY_ENV", None).unwrap(),
            "from-env"
        );
        std::env::remove_var("QUIPU_TEST_GETKEY_ENV");
    }

    #[test]
    fn test_getkey_default() {
        assert_eq!(
            getkey(&OptionMap::new(), "key", "QUIPU_TEST_UNSET", Some("default")).unwrap(),
            "default"
        );

        std::env::set_var("QUIPU_TEST_GETKEY_DEFAULT", "from-env");
        // environment wins over the default
        assert_eq!(
            getkey(
                &OptionMap::new(),
                "key",
                "QUIPU_TEST_GETKEY_DEFAULT",
                Some("default")
            )
            .unwrap(),
            "from-env"
        );
        std::env::remove_var("QUIPU_TEST_GETKEY_DEFAULT");
    }

    #[test]
    fn test_registry_register_and_resolve() {
        let mut registry = ConnectionRegistry::new();
        registry.register("fake", Arc::new(FakeConnection));

        assert!(registry.contains("fake"));
        let uri = registry
            .resolve_tracking_uri("fake", &OptionMap::new(), &OptionMap::new())
            .unwrap();
        assert_eq!(uri, "fake");
    }

    #[test]
    fn test_registry_unknown_name() {
        let registry = ConnectionRegistry::new();
        let err = registry
            .resolve_tracking_uri("unknown", &OptionMap::new(), &OptionMap::new())
            .unwrap_err();
        assert!(matches!(err, QuipuError::Configuration(_)));
    }

    #[test]
    fn test_registry_builtins() {
        let registry = ConnectionRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["azureml", "databricks"]);
    }

    #[test]
    fn test_registry_replaces_on_reregister() {
        struct OtherConnection;
        impl Connection for OtherConnection {
            fn tracking_uri(&self, _: &OptionMap, _: &OptionMap) -> Result<String> {
                Ok("other".to_string())
            }
        }

        let mut registry = ConnectionRegistry::new();
        registry.register("name", Arc::new(FakeConnection));
        registry.register("name", Arc::new(OtherConnection));

        let uri = registry
            .resolve_tracking_uri("name", &OptionMap::new(), &OptionMap::new())
            .unwrap();
        assert_eq!(uri, "other");
    }
}
