//! Configuration for the storage backends

use crate::error::{StoreError, StoreResult};
use crate::types::NodeAddress;
use std::time::Duration;

/// Which form of `AUTH` a new connection sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// No authentication
    Disabled,
    /// `AUTH <password>`
    Password,
    /// ACL-style `AUTH <user> <password>`
    Acl,
}

/// Backoff behavior of the retry controller
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Highest attempt number that is still retried
    pub max_retries: u32,
    /// Wait before the first retry; doubles per attempt
    pub base_wait: Duration,
    /// Upper bound on a single wait, `None` for unbounded
    pub max_wait: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_wait: Duration::from_millis(500),
            max_wait: None,
        }
    }
}

/// TLS settings forwarded to the transport, opaque to the routing core
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Client certificate path for mTLS; empty disables mTLS
    pub client_cert: String,
    /// Client key path for mTLS; empty disables mTLS
    pub client_key: String,
    /// CA bundle path
    pub ca_bundle: String,
    /// CA directory path
    pub ca_directory: String,
}

/// Configuration for a storage backend
///
/// `initial_nodes` being non-empty selects cluster mode; otherwise the
/// backend talks to the single `host:port` target.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Single-node target host
    pub host: String,
    /// Single-node target port
    pub port: u16,
    /// Prefix inserted into every composite key; must not contain braces
    pub prefix: String,
    /// Cluster seed nodes; non-empty switches the backend to cluster mode
    pub initial_nodes: Vec<NodeAddress>,
    /// Timeout for establishing a connection, `None` for the OS default
    pub connect_timeout: Option<Duration>,
    /// Timeout for one command round-trip, `None` for unbounded
    pub command_timeout: Option<Duration>,
    /// Request a non-blocking socket during the connect phase. Tokio sockets
    /// are always non-blocking; the flag is accepted for configuration
    /// compatibility.
    pub non_blocking: bool,
    /// Enable TCP keepalive with the given interval
    pub tcp_keepalive: Option<Duration>,
    /// ACL user name; selects ACL-style authentication when set together
    /// with a password
    pub auth_user: Option<String>,
    /// Password for either authentication style
    pub auth_password: Option<String>,
    /// Retry/backoff behavior on connection loss and redirects
    pub retry: RetryConfig,
    /// TLS settings; `None` disables TLS
    pub tls: Option<TlsConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            prefix: String::new(),
            initial_nodes: Vec::new(),
            connect_timeout: None,
            command_timeout: None,
            non_blocking: false,
            tcp_keepalive: Some(Duration::from_secs(60)),
            auth_user: None,
            auth_password: None,
            retry: RetryConfig::default(),
            tls: None,
        }
    }
}

impl StoreConfig {
    /// Configuration for a single node at the given address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Seed nodes for cluster mode
    pub fn with_initial_nodes(mut self, nodes: Vec<NodeAddress>) -> Self {
        self.initial_nodes = nodes;
        self
    }

    /// Set the connect timeout; zero means the library default
    pub fn with_connect_timeout_ms(mut self, millis: u64) -> Self {
        self.connect_timeout = (millis != 0).then(|| Duration::from_millis(millis));
        self
    }

    /// Set the command timeout; zero means unbounded
    pub fn with_command_timeout_ms(mut self, millis: u64) -> Self {
        self.command_timeout = (millis != 0).then(|| Duration::from_millis(millis));
        self
    }

    /// Password-only authentication
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.auth_password = Some(password.into());
        self
    }

    /// ACL-style authentication
    pub fn with_acl(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth_user = Some(user.into());
        self.auth_password = Some(password.into());
        self
    }

    /// Set the retry/backoff behavior
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enable TLS with the given settings
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// True when the configuration selects cluster mode
    pub fn clustered(&self) -> bool {
        !self.initial_nodes.is_empty()
    }

    /// The authentication style implied by the credential fields
    pub fn auth_scheme(&self) -> AuthScheme {
        match (&self.auth_user, &self.auth_password) {
            (_, None) => AuthScheme::Disabled,
            (None, Some(_)) => AuthScheme::Password,
            (Some(_), Some(_)) => AuthScheme::Acl,
        }
    }

    /// The single-node target as an address
    pub fn primary_node(&self) -> NodeAddress {
        NodeAddress::new(self.host.clone(), self.port)
    }

    /// Reject configurations the backend cannot honor
    pub fn validate(&self) -> StoreResult<()> {
        if self.prefix.contains(['{', '}']) {
            return Err(StoreError::Config(
                "key prefix must not contain `{' or `}'".to_string(),
            ));
        }

        if let Some(tls) = &self.tls {
            if tls.client_cert.is_empty() || tls.client_key.is_empty() {
                return Err(StoreError::Config(
                    "TLS is enabled, but client certificate or key are not set. \
                     If you don't want to use mTLS, explicitly set them to the empty string."
                        .to_string(),
                ));
            }
            return Err(StoreError::Config(
                "TLS is configured but no TLS transport is built into this crate".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 6379);
        assert!(!config.clustered());
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_wait, Duration::from_millis(500));
        assert!(config.retry.max_wait.is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let config = StoreConfig::new("redis.internal", 6380)
            .with_prefix("sp.")
            .with_password("secret")
            .with_command_timeout_ms(250);

        assert_eq!(config.host, "redis.internal");
        assert_eq!(config.prefix, "sp.");
        assert_eq!(config.auth_password.as_deref(), Some("secret"));
        assert_eq!(config.command_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_zero_timeout_means_default() {
        let config = StoreConfig::default()
            .with_connect_timeout_ms(0)
            .with_command_timeout_ms(0);
        assert!(config.connect_timeout.is_none());
        assert!(config.command_timeout.is_none());
    }

    #[test]
    fn test_cluster_mode_selection() {
        let config = StoreConfig::default()
            .with_initial_nodes(vec![NodeAddress::new("10.0.0.1", 7000)]);
        assert!(config.clustered());
    }

    #[test]
    fn test_auth_scheme() {
        assert_eq!(StoreConfig::default().auth_scheme(), AuthScheme::Disabled);
        assert_eq!(
            StoreConfig::default().with_password("pw").auth_scheme(),
            AuthScheme::Password
        );
        assert_eq!(
            StoreConfig::default().with_acl("svc", "pw").auth_scheme(),
            AuthScheme::Acl
        );
        // a user without a password still disables authentication
        let mut config = StoreConfig::default();
        config.auth_user = Some("svc".to_string());
        assert_eq!(config.auth_scheme(), AuthScheme::Disabled);
    }

    #[test]
    fn test_validate_rejects_braced_prefix() {
        let config = StoreConfig::default().with_prefix("bad{tag}");
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));
        assert!(StoreConfig::default().with_prefix("ok.").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tls() {
        let config = StoreConfig::default().with_tls(TlsConfig {
            client_cert: "cert.pem".into(),
            client_key: "key.pem".into(),
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));

        let config = StoreConfig::default().with_tls(TlsConfig::default());
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));
    }
}
