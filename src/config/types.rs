use std::collections::HashSet;
use std::time::Duration;

/// Immutable runtime configuration, built by the loader and cloned into
/// every task that needs it.
#[derive(Debug, Clone)]
pub struct Config {
    pub pidfile: String,
    pub user: String,

    pub loglevel: String,
    pub logfile: String,
    pub logsize: u64,
    pub lognumber: u32,

    pub listen_address: String,
    pub listen_port: u16,
    pub ipv6: bool,

    /// 0 in the file means "one per CPU"; the loader resolves that, so
    /// this is always >= 1.
    pub workers: u8,

    pub ssl_min_tls_version: String, // "1.2" or "1.3"
    pub ssl_certificate: String,
    pub ssl_certificate_key: String,
    pub ssl_ciphers: String,
    pub ssl_dhparam: String,

    pub uds_server: String,
    pub uds_token: String,
    pub uds_timeout: Duration,
    pub uds_verify_ssl: bool,

    pub handshake_timeout: Duration,
    pub command_timeout: Duration,

    /// Lowercase hex SHA-256 of the configured plaintext secret.
    pub secret: String,
    /// Source IP literals allowed to request stats.
    pub allow: HashSet<String>,

    // Accepted for config file compatibility; tokio is the event loop here
    pub use_uvloop: bool,
}
