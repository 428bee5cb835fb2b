//! Configuration loading for the tunnel server.
//!
//! The configuration is INI style, flat keys, read from `/etc/udstunnel.conf`
//! (or `udstunnel.conf` in the working directory on debug builds) unless a
//! file is given explicitly. Environment variables prefixed `udstunnel_`
//! override the file, and the builder setters override both.

pub mod types;

use sha2::{Digest, Sha256};

use config::ConfigError;

pub use types::Config;

pub struct ConfigLoader {
    filename: String,
    uds_server: Option<String>,
    uds_token: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        let config_file = if cfg!(debug_assertions) {
            "udstunnel.conf"
        } else {
            "/etc/udstunnel.conf"
        };
        ConfigLoader {
            filename: config_file.into(),
            uds_server: None,
            uds_token: None,
        }
    }

    /// Set the configuration file to load
    pub fn with_filename(&mut self, file: &str) -> &mut Self {
        self.filename = file.into();
        self
    }

    /// Override the UDS broker location (https://...)
    pub fn with_uds_server(&mut self, server: &str) -> &mut Self {
        self.uds_server = Some(server.into());
        self
    }

    /// Override the UDS token to use
    pub fn with_uds_token(&mut self, token: &str) -> &mut Self {
        self.uds_token = Some(token.into());
        self
    }

    /// Loads and validates the configuration: defaults first, then the
    /// file, then `udstunnel_*` environment variables, then the builder
    /// overrides. Missing mandatory keys (`ssl_certificate`, `uds_server`)
    /// and a malformed `uds_server` are hard errors.
    pub fn load(&self) -> Result<types::Config, ConfigError> {
        let num_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let mut builder = config::Config::builder()
            .set_default("pidfile", "")?
            .set_default("user", "nobody")?
            .set_default("loglevel", "INFO")?
            .set_default("logfile", "")?
            .set_default("logsize", "32M")?
            .set_default("lognumber", 3)?
            .set_default("address", "0.0.0.0")?
            .set_default("port", 4443)?
            .set_default("ipv6", false)?
            .set_default("workers", 0)?
            .set_default("ssl_min_tls_version", "1.2")?
            .set_default("ssl_certificate_key", "")?
            .set_default("ssl_ciphers", "")?
            .set_default("ssl_dhparam", "")?
            .set_default("uds_token", "unauthorized")?
            .set_default("uds_timeout", 10.0)?
            .set_default("uds_verify_ssl", true)?
            .set_default("handshake_timeout", 3.0)?
            .set_default("command_timeout", 3.0)?
            .set_default("secret", "")?
            .set_default("allow", "127.0.0.1")?
            .set_default("use_uvloop", false)?
            .add_source(config::File::new(&self.filename, config::FileFormat::Ini).required(false))
            .add_source(config::Environment::with_prefix("udstunnel"));

        if let Some(uds_server) = &self.uds_server {
            builder = builder.set_override("uds_server", uds_server.clone())?;
        }
        if let Some(uds_token) = &self.uds_token {
            builder = builder.set_override("uds_token", uds_token.clone())?;
        }

        let cfg_reader = builder.build()?;

        // Mandatory keys: no default, so a miss names the key
        let ssl_certificate: String = cfg_reader.get("ssl_certificate").map_err(|_| {
            ConfigError::Message("mandatory configuration parameter not found: ssl_certificate".into())
        })?;
        let uds_server: String = cfg_reader.get("uds_server").map_err(|_| {
            ConfigError::Message("mandatory configuration parameter not found: uds_server".into())
        })?;

        // The broker URL must be http(s), and a single trailing slash is dropped
        if !uds_server.starts_with("http") {
            return Err(ConfigError::Message(format!(
                "invalid uds_server url: {}",
                uds_server
            )));
        }
        let uds_server = uds_server
            .strip_suffix('/')
            .unwrap_or(&uds_server)
            .to_string();

        // The secret is never kept in clear, only its SHA-256 hex
        let secret = format!(
            "{:x}",
            Sha256::digest(cfg_reader.get::<String>("secret")?.as_bytes())
        );

        // Log size accepts a trailing M; plain numbers are megabytes too
        let logsize = cfg_reader.get::<String>("logsize")?;
        let logsize = logsize.strip_suffix('M').unwrap_or(&logsize).trim();
        let logsize = logsize.parse::<u64>().map_err(|_| {
            ConfigError::Message(format!("invalid logsize value: {}", logsize))
        })? * 1024
            * 1024;

        let workers = match cfg_reader.get::<u8>("workers")? {
            0 => num_cores as u8,
            n => n,
        };

        // Comma separated IP literals, unordered
        let allow = cfg_reader
            .get::<String>("allow")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(types::Config {
            pidfile: cfg_reader.get("pidfile")?,
            user: cfg_reader.get("user")?,
            loglevel: cfg_reader.get::<String>("loglevel")?.to_uppercase(),
            logfile: cfg_reader.get("logfile")?,
            logsize,
            lognumber: cfg_reader.get("lognumber")?,
            listen_address: cfg_reader.get("address")?,
            listen_port: cfg_reader.get("port")?,
            ipv6: cfg_reader.get("ipv6")?,
            workers,
            ssl_min_tls_version: cfg_reader.get("ssl_min_tls_version")?,
            ssl_certificate,
            ssl_certificate_key: cfg_reader.get("ssl_certificate_key")?,
            ssl_ciphers: cfg_reader.get("ssl_ciphers")?,
            ssl_dhparam: cfg_reader.get("ssl_dhparam")?,
            uds_server,
            uds_token: cfg_reader.get("uds_token")?,
            uds_timeout: std::time::Duration::from_secs_f64(cfg_reader.get("uds_timeout")?),
            uds_verify_ssl: cfg_reader.get("uds_verify_ssl")?,
            handshake_timeout: std::time::Duration::from_secs_f64(
                cfg_reader.get("handshake_timeout")?,
            ),
            command_timeout: std::time::Duration::from_secs_f64(
                cfg_reader.get("command_timeout")?,
            ),
            secret,
            allow,
            use_uvloop: cfg_reader.get("use_uvloop")?,
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        ConfigLoader::new()
    }
}
