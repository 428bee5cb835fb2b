use anyhow::{Context, Result};
use log;
use std::sync::Arc;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpSocket, TcpStream},
    time::timeout,
};
use tokio_rustls::{
    rustls::{
        pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer},
        version::{TLS12, TLS13},
        ServerConfig,
    },
    server::TlsStream,
    TlsAcceptor,
};
use uuid;

use crate::config;
use crate::tls;

use super::dispatcher::{WorkerContext, WorkerPool};
use super::error::CommandError;
use super::{consts, event, relay, stats, types, udsapi};

pub struct TunnelServer {
    pub udsapi: Arc<dyn udsapi::UDSApiProvider>,
    pub config: config::Config,
    pub stats: Arc<stats::GlobalStats>,
}

impl TunnelServer {
    pub fn new(config: &config::Config, stats: Arc<stats::GlobalStats>) -> Self {
        let config = config.clone();
        TunnelServer {
            udsapi: Arc::new(udsapi::HttpUDSApiProvider::new(&config)),
            config,
            stats,
        }
    }

    /// Replaces the control plane client, mostly so tests can intercept
    /// ticket lookups.
    pub fn with_provider(self, provider: Arc<dyn udsapi::UDSApiProvider>) -> Self {
        TunnelServer {
            udsapi: provider,
            config: self.config,
            stats: self.stats,
        }
    }

    /// Binds the listen socket, spawns the worker pool and dispatches
    /// accepted connections until the stop event fires. TLS material or
    /// bind failures are fatal and bubble up to the caller.
    pub async fn run(self, stop_event: event::Event) -> Result<()> {
        let certs: Vec<CertificateDer> =
            CertificateDer::pem_file_iter(self.config.ssl_certificate.clone())
                .with_context(|| {
                    format!("Could not read certificate {}", self.config.ssl_certificate)
                })?
                .collect::<Result<_, _>>()
                .with_context(|| {
                    format!("Invalid certificate {}", self.config.ssl_certificate)
                })?;
        let private_key: PrivateKeyDer<'_> =
            PrivateKeyDer::from_pem_file(self.config.ssl_certificate_key.clone()).with_context(
                || {
                    format!(
                        "Could not read private key {}",
                        self.config.ssl_certificate_key
                    )
                },
            )?;

        if !self.config.ssl_dhparam.is_empty() {
            // rustls only does ECDHE key exchange
            log::warn!(
                "ssl_dhparam is set ({}) but custom DH parameters are not supported, ignoring",
                self.config.ssl_dhparam
            );
        }

        let protocol_versions: Vec<&rustls::SupportedProtocolVersion> =
            match self.config.ssl_min_tls_version.as_str() {
                "1.3" => vec![&TLS13],
                _ => vec![&TLS12, &TLS13],
            };

        let server_tls_config = ServerConfig::builder_with_provider(Arc::new(
            tls::crypto_provider::provider(&self.config.ssl_ciphers),
        ))
        .with_protocol_versions(&protocol_versions)
        .context("Unusable TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, private_key)
        .context("Unusable TLS certificate/key pair")?;

        let tls_acceptor = TlsAcceptor::from(Arc::new(server_tls_config));

        let address = if self.config.ipv6 && !self.config.listen_address.starts_with('[') {
            format!("[{}]:{}", self.config.listen_address, self.config.listen_port)
        } else {
            format!("{}:{}", self.config.listen_address, self.config.listen_port)
        };
        let addr = tokio::net::lookup_host(&address)
            .await
            .with_context(|| format!("Could not resolve listen address {}", address))?
            .next()
            .with_context(|| format!("No usable listen address for {}", address))?;

        let socket = if addr.is_ipv6() {
            TcpSocket::new_v6()
        } else {
            TcpSocket::new_v4()
        }
        .context("Could not create listen socket")?;
        socket.set_reuseaddr(true)?;
        socket
            .bind(addr)
            .with_context(|| format!("Could not bind {}", addr))?;
        let listener = socket
            .listen(consts::BACKLOG)
            .with_context(|| format!("Could not listen on {}", addr))?;

        log::info!(
            "Tunnel server running on {} with {} workers",
            addr,
            self.config.workers
        );

        let mut pool = WorkerPool::new(
            self.config.workers as usize,
            WorkerContext {
                acceptor: tls_acceptor,
                config: self.config.clone(),
                udsapi: self.udsapi.clone(),
                stats: self.stats.clone(),
                stop_event: stop_event.clone(),
            },
        );

        loop {
            tokio::select! {
                _ = stop_event.wait() => {
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => pool.dispatch(stream).await,
                        Err(e) => log::warn!("Accept failed: {}", e),
                    }
                }
            }
        }

        log::info!("Tunnel server stopping");
        pool.shutdown().await;
        Ok(())
    }
}

/// One accepted client socket, from TLS upgrade to session end.
pub struct Connection {
    acceptor: TlsAcceptor,
    stream: Option<TcpStream>,
    tunnel_id: String,
    config: config::Config,
    udsapi: Arc<dyn udsapi::UDSApiProvider>,
    stats: Arc<stats::GlobalStats>,
    stop_event: event::Event,
}

impl Connection {
    pub fn new(stream: TcpStream, context: &WorkerContext) -> Self {
        Connection {
            acceptor: context.acceptor.clone(),
            stream: Some(stream),
            tunnel_id: uuid::Uuid::new_v4().to_string()[..13].to_string(),
            config: context.config.clone(),
            udsapi: context.udsapi.clone(),
            stats: context.stats.clone(),
            stop_event: context.stop_event.clone(),
        }
    }

    pub async fn process(&mut self) -> Result<()> {
        let stream = self.stream.take().context("Stream already taken")?;

        let src_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return Ok(()), // Already disconnected
        };
        let src_ip = src_addr.ip().to_string();

        log::info!("CONNECTION ({}) from {}", self.tunnel_id, src_ip);

        let conn_stats = stats::ConnectionStats::open(self.stats.clone());

        // 1.- TLS termination; everything else runs inside the channel
        let mut stream = match timeout(
            self.config.handshake_timeout,
            self.acceptor.accept(stream),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                log::info!(
                    "TLS ({}) handshake failed from {}: {}",
                    self.tunnel_id,
                    src_ip,
                    e
                );
                conn_stats.close();
                return Ok(());
            }
            Err(_) => {
                log::info!(
                    "TLS ({}) handshake timed out from {}",
                    self.tunnel_id,
                    src_ip
                );
                conn_stats.close();
                return Ok(());
            }
        };

        // 2.- Handshake magic. Stray traffic gets no answer at all, just
        // the close.
        let mut buf = vec![0u8; consts::HANDSHAKE_V1.len()];
        let handshake = timeout(self.config.handshake_timeout, stream.read_exact(&mut buf)).await;
        if !matches!(&handshake, Ok(Ok(_))) || buf != consts::HANDSHAKE_V1 {
            match handshake {
                Err(_) => log::error!(
                    "HANDSHAKE ({}) timed out from {}",
                    self.tunnel_id,
                    src_ip
                ),
                Ok(Err(e)) => log::error!(
                    "HANDSHAKE ({}) error from {}: {}",
                    self.tunnel_id,
                    src_ip,
                    e
                ),
                Ok(Ok(_)) => log::error!(
                    "HANDSHAKE ({}) invalid from {}: {}",
                    self.tunnel_id,
                    src_ip,
                    to_hex(&buf)
                ),
            }
            stream.shutdown().await.unwrap_or_default();
            conn_stats.close();
            return Ok(());
        }

        log::debug!("HANDSHAKE ({}) from {}", self.tunnel_id, src_ip);

        // 3.- Command and its payload, bounded as a whole
        let command = match timeout(
            self.config.command_timeout,
            types::Command::read_from(&mut stream),
        )
        .await
        {
            Ok(Ok(command)) => command,
            Ok(Err(e)) => {
                log::error!("COMMAND ({}) from {}: {}", self.tunnel_id, src_ip, e);
                let response = match &e {
                    CommandError::Io(_) => None, // Client is gone, nobody listens
                    CommandError::InvalidTicket => Some(types::Response::TicketError),
                    CommandError::InvalidSecret => Some(types::Response::ForbiddenError),
                    CommandError::UnknownCommand(_) => Some(types::Response::CommandError),
                };
                if let Some(response) = response {
                    stream
                        .write_all(response.to_bytes())
                        .await
                        .unwrap_or_default();
                }
                stream.shutdown().await.unwrap_or_default();
                conn_stats.close();
                return Ok(());
            }
            Err(_) => {
                log::error!(
                    "COMMAND ({}) read timeout from {}",
                    self.tunnel_id,
                    src_ip
                );
                stream.shutdown().await.unwrap_or_default();
                conn_stats.close();
                return Ok(());
            }
        };

        log::info!("COMMAND ({}) {} from {}", self.tunnel_id, command, src_ip);

        let result = match command {
            types::Command::Open(ticket) => {
                let mut relay = relay::RelayConnection::new(
                    self.tunnel_id.clone(),
                    ticket,
                    self.udsapi.clone(),
                    conn_stats.clone(),
                );
                relay
                    .run(stream, self.stop_event.clone())
                    .await
                    .with_context(|| format!("RELAY ({}) from {}", self.tunnel_id, src_ip))
            }
            types::Command::Test => {
                log::info!("TEST ({}) from {}", self.tunnel_id, src_ip);
                stream
                    .write_all(types::Response::Ok.to_bytes())
                    .await
                    .context("Error writing test response")?;
                stream
                    .shutdown()
                    .await
                    .context("Error shutting down stream")?;
                Ok(())
            }
            types::Command::Stats(secret) => {
                self.process_stats(stream, &secret, &src_ip).await
            }
        };

        conn_stats.close();
        result
    }

    /// STAT/INFO both answer the same snapshot line. Source must be in
    /// the allow list and the password must match the secret hash; no
    /// stats byte leaves before both checks pass.
    async fn process_stats(
        &self,
        mut stream: TlsStream<TcpStream>,
        secret: &str,
        src_ip: &str,
    ) -> Result<()> {
        log::info!("STATS ({}) from {}", self.tunnel_id, src_ip);

        if !self.config.allow.contains(src_ip) || secret != self.config.secret {
            log::warn!("STATS ({}) forbidden from {}", self.tunnel_id, src_ip);
            stream
                .write_all(types::Response::ForbiddenError.to_bytes())
                .await
                .context("Error writing forbidden response")?;
            stream
                .shutdown()
                .await
                .context("Error shutting down stream")?;
            return Ok(());
        }

        stream
            .write_all(self.stats.snapshot().as_bytes())
            .await
            .context("Error writing stats")?;
        stream
            .shutdown()
            .await
            .context("Error shutting down stream")?;
        Ok(())
    }
}

/// Loads the configuration-driven pieces (pidfile, stats namespace,
/// signal handling) and runs the server until a termination signal.
pub async fn launch(config: config::Config) -> Result<()> {
    if !config.pidfile.is_empty() {
        if let Err(e) = std::fs::write(&config.pidfile, std::process::id().to_string()) {
            log::warn!("Could not write pidfile {}: {}", config.pidfile, e);
        }
    }

    let stats = Arc::new(stats::GlobalStats::new());
    let stop_event = event::Event::new();

    let signal_stop = stop_event.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        log::info!("Termination signal received, stopping server");
        signal_stop.set();
    });

    TunnelServer::new(&config, stats).run(stop_event).await
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                log::warn!("Could not install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<String>>()
        .join("")
}
