use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::server::TlsStream;

use super::consts;
use super::error::ApiError;
use super::event::Event;
use super::stats::ConnectionStats;
use super::types::Response;
use super::udsapi::UDSApiProvider;

/// One OPEN session: ticket lookup, backend dial and the two byte pumps.
/// Owns the session byte counters; the stop notification is sent exactly
/// once, when the pumps are done.
pub struct RelayConnection {
    pub tunnel_id: String,
    pub ticket: String,
    udsapi: Arc<dyn UDSApiProvider>,
    stats: Arc<ConnectionStats>,

    pub src: String, // client ip:port
    pub dst: String, // backend host:port, set after lookup
    notify_ticket: String,
}

impl RelayConnection {
    pub fn new(
        tunnel_id: String,
        ticket: String,
        udsapi: Arc<dyn UDSApiProvider>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        RelayConnection {
            tunnel_id,
            ticket,
            udsapi,
            stats,
            src: String::new(),
            dst: String::new(),
            notify_ticket: String::new(),
        }
    }

    /// Resolves the ticket, dials the backend, answers OK and pumps bytes
    /// until either side closes or the stop event fires. The client does
    /// not get read while the lookup and the dial are in flight.
    pub async fn run(
        &mut self,
        mut client_stream: TlsStream<TcpStream>,
        stop_event: Event,
    ) -> io::Result<()> {
        let src_addr = client_stream.get_ref().0.peer_addr()?;
        self.src = format!("{}:{}", src_addr.ip(), src_addr.port());

        let uds_response = match self
            .udsapi
            .get_ticket(&self.ticket, &src_addr.ip().to_string())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                log::error!("TICKET ({}) {} from {}: {}", self.tunnel_id, self.ticket, self.src, e);
                let response = match e {
                    ApiError::Timeout => Response::TimeoutError,
                    _ => Response::TicketError,
                };
                client_stream.write_all(response.to_bytes()).await?;
                client_stream.shutdown().await?;
                return Ok(());
            }
        };

        // From here on the broker expects a stop notification, even if the
        // session never moves a byte
        self.notify_ticket = uds_response.notify.clone();
        self.dst = if uds_response.host.contains(':') {
            // Bare IPv6 address, bracket it for the connect call
            format!("[{}]:{}", uds_response.host, uds_response.port)
        } else {
            format!("{}:{}", uds_response.host, uds_response.port)
        };

        log::info!(
            "OPEN TUNNEL ({}) from {} to {}",
            self.tunnel_id,
            self.src,
            self.dst
        );

        let server_stream = match TcpStream::connect(&self.dst).await {
            Ok(stream) => stream,
            Err(e) => {
                log::error!(
                    "CONNECT ({}) to {} failed: {}",
                    self.tunnel_id,
                    self.dst,
                    e
                );
                client_stream
                    .write_all(Response::TicketError.to_bytes())
                    .await
                    .unwrap_or_default();
                client_stream.shutdown().await.unwrap_or_default();
                self.notify_end().await;
                return Ok(());
            }
        };

        if let Err(e) = client_stream.write_all(Response::Ok.to_bytes()).await {
            // Client went away between lookup and dial; still owes a stop
            log::info!("CLIENT ({}) {} lost before OK: {}", self.tunnel_id, self.src, e);
            self.notify_end().await;
            return Ok(());
        }

        let (mut server_reader, mut server_writer) = server_stream.into_split();
        let (mut client_reader, mut client_writer) = tokio::io::split(client_stream);

        // client -> backend, counted as sent
        let sent_stats = self.stats.clone();
        let mut client_to_server = tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(consts::BUFFER_SIZE);
            loop {
                buf.clear();
                match client_reader.read_buf(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if server_writer.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                        sent_stats.add_sent(n as u64);
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => {
                        log::debug!("Client read ended: {:?}", e);
                        break;
                    }
                }
            }
            server_writer.shutdown().await.unwrap_or_default();
        });

        // backend -> client, counted as recv
        let recv_stats = self.stats.clone();
        let mut server_to_client = tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(consts::BUFFER_SIZE);
            loop {
                buf.clear();
                match server_reader.read_buf(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if client_writer.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                        recv_stats.add_recv(n as u64);
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => {
                        log::debug!("Backend read ended: {:?}", e);
                        break;
                    }
                }
            }
            client_writer.shutdown().await.unwrap_or_default();
        });

        // First pump to finish (or a server stop) tears down both; dropping
        // the halves closes the transports
        tokio::select! {
            _ = &mut client_to_server => {
                server_to_client.abort();
            }
            _ = &mut server_to_client => {
                client_to_server.abort();
            }
            _ = stop_event.wait() => {
                client_to_server.abort();
                server_to_client.abort();
            }
        }
        let _ = client_to_server.await;
        let _ = server_to_client.await;

        self.notify_end().await;
        Ok(())
    }

    /// Flushes the counters and reports the session end upstream, once.
    async fn notify_end(&mut self) {
        self.stats.close();
        if !self.notify_ticket.is_empty() {
            log::info!(
                "TERMINATED ({}) {} to {}, s:{}, r:{}, t:{}",
                self.tunnel_id,
                self.src,
                self.dst,
                self.stats.sent(),
                self.stats.recv(),
                self.stats.elapsed().as_secs(),
            );
            self.udsapi
                .notify_end(&self.notify_ticket, self.stats.sent(), self.stats.recv())
                .await;
            self.notify_ticket.clear(); // No more notifications
        } else {
            log::info!("TERMINATED ({}) {}", self.tunnel_id, self.src);
        }
    }
}
