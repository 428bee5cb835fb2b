extern crate udstunnel;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;

use udstunnel::config::Config;
use udstunnel::tunnel::error::ApiError;
use udstunnel::tunnel::event::Event;
use udstunnel::tunnel::stats::GlobalStats;
use udstunnel::tunnel::{server, udsapi};

/// One recorded control plane call, as the provider saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub ticket: String,
    pub message: String,
    pub query_params: Option<String>,
}

/// Control plane stand-in: records every call and answers with a fixed
/// destination, or rejects everything when built with `failing()`.
pub struct FakeUDSApiProvider {
    pub requests: Arc<Mutex<Vec<Request>>>,
    pub host: String,
    pub port: u16,
    pub notify: String,
    pub fail: bool,
}

#[allow(dead_code)]
impl FakeUDSApiProvider {
    pub fn new(host: &str, port: u16) -> Self {
        FakeUDSApiProvider {
            requests: Arc::new(Mutex::new(Vec::new())),
            host: host.to_string(),
            port,
            notify: "notify_ticket_0123456789".to_string(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        FakeUDSApiProvider {
            fail: true,
            ..FakeUDSApiProvider::new("127.0.0.1", 1)
        }
    }
}

#[async_trait]
impl udsapi::UDSApiProvider for FakeUDSApiProvider {
    async fn request(
        &self,
        ticket: &str,
        message: &str,
        query_params: Option<&str>,
    ) -> Result<udsapi::UdsTicketResponse, ApiError> {
        self.requests.lock().unwrap().push(Request {
            ticket: ticket.to_string(),
            message: message.to_string(),
            query_params: query_params.map(str::to_string),
        });
        if self.fail {
            return Err(ApiError::Rejected("ticket rejected by fake broker".into()));
        }
        Ok(udsapi::UdsTicketResponse {
            host: self.host.clone(),
            port: self.port,
            notify: self.notify.clone(),
        })
    }
}

/// In-process tunnel server under test, with its shared stats namespace
/// and (when a fake provider is used) the recorded control plane calls.
pub struct TunnelServer {
    pub server_handle: JoinHandle<()>,
    pub stats: Arc<GlobalStats>,
    pub requests: Option<Arc<Mutex<Vec<Request>>>>,
    stop_event: Event,
}

#[allow(dead_code)]
impl TunnelServer {
    pub async fn create(config: &Config, provider: Option<FakeUDSApiProvider>) -> Self {
        let stats = Arc::new(GlobalStats::new());
        let stop_event = Event::new();
        let requests = provider.as_ref().map(|p| p.requests.clone());

        let mut core = server::TunnelServer::new(config, stats.clone());
        if let Some(provider) = provider {
            core = core.with_provider(Arc::new(provider));
        }

        let run_stop_event = stop_event.clone();
        let server_handle = tokio::spawn(async move {
            let result = core.run(run_stop_event).await;
            assert!(result.is_ok(), "server failed: {:?}", result);
        });

        // Give tokio a moment to bring the listener up
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        TunnelServer {
            server_handle,
            stats,
            requests,
            stop_event,
        }
    }

    /// Requests a graceful stop; await `server_handle` afterwards.
    pub fn abort(&self) {
        self.stop_event.set();
    }
}
