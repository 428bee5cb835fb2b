use async_trait::async_trait;
use serde::Deserialize;

use reqwest::ClientBuilder;

use crate::config;

use super::consts;
use super::error::ApiError;

/// What the broker answers for a valid ticket: where to connect and the
/// notify ticket to report the session end with.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct UdsTicketResponse {
    pub host: String,
    pub port: u16,
    pub notify: String,
}

impl UdsTicketResponse {
    /// The broker must name a reachable destination; anything else is
    /// treated as a rejected ticket.
    fn validate(self) -> Result<Self, ApiError> {
        if self.host.is_empty() {
            return Err(ApiError::Rejected("empty host in response".into()));
        }
        if self.port == 0 {
            return Err(ApiError::Rejected("invalid port 0 in response".into()));
        }
        if self.notify.is_empty() {
            return Err(ApiError::Rejected("empty notify ticket in response".into()));
        }
        Ok(self)
    }
}

#[async_trait]
pub trait UDSApiProvider: Send + Sync {
    async fn request(
        &self,
        ticket: &str,
        message: &str,
        query_params: Option<&str>,
    ) -> Result<UdsTicketResponse, ApiError>;

    /// Ticket lookup: GET {server}/{ticket}/{client_ip}/{token}
    async fn get_ticket(&self, ticket: &str, ip: &str) -> Result<UdsTicketResponse, ApiError> {
        self.request(ticket, ip, None).await
    }

    /// Session end: GET {server}/{notify}/stop/{token}?sent=S&recv=R.
    /// Best effort, the caller already closed the client side.
    async fn notify_end(&self, notify_ticket: &str, sent: u64, recv: u64) {
        if let Err(e) = self
            .request(
                notify_ticket,
                "stop",
                Some(format!("sent={}&recv={}", sent, recv).as_str()),
            )
            .await
        {
            log::warn!("STOP notification for {} failed: {}", notify_ticket, e);
        }
    }
}

#[derive(Clone, Debug)]
pub struct HttpUDSApiProvider {
    server: String,
    token: String,
    timeout: std::time::Duration,
    client: reqwest::Client,
}

impl HttpUDSApiProvider {
    pub fn new(config: &config::Config) -> Self {
        let client = ClientBuilder::new()
            .use_rustls_tls()
            .danger_accept_invalid_certs(!config.uds_verify_ssl)
            .connect_timeout(config.uds_timeout)
            .read_timeout(config.uds_timeout)
            .user_agent(consts::USER_AGENT)
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::CONTENT_TYPE,
                    reqwest::header::HeaderValue::from_static("application/json"),
                );
                headers
            })
            .build()
            .expect("reqwest client construction cannot fail with static options");
        HttpUDSApiProvider {
            server: config.uds_server.clone(),
            token: config.uds_token.clone(),
            timeout: config.uds_timeout,
            client,
        }
    }
}

#[async_trait]
impl UDSApiProvider for HttpUDSApiProvider {
    async fn request(
        &self,
        ticket: &str,
        message: &str,
        query_params: Option<&str>,
    ) -> Result<UdsTicketResponse, ApiError> {
        let query = match query_params {
            Some(query) => format!("?{}", query),
            None => String::new(),
        };
        let url = format!(
            "{}/{}/{}/{}{}",
            self.server, ticket, message, self.token, query
        );

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout
                } else {
                    ApiError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ApiError::Rejected(format!(
                "status {} for {}",
                response.status(),
                ticket
            )));
        }

        // Tolerate (log and reject) unknown layouts, e.g. the legacy
        // notify_ticket key, instead of guessing
        match response.json::<UdsTicketResponse>().await {
            Ok(parsed) => parsed.validate(),
            Err(e) => {
                log::error!("Malformed broker response for {}: {}", ticket, e);
                Err(ApiError::Rejected(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Records what the default trait methods build for each call
    struct RecordingProvider {
        calls: Mutex<Vec<(String, String, Option<String>)>>,
    }

    impl RecordingProvider {
        fn new() -> Self {
            RecordingProvider {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl UDSApiProvider for RecordingProvider {
        async fn request(
            &self,
            ticket: &str,
            message: &str,
            query_params: Option<&str>,
        ) -> Result<UdsTicketResponse, ApiError> {
            self.calls.lock().unwrap().push((
                ticket.to_string(),
                message.to_string(),
                query_params.map(str::to_string),
            ));
            Ok(UdsTicketResponse {
                host: "10.0.0.5".into(),
                port: 3389,
                notify: "abc".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_get_ticket_passes_client_ip() {
        let provider = RecordingProvider::new();
        let ticket = "t".repeat(48);

        let response = provider.get_ticket(&ticket, "10.0.0.1").await.unwrap();
        assert_eq!(response.host, "10.0.0.5");
        assert_eq!(response.port, 3389);
        assert_eq!(response.notify, "abc");

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (ticket, "10.0.0.1".to_string(), None));
    }

    #[tokio::test]
    async fn test_notify_end_query_shape() {
        let provider = RecordingProvider::new();
        provider.notify_end("notify123", 5, 7).await;

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            (
                "notify123".to_string(),
                "stop".to_string(),
                Some("sent=5&recv=7".to_string())
            )
        );
    }

    #[test]
    fn test_response_validation() {
        let ok = UdsTicketResponse {
            host: "h".into(),
            port: 1,
            notify: "n".into(),
        };
        assert!(ok.clone().validate().is_ok());

        let no_host = UdsTicketResponse {
            host: "".into(),
            ..ok.clone()
        };
        assert!(matches!(no_host.validate(), Err(ApiError::Rejected(_))));

        let no_port = UdsTicketResponse {
            port: 0,
            ..ok.clone()
        };
        assert!(matches!(no_port.validate(), Err(ApiError::Rejected(_))));

        let no_notify = UdsTicketResponse {
            notify: "".into(),
            ..ok
        };
        assert!(matches!(no_notify.validate(), Err(ApiError::Rejected(_))));
    }
}
