use std::fmt;
use std::io::{Error, ErrorKind};
use std::sync::Arc;

use log::debug;

use tokio::net::TcpStream;
use tokio_rustls::{
    client::TlsStream,
    rustls::{self, crypto::aws_lc_rs, pki_types::ServerName, RootCertStore, ALL_VERSIONS},
    TlsConnector,
};

use rustls_native_certs::load_native_certs;

use super::noverify::NoVerifySsl;

/// TLS connection builder for the client side of the tunnel protocol
/// (stats client and tests).
pub struct ConnectionBuilder {
    server: String,
    port: u16,
    verify: bool,
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("verify", &self.verify)
            .finish()
    }
}

impl ConnectionBuilder {
    pub fn new(server: &str, port: u16) -> Self {
        ConnectionBuilder {
            server: String::from(server),
            port,
            verify: true,
        }
    }

    pub fn with_verify_ssl(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub async fn connect(self) -> Result<TlsStream<TcpStream>, Error> {
        debug!("Connecting to {}:{}", self.server, self.port);

        let mut root_store = RootCertStore::empty();
        root_store.add_parsable_certificates(load_native_certs().certs);

        let mut config =
            rustls::ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
                .with_protocol_versions(ALL_VERSIONS)
                .map_err(|e| Error::new(ErrorKind::InvalidInput, e))?
                .with_root_certificates(root_store)
                .with_no_client_auth();

        if !self.verify {
            config
                .dangerous()
                .set_certificate_verifier(NoVerifySsl::new());
        }

        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(self.server.clone())
            .map_err(|e| Error::new(ErrorKind::InvalidInput, e))?;

        let stream = TcpStream::connect(format!("{}:{}", self.server, self.port)).await?;

        let tls_stream = connector.connect(server_name, stream).await?;

        Ok(tls_stream)
    }
}
