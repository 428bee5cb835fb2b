use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config;
use crate::tls::client::ConnectionBuilder;

use super::consts;

/// Asks the local listener for its statistics snapshot: TLS connect,
/// handshake, STAT or INFO plus the secret hash, then read until EOF.
/// Certificate verification is off, the target is always local. No
/// retries.
pub async fn get_server_stats(config: &config::Config, detailed: bool) -> Result<String> {
    // Wildcard listen addresses are not dialable
    let host = match config.listen_address.as_str() {
        "0.0.0.0" | "[::]" | "::" => "localhost".to_string(),
        address => address.trim_matches(['[', ']']).to_string(),
    };

    let mut stream = ConnectionBuilder::new(&host, config.listen_port)
        .with_verify_ssl(false)
        .connect()
        .await
        .with_context(|| format!("Could not connect to {}:{}", host, config.listen_port))?;

    stream.write_all(consts::HANDSHAKE_V1).await?;

    let command = if detailed {
        consts::COMMAND_STAT
    } else {
        consts::COMMAND_INFO
    };
    stream.write_all(command.as_bytes()).await?;
    stream.write_all(config.secret.as_bytes()).await?;

    let mut body = Vec::new();
    stream.read_to_end(&mut body).await?;

    Ok(String::from_utf8_lossy(&body).into_owned())
}
