use std::time::Duration;

use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};
use tokio_rustls::client::TlsStream;

use udstunnel::tls::client::ConnectionBuilder;
use udstunnel::tunnel::consts;

#[allow(dead_code)]
pub async fn open_client_no_handshake(port: u16) -> TcpStream {
    // Plain TCP, no TLS, no handshake. Check the server is listening
    match timeout(
        Duration::from_millis(500),
        TcpStream::connect(format!("127.0.0.1:{}", port)),
    )
    .await
    {
        Ok(conn) => conn.unwrap(),
        Err(e) => {
            panic!("Error connecting to server: {:?}", e);
        }
    }
}

#[allow(dead_code)]
pub async fn open_tls_client(port: u16) -> TlsStream<TcpStream> {
    // TLS session established, handshake magic not yet sent
    ConnectionBuilder::new("127.0.0.1", port)
        .with_verify_ssl(false)
        .connect()
        .await
        .unwrap()
}

#[allow(dead_code)]
pub async fn open_client_with_handshake(port: u16) -> TlsStream<TcpStream> {
    let mut client = open_tls_client(port).await;
    client.write_all(consts::HANDSHAKE_V1).await.unwrap();
    client
}
