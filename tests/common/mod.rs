//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use rebound::app::RequestHandler;
use rebound::config::ServerConfig;
use rebound::lifecycle::{self, Running};
use rebound::websocket::WebsocketGateway;

/// Configuration listening on one fixed local port.
pub fn config_for(port: u16) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.addresses = vec![format!("127.0.0.1:{port}")];
    config
}

/// Start a server on `port` with the handler built by `make_handler`.
///
/// Keep the returned value alive for as long as the server should run.
pub async fn start_server<F>(port: u16, make_handler: F) -> Running
where
    F: FnOnce(&Arc<WebsocketGateway>) -> Arc<dyn RequestHandler>,
{
    lifecycle::start(&config_for(port), make_handler)
        .await
        .expect("server starts")
}

pub fn ws_url(port: u16) -> String {
    format!("ws://127.0.0.1:{port}/")
}

/// Send raw bytes and collect everything the server writes until it closes.
pub async fn raw_exchange(port: u16, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(request).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("server closes the connection")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Perform a raw WebSocket handshake and return the stream positioned after the 101 head.
pub async fn raw_upgrade(port: u16) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(
            b"GET /raw HTTP/1.1\r\n\
              Host: 127.0.0.1\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{head}");
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    stream
}

/// Read one short unmasked server frame.
pub async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await.unwrap();
    let mut payload = vec![0u8; (head[1] & 0x7F) as usize];
    stream.read_exact(&mut payload).await.unwrap();
    (head[0], payload)
}
