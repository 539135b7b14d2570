// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw TCP print client (JetDirect / Zebra, port 9100).
//
// Open a TCP socket, dump bytes, close.  No settings, no job tracking,
// no feedback.  The printer must interpret the payload natively.

use std::future::Future;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use printrelay_core::error::{RelayError, Result};

/// Default raw TCP port (HP JetDirect / Zebra).
pub const RAW_PORT: u16 = printrelay_core::types::DEFAULT_PRINTER_PORT;

/// Timeout for connecting and for each write step of a raw print.
pub const RAW_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a reachability check.
pub const CONNECT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const CHUNK_SIZE: usize = 8192;

/// Open a TCP connection to `host:port` within `limit`.
pub(crate) async fn connect(host: &str, port: u16, limit: Duration) -> Result<TcpStream> {
    let addr = format!("{host}:{port}");
    tokio::time::timeout(limit, TcpStream::connect(&addr))
        .await
        .map_err(|_| {
            RelayError::Printer(format!(
                "connection to {addr} timed out after {}s",
                limit.as_secs()
            ))
        })?
        .map_err(|e| RelayError::Printer(format!("connect to {addr}: {e}")))
}

/// Send bytes directly to a printer over raw TCP.
///
/// `limit` bounds each step on its own (connect, every chunk written,
/// flush, shutdown), so a large job to a slow but live printer is not cut
/// off part way through; only a stalled step fails.
pub async fn send_raw(host: &str, port: u16, payload: &[u8], limit: Duration) -> Result<()> {
    let addr = format!("{host}:{port}");
    info!(addr = %addr, total = payload.len(), "connecting via raw TCP");

    let mut stream = connect(host, port, limit).await?;

    let mut sent = 0usize;
    for chunk in payload.chunks(CHUNK_SIZE) {
        step(limit, &format!("send at byte {sent}"), stream.write_all(chunk)).await?;
        sent += chunk.len();
        debug!(sent, total = payload.len(), "raw TCP progress");
    }
    step(limit, "flush", stream.flush()).await?;
    step(limit, "shutdown", stream.shutdown()).await?;

    info!(addr = %addr, total = payload.len(), "raw TCP print job sent");
    Ok(())
}

/// One socket operation, bounded by `limit`.
async fn step<F>(limit: Duration, what: &str, op: F) -> Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RelayError::Printer(format!("raw TCP {what}: {e}"))),
        Err(_) => Err(RelayError::Printer(format!(
            "raw TCP {what} stalled for {}ms",
            limit.as_millis()
        ))),
    }
}

/// Check that something accepts connections on `host:port`.
pub async fn check_connection(host: &str, port: u16) -> bool {
    match connect(host, port, CONNECT_CHECK_TIMEOUT).await {
        Ok(_) => true,
        Err(e) => {
            debug!(host, port, error = %e, "raw connection test failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn sends_all_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let payload = vec![b'Z'; 20_000];
        send_raw("127.0.0.1", port, &payload, RAW_TIMEOUT).await.unwrap();
        assert_eq!(server.await.unwrap(), payload);
    }

    #[tokio::test]
    async fn refused_connection_is_printer_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = send_raw("127.0.0.1", port, b"^XA^XZ", RAW_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Printer(_)));
        assert!(!check_connection("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn slow_reader_gets_the_whole_job() {
        // Small receive buffer so the sender really waits on the reader.
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        socket.set_recv_buffer_size(16 * 1024).unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(4).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = 0usize;
            let mut buf = vec![0u8; 16 * 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break received;
                }
                received += n;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        // Draining this takes well over a second; no single step does.
        let payload = vec![b'Z'; 1024 * 1024];
        send_raw("127.0.0.1", port, &payload, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(server.await.unwrap(), payload.len());
    }

    #[tokio::test]
    async fn stalled_reader_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            // Accept and never read.
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let payload = vec![b'Z'; 32 * 1024 * 1024];
        let err = send_raw("127.0.0.1", port, &payload, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Printer(msg) if msg.contains("stalled")));
        server.abort();
    }
}
