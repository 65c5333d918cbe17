//! Loopback HTTP and WebSocket fixtures for async tests.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

/// Serves `body` with `status_line` to every request until the runtime stops.
pub async fn spawn_http_server(status_line: &'static str, body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("loopback listener should bind");
    let address = listener
        .local_addr()
        .expect("listener should have an address");

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut buffer = vec![0_u8; 16 * 1024];
                let mut filled = 0;
                while filled < buffer.len() {
                    let read = socket.read(&mut buffer[filled..]).await.unwrap_or(0);
                    if read == 0 {
                        break;
                    }
                    filled += read;
                    if buffer[..filled].windows(4).any(|window| window == b"\r\n\r\n") {
                        break;
                    }
                }

                let response = format!(
                    "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{address}")
}

/// A URL on a port nothing listens on.
pub async fn unused_local_url(scheme: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("loopback listener should bind");
    let address = listener
        .local_addr()
        .expect("listener should have an address");
    drop(listener);
    format!("{scheme}://{address}")
}

pub struct TickerServer {
    pub url: String,
    pub subscribe_frame: oneshot::Receiver<String>,
    pub client_closed: oneshot::Receiver<()>,
}

/// Accepts one WebSocket client, captures its first text frame (the
/// subscription), pushes `frames`, then either closes (`close_after_frames`)
/// or waits for the client to close.
pub async fn spawn_ticker_server(frames: Vec<String>, close_after_frames: bool) -> TickerServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("loopback listener should bind");
    let address = listener
        .local_addr()
        .expect("listener should have an address");
    let (subscribe_tx, subscribe_rx) = oneshot::channel();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut websocket) = tokio_tungstenite::accept_async(socket).await else {
            return;
        };

        if let Some(Ok(Message::Text(text))) = websocket.next().await {
            let _ = subscribe_tx.send(text);
        }

        for frame in frames {
            if websocket.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }

        if close_after_frames {
            let _ = websocket.close(None).await;
            return;
        }

        while let Some(Ok(message)) = websocket.next().await {
            if message.is_close() {
                break;
            }
        }
        let _ = closed_tx.send(());
    });

    TickerServer {
        url: format!("ws://{address}"),
        subscribe_frame: subscribe_rx,
        client_closed: closed_rx,
    }
}
