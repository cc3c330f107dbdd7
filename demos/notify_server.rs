//! Notification server demo.
//!
//! Run with: cargo run --example notify_server
//! Then connect a WebSocket client to ws://127.0.0.1:9001/websocket and send
//! `{"event_name": "subscribe", "data": {"channels": ["broadcast"]}}`.
//! A notification is posted on `broadcast` every five seconds.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wsbus::{Bus, Config, HandshakeRequest, MemoryNotificationStore, SessionStore};

const ADDR: &str = "127.0.0.1:9001";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wsbus=debug,notify_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(MemoryNotificationStore::new());
    let bus = Bus::builder()
        .config(Config::from_env()?)
        .notifications(Arc::clone(&store))
        .build();

    let ticker = bus.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        let mut count = 0u64;
        loop {
            interval.tick().await;
            count += 1;
            store.push("broadcast", json!({"type": "tick", "payload": count}));
            ticker.notify(&["broadcast"]);
        }
    });

    let listener = TcpListener::bind(ADDR).await?;
    tracing::info!("listening on {ADDR}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                let bus = bus.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(bus, stream).await {
                        tracing::warn!(%addr, error = %e, "connection failed");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                let kicked = bus.shutdown();
                tracing::info!(kicked, "shutting down");
                tokio::time::sleep(Duration::from_secs(1)).await;
                return Ok(());
            }
        }
    }
}

async fn handle_connection(bus: Bus, stream: TcpStream) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut reader = BufReader::new(stream);
    let mut head = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        head.extend_from_slice(line.as_bytes());
        if line == "\r\n" {
            break;
        }
    }
    let leftover = reader.buffer().to_vec();
    let mut stream = reader.into_inner();

    let request = match HandshakeRequest::parse(&head) {
        Ok(request) => request,
        Err(e) => {
            let mut response = Vec::new();
            e.write_response(&mut response);
            stream.write_all(&response).await?;
            return Err(e.into());
        }
    };

    let session = bus.sessions().create_anonymous(None).await?;
    let upgrade = match bus.handshake(&request, session).await {
        Ok(upgrade) => upgrade,
        Err(wsbus::Error::Handshake(e)) => {
            let mut response = Vec::new();
            e.write_response(&mut response);
            stream.write_all(&response).await?;
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let mut response = Vec::new();
    upgrade.response.write(&mut response);
    stream.write_all(&response).await?;

    let conn = bus.accept(stream, upgrade).with_buffered(&leftover);
    bus.serve(conn, &()).await;
    Ok(())
}
