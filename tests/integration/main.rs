//! crema integration test harness.
//!
//! Everything runs on loopback inside the test process: small hand-rolled
//! HTTP, UDP and rendezvous servers stand in for the league and for game
//! hosts, and the real crates are driven against them.
//!
//!   cargo test --test integration

mod api;
mod eventsource;
mod probing;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use zerocopy::AsBytes;

use crema_core::wire::{data_packet, split_packet, ConnOkPacket, NetpuncherMessage, PacketId};

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Await `fut`, failing the test if it takes longer than `TEST_TIMEOUT`.
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    match tokio::time::timeout(TEST_TIMEOUT, fut).await {
        Ok(v) => v,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

/// Headers of one request received by `HttpStub`.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub accept: Option<String>,
    pub last_event_id: Option<String>,
}

/// A one-shot-per-connection HTTP server: every request gets the body
/// `respond` produces and the connection is closed right after.
pub struct HttpStub {
    pub addr: SocketAddr,
    pub requests: mpsc::UnboundedReceiver<RecordedRequest>,
}

impl HttpStub {
    pub async fn start<F>(content_type: &'static str, respond: F) -> Result<Self>
    where
        F: Fn(&RecordedRequest) -> String + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, requests) = mpsc::unbounded_channel();
        let respond = Arc::new(respond);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                let respond = respond.clone();
                tokio::spawn(async move {
                    let _ = serve_one(stream, content_type, &*respond, &tx).await;
                });
            }
        });

        Ok(Self { addr, requests })
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

async fn serve_one<F>(
    mut stream: TcpStream,
    content_type: &str,
    respond: &F,
    tx: &mpsc::UnboundedSender<RecordedRequest>,
) -> Result<()>
where
    F: Fn(&RecordedRequest) -> String,
{
    let head = read_request_head(&mut stream).await?;
    let request = parse_request_head(&head)?;
    let body = respond(&request);
    let _ = tx.send(request);

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n{body}"
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn read_request_head(stream: &mut TcpStream) -> Result<String> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            bail!("connection closed before end of request head");
        }
        head.extend_from_slice(&buf[..n]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn parse_request_head(head: &str) -> Result<RecordedRequest> {
    let mut lines = head.split("\r\n");
    let path = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .context("malformed request line")?
        .to_string();

    let mut request = RecordedRequest {
        path,
        accept: None,
        last_event_id: None,
    };
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.trim().to_ascii_lowercase().as_str() {
            "accept" => request.accept = Some(value),
            "last-event-id" => request.last_event_id = Some(value),
            _ => {}
        }
    }
    Ok(request)
}

/// What a `HoldingServer` saw on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Held {
    Request,
    HungUp,
}

/// HTTP server that never finishes a response. After the request head it
/// writes `preamble` (if any) and then keeps the connection open, reporting
/// when the client closes its side.
pub struct HoldingServer {
    pub addr: SocketAddr,
    pub events: mpsc::UnboundedReceiver<Held>,
}

impl HoldingServer {
    pub async fn start(preamble: Option<&'static str>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, events) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if read_request_head(&mut stream).await.is_err() {
                        return;
                    }
                    let _ = tx.send(Held::Request);
                    if let Some(preamble) = preamble {
                        if stream.write_all(preamble.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    let mut buf = [0u8; 256];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                    let _ = tx.send(Held::HungUp);
                });
            }
        });

        Ok(Self { addr, events })
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

/// UDP socket answering every datagram with the same bytes.
pub async fn udp_echo() -> Result<SocketAddr> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = socket.local_addr()?;
    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    Ok(addr)
}

/// Rendezvous server introducing every client asking for `host_id` to `peer`.
pub async fn rendezvous_server(host_id: u32, peer: SocketAddr) -> Result<SocketAddr> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = socket.local_addr()?;
    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let Ok((hdr, payload)) = split_packet(&buf[..n]) else {
                continue;
            };
            match hdr.packet_id() {
                Ok(PacketId::Conn) => {
                    let _ = socket.send_to(ConnOkPacket::new(from).as_bytes(), from).await;
                }
                Ok(PacketId::Data) => {
                    if NetpuncherMessage::decode(payload)
                        == Ok(NetpuncherMessage::SReq { cid: host_id })
                    {
                        let reply = NetpuncherMessage::CReq { addr: peer };
                        let _ = socket.send_to(&data_packet(0, &reply.encode()), from).await;
                    }
                }
                _ => {}
            }
        }
    });
    Ok(addr)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_http_stub_records_headers() {
    let mut stub = HttpStub::start("text/plain", |_| "hi".to_string()).await.unwrap();

    let client = reqwest::Client::new();
    let body = client
        .get(format!("{}feed", stub.url()))
        .header("Accept", "text/event-stream")
        .header("Last-Event-ID", "42")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "hi");

    let request = within("recorded request", stub.requests.recv()).await.unwrap();
    assert_eq!(request.path, "/feed");
    assert_eq!(request.accept.as_deref(), Some("text/event-stream"));
    assert_eq!(request.last_event_id.as_deref(), Some("42"));
}
