use crate::params::{Configuration, ParameterStore};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:51000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ControlHandle {
    pub addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl ControlHandle {
    pub async fn stop(mut self) -> Result<()> {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            join.await
                .map_err(|_| anyhow!("control endpoint task panicked"))?;
        }
        Ok(())
    }
}

/// Local HTTP endpoint that feeds the parameter store.
pub struct ControlServer {
    cfg: ApiConfig,
    store: Arc<ParameterStore>,
}

impl ControlServer {
    pub fn new(cfg: ApiConfig, store: Arc<ParameterStore>) -> Self {
        Self { cfg, store }
    }

    /// Bind and start accepting. Must be called from within a tokio runtime.
    pub async fn spawn(self) -> Result<ControlHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr).await?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "control endpoint configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(run_api(listener, self.store, shutdown_rx));
        Ok(ControlHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

async fn run_api(
    listener: TcpListener,
    store: Arc<ParameterStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                let store = store.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, &store).await {
                        log::warn!("control request rejected: {}", err);
                    }
                });
            }
            Err(err) => {
                log::error!("control endpoint accept failed: {}", err);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    log::info!("control endpoint stopped");
}

async fn handle_connection(mut stream: TcpStream, store: &ParameterStore) -> Result<()> {
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#).await?;
        return Ok(());
    }

    let request = tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream))
        .await
        .map_err(|_| anyhow!("request from {} timed out", peer))??;

    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/SetParameters") => set_parameters(&mut stream, store, &request.body).await,
        ("GET", "/Alive") | ("GET", "/GetLicense") => {
            write_response(&mut stream, 200, "text/plain", b"").await
        }
        _ => write_response(&mut stream, 404, "text/plain", b"Not Found").await,
    }
}

async fn set_parameters(stream: &mut TcpStream, store: &ParameterStore, body: &[u8]) -> Result<()> {
    let config = match Configuration::from_json(body) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("SetParameters rejected: {}", err);
            let payload = serde_json::to_vec(&serde_json::json!({ "error": err.to_string() }))?;
            return write_response(stream, 400, "application/json", &payload).await;
        }
    };

    log::info!(
        "SetParameters received: version={} url={} {}x{} jpg_compress={} groups={}",
        config.version,
        config.analytics_event_api_url,
        config.image_width,
        config.image_height,
        config.jpg_compress,
        config.rois.len()
    );
    for (idx, group) in config.rois.iter().enumerate() {
        log::debug!(
            "roi group {}: sensitivity={} threshold={} points={:?}",
            idx,
            group.sensitivity,
            group.threshold,
            group.rects
        );
    }
    store.set(config);
    write_json_response(stream, 200, r#"{"message":"Parameters set successfully"}"#).await
}

async fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_HEADER_BYTES && !data.windows(4).any(|w| w == b"\r\n\r\n") {
            return Err(anyhow!("request headers too large"));
        }
    };

    let (method, path, headers) = parse_head(&data[..header_end])?;

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large ({} bytes)", content_length));
    }

    let mut body = data.split_off(header_end + 4);
    while body.len() < content_length {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(anyhow!(
                "connection closed after {} of {} body bytes",
                body.len(),
                content_length
            ));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest { method, path, body })
}

fn parse_head(head: &[u8]) -> Result<(String, String, HashMap<String, String>)> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    Ok((method.to_string(), path.to_string(), headers))
}

async fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes()).await
}

async fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.shutdown().await?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}
