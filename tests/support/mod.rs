#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modelget_core::models::settings::{AppSettings, DownloadSettings};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const CHUNK: usize = 256;

/// How the server treats one file.
#[derive(Clone, Default)]
pub struct Served {
    pub body: Vec<u8>,
    /// Answer this many GETs with 500 before serving normally.
    pub fail_gets: usize,
    /// Close the first GET after this many body bytes (absolute offset).
    pub cut_at: Option<usize>,
    /// Answer ranged GETs with the whole body and 200.
    pub ignore_range: bool,
    /// Pause between body chunks.
    pub chunk_delay: Option<Duration>,
    /// Status for every request to this file.
    pub status: Option<u16>,
    /// Answer HEAD without a usable size.
    pub head_without_size: bool,
}

impl Served {
    pub fn bytes(len: usize) -> Self {
        Self {
            body: (0..len).map(|i| (i % 251) as u8).collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub name: String,
    pub range: Option<String>,
}

#[derive(Default)]
struct State {
    files: HashMap<String, Served>,
    seen: Vec<Seen>,
}

/// Minimal HTTP/1.1 file server on 127.0.0.1, one request per connection.
/// Files are matched on the last path segment. Anything under `/api/models/`
/// gets a repository listing naming every served file.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl TestServer {
    pub async fn start() -> Self {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        std::env::set_var("no_proxy", "127.0.0.1,localhost");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));
        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = shared.clone();
                tokio::spawn(async move {
                    let _ = handle(stream, state).await;
                });
            }
        });
        Self { addr, state }
    }

    pub fn serve(&self, name: &str, served: Served) {
        self.state.lock().unwrap().files.insert(name.to_string(), served);
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, name: &str) -> String {
        format!("http://{}/files/{}", self.addr, name)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.state.lock().unwrap().seen.clone()
    }

    pub fn gets(&self, name: &str) -> Vec<Seen> {
        self.seen()
            .into_iter()
            .filter(|s| s.method == "GET" && s.name == name)
            .collect()
    }

    pub fn body(&self, name: &str) -> Vec<u8> {
        self.state.lock().unwrap().files[name].body.clone()
    }
}

async fn handle(stream: TcpStream, state: Arc<Mutex<State>>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut range = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line == "\r\n" {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("range") {
                range = Some(value.trim().to_string());
            }
        }
    }

    if path.contains("/api/models/") {
        let listing = {
            let mut state = state.lock().unwrap();
            state.seen.push(Seen {
                method: method.clone(),
                name: "api".to_string(),
                range: None,
            });
            let mut names: Vec<_> = state.files.keys().cloned().collect();
            names.sort();
            let siblings: Vec<_> = names
                .into_iter()
                .map(|n| serde_json::json!({ "rfilename": n }))
                .collect();
            serde_json::json!({ "siblings": siblings }).to_string()
        };
        let mut stream = reader.into_inner();
        let headers = [("Content-Length".to_string(), listing.len().to_string())];
        return respond(&mut stream, 200, &headers, listing.as_bytes(), None, None).await;
    }

    let name = path.rsplit('/').next().unwrap_or_default().to_string();
    let plan = {
        let mut state = state.lock().unwrap();
        state.seen.push(Seen {
            method: method.clone(),
            name: name.clone(),
            range: range.clone(),
        });
        match state.files.get_mut(&name) {
            None => None,
            Some(served) => {
                let failing = method == "GET" && served.fail_gets > 0;
                if failing {
                    served.fail_gets -= 1;
                }
                let cut = if method == "GET" { served.cut_at.take() } else { None };
                Some((served.clone(), failing, cut))
            }
        }
    };

    let mut stream = reader.into_inner();
    let Some((served, failing, cut)) = plan else {
        return respond(&mut stream, 404, &[], &[], None, None).await;
    };
    if let Some(status) = served.status {
        return respond(&mut stream, status, &[], &[], None, None).await;
    }
    if failing {
        return respond(&mut stream, 500, &[], &[], None, None).await;
    }

    let len = served.body.len();
    if method == "HEAD" {
        let headers = if served.head_without_size {
            Vec::new()
        } else {
            vec![("Content-Length".to_string(), len.to_string())]
        };
        return respond(&mut stream, 200, &headers, &[], None, None).await;
    }

    let start = range
        .as_deref()
        .filter(|_| !served.ignore_range)
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.trim_end_matches('-').parse::<usize>().ok());

    match start {
        Some(start) if start >= len => {
            let headers = [("Content-Range".to_string(), format!("bytes */{}", len))];
            respond(&mut stream, 416, &headers, &[], None, None).await
        }
        Some(start) => {
            let headers = [
                ("Content-Length".to_string(), (len - start).to_string()),
                (
                    "Content-Range".to_string(),
                    format!("bytes {}-{}/{}", start, len - 1, len),
                ),
            ];
            let stop = cut.map(|c| c.saturating_sub(start));
            respond(&mut stream, 206, &headers, &served.body[start..], stop, served.chunk_delay).await
        }
        None => {
            let headers = [("Content-Length".to_string(), len.to_string())];
            respond(&mut stream, 200, &headers, &served.body, cut, served.chunk_delay).await
        }
    }
}

async fn respond(
    stream: &mut TcpStream,
    status: u16,
    headers: &[(String, String)],
    body: &[u8],
    stop_after: Option<usize>,
    chunk_delay: Option<Duration>,
) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        206 => "Partial Content",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        _ => "Error",
    };
    let mut head = format!("HTTP/1.1 {} {}\r\nConnection: close\r\n", status, reason);
    let has_length = headers.iter().any(|(k, _)| k == "Content-Length");
    for (key, value) in headers {
        head.push_str(&format!("{}: {}\r\n", key, value));
    }
    if !has_length {
        head.push_str("Content-Length: 0\r\n");
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await?;

    let end = stop_after.map_or(body.len(), |s| s.min(body.len()));
    for chunk in body[..end].chunks(CHUNK) {
        stream.write_all(chunk).await?;
        stream.flush().await?;
        if let Some(delay) = chunk_delay {
            tokio::time::sleep(delay).await;
        }
    }
    stream.flush().await?;
    stream.shutdown().await
}

/// Settings pointed at `server`, storing under `root`, with fast retries.
pub fn settings_for(server: &TestServer, root: &Path) -> AppSettings {
    let mut download = DownloadSettings::with_models_dir(root.to_path_buf());
    download.endpoint = server.endpoint();
    download.retry_delay_ms = 10;
    download.request_timeout_secs = 5;
    download.progress_interval_ms = 0;
    AppSettings {
        download,
        ..AppSettings::default()
    }
}
