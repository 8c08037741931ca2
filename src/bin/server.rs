#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use anyhow::Context;
#[cfg(not(target_arch = "wasm32"))]
use bytes::Bytes;
#[cfg(not(target_arch = "wasm32"))]
use clap::Parser;
#[cfg(not(target_arch = "wasm32"))]
use http_body_util::{BodyExt, Full};
#[cfg(not(target_arch = "wasm32"))]
use hyper_util::client::legacy::{connect::HttpConnector, Client};
#[cfg(not(target_arch = "wasm32"))]
use hyper_util::rt::TokioExecutor;
#[cfg(not(target_arch = "wasm32"))]
use std::fs;
#[cfg(not(target_arch = "wasm32"))]
use std::io::{Cursor, Read};
#[cfg(not(target_arch = "wasm32"))]
use std::path::{Component, Path, PathBuf};
#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;
#[cfg(not(target_arch = "wasm32"))]
use tokio::runtime::Runtime;
#[cfg(not(target_arch = "wasm32"))]
use tiny_http::{Header, Request, Response, Server, StatusCode};

#[cfg(not(target_arch = "wasm32"))]
type ProxyClient = Client<HttpConnector, Full<Bytes>>;

/// Serves the game bundle, falls back to the entry page for client-side
/// routes and forwards API calls to the account backend.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Parser, Debug, Clone)]
struct Opts {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3000")]
    listen: String,
    /// Overrides the port of --listen
    #[arg(long, env = "PORT")]
    port: Option<u16>,
    /// Directory holding index.html and the wasm bundle
    #[arg(long, default_value = "web")]
    root: PathBuf,
    /// Backend that receives API requests
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    upstream: String,
    /// Path prefix routed to the backend
    #[arg(long, default_value = "/api")]
    api_prefix: String,
    /// Seconds to wait for the backend before answering 504
    #[arg(long, default_value_t = 10)]
    upstream_timeout: u64,
}

#[cfg(not(target_arch = "wasm32"))]
impl Opts {
    fn bind_addr(&self) -> String {
        match self.port {
            Some(port) => {
                let host = self
                    .listen
                    .rsplit_once(':')
                    .map(|(h, _)| h)
                    .unwrap_or(&self.listen);
                format!("{}:{}", host, port)
            }
            None => self.listen.clone(),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let root = opts
        .root
        .canonicalize()
        .with_context(|| format!("web directory not found at {}", opts.root.display()))?;
    let addr = opts.bind_addr();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let client: ProxyClient = Client::builder(TokioExecutor::new()).build_http();

    let server = Server::http(&addr).map_err(|e| anyhow::anyhow!("bind {}: {}", addr, e))?;
    println!(
        "Serving {} on http://{} ({} -> {})",
        root.display(),
        addr,
        opts.api_prefix,
        opts.upstream
    );

    for request in server.incoming_requests() {
        let url = request.url().to_string();
        let method = request.method().to_string();
        let path = url.split('?').next().unwrap_or("/").to_string();

        let status = if is_api_path(&path, &opts.api_prefix) {
            proxy(&runtime, &client, &opts, request)
        } else {
            serve_static(&root, &path, request)
        };
        println!("{} {} -> {}", method, url, status);
    }
    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
fn is_api_path(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return false;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Maps a URL path onto a file under `root`. Directories resolve to their
/// `index.html`; paths with `..` or absolute components never resolve.
#[cfg(not(target_arch = "wasm32"))]
fn resolve_static(root: &Path, url_path: &str) -> Option<PathBuf> {
    let rel = Path::new(url_path.trim_start_matches('/'));
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    let full = root.join(rel);
    let path = if full.is_dir() {
        full.join("index.html")
    } else {
        full
    };
    path.is_file().then_some(path)
}

/// Static file, else the SPA entry document, else 404.
#[cfg(not(target_arch = "wasm32"))]
fn static_target(root: &Path, url_path: &str) -> Option<PathBuf> {
    resolve_static(root, url_path).or_else(|| {
        let index = root.join("index.html");
        index.is_file().then_some(index)
    })
}

#[cfg(not(target_arch = "wasm32"))]
fn serve_static(root: &Path, url_path: &str, request: Request) -> u16 {
    let Some(path) = static_target(root, url_path) else {
        let _ = request.respond(not_found_response());
        return 404;
    };
    match fs::File::open(&path) {
        Ok(file) => {
            let mime = content_type_for(&path);
            let mut resp = Response::from_file(file).with_status_code(StatusCode(200));
            if let Ok(h) = Header::from_bytes("Content-Type", mime.as_bytes()) {
                resp.add_header(h);
            }
            let _ = request.respond(resp);
            200
        }
        Err(_) => {
            let _ = request.respond(not_found_response());
            404
        }
    }
}

/// Connection-scoped headers (RFC 9110 section 7.6.1).
#[cfg(not(target_arch = "wasm32"))]
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Headers never copied across the proxy: hop-by-hop ones, plus `Host` and
/// `Content-Length`, which the outgoing side sets for itself.
#[cfg(not(target_arch = "wasm32"))]
fn is_dropped_header(name: &str) -> bool {
    is_hop_by_hop(name)
        || name.eq_ignore_ascii_case("host")
        || name.eq_ignore_ascii_case("content-length")
}

/// An API call read off the accept loop, ready to send upstream.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone)]
struct Outbound {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

#[cfg(not(target_arch = "wasm32"))]
impl Outbound {
    fn read(request: &mut Request) -> std::io::Result<Self> {
        let mut body = Vec::new();
        request.as_reader().read_to_end(&mut body)?;
        Ok(Self {
            method: request.method().as_str().to_string(),
            url: request.url().to_string(),
            headers: request
                .headers()
                .iter()
                .map(|h| {
                    (
                        h.field.as_str().as_str().to_string(),
                        h.value.as_str().to_string(),
                    )
                })
                .collect(),
            body,
        })
    }
}

/// What goes back to the browser for a proxied call.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone)]
struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

#[cfg(not(target_arch = "wasm32"))]
impl Reply {
    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Bytes::from(serde_json::json!({ "error": message }).to_string()),
        }
    }

    fn into_response(self) -> Response<Cursor<Vec<u8>>> {
        let mut out =
            Response::from_data(self.body.to_vec()).with_status_code(StatusCode(self.status));
        for (name, value) in &self.headers {
            if let Ok(h) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                out.add_header(h);
            }
        }
        out
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn proxy(runtime: &Runtime, client: &ProxyClient, opts: &Opts, mut request: Request) -> u16 {
    let outbound = match Outbound::read(&mut request) {
        Ok(outbound) => outbound,
        Err(e) => {
            eprintln!("failed to read request body for {}: {}", request.url(), e);
            let reply = Reply::error(400, "unreadable request body");
            let _ = request.respond(reply.into_response());
            return 400;
        }
    };
    let timeout = Duration::from_secs(opts.upstream_timeout);
    let reply = runtime.block_on(relay(client, &opts.upstream, outbound, timeout));
    let status = reply.status;
    let _ = request.respond(reply.into_response());
    status
}

/// Forwards one call and always produces a reply: `502` when the upstream
/// cannot be reached, `504` when it does not answer within `timeout`.
#[cfg(not(target_arch = "wasm32"))]
async fn relay(
    client: &ProxyClient,
    upstream: &str,
    outbound: Outbound,
    timeout: Duration,
) -> Reply {
    let url = outbound.url.clone();
    match tokio::time::timeout(timeout, forward(client, upstream, outbound)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            eprintln!("proxy error for {}: {:#}", url, e);
            Reply::error(502, "upstream unavailable")
        }
        Err(_) => {
            eprintln!("proxy timeout for {} after {:?}", url, timeout);
            Reply::error(504, "upstream timed out")
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
async fn forward(
    client: &ProxyClient,
    upstream: &str,
    outbound: Outbound,
) -> anyhow::Result<Reply> {
    let uri = format!("{}{}", upstream.trim_end_matches('/'), outbound.url);
    let method = hyper::Method::from_bytes(outbound.method.as_bytes())?;
    let mut builder = hyper::Request::builder().method(method).uri(uri.as_str());
    for (name, value) in &outbound.headers {
        if is_dropped_header(name) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    let upstream_req = builder.body(Full::new(Bytes::from(outbound.body)))?;

    let resp = client
        .request(upstream_req)
        .await
        .with_context(|| format!("request to {}", uri))?;
    let (parts, body) = resp.into_parts();
    let body = body.collect().await?.to_bytes();

    let headers = parts
        .headers
        .iter()
        .filter(|(name, _)| !is_dropped_header(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    Ok(Reply {
        status: parts.status.as_u16(),
        headers,
        body,
    })
}

#[cfg(not(target_arch = "wasm32"))]
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "css" => "text/css",
        "wasm" => "application/wasm",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn not_found_response() -> Response<Cursor<Vec<u8>>> {
    Response::from_string("Not Found").with_status_code(StatusCode(404))
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    struct TempRoot(PathBuf);

    impl TempRoot {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "blocktris-server-{}-{}",
                name,
                std::process::id()
            ));
            let _ = fs::remove_dir_all(&dir);
            fs::create_dir_all(dir.join("assets")).unwrap();
            fs::write(dir.join("index.html"), "<html></html>").unwrap();
            fs::write(dir.join("assets").join("app.wasm"), [0u8, 97, 115, 109]).unwrap();
            Self(dir)
        }
    }

    impl Drop for TempRoot {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn api_prefix_matching() {
        assert!(is_api_path("/api", "/api"));
        assert!(is_api_path("/api/score", "/api"));
        assert!(is_api_path("/api/score", "/api/"));
        assert!(!is_api_path("/apix", "/api"));
        assert!(!is_api_path("/", "/api"));
        assert!(!is_api_path("/api", ""));
    }

    #[test]
    fn resolves_files_and_directories() {
        let root = TempRoot::new("resolve");
        assert_eq!(resolve_static(&root.0, "/"), Some(root.0.join("index.html")));
        assert_eq!(
            resolve_static(&root.0, "/assets/app.wasm"),
            Some(root.0.join("assets").join("app.wasm"))
        );
        assert_eq!(resolve_static(&root.0, "/assets/missing.js"), None);
    }

    #[test]
    fn rejects_traversal() {
        let root = TempRoot::new("traversal");
        assert_eq!(resolve_static(&root.0, "/../index.html"), None);
        assert_eq!(resolve_static(&root.0, "/assets/../../etc/passwd"), None);
    }

    #[test]
    fn unknown_routes_fall_back_to_index() {
        let root = TempRoot::new("fallback");
        assert_eq!(
            static_target(&root.0, "/leaderboard"),
            Some(root.0.join("index.html"))
        );
        fs::remove_file(root.0.join("index.html")).unwrap();
        assert_eq!(static_target(&root.0, "/leaderboard"), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for(Path::new("a.wasm")), "application/wasm");
        assert_eq!(content_type_for(Path::new("index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type_for(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn dropped_headers() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("proxy-authorization"));
        assert!(!is_hop_by_hop("host"));
        assert!(is_dropped_header("Host"));
        assert!(is_dropped_header("content-length"));
        assert!(is_dropped_header("Transfer-Encoding"));
        assert!(!is_dropped_header("Authorization"));
        assert!(!is_dropped_header("Content-Type"));
    }

    struct Seen {
        method: String,
        url: String,
        headers: Vec<(String, String)>,
        body: String,
    }

    impl Seen {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }
    }

    /// Upstream on an ephemeral port that records each request and answers
    /// `201 {"ok":true}` with an `X-Upstream` header.
    fn spawn_upstream() -> (String, mpsc::Receiver<Seen>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for mut req in server.incoming_requests() {
                let mut body = String::new();
                req.as_reader().read_to_string(&mut body).unwrap();
                let seen = Seen {
                    method: req.method().as_str().to_string(),
                    url: req.url().to_string(),
                    headers: req
                        .headers()
                        .iter()
                        .map(|h| {
                            (
                                h.field.as_str().as_str().to_string(),
                                h.value.as_str().to_string(),
                            )
                        })
                        .collect(),
                    body,
                };
                let _ = tx.send(seen);
                let resp = Response::from_string(r#"{"ok":true}"#)
                    .with_status_code(StatusCode(201))
                    .with_header(Header::from_bytes("X-Upstream", "yes").unwrap());
                let _ = req.respond(resp);
            }
        });
        (format!("http://{}", addr), rx)
    }

    fn client() -> ProxyClient {
        Client::builder(TokioExecutor::new()).build_http()
    }

    fn score_call() -> Outbound {
        let header = |n: &str, v: &str| (n.to_string(), v.to_string());
        Outbound {
            method: "POST".to_string(),
            url: "/api/score?source=web".to_string(),
            headers: vec![
                header("Authorization", "Bearer abc"),
                header("Content-Type", "application/json"),
                header("Proxy-Authorization", "Basic c2VjcmV0"),
                header("Host", "game.local"),
                header("Content-Length", "11"),
            ],
            body: br#"{"score":7}"#.to_vec(),
        }
    }

    #[tokio::test]
    async fn relays_call_to_upstream() {
        let (upstream, seen) = spawn_upstream();
        let reply = relay(&client(), &upstream, score_call(), Duration::from_secs(5)).await;

        assert_eq!(reply.status, 201);
        assert_eq!(&reply.body[..], br#"{"ok":true}"#);
        assert!(
            reply
                .headers
                .iter()
                .any(|(n, v)| n.eq_ignore_ascii_case("x-upstream") && v == "yes")
        );
        assert!(
            !reply
                .headers
                .iter()
                .any(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        );

        let seen = seen.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seen.method, "POST");
        assert_eq!(seen.url, "/api/score?source=web");
        assert_eq!(seen.body, r#"{"score":7}"#);
        assert_eq!(seen.header("Authorization"), Some("Bearer abc"));
        assert_eq!(seen.header("Content-Type"), Some("application/json"));
        assert_eq!(seen.header("Proxy-Authorization"), None);
        assert_ne!(seen.header("Host"), Some("game.local"));
    }

    #[tokio::test]
    async fn refused_upstream_is_bad_gateway() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let upstream = format!("http://127.0.0.1:{}", port);
        let reply = relay(&client(), &upstream, score_call(), Duration::from_secs(5)).await;
        assert_eq!(reply.status, 502);
        assert_eq!(&reply.body[..], br#"{"error":"upstream unavailable"}"#);
    }

    #[tokio::test]
    async fn silent_upstream_times_out() {
        // accepts at the socket level but never answers
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let upstream = format!("http://{}", listener.local_addr().unwrap());
        let reply = relay(
            &client(),
            &upstream,
            score_call(),
            Duration::from_millis(200),
        )
        .await;
        assert_eq!(reply.status, 504);
        assert_eq!(&reply.body[..], br#"{"error":"upstream timed out"}"#);
        drop(listener);
    }

    #[test]
    fn port_overrides_listen_port() {
        let opts = Opts::parse_from(["server", "--listen", "0.0.0.0:8080", "--port", "9000"]);
        assert_eq!(opts.bind_addr(), "0.0.0.0:9000");
        assert_eq!(opts.upstream_timeout, 10);
    }
}
