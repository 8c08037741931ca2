#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod auth;
#[cfg(not(target_arch = "wasm32"))]
mod routes;
#[cfg(not(target_arch = "wasm32"))]
mod store;

#[cfg(not(target_arch = "wasm32"))]
use anyhow::Context;
#[cfg(not(target_arch = "wasm32"))]
use clap::Parser;
#[cfg(not(target_arch = "wasm32"))]
use std::io::{Cursor, Read};
#[cfg(not(target_arch = "wasm32"))]
use std::path::PathBuf;
#[cfg(not(target_arch = "wasm32"))]
use tiny_http::{Header, Response, Server, StatusCode};

#[cfg(not(target_arch = "wasm32"))]
const DEV_SECRET: &str = "dev-secret-change-me";

/// Account and leaderboard API backed by SQLite.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Parser, Debug, Clone)]
struct Opts {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:5000")]
    listen: String,
    /// SQLite database file, created when missing
    #[arg(long, env = "BLOCKTRIS_DB", default_value = "blocktris.sqlite3")]
    db: PathBuf,
    /// HS256 key for session tokens
    #[arg(long, env = "BLOCKTRIS_SECRET", default_value = DEV_SECRET)]
    secret: String,
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    if opts.secret == DEV_SECRET {
        eprintln!("warning: using the development token secret, set BLOCKTRIS_SECRET");
    }
    let store = store::Store::open(&opts.db)?;
    let tokens = auth::Tokens::new(&opts.secret, auth::TOKEN_TTL_SECS);
    let backend = routes::Backend::new(store, tokens);

    let server = Server::http(&opts.listen)
        .map_err(|e| anyhow::anyhow!("bind {}: {}", opts.listen, e))?;
    println!(
        "Backend on http://{} (database {})",
        opts.listen,
        opts.db.display()
    );

    for mut request in server.incoming_requests() {
        let url = request.url().to_string();
        let method = request.method().as_str().to_string();
        let path = url.split('?').next().unwrap_or("/").to_string();

        let mut body = Vec::new();
        let resp = match request
            .as_reader()
            .read_to_end(&mut body)
            .context("read request body")
        {
            Ok(_) => {
                let authorization = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.as_str().to_string());
                backend.handle(&method, &path, authorization.as_deref(), &body)
            }
            Err(e) => {
                eprintln!("{} {}: {:#}", method, url, e);
                routes::ApiResponse {
                    status: 400,
                    body: serde_json::json!({ "error": "unreadable request body" }),
                }
            }
        };
        let status = resp.status;
        let _ = request.respond(json_response(resp));
        println!("{} {} -> {}", method, url, status);
    }
    Ok(())
}

/// JSON answer with permissive CORS headers, so the API also works when the
/// page is served from another origin.
#[cfg(not(target_arch = "wasm32"))]
fn json_response(resp: routes::ApiResponse) -> Response<Cursor<Vec<u8>>> {
    let mut out =
        Response::from_data(body_bytes(&resp)).with_status_code(StatusCode(resp.status));
    for (name, value) in [
        ("Content-Type", "application/json"),
        ("Access-Control-Allow-Origin", "*"),
        ("Access-Control-Allow-Headers", "Authorization, Content-Type"),
        ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ] {
        if let Ok(h) = Header::from_bytes(name, value) {
            out.add_header(h);
        }
    }
    out
}

#[cfg(not(target_arch = "wasm32"))]
fn body_bytes(resp: &routes::ApiResponse) -> Vec<u8> {
    if resp.body.is_null() {
        Vec::new()
    } else {
        resp.body.to_string().into_bytes()
    }
}
