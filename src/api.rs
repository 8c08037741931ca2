//! Browser side of the account / leaderboard backend.
//!
//! All requests go through `window.fetch` relative to the page origin, so
//! the static server's `/api` proxy decides where they land.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{Headers, Request, RequestInit, Response, Storage};

use crate::session::ScoreReporter;
use crate::{log, warn};

pub const TOKEN_KEY: &str = "token";
pub const LOGIN_PATH: &str = "/api/login";
pub const REGISTER_PATH: &str = "/api/register";
pub const ME_PATH: &str = "/api/me";
pub const LEADERBOARD_PATH: &str = "/api/leaderboard";

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Result<Self, String> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err("username and password required".into());
        }
        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ScoreSubmission {
    pub score: u32,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: i64,
    pub username: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub username: String,
    pub score: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct LeaderboardResponse {
    #[serde(default)]
    pub top: Vec<LeaderboardEntry>,
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn storage() -> Result<Storage, JsValue> {
    web_sys::window()
        .ok_or("no window")?
        .local_storage()?
        .ok_or_else(|| JsValue::from_str("localStorage unavailable"))
}

#[wasm_bindgen(js_name = loadToken)]
pub fn load_token() -> Option<String> {
    storage().ok()?.get_item(TOKEN_KEY).ok()?
}

#[wasm_bindgen(js_name = storeToken)]
pub fn store_token(token: &str) -> Result<(), JsValue> {
    storage()?.set_item(TOKEN_KEY, token)
}

#[wasm_bindgen(js_name = clearToken)]
pub fn clear_token() -> Result<(), JsValue> {
    storage()?.remove_item(TOKEN_KEY)
}

/// Sends one request and returns the response together with its JSON body.
/// A body that is not JSON comes back as `undefined`.
async fn send(
    method: &str,
    url: &str,
    token: Option<&str>,
    body: Option<String>,
) -> Result<(Response, JsValue), JsValue> {
    let window = web_sys::window().ok_or("no window")?;
    let headers = Headers::new()?;
    if body.is_some() {
        headers.set("Content-Type", "application/json")?;
    }
    if let Some(token) = token {
        headers.set("Authorization", &bearer(token))?;
    }
    let init = RequestInit::new();
    init.set_method(method);
    init.set_headers(&headers);
    if let Some(body) = body.as_deref() {
        init.set_body(&JsValue::from_str(body));
    }
    let request = Request::new_with_str_and_init(url, &init)?;
    let resp: Response = JsFuture::from(window.fetch_with_request(&request))
        .await?
        .dyn_into()?;
    let json = match resp.json() {
        Ok(promise) => JsFuture::from(promise).await.unwrap_or(JsValue::UNDEFINED),
        Err(_) => JsValue::UNDEFINED,
    };
    Ok((resp, json))
}

fn decode<T: DeserializeOwned>(json: JsValue) -> Result<T, JsValue> {
    from_value(json).map_err(js_err)
}

/// Backend `{error}` message, or `fallback` when the body has none.
fn error_message(json: JsValue, fallback: &str) -> JsValue {
    match from_value::<ErrorResponse>(json) {
        Ok(e) => JsValue::from_str(&e.error),
        Err(_) => JsValue::from_str(fallback),
    }
}

async fn authenticate(path: &str, credentials: Credentials, fallback: &str) -> Result<String, JsValue> {
    let body = serde_json::to_string(&credentials).map_err(js_err)?;
    let (resp, json) = send("POST", path, None, Some(body)).await?;
    if !resp.ok() {
        return Err(error_message(json, fallback));
    }
    let token = decode::<TokenResponse>(json)
        .map_err(|_| JsValue::from_str(fallback))?
        .token;
    store_token(&token)?;
    log(&format!("Signed in as {}", credentials.username));
    Ok(token)
}

#[wasm_bindgen]
pub async fn login(username: String, password: String) -> Result<String, JsValue> {
    let credentials = Credentials::new(&username, &password).map_err(js_err)?;
    authenticate(LOGIN_PATH, credentials, "login failed").await
}

#[wasm_bindgen]
pub async fn register(username: String, password: String) -> Result<String, JsValue> {
    let credentials = Credentials::new(&username, &password).map_err(js_err)?;
    authenticate(REGISTER_PATH, credentials, "register failed").await
}

#[wasm_bindgen(js_name = currentUser)]
pub async fn current_user(token: String) -> Result<JsValue, JsValue> {
    let (resp, json) = send("GET", ME_PATH, Some(&token), None).await?;
    if !resp.ok() {
        return Err(error_message(json, "not signed in"));
    }
    let user: CurrentUser = decode(json)?;
    to_value(&user).map_err(js_err)
}

#[wasm_bindgen(js_name = fetchLeaderboard)]
pub async fn fetch_leaderboard() -> Result<JsValue, JsValue> {
    let (resp, json) = send("GET", LEADERBOARD_PATH, None, None).await?;
    if !resp.ok() {
        return Err(error_message(json, "leaderboard unavailable"));
    }
    let board: LeaderboardResponse = decode(json).unwrap_or_default();
    to_value(&board.top).map_err(js_err)
}

/// Posts the final score in the background; failures are only logged.
pub struct FetchScoreReporter {
    endpoint: String,
    token: Option<String>,
}

impl FetchScoreReporter {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
        }
    }
}

impl ScoreReporter for FetchScoreReporter {
    fn report(&mut self, score: u32) {
        let Some(token) = self.token.clone() else {
            warn("Score not submitted: not signed in");
            return;
        };
        let endpoint = self.endpoint.clone();
        spawn_local(async move {
            if let Err(e) = submit_score(&endpoint, &token, score).await {
                warn(&format!("Score submit failed: {:?}", e));
            }
        });
    }
}

async fn submit_score(endpoint: &str, token: &str, score: u32) -> Result<(), JsValue> {
    let body = serde_json::to_string(&ScoreSubmission { score }).map_err(js_err)?;
    let (resp, json) = send("POST", endpoint, Some(token), Some(body)).await?;
    if !resp.ok() {
        return Err(error_message(json, &format!("HTTP {}", resp.status())));
    }
    log(&format!("Submitted score {}", score));
    Ok(())
}
