use blocktris::api::{
    Credentials, CurrentUser, ErrorResponse, LeaderboardResponse, TokenResponse,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{bearer_token, hash_password, verify_password, Claims, Tokens};
use crate::store::Store;

pub const LEADERBOARD_SIZE: usize = 10;

/// Status and JSON body of one API answer. `Value::Null` means no body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok(body: impl Serialize) -> Self {
        Self::with_status(200, body)
    }

    fn with_status(status: u16, body: impl Serialize) -> Self {
        let body = serde_json::to_value(body).unwrap_or(Value::Null);
        Self { status, body }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::with_status(
            status,
            ErrorResponse {
                error: message.to_string(),
            },
        )
    }
}

/// Bodies are read leniently: a missing or malformed field counts as empty.
#[derive(Deserialize, Default)]
#[serde(default)]
struct CredentialsBody {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ScoreBody {
    score: Option<i64>,
}

fn parse_lenient<T: DeserializeOwned + Default>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap_or_default()
}

/// Account and leaderboard API over a store and a token signer.
pub struct Backend {
    store: Store,
    tokens: Tokens,
}

impl Backend {
    pub fn new(store: Store, tokens: Tokens) -> Self {
        Self { store, tokens }
    }

    pub fn handle(
        &self,
        method: &str,
        path: &str,
        authorization: Option<&str>,
        body: &[u8],
    ) -> ApiResponse {
        let result = match (method, path) {
            ("OPTIONS", _) => Ok(ApiResponse {
                status: 204,
                body: Value::Null,
            }),
            ("POST", "/api/register") => self.register(body),
            ("POST", "/api/login") => self.login(body),
            ("GET", "/api/me") => Ok(self.me(authorization)),
            ("POST", "/api/score") => self.submit_score(authorization, body),
            ("GET", "/api/leaderboard") => self.leaderboard(),
            (_, "/api/register" | "/api/login" | "/api/me" | "/api/score" | "/api/leaderboard") => {
                Ok(ApiResponse::error(405, "method not allowed"))
            }
            _ => Ok(ApiResponse::error(404, "not found")),
        };
        result.unwrap_or_else(|e| {
            eprintln!("{} {} failed: {:#}", method, path, e);
            ApiResponse::error(500, "internal error")
        })
    }

    fn authenticate(&self, authorization: Option<&str>) -> Result<Claims, ApiResponse> {
        let token =
            bearer_token(authorization).ok_or_else(|| ApiResponse::error(401, "missing token"))?;
        self.tokens
            .verify(token)
            .ok_or_else(|| ApiResponse::error(401, "invalid token"))
    }

    fn register(&self, body: &[u8]) -> anyhow::Result<ApiResponse> {
        let body: CredentialsBody = parse_lenient(body);
        let credentials = match Credentials::new(
            body.username.as_deref().unwrap_or(""),
            body.password.as_deref().unwrap_or(""),
        ) {
            Ok(c) => c,
            Err(message) => return Ok(ApiResponse::error(400, &message)),
        };
        let hash = hash_password(&credentials.password)?;
        let added = self
            .store
            .add_user(&credentials.username, &hash, Utc::now())?;
        let Some(user_id) = added else {
            return Ok(ApiResponse::error(400, "username taken"));
        };
        let token = self.tokens.issue(user_id, &credentials.username)?;
        Ok(ApiResponse::ok(TokenResponse { token }))
    }

    fn login(&self, body: &[u8]) -> anyhow::Result<ApiResponse> {
        let body: CredentialsBody = parse_lenient(body);
        let username = body.username.as_deref().unwrap_or("").trim();
        let password = body.password.as_deref().unwrap_or("");
        let user = match self.store.find_user(username)? {
            Some(user) if verify_password(password, &user.password_hash) => user,
            _ => return Ok(ApiResponse::error(401, "invalid credentials")),
        };
        let token = self.tokens.issue(user.id, &user.username)?;
        Ok(ApiResponse::ok(TokenResponse { token }))
    }

    fn me(&self, authorization: Option<&str>) -> ApiResponse {
        match self.authenticate(authorization) {
            Ok(claims) => ApiResponse::ok(CurrentUser {
                user_id: claims.user_id,
                username: claims.username,
            }),
            Err(denied) => denied,
        }
    }

    fn submit_score(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> anyhow::Result<ApiResponse> {
        let claims = match self.authenticate(authorization) {
            Ok(claims) => claims,
            Err(denied) => return Ok(denied),
        };
        let score = match serde_json::from_slice::<ScoreBody>(body) {
            Ok(body) => body.score.unwrap_or(0),
            Err(_) if body.is_empty() => 0,
            Err(_) => return Ok(ApiResponse::error(400, "invalid score")),
        };
        if score < 0 {
            return Ok(ApiResponse::error(400, "invalid score"));
        }
        self.store.add_score(claims.user_id, score, Utc::now())?;
        Ok(ApiResponse::ok(json!({ "ok": true })))
    }

    fn leaderboard(&self) -> anyhow::Result<ApiResponse> {
        let top = self.store.top_scores(LEADERBOARD_SIZE)?;
        Ok(ApiResponse::ok(LeaderboardResponse { top }))
    }
}
