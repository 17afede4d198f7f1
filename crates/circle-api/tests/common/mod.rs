#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use circle_api::state::MIN_HASH_COST;
use circle_api::{AppState, AppStateInner};
use circle_db::Database;

/// Router over a throwaway database. Passwords are hashed at the minimum
/// bcrypt cost to keep the suite fast.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    _dir: TempDir,
}

pub struct Response {
    pub status: StatusCode,
    pub body: Value,
    /// Value of the `AccessToken` cookie set by the response, if any.
    pub session: Option<String>,
    pub set_cookie: Option<String>,
}

pub struct User {
    pub id: i64,
    pub username: String,
    pub token: String,
}

pub fn json_request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("AccessToken={token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

fn session_from(set_cookie: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?;
    let value = pair.trim().strip_prefix("AccessToken=")?;
    (!value.is_empty()).then(|| value.to_string())
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open(&dir.path().join("test.db")).expect("open db");
        let state = AppStateInner::with_hash_cost(db, MIN_HASH_COST);
        let router = circle_api::router(state.clone());
        Self {
            state,
            router,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("response");
        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Response {
            status,
            body,
            session: set_cookie.as_deref().and_then(session_from),
            set_cookie,
        }
    }

    pub async fn get(&self, token: &str, uri: &str) -> Response {
        self.send(json_request("GET", uri, Some(token), None)).await
    }

    pub async fn post(&self, token: &str, uri: &str, body: Value) -> Response {
        self.send(json_request("POST", uri, Some(token), Some(body))).await
    }

    pub async fn put(&self, token: &str, uri: &str, body: Value) -> Response {
        self.send(json_request("PUT", uri, Some(token), Some(body))).await
    }

    pub async fn patch(&self, token: &str, uri: &str, body: Value) -> Response {
        self.send(json_request("PATCH", uri, Some(token), Some(body))).await
    }

    pub async fn delete(&self, token: &str, uri: &str) -> Response {
        self.send(json_request("DELETE", uri, Some(token), None)).await
    }

    pub async fn register(&self, username: &str, is_private: bool) -> User {
        let response = self
            .send(json_request(
                "POST",
                "/register",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": "password",
                    "first_name": "First",
                    "last_name": "Last",
                    "date_of_birth": "1990-01-01",
                    "is_private": is_private,
                })),
            ))
            .await;
        assert_eq!(
            response.status,
            StatusCode::OK,
            "register {username}: {}",
            response.body,
        );
        User {
            id: response.body["id"].as_i64().expect("id"),
            username: username.to_string(),
            token: response.session.expect("session cookie"),
        }
    }

    /// `follower` follows `followed`, accepting the request if needed.
    pub async fn follow(&self, follower: &User, followed: &User) {
        let response = self
            .post(
                &follower.token,
                "/follow",
                json!({ "followed_id": followed.id }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.body);
        if response.body["status"] == "pending" {
            let id = response.body["id"].as_i64().expect("edge id");
            let response = self
                .patch(
                    &followed.token,
                    "/follow/handle-request",
                    json!({ "id": id, "status": "accept" }),
                )
                .await;
            assert_eq!(response.status, StatusCode::OK, "{}", response.body);
        }
    }
}
