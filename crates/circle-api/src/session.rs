//! In-memory session store and the `AccessToken` cookie.
//!
//! Tokens are UUIDv7 strings (time-ordered, random tail). A session lives
//! for 24 hours from issuance or until logout; expired entries read as
//! absent and are swept periodically by the server.

use std::collections::HashMap;
use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "AccessToken";
pub const SESSION_TTL_SECS: i64 = 86_400;

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub issued_at: DateTime<Utc>,
}

impl Session {
    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.issued_at >= Duration::seconds(SESSION_TTL_SECS)
    }
}

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session and return its token.
    pub async fn issue(&self, user_id: i64, username: &str) -> String {
        self.issue_at(user_id, username, Utc::now()).await
    }

    async fn issue_at(&self, user_id: i64, username: &str, issued_at: DateTime<Utc>) -> String {
        let token = Uuid::now_v7().to_string();
        let session = Session {
            user_id,
            username: username.to_string(),
            issued_at,
        };
        self.sessions.write().await.insert(token.clone(), session);
        token
    }

    /// The live session for `token`, if any.
    pub async fn lookup(&self, token: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(token)
            .filter(|s| !s.expired_at(Utc::now()))
            .cloned()
    }

    /// End a session. Returns whether it existed.
    pub async fn destroy(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Drop every expired session. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.expired_at(now));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// `AccessToken=<token>; Path=/; HttpOnly; Secure; Max-Age=86400`.
pub fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::seconds(SESSION_TTL_SECS))
        .build()
}

/// Cookie that tells the browser to drop the session immediately.
pub fn cleared_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::seconds(-1))
        .build()
}
