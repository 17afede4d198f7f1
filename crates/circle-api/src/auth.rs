use axum::{Json, extract::State, response::IntoResponse};
use axum_extra::extract::CookieJar;
use tracing::{error, info};

use circle_db::models::NewUser;
use circle_db::queries::users;
use circle_types::api::{AuthResponse, LoginRequest, MessageResponse, RegisterRequest};

use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::middleware::resolve_caller;
use crate::session::{SESSION_COOKIE, cleared_cookie, session_cookie};
use crate::state::{self, AppState};

/// First missing field wins, in form order.
fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    let required = [
        ("username", &req.username),
        ("email", &req.email),
        ("password", &req.password),
        ("first_name", &req.first_name),
        ("last_name", &req.last_name),
        ("date_of_birth", &req.date_of_birth),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ApiError::missing(field));
        }
    }
    if !req.email.contains('@') {
        return Err(ApiError::bad_request("email is invalid"));
    }
    Ok(())
}

async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(|e| {
            error!("Failed to hash password: {}", e);
            ApiError::Internal
        })
}

async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(|e| {
            error!("Stored password hash is unreadable: {}", e);
            ApiError::Internal
        })
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_registration(&req)?;

    let password_hash = hash_password(req.password.clone(), state.hash_cost).await?;

    let (id, username) = state::commit(&state, move |conn, _| {
        let username = req.username.trim();
        let email = req.email.trim();
        if users::login_taken(conn, username, email)? {
            return Err(ApiError::conflict("User already exists"));
        }
        let id = users::insert(
            conn,
            &NewUser {
                username,
                email,
                password_hash: &password_hash,
                first_name: req.first_name.trim(),
                last_name: req.last_name.trim(),
                date_of_birth: req.date_of_birth.trim(),
                avatar: &req.avatar,
                about_me: &req.about_me,
                is_private: req.is_private,
            },
        )?;
        Ok((id, username.to_string()))
    })
    .await?;

    let token = state.sessions.issue(id, &username).await;
    info!("Registered user {} ({})", username, id);

    Ok((
        jar.add(session_cookie(token)),
        Json(AuthResponse { id, username }),
    ))
}

/// Log in by username or email.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let login = match req.username.trim() {
        "" => req.email.trim().to_string(),
        name => name.to_string(),
    };
    if login.is_empty() {
        return Err(ApiError::missing("username"));
    }
    if req.password.is_empty() {
        return Err(ApiError::missing("password"));
    }

    let user = state::read(&state, move |conn| Ok(users::by_login(conn, &login)?))
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    if !verify_password(req.password, user.password.clone()).await? {
        return Err(ApiError::InvalidCredentials);
    }

    let token = state.sessions.issue(user.id, &user.username).await;
    info!("User {} logged in", user.username);

    Ok((
        jar.add(session_cookie(token)),
        Json(AuthResponse {
            id: user.id,
            username: user.username,
        }),
    ))
}

/// Always succeeds; the cookie is cleared whether or not a session existed.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.destroy(cookie.value()).await;
    }
    (
        jar.add(cleared_cookie()),
        Json(MessageResponse::new("Logged out")),
    )
}

pub async fn current_user(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let caller = resolve_caller(&state, &jar).await?;
    let profile = state::read(&state, move |conn| {
        users::by_id(conn, caller.id)?
            .map(|row| row.into_profile())
            .ok_or_else(|| ApiError::not_found("User not found"))
    })
    .await?;
    Ok(Json(profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RegisterRequest {
        serde_json::from_value(serde_json::json!({
            "username": "ada",
            "email": "a@x",
            "password": "p",
            "first_name": "A",
            "last_name": "B",
            "date_of_birth": "1815-12-10",
        }))
        .unwrap()
    }

    #[test]
    fn registration_reports_first_missing_field() {
        let mut req = request();
        req.email.clear();
        req.last_name.clear();
        let err = validate_registration(&req).unwrap_err();
        assert_eq!(err.to_string(), "email is required");

        let mut req = request();
        req.date_of_birth = "  ".into();
        let err = validate_registration(&req).unwrap_err();
        assert_eq!(err.to_string(), "date_of_birth is required");

        assert!(validate_registration(&request()).is_ok());
    }

    #[tokio::test]
    async fn stored_hash_verifies_but_differs() {
        let cost = crate::state::MIN_HASH_COST;
        let hash = hash_password("secret".into(), cost).await.unwrap();
        assert_ne!(hash, "secret");
        let ok = verify_password("secret".into(), hash.clone()).await;
        assert!(ok.unwrap());
        assert!(!verify_password("wrong".into(), hash).await.unwrap());
    }
}
