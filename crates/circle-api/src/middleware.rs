use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::CookieJar;

use crate::error::ApiError;
use crate::session::SESSION_COOKIE;
use crate::state::AppState;

/// The authenticated user behind a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: i64,
    pub username: String,
}

/// Resolve the caller from the `AccessToken` cookie.
///
/// No cookie (or an empty one) is `Unauthenticated`; a token the session
/// store does not know is `Unauthorized`.
pub async fn resolve_caller(state: &AppState, jar: &CookieJar) -> Result<Caller, ApiError> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::Unauthenticated)?;

    let session = state
        .sessions
        .lookup(token)
        .await
        .ok_or(ApiError::Unauthorized)?;

    Ok(Caller {
        id: session.user_id,
        username: session.username,
    })
}

/// Gate for protected routes. Inserts a `Caller` extension for handlers.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let caller = resolve_caller(&state, &jar).await?;
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
