use std::sync::Arc;

use tracing::error;

use circle_db::{Connection, Database};
use circle_gateway::Hub;

use crate::error::ApiError;
use crate::outbox::Outbox;
use crate::session::SessionStore;

pub type AppState = Arc<AppStateInner>;

/// Lowest work factor bcrypt accepts.
pub const MIN_HASH_COST: u32 = 4;

pub struct AppStateInner {
    pub db: Database,
    pub sessions: SessionStore,
    pub hub: Hub,
    /// bcrypt work factor for new password hashes.
    pub hash_cost: u32,
}

impl AppStateInner {
    pub fn new(db: Database) -> AppState {
        Self::with_hash_cost(db, bcrypt::DEFAULT_COST)
    }

    pub fn with_hash_cost(db: Database, hash_cost: u32) -> AppState {
        Arc::new(Self {
            db,
            sessions: SessionStore::new(),
            hub: Hub::new(),
            hash_cost,
        })
    }
}

async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
}

/// Run read-only queries off the async runtime.
pub async fn read<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Connection) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    blocking(state, move |db| db.with_conn(f)).await
}

/// Run `f` in a write transaction off the async runtime, then deliver the
/// notifications and events it queued. Delivery happens only after the
/// transaction committed.
pub async fn commit<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Connection, &mut Outbox) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let (value, outbox) = blocking(state, move |db| {
        db.write_tx(|conn| {
            let mut outbox = Outbox::default();
            let value = f(conn, &mut outbox)?;
            Ok((value, outbox))
        })
    })
    .await?;

    outbox.flush(&state.hub).await;
    Ok(value)
}
