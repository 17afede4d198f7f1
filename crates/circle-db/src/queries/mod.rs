//! Parameterized row-level operations, one module per table family.
//!
//! Every function takes the connection it runs on so callers can compose
//! several of them inside a single `with_conn_mut` closure or transaction.

pub mod chats;
pub mod follows;
pub mod groups;
pub mod notifications;
pub mod posts;
pub mod users;
