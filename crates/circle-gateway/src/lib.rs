pub mod connection;
pub mod hub;

pub use connection::{CommandSink, handle_connection};
pub use hub::{ConnId, Hub};
