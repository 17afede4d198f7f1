pub mod auth;
pub mod chat;
pub mod comments;
pub mod error;
pub mod explore;
pub mod extract;
pub mod follows;
pub mod groups;
pub mod middleware;
pub mod notifications;
pub mod outbox;
pub mod posts;
pub mod routes;
pub mod session;
pub mod state;
pub mod users;
pub mod visibility;
pub mod ws;

pub use routes::router;
pub use state::{AppState, AppStateInner};

#[cfg(test)]
pub(crate) mod testutil {
    use circle_db::Connection;
    use circle_db::migrations::migrate;
    use circle_db::models::NewUser;
    use circle_db::queries::users;

    pub fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        migrate(&conn).unwrap();
        conn
    }

    pub fn user(conn: &Connection, username: &str, is_private: bool) -> i64 {
        users::insert(
            conn,
            &NewUser {
                username,
                email: &format!("{username}@example.com"),
                password_hash: "hash",
                first_name: "First",
                last_name: "Last",
                date_of_birth: "1990-01-01",
                avatar: "",
                about_me: "",
                is_private,
            },
        )
        .unwrap()
    }
}
