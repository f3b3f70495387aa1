pub mod connection;
pub mod schema;
pub mod session_store;
pub mod timestamps;

pub use connection::Database;
pub use schema::initialize_schema;
pub use session_store::SqliteSessionStore;
