//! Local, device-scoped storage.
//!
//! Holds the master passphrase verifier and the persisted sign-in session.
//! Credentials themselves live in the remote table, never here.

pub mod schema;
pub mod store;

pub use schema::Database;
pub use store::{LocalStore, AUTH_SESSION_KEY, KDF_SALT_KEY, MASTER_PASSWORD_HASH_KEY};
