//! Session configuration, tokens and the refresh flow.
//!
//! An [`ApiConfig`] describes one server; a [`Session`] binds it to a user
//! and drives token loading, refresh and persistence through a
//! [`TokenStore`].

mod config;
mod secrets;
mod session;
mod sqlite_store;
mod store;
mod token;

pub use config::ApiConfig;
pub use session::{Session, SignatureGrant};
pub use sqlite_store::SqliteTokenStore;
pub use store::{MemoryTokenStore, StoreError, TokenStore};
pub use token::AuthToken;
