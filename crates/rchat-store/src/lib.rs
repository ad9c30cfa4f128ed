pub mod database;
pub mod envelopes;
pub mod files;
pub mod invitations;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod peers;
pub mod profile;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
