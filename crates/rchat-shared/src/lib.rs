// Types, crypto primitives and wire formats shared by every rchat crate.

pub mod constants;
pub mod crypto;
pub mod identity;
pub mod protocol;
pub mod types;

mod error;

pub use error::{CryptoError, IdentityError, ProtocolError};
pub use identity::Identity;
