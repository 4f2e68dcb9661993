pub mod config;
pub mod error;
pub mod session;
pub mod types;

pub use error::{SnapfileError, SnapfileResult};
pub use session::{IdentityStore, Session, StoredIdentity};
