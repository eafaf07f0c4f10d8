//! eBay credential lifecycle: token records and the manager that keeps
//! them valid.

mod manager;
mod record;

pub use manager::{CredentialManager, CredentialManagerBuilder, ManagerSettings};
pub use record::{GrantKind, TokenRecord, TokenStatus};
