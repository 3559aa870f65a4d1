/// Credential store
///
/// Persists account records (password hash, lock/enable flags, tenant
/// association, role memberships) and verifies credentials.

mod manager;

pub use manager::{AccountManager, NewAccount};
