/// Subscription gate
///
/// Decides whether a tenant currently has active access (trial or paid)
/// and which feature codes its plan grants. Reads never mutate stored
/// status; the expiry transition is a separate write operation.

mod manager;

pub use manager::{ActiveEntitlement, SubscriptionManager};
