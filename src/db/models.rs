/// Row models shared by the stores
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account record in the database
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub enabled: bool,
    pub locked: bool,
    pub failed_logins: i64,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
}

/// Tenant record (the organization an account belongs to)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Tenant lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantStatus {
    Pending,
    Active,
    Suspended,
    Deleted,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Pending => "PENDING",
            TenantStatus::Active => "ACTIVE",
            TenantStatus::Suspended => "SUSPENDED",
            TenantStatus::Deleted => "DELETED",
        }
    }
}

/// Role record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

/// Permission record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub code: String,
    pub description: Option<String>,
}

/// Subscription plan record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub trial_days: Option<i64>,
    pub status: String,
}

/// Subscription record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub tenant_id: String,
    pub plan_id: Option<String>,
    pub status: SubscriptionStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub trial_end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Subscription lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    Cancelled,
    Expired,
    PastDue,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "TRIAL",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Cancelled => "CANCELLED",
            SubscriptionStatus::Expired => "EXPIRED",
            SubscriptionStatus::PastDue => "PAST_DUE",
            SubscriptionStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TRIAL" => Some(SubscriptionStatus::Trial),
            "ACTIVE" => Some(SubscriptionStatus::Active),
            "CANCELLED" => Some(SubscriptionStatus::Cancelled),
            "EXPIRED" => Some(SubscriptionStatus::Expired),
            "PAST_DUE" => Some(SubscriptionStatus::PastDue),
            "INACTIVE" => Some(SubscriptionStatus::Inactive),
            _ => None,
        }
    }

    /// Whether this status may still grant access (subject to date checks)
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Trial | SubscriptionStatus::Active | SubscriptionStatus::PastDue
        )
    }

    /// Allowed administrative transitions. Terminal states permit none.
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        match self {
            Trial => matches!(next, Active | Expired | Cancelled),
            Active => matches!(next, Cancelled | Expired | PastDue),
            PastDue => matches!(next, Active | Expired),
            Expired | Cancelled | Inactive => false,
        }
    }
}

impl Subscription {
    /// Trial is usable only until its end date
    pub fn is_trial_active(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Trial
            && self.trial_end_date.map(|end| end > now).unwrap_or(false)
    }

    /// Paid subscription is usable until end_date, or indefinitely if open-ended
    pub fn is_paid_active(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && self.end_date.map(|end| end > now).unwrap_or(true)
    }

    /// Whether the tenant currently has access. The stored status may be
    /// stale; the date checks are authoritative on the read path.
    pub fn has_active_access(&self, now: DateTime<Utc>) -> bool {
        self.is_trial_active(now) || self.is_paid_active(now)
    }
}

/// Refresh token record. At most one row exists per account: creating a
/// new token deletes the account's prior tokens first.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subscription(status: SubscriptionStatus) -> Subscription {
        Subscription {
            id: "sub-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            plan_id: Some("plan-1".to_string()),
            status,
            start_date: None,
            end_date: None,
            trial_end_date: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn trial_access_requires_future_end_date() {
        let now = Utc::now();
        let mut sub = subscription(SubscriptionStatus::Trial);

        sub.trial_end_date = Some(now + Duration::days(7));
        assert!(sub.has_active_access(now));

        sub.trial_end_date = Some(now - Duration::seconds(1));
        assert!(!sub.has_active_access(now));

        sub.trial_end_date = None;
        assert!(!sub.has_active_access(now));
    }

    #[test]
    fn open_ended_paid_subscription_is_active() {
        let now = Utc::now();
        let mut sub = subscription(SubscriptionStatus::Active);
        assert!(sub.has_active_access(now));

        sub.end_date = Some(now - Duration::days(1));
        assert!(!sub.has_active_access(now));
    }

    #[test]
    fn terminal_statuses_never_grant_access() {
        let now = Utc::now();
        for status in [
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
            SubscriptionStatus::Inactive,
        ] {
            assert!(!subscription(status).has_active_access(now));
        }
    }

    #[test]
    fn state_machine_allows_only_declared_transitions() {
        use SubscriptionStatus::*;
        assert!(Trial.can_transition_to(Active));
        assert!(Trial.can_transition_to(Expired));
        assert!(Trial.can_transition_to(Cancelled));
        assert!(!Trial.can_transition_to(PastDue));

        assert!(Active.can_transition_to(PastDue));
        assert!(PastDue.can_transition_to(Active));
        assert!(!PastDue.can_transition_to(Cancelled));

        for terminal in [Expired, Cancelled, Inactive] {
            for next in [Trial, Active, Cancelled, Expired, PastDue, Inactive] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            SubscriptionStatus::Trial,
            SubscriptionStatus::Active,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Inactive,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SubscriptionStatus::parse("BOGUS"), None);
    }
}
