//! Dashboard assignments — time-bounded grants embedded in a user.
//!
//! An assignment links a user to one dashboard (`resource_ref`). It is
//! permanent when `expires_at` is absent. Expiry is inclusive: an assignment
//! whose `expires_at` equals the evaluation instant is already expired.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single dashboard grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// The granted dashboard
    pub resource_ref: String,

    /// When the grant was created
    pub assigned_at: DateTime<Utc>,

    /// When the grant lapses (None = permanent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Set once the user has been told this grant expired
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expiry_notice_sent: bool,
}

impl Assignment {
    pub fn new(
        resource_ref: impl Into<String>,
        assigned_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            resource_ref: resource_ref.into(),
            assigned_at,
            expires_at,
            expiry_notice_sent: false,
        }
    }

    /// A grant with no expiry.
    pub fn permanent(resource_ref: impl Into<String>, assigned_at: DateTime<Utc>) -> Self {
        Self::new(resource_ref, assigned_at, None)
    }

    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }

    /// `expires_at <= as_of`. Permanent grants never expire.
    pub fn is_expired_at(&self, as_of: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= as_of)
    }

    pub fn is_active_at(&self, as_of: DateTime<Utc>) -> bool {
        !self.is_expired_at(as_of)
    }

    /// Expired at `as_of` and the user has not been told yet.
    pub fn awaits_expiry_notice(&self, as_of: DateTime<Utc>) -> bool {
        self.is_expired_at(as_of) && !self.expiry_notice_sent
    }

    /// Same grant: resource and expiry match.
    pub fn same_grant(&self, other: &Assignment) -> bool {
        self.resource_ref == other.resource_ref && self.expires_at == other.expires_at
    }

    /// Time left until expiry; negative once expired, None for permanent grants.
    pub fn remaining_at(&self, as_of: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|expires| expires - as_of)
    }
}

/// Administrator input for one grant in a batch `assign` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub resource_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AssignmentRequest {
    pub fn new(resource_ref: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            resource_ref: resource_ref.into(),
            expires_at,
        }
    }

    /// Check the request against the creation instant.
    ///
    /// The resource reference must be non-blank and the expiry, if any, must
    /// be strictly after `now`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.resource_ref.trim().is_empty() {
            return Err(Error::Validation("resource_ref is required".into()));
        }
        if let Some(expires) = self.expires_at
            && expires <= now
        {
            return Err(Error::Validation(format!(
                "expires_at ({}) must be after the assignment time ({})",
                expires.to_rfc3339(),
                now.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// Turn the request into an assignment created at `now`.
    pub fn into_assignment(self, now: DateTime<Utc>) -> Assignment {
        Assignment::new(self.resource_ref.trim(), now, self.expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32) -> DateTime<Utc> {
        chrono::NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn expiry_is_inclusive() {
        let a = Assignment::new("sales", at(8), Some(at(12)));
        assert!(!a.is_expired_at(at(11)));
        assert!(a.is_expired_at(at(12)));
        assert!(a.is_expired_at(at(13)));
        assert!(!a.is_active_at(at(12)));
    }

    #[test]
    fn permanent_never_expires() {
        let a = Assignment::permanent("sales", at(8));
        assert!(a.is_permanent());
        assert!(!a.is_expired_at(at(23) + Duration::days(10_000)));
        assert_eq!(a.remaining_at(at(9)), None);
    }

    #[test]
    fn remaining_goes_negative_after_expiry() {
        let a = Assignment::new("ops", at(8), Some(at(10)));
        assert_eq!(a.remaining_at(at(9)), Some(Duration::hours(1)));
        assert_eq!(a.remaining_at(at(11)), Some(Duration::hours(-1)));
    }

    #[test]
    fn blank_resource_rejected() {
        let req = AssignmentRequest::new("   ", None);
        assert!(matches!(req.validate(at(8)), Err(Error::Validation(_))));
    }

    #[test]
    fn expiry_must_follow_creation() {
        assert!(AssignmentRequest::new("ops", Some(at(8))).validate(at(8)).is_err());
        assert!(AssignmentRequest::new("ops", Some(at(7))).validate(at(8)).is_err());
        assert!(AssignmentRequest::new("ops", Some(at(9))).validate(at(8)).is_ok());
        assert!(AssignmentRequest::new("ops", None).validate(at(8)).is_ok());
    }

    #[test]
    fn serialization_omits_missing_expiry() {
        let a = Assignment::permanent("finance", at(8));
        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("finance"));
        assert!(!json.contains("expires_at"));
        assert!(!json.contains("expiry_notice_sent"));
    }

    #[test]
    fn notice_marker_stops_expiry_notice() {
        let mut a = Assignment::new("ops", at(8), Some(at(10)));
        assert!(!a.awaits_expiry_notice(at(9)));
        assert!(a.awaits_expiry_notice(at(10)));

        a.expiry_notice_sent = true;
        assert!(!a.awaits_expiry_notice(at(11)));
        let json = serde_json::to_string(&a).unwrap();
        let back: Assignment = serde_json::from_str(&json).unwrap();
        assert!(back.expiry_notice_sent);
    }
}
