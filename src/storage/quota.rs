//! Quota Management
//!
//! Per-user storage ceilings. Admission works in two phases: a transfer's
//! size is reserved when it is admitted and moved to `used_quota` when it
//! completes. The reserved bytes count as used for every later admission
//! check, so concurrent uploads cannot jointly overcommit a user.

use super::QuotaError;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A user and their quota state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,

    /// Display name
    pub name: String,

    /// Maximum bytes this user may store
    pub total_quota: u64,

    /// Bytes of completed transfers
    pub used_quota: u64,

    /// Bytes of admitted transfers that have not completed yet
    pub reserved_quota: u64,
}

impl User {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, total_quota: u64) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            total_quota,
            used_quota: 0,
            reserved_quota: 0,
        }
    }

    /// Bytes still available for new transfers
    pub fn available(&self) -> u64 {
        self.total_quota
            .saturating_sub(self.used_quota.saturating_add(self.reserved_quota))
    }

    /// Check if a transfer of `size` bytes can be admitted. A size that
    /// overflows the running total is never admitted.
    pub fn can_admit(&self, size: u64) -> bool {
        self.used_quota
            .checked_add(self.reserved_quota)
            .and_then(|held| held.checked_add(size))
            .is_some_and(|needed| needed <= self.total_quota)
    }

    /// Used quota as percentage (0-100)
    pub fn usage_percentage(&self) -> f64 {
        if self.total_quota == 0 {
            return 100.0;
        }
        (self.used_quota as f64 / self.total_quota as f64 * 100.0).min(100.0)
    }
}

/// Result of quota check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaCheckResult {
    Allowed,
    InsufficientQuota {
        used: u64,
        reserved: u64,
        total: u64,
        requested: u64,
    },
}

/// User quota summary for status reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSummary {
    pub bytes_used: u64,
    pub bytes_reserved: u64,
    pub bytes_total: u64,
    pub bytes_available: u64,
    pub usage_percentage: f64,
}

/// Registry of users and their quotas
#[derive(Debug, Default)]
pub struct QuotaRegistry {
    users: HashMap<String, User>,
}

impl QuotaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user. Used and reserved quota start at zero whatever the
    /// record says. Registering an existing id is rejected.
    pub fn register(&mut self, mut user: User) -> Result<(), QuotaError> {
        if self.users.contains_key(&user.user_id) {
            return Err(QuotaError::UserExists(user.user_id));
        }

        user.used_quota = 0;
        user.reserved_quota = 0;
        self.users.insert(user.user_id.clone(), user);
        Ok(())
    }

    pub fn get(&self, user_id: &str) -> Option<&User> {
        self.users.get(user_id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Check if user can be admitted a transfer of `size` bytes
    pub fn check(&self, user_id: &str, size: u64) -> Result<QuotaCheckResult, QuotaError> {
        let user = self.user(user_id)?;

        if user.can_admit(size) {
            Ok(QuotaCheckResult::Allowed)
        } else {
            Ok(QuotaCheckResult::InsufficientQuota {
                used: user.used_quota,
                reserved: user.reserved_quota,
                total: user.total_quota,
                requested: size,
            })
        }
    }

    /// Hold `size` bytes for an admitted transfer. Callers check first.
    pub fn reserve(&mut self, user_id: &str, size: u64) -> Result<(), QuotaError> {
        let user = self.user_mut(user_id)?;
        user.reserved_quota = user.reserved_quota.saturating_add(size);
        Ok(())
    }

    /// Add `amount` to the user's used quota. No bounds check happens here;
    /// the amount must have been admitted beforehand.
    pub fn charge(&mut self, user_id: &str, amount: u64) -> Result<(), QuotaError> {
        let user = self.user_mut(user_id)?;
        user.used_quota = user.used_quota.saturating_add(amount);
        Ok(())
    }

    /// Turn a reservation into used quota
    pub fn commit(&mut self, user_id: &str, size: u64) -> Result<(), QuotaError> {
        self.release(user_id, size)?;
        self.charge(user_id, size)
    }

    /// Drop a reservation without charging it
    pub fn release(&mut self, user_id: &str, size: u64) -> Result<(), QuotaError> {
        let user = self.user_mut(user_id)?;
        user.reserved_quota = user.reserved_quota.saturating_sub(size);
        Ok(())
    }

    /// Raise a user's ceiling, e.g. after an approved storage request
    pub fn increase_quota(&mut self, user_id: &str, extra_bytes: u64) -> Result<u64, QuotaError> {
        let user = self.user_mut(user_id)?;
        user.total_quota = user.total_quota.saturating_add(extra_bytes);
        Ok(user.total_quota)
    }

    pub fn summary(&self, user_id: &str) -> Option<QuotaSummary> {
        self.users.get(user_id).map(|user| QuotaSummary {
            bytes_used: user.used_quota,
            bytes_reserved: user.reserved_quota,
            bytes_total: user.total_quota,
            bytes_available: user.available(),
            usage_percentage: user.usage_percentage(),
        })
    }

    fn user(&self, user_id: &str) -> Result<&User, QuotaError> {
        self.users
            .get(user_id)
            .ok_or_else(|| QuotaError::UnknownUser(user_id.to_string()))
    }

    fn user_mut(&mut self, user_id: &str) -> Result<&mut User, QuotaError> {
        self.users
            .get_mut(user_id)
            .ok_or_else(|| QuotaError::UnknownUser(user_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunking::MIB;

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = QuotaRegistry::new();
        registry.register(User::new("alice", "Alice", 100 * MIB)).unwrap();

        let result = registry.register(User::new("alice", "Other", 5 * MIB));
        assert_eq!(result, Err(QuotaError::UserExists("alice".into())));
        assert_eq!(registry.get("alice").unwrap().total_quota, 100 * MIB);
        assert_eq!(registry.user_count(), 1);
    }

    #[test]
    fn test_register_resets_usage() {
        let mut registry = QuotaRegistry::new();
        let mut user = User::new("alice", "Alice", 100 * MIB);
        user.used_quota = 40 * MIB;
        registry.register(user).unwrap();

        assert_eq!(registry.get("alice").unwrap().used_quota, 0);
    }

    #[test]
    fn test_reservation_counts_against_quota() {
        let mut registry = QuotaRegistry::new();
        registry.register(User::new("alice", "Alice", 100 * MIB)).unwrap();

        assert_eq!(registry.check("alice", 60 * MIB), Ok(QuotaCheckResult::Allowed));
        registry.reserve("alice", 60 * MIB).unwrap();

        // Another 60 MiB would fit against used quota alone, but not with the reservation
        assert_eq!(
            registry.check("alice", 60 * MIB),
            Ok(QuotaCheckResult::InsufficientQuota {
                used: 0,
                reserved: 60 * MIB,
                total: 100 * MIB,
                requested: 60 * MIB,
            })
        );
        assert_eq!(registry.check("alice", 40 * MIB), Ok(QuotaCheckResult::Allowed));
    }

    #[test]
    fn test_commit_and_release() {
        let mut registry = QuotaRegistry::new();
        registry.register(User::new("alice", "Alice", 100 * MIB)).unwrap();
        registry.reserve("alice", 30 * MIB).unwrap();
        registry.reserve("alice", 20 * MIB).unwrap();

        registry.commit("alice", 30 * MIB).unwrap();
        registry.release("alice", 20 * MIB).unwrap();

        let user = registry.get("alice").unwrap();
        assert_eq!(user.used_quota, 30 * MIB);
        assert_eq!(user.reserved_quota, 0);
        assert_eq!(user.available(), 70 * MIB);
    }

    #[test]
    fn test_increase_quota_and_summary() {
        let mut registry = QuotaRegistry::new();
        registry.register(User::new("alice", "Alice", 50 * MIB)).unwrap();
        registry.charge("alice", 25 * MIB).unwrap();

        assert_eq!(registry.increase_quota("alice", 50 * MIB), Ok(100 * MIB));

        let summary = registry.summary("alice").unwrap();
        assert_eq!(summary.bytes_used, 25 * MIB);
        assert_eq!(summary.bytes_available, 75 * MIB);
        assert!((summary.usage_percentage - 25.0).abs() < 1e-9);
        assert!(registry.summary("nobody").is_none());
    }

    #[test]
    fn test_unknown_user() {
        let mut registry = QuotaRegistry::new();

        assert_eq!(
            registry.check("ghost", 1),
            Err(QuotaError::UnknownUser("ghost".into()))
        );
        assert!(registry.charge("ghost", 1).is_err());
        assert!(registry.increase_quota("ghost", 1).is_err());
    }

    #[test]
    fn test_huge_sizes_saturate_instead_of_wrapping() {
        let mut user = User::new("alice", "Alice", u64::MAX);
        user.used_quota = u64::MAX - MIB;
        user.reserved_quota = 2 * MIB;

        assert!(!user.can_admit(1));
        assert!(!user.can_admit(u64::MAX));
        assert_eq!(user.available(), 0);

        let mut registry = QuotaRegistry::new();
        registry.register(User::new("bob", "Bob", MIB)).unwrap();
        registry.reserve("bob", MIB).unwrap();
        assert!(matches!(
            registry.check("bob", u64::MAX),
            Ok(QuotaCheckResult::InsufficientQuota { .. })
        ));
        assert_eq!(registry.increase_quota("bob", u64::MAX), Ok(u64::MAX));
    }
}
