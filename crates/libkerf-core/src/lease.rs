//! Lease-based checkouts for exclusive context requests
//!
//! An agent asking for an exclusive bundle leases every file it receives.
//! Other agents' exclusive requests skip leased files until the lease is
//! released or expires. Leases coordinate agents; they do not guard the
//! files on disk.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::now_ms;

/// Default lease TTL in milliseconds (15 minutes)
pub const DEFAULT_LEASE_TTL_MS: u64 = 15 * 60 * 1000;

/// A lease on a resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lease {
    /// Agent that owns the lease
    pub owner: String,
    /// Unique nonce for this lease instance
    pub nonce: String,
    /// When the lease expires (Unix timestamp in ms)
    pub expires_unix_ms: u64,
    /// Leased resource (`file:src/auth.py`, `project:global`)
    pub resource: String,
}

impl Lease {
    pub fn new(owner: String, resource: String, ttl_ms: u64) -> Self {
        Self {
            owner,
            nonce: uuid::Uuid::new_v4().to_string(),
            expires_unix_ms: now_ms() + ttl_ms,
            resource,
        }
    }

    /// Create an expired lease (for release)
    pub fn expired(owner: String, resource: String) -> Self {
        Self {
            owner,
            nonce: uuid::Uuid::new_v4().to_string(),
            expires_unix_ms: 0,
            resource,
        }
    }

    pub fn is_expired(&self) -> bool {
        now_ms() >= self.expires_unix_ms
    }

    /// Time remaining in milliseconds (0 if expired)
    pub fn time_remaining_ms(&self) -> u64 {
        self.expires_unix_ms.saturating_sub(now_ms())
    }

    pub fn renew(&mut self, ttl_ms: u64) {
        self.expires_unix_ms = now_ms() + ttl_ms;
    }

    pub fn namespace(&self) -> Option<&str> {
        self.resource.split(':').next()
    }

    /// Check if this lease conflicts with another resource
    pub fn conflicts_with(&self, other_resource: &str) -> bool {
        if self.is_expired() {
            return false;
        }

        let other_ns = other_resource.split(':').next();
        match (self.namespace(), other_ns) {
            (Some("project"), _) | (_, Some("project")) => true,
            (Some("file"), Some("file")) => {
                let self_path = self.resource.strip_prefix("file:").unwrap_or("");
                let other_path = other_resource.strip_prefix("file:").unwrap_or("");
                paths_overlap(self_path, other_path)
            }
            _ => false,
        }
    }
}

/// Resource name for a project-relative file path
pub fn file_resource(path: &str) -> String {
    format!("file:{}", path)
}

/// Result of a lease availability check
#[derive(Debug, Clone)]
pub enum LeaseCheck {
    Clear,
    /// Held by other owners
    Held(Vec<Lease>),
}

impl LeaseCheck {
    pub fn is_clear(&self) -> bool {
        matches!(self, LeaseCheck::Clear)
    }

    pub fn conflicts(&self) -> &[Lease] {
        match self {
            LeaseCheck::Clear => &[],
            LeaseCheck::Held(leases) => leases,
        }
    }
}

/// In-process table of active leases
#[derive(Debug, Default)]
pub struct LeaseRegistry {
    leases: Mutex<HashMap<String, Lease>>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leases held by someone other than `owner` that conflict with `resource`
    pub fn check(&self, owner: &str, resource: &str) -> LeaseCheck {
        let leases = self.leases.lock();
        let mut held: Vec<Lease> = leases
            .values()
            .filter(|l| l.owner != owner && l.conflicts_with(resource))
            .cloned()
            .collect();
        if held.is_empty() {
            LeaseCheck::Clear
        } else {
            held.sort_by(|a, b| a.resource.cmp(&b.resource));
            LeaseCheck::Held(held)
        }
    }

    /// Acquire or renew a lease. Returns the conflicting leases when another
    /// owner holds the resource.
    pub fn acquire(&self, owner: &str, resource: &str, ttl_ms: u64) -> Result<Lease, Vec<Lease>> {
        let mut leases = self.leases.lock();
        let conflicts: Vec<Lease> = leases
            .values()
            .filter(|l| l.owner != owner && l.conflicts_with(resource))
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            return Err(conflicts);
        }

        let lease = match leases.get_mut(resource) {
            Some(existing) if existing.owner == owner && !existing.is_expired() => {
                existing.renew(ttl_ms);
                existing.clone()
            }
            _ => {
                let lease = Lease::new(owner.to_string(), resource.to_string(), ttl_ms);
                leases.insert(resource.to_string(), lease.clone());
                lease
            }
        };
        Ok(lease)
    }

    /// Drop all leases owned by `owner`; returns how many were released
    pub fn release(&self, owner: &str) -> usize {
        let mut leases = self.leases.lock();
        let before = leases.len();
        leases.retain(|_, l| l.owner != owner);
        before - leases.len()
    }

    /// Remove expired leases; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut leases = self.leases.lock();
        let before = leases.len();
        leases.retain(|_, l| !l.is_expired());
        before - leases.len()
    }

    /// Active leases sorted by resource
    pub fn active(&self) -> Vec<Lease> {
        let leases = self.leases.lock();
        let mut out: Vec<Lease> = leases.values().filter(|l| !l.is_expired()).cloned().collect();
        out.sort_by(|a, b| a.resource.cmp(&b.resource));
        out
    }
}

/// Check if two paths overlap (one is prefix of the other or they're equal)
fn paths_overlap(path1: &str, path2: &str) -> bool {
    if path1 == path2 {
        return true;
    }

    let p1 = path1.trim_end_matches('/');
    let p2 = path2.trim_end_matches('/');
    if p1 == p2 {
        return true;
    }

    let p1_dir = format!("{}/", p1);
    let p2_dir = format!("{}/", p2);
    p2.starts_with(&p1_dir) || p1.starts_with(&p2_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_creation() {
        let lease = Lease::new("dev-1".to_string(), file_resource("src/auth.py"), 60000);
        assert_eq!(lease.owner, "dev-1");
        assert_eq!(lease.resource, "file:src/auth.py");
        assert_eq!(lease.namespace(), Some("file"));
        assert!(!lease.is_expired());
        assert!(lease.time_remaining_ms() > 0);
    }

    #[test]
    fn test_expired_lease_no_conflict() {
        let expired = Lease::expired("dev-1".to_string(), "project:global".to_string());
        assert!(expired.is_expired());
        assert!(!expired.conflicts_with("file:src/auth.py"));
    }

    #[test]
    fn test_file_lease_conflicts() {
        let dir_lease = Lease::new("dev-1".to_string(), file_resource("src/"), 60000);
        assert!(dir_lease.conflicts_with("file:src/auth.py"));
        assert!(!dir_lease.conflicts_with("file:tests/test_auth.py"));

        let project = Lease::new("dev-1".to_string(), "project:global".to_string(), 60000);
        assert!(project.conflicts_with("file:anything.py"));
    }

    #[test]
    fn test_registry_acquire_and_conflict() {
        let registry = LeaseRegistry::new();
        registry.acquire("dev-1", "file:src/auth.py", 60000).unwrap();

        // Same owner renews
        let renewed = registry.acquire("dev-1", "file:src/auth.py", 120000).unwrap();
        assert!(renewed.time_remaining_ms() > 60000);

        // Other owner is refused
        let conflicts = registry.acquire("dev-2", "file:src/auth.py", 60000).unwrap_err();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].owner, "dev-1");

        assert!(registry.check("dev-1", "file:src/auth.py").is_clear());
        assert!(!registry.check("dev-2", "file:src/auth.py").is_clear());
        assert!(registry.check("dev-2", "file:src/db.py").is_clear());
    }

    #[test]
    fn test_registry_release() {
        let registry = LeaseRegistry::new();
        registry.acquire("dev-1", "file:a.py", 60000).unwrap();
        registry.acquire("dev-1", "file:b.py", 60000).unwrap();
        registry.acquire("dev-2", "file:c.py", 60000).unwrap();

        assert_eq!(registry.release("dev-1"), 2);
        assert_eq!(registry.active().len(), 1);
        assert!(registry.acquire("dev-2", "file:a.py", 60000).is_ok());
    }

    #[test]
    fn test_registry_expired_leases_are_free() {
        let registry = LeaseRegistry::new();
        registry.acquire("dev-1", "file:a.py", 0).unwrap();
        assert!(registry.check("dev-2", "file:a.py").is_clear());
        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.active().is_empty());
    }

    #[test]
    fn test_paths_overlap() {
        assert!(paths_overlap("src/main.rs", "src/main.rs"));
        assert!(paths_overlap("src/", "src/main.rs"));
        assert!(paths_overlap("src", "src/main.rs"));
        assert!(!paths_overlap("src/", "tests/"));
        assert!(!paths_overlap("src/main.rs", "src/lib.rs"));
    }
}
