//! Path Cooldown - suppress recently failed arbitrage paths with escalating backoff
//!
//! Purpose:
//!     A path whose submission reverted or timed out is not retried while the
//!     market state that caused it is still current. Repeated failures escalate
//!     the suppression window; paths that keep reaching the cap without a single
//!     success are blacklisted for the session.
//!
//! Design:
//!     - Key: (path name, strategy)
//!     - Escalation: initial x 5^(failures-1), capped at `max_cooldown` blocks
//!     - Success removes the entry (and any blacklist mark)
//!     - `cleanup` drops expired entries to bound memory

use crate::types::Strategy;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

type PathKey = (String, Strategy);

#[derive(Debug)]
struct CooldownEntry {
    last_failed_block: u64,
    cooldown_blocks: u64,
    failure_count: u32,
    /// Times this path hit the cap
    capped_cycles: u32,
}

impl CooldownEntry {
    fn expires_at(&self) -> u64 {
        self.last_failed_block.saturating_add(self.cooldown_blocks)
    }
}

const ESCALATION_FACTOR: u64 = 5;

/// ~1 hour of 2s blocks
const DEFAULT_MAX_COOLDOWN: u64 = 1800;

/// Per-path failure cooldown with escalating backoff and session blacklist
#[derive(Debug)]
pub struct PathCooldown {
    entries: HashMap<PathKey, CooldownEntry>,
    blacklist: HashSet<PathKey>,
    initial_cooldown: u64,
    max_cooldown: u64,
    /// Capped cycles before blacklisting (0 = never blacklist)
    max_strikes: u32,
}

impl PathCooldown {
    /// `initial_cooldown` of 0 disables the tracker entirely
    pub fn new(initial_cooldown: u64, max_strikes: u32) -> Self {
        Self {
            entries: HashMap::new(),
            blacklist: HashSet::new(),
            initial_cooldown,
            max_cooldown: DEFAULT_MAX_COOLDOWN.max(initial_cooldown),
            max_strikes,
        }
    }

    pub fn is_suppressed(&self, path: &str, strategy: Strategy, current_block: u64) -> bool {
        if self.initial_cooldown == 0 {
            return false;
        }
        let key = (path.to_string(), strategy);
        if self.blacklist.contains(&key) {
            return true;
        }
        self.entries
            .get(&key)
            .map(|e| current_block < e.expires_at())
            .unwrap_or(false)
    }

    /// True if any strategy of this path is suppressed
    pub fn is_path_suppressed(&self, path: &str, current_block: u64) -> bool {
        [
            Strategy::RoundTrip,
            Strategy::Triangular,
            Strategy::Alternative,
        ]
        .iter()
        .any(|s| self.is_suppressed(path, *s, current_block))
    }

    pub fn record_failure(&mut self, path: &str, strategy: Strategy, block: u64) {
        if self.initial_cooldown == 0 {
            return;
        }
        let key = (path.to_string(), strategy);
        if self.blacklist.contains(&key) {
            return;
        }

        let entry = self.entries.entry(key.clone()).or_insert(CooldownEntry {
            last_failed_block: block,
            cooldown_blocks: 0,
            failure_count: 0,
            capped_cycles: 0,
        });
        entry.failure_count += 1;
        entry.last_failed_block = block;

        let escalated = self.initial_cooldown.saturating_mul(
            ESCALATION_FACTOR.saturating_pow(entry.failure_count.saturating_sub(1)),
        );
        entry.cooldown_blocks = escalated.min(self.max_cooldown);
        if entry.cooldown_blocks == self.max_cooldown {
            entry.capped_cycles += 1;
        }

        if self.max_strikes > 0 && entry.capped_cycles >= self.max_strikes {
            info!(
                "BLACKLISTED path {} ({}) after {} failures",
                path, strategy, entry.failure_count
            );
            self.entries.remove(&key);
            self.blacklist.insert(key);
            return;
        }

        debug!(
            "Path cooldown: {} ({}) fail #{} -> {} blocks",
            path, strategy, entry.failure_count, entry.cooldown_blocks
        );
    }

    pub fn record_success(&mut self, path: &str, strategy: Strategy) {
        let key = (path.to_string(), strategy);
        if self.blacklist.remove(&key) {
            info!("Path un-blacklisted on success: {} ({})", path, strategy);
        }
        self.entries.remove(&key);
    }

    pub fn cleanup(&mut self, current_block: u64) {
        self.entries.retain(|_, e| current_block < e.expires_at());
    }

    pub fn active_count(&self) -> usize {
        self.entries.len()
    }

    pub fn blacklist_count(&self) -> usize {
        self.blacklist.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RT: Strategy = Strategy::RoundTrip;

    #[test]
    fn test_no_cooldown_initially() {
        let cd = PathCooldown::new(10, 3);
        assert!(!cd.is_suppressed("usdc-weth", RT, 100));
    }

    #[test]
    fn test_escalating_backoff() {
        let mut cd = PathCooldown::new(10, 0);

        cd.record_failure("p", RT, 100);
        assert!(cd.is_suppressed("p", RT, 109));
        assert!(!cd.is_suppressed("p", RT, 110));

        cd.record_failure("p", RT, 200);
        assert!(cd.is_suppressed("p", RT, 249));
        assert!(!cd.is_suppressed("p", RT, 250));

        cd.record_failure("p", RT, 300);
        assert!(cd.is_suppressed("p", RT, 549));

        cd.record_failure("p", RT, 600);
        cd.record_failure("p", RT, 2000);
        assert!(cd.is_suppressed("p", RT, 3799));
        assert!(!cd.is_suppressed("p", RT, 3800));
    }

    #[test]
    fn test_success_resets() {
        let mut cd = PathCooldown::new(10, 3);
        cd.record_failure("p", RT, 100);
        assert!(cd.is_path_suppressed("p", 101));

        cd.record_success("p", RT);
        assert!(!cd.is_path_suppressed("p", 101));
        assert_eq!(cd.active_count(), 0);
    }

    #[test]
    fn test_blacklist_after_capped_cycles() {
        let mut cd = PathCooldown::new(10, 2);
        for block in [100, 200, 500, 1000, 3000] {
            cd.record_failure("dead", RT, block);
        }
        assert_eq!(cd.blacklist_count(), 0);

        cd.record_failure("dead", RT, 5000);
        assert_eq!(cd.blacklist_count(), 1);
        assert!(cd.is_suppressed("dead", RT, 1_000_000));

        cd.record_success("dead", RT);
        assert!(!cd.is_suppressed("dead", RT, 1_000_000));
    }

    #[test]
    fn test_disabled_when_zero() {
        let mut cd = PathCooldown::new(0, 3);
        cd.record_failure("p", RT, 100);
        assert!(!cd.is_suppressed("p", RT, 100));
    }

    #[test]
    fn test_cleanup_removes_expired() {
        let mut cd = PathCooldown::new(10, 3);
        cd.record_failure("a", RT, 100);
        cd.record_failure("b", Strategy::Triangular, 200);
        cd.cleanup(111);
        assert_eq!(cd.active_count(), 1);
        cd.cleanup(211);
        assert_eq!(cd.active_count(), 0);
    }
}
