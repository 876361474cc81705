use std::path::PathBuf;
use std::time::Duration;

use meds_materialize::CacheDecision;

/// What happened to one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub output: PathBuf,
    pub decision: CacheDecision,
}

/// Result of one orchestrator pass.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stage: &'static str,
    pub items: Vec<ItemReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            items: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn record(&mut self, output: PathBuf, decision: CacheDecision) {
        self.items.push(ItemReport { output, decision });
    }

    pub fn count(&self, decision: CacheDecision) -> usize {
        self.items.iter().filter(|i| i.decision == decision).count()
    }

    pub fn computed(&self) -> usize {
        self.count(CacheDecision::Recompute)
    }

    pub fn cache_hits(&self) -> usize {
        self.count(CacheDecision::SkipCacheHit)
    }

    pub fn locked(&self) -> usize {
        self.count(CacheDecision::SkipLocked)
    }

    /// Items another worker was producing; a later pass picks them up.
    pub fn is_complete(&self) -> bool {
        self.locked() == 0
    }
}

/// An existing lock marker found on disk.
#[derive(Debug, Clone)]
pub struct LockListing {
    pub marker: PathBuf,
    pub age: Duration,
    /// Owner description, if the payload could be parsed.
    pub owner: Option<String>,
    /// Whether the staleness policy would reclaim it.
    pub stale: bool,
}
