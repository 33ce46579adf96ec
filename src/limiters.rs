use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::util::lock_unpoisoned;

pub(crate) const ROUTE_LIMITER_ENTRY_TTL: Duration = Duration::from_secs(300);
pub(crate) const ROUTE_LIMITER_MAX_ENTRIES: usize = 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AcquirePermitError {
    Timeout,
}

#[derive(Debug)]
struct BlockingSemaphore {
    permits: usize,
    available: Mutex<usize>,
    condvar: Condvar,
}

impl BlockingSemaphore {
    fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            permits,
            available: Mutex::new(permits),
            condvar: Condvar::new(),
        }
    }

    fn acquire(
        self: &Arc<Self>,
        deadline_at: Instant,
    ) -> Result<BlockingSemaphorePermit, AcquirePermitError> {
        let mut available = lock_unpoisoned(&self.available);
        loop {
            if *available > 0 {
                *available -= 1;
                drop(available);
                return Ok(BlockingSemaphorePermit {
                    semaphore: Arc::clone(self),
                });
            }

            let now = Instant::now();
            if now >= deadline_at {
                return Err(AcquirePermitError::Timeout);
            }
            let (next, wait_result) = match self
                .condvar
                .wait_timeout(available, deadline_at.duration_since(now))
            {
                Ok(result) => result,
                Err(poisoned) => poisoned.into_inner(),
            };
            if wait_result.timed_out() && *next == 0 && Instant::now() >= deadline_at {
                return Err(AcquirePermitError::Timeout);
            }
            available = next;
        }
    }

    fn release(&self) {
        let mut available = lock_unpoisoned(&self.available);
        *available = available.saturating_add(1).min(self.permits);
        self.condvar.notify_one();
    }

    fn in_use(&self) -> usize {
        self.permits
            .saturating_sub(*lock_unpoisoned(&self.available))
    }
}

#[derive(Debug)]
struct BlockingSemaphorePermit {
    semaphore: Arc<BlockingSemaphore>,
}

impl Drop for BlockingSemaphorePermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

struct RouteLimiterEntry {
    semaphore: Arc<BlockingSemaphore>,
    last_used_at: Instant,
}

impl RouteLimiterEntry {
    fn is_idle(&self) -> bool {
        self.semaphore.in_use() == 0
    }
}

/// Bounds the number of checked-out connections in total and per route.
pub(crate) struct RouteLimiters {
    total: Arc<BlockingSemaphore>,
    per_route_limit: usize,
    per_route: Mutex<BTreeMap<String, RouteLimiterEntry>>,
}

/// Holds one total slot and one per-route slot until dropped.
#[derive(Debug)]
pub(crate) struct RoutePermit {
    // Route permit is declared first so it is released before the total one.
    _route: BlockingSemaphorePermit,
    _total: BlockingSemaphorePermit,
}

impl RouteLimiters {
    pub(crate) fn new(max_total: usize, max_per_route: usize) -> Self {
        Self {
            total: Arc::new(BlockingSemaphore::new(max_total)),
            per_route_limit: max_per_route.max(1),
            per_route: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn acquire(
        &self,
        route: &str,
        deadline_at: Instant,
    ) -> Result<RoutePermit, AcquirePermitError> {
        let route_semaphore = {
            let mut entries = lock_unpoisoned(&self.per_route);
            let now = Instant::now();
            cleanup_stale_routes(
                &mut entries,
                now,
                ROUTE_LIMITER_ENTRY_TTL,
                ROUTE_LIMITER_MAX_ENTRIES,
            );
            let entry = entries
                .entry(route.to_owned())
                .or_insert_with(|| RouteLimiterEntry {
                    semaphore: Arc::new(BlockingSemaphore::new(self.per_route_limit)),
                    last_used_at: now,
                });
            entry.last_used_at = now;
            Arc::clone(&entry.semaphore)
        };

        let route = route_semaphore.acquire(deadline_at)?;
        let total = self.total.acquire(deadline_at)?;
        Ok(RoutePermit {
            _route: route,
            _total: total,
        })
    }

    pub(crate) fn total_in_use(&self) -> usize {
        self.total.in_use()
    }

    pub(crate) fn route_in_use(&self, route: &str) -> usize {
        lock_unpoisoned(&self.per_route)
            .get(route)
            .map_or(0, |entry| entry.semaphore.in_use())
    }

    pub(crate) fn tracked_routes(&self) -> usize {
        lock_unpoisoned(&self.per_route).len()
    }
}

fn cleanup_stale_routes(
    entries: &mut BTreeMap<String, RouteLimiterEntry>,
    now: Instant,
    entry_ttl: Duration,
    max_entries: usize,
) {
    entries.retain(|_, entry| {
        !entry.is_idle() || now.duration_since(entry.last_used_at) <= entry_ttl
    });

    while entries.len() > max_entries {
        let oldest_key = entries
            .iter()
            .filter(|(_, entry)| entry.is_idle())
            .min_by_key(|(_, entry)| entry.last_used_at)
            .map(|(route, _)| route.clone());
        let Some(oldest_key) = oldest_key else {
            break;
        };
        entries.remove(&oldest_key);
    }
}
