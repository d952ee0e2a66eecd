//! Object expiration and cascading removal.
//!
//! Every header insert or update (and every data record) refreshes an
//! object's last-seen time. A periodic sweep removes objects not refreshed
//! within the expiration limit, together with their dependents: a platform
//! takes its beams with it, a beam takes its gates. Removals are reported
//! deepest first (gate, beam, platform) so no client ever holds a beam or
//! gate whose host is already gone.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::config::DEFAULT_EXPIRE_LIMIT;
use crate::core::record::{Event, Header};
use crate::error::{ProtocolError, Result};
use crate::storage::HeaderContainer;
use crate::utils::metrics::global_metrics;

#[derive(Debug, Clone)]
pub struct ObjectLifecycle {
    expire_limit: f64,
    check_interval: f64,
    last_check: f64,
    last_seen: HashMap<u64, f64>,
    platform_beams: HashMap<u64, Vec<u64>>,
    beam_gates: HashMap<u64, Vec<u64>>,
    /// Beam or gate id to the id it was attached under.
    hosts: HashMap<u64, u64>,
    /// Reloaded from disk and not yet stamped with the caller's clock.
    unstamped: HashSet<u64>,
}

impl ObjectLifecycle {
    pub fn new(expire_limit: f64, check_interval: f64) -> Self {
        let mut lifecycle = Self {
            expire_limit: DEFAULT_EXPIRE_LIMIT,
            check_interval,
            last_check: f64::NEG_INFINITY,
            last_seen: HashMap::new(),
            platform_beams: HashMap::new(),
            beam_gates: HashMap::new(),
            hosts: HashMap::new(),
            unstamped: HashSet::new(),
        };
        lifecycle.set_expire_limit(expire_limit);
        lifecycle
    }

    /// Set the expiration limit in seconds. Non-positive limits are replaced
    /// by the default.
    pub fn set_expire_limit(&mut self, limit: f64) {
        if limit.is_nan() || limit <= 0.0 {
            warn!(
                requested = limit,
                using = DEFAULT_EXPIRE_LIMIT,
                "Rejected non-positive expiration limit"
            );
            self.expire_limit = DEFAULT_EXPIRE_LIMIT;
        } else {
            self.expire_limit = limit;
        }
    }

    pub fn expire_limit(&self) -> f64 {
        self.expire_limit
    }

    /// Record a header insert or update, linking beams and gates to their hosts.
    ///
    /// Hosts are not required to exist; a dangling host is only logged.
    pub fn track(&mut self, header: &Header, now: f64) {
        let id = header.id();
        self.last_seen.insert(id, now);
        self.unstamped.remove(&id);

        let Some(host) = header.host_id() else {
            self.unlink(id);
            return;
        };
        if self.hosts.get(&id) == Some(&host) {
            return;
        }
        self.unlink(id);
        if !self.last_seen.contains_key(&host) {
            debug!(id, host, "Header names a host that is not tracked");
        }
        let children = match header {
            Header::Beam(_) => self.platform_beams.entry(host).or_default(),
            Header::Gate(_) => self.beam_gates.entry(host).or_default(),
            Header::Platform(_) => return,
        };
        children.push(id);
        self.hosts.insert(id, host);
    }

    /// Track a header reloaded from a restored container.
    ///
    /// Its links are recorded now, but it has no last-seen time until
    /// [`stamp_restored`](Self::stamp_restored) supplies one, so it cannot
    /// expire before the caller's clock is known.
    pub fn track_restored(&mut self, header: &Header) {
        self.track(header, f64::NEG_INFINITY);
        self.unstamped.insert(header.id());
    }

    /// Give every restored object that has not been refreshed since the
    /// last-seen time `now`. Returns how many were stamped.
    pub fn stamp_restored(&mut self, now: f64) -> usize {
        let stamped = self.unstamped.len();
        for id in self.unstamped.drain() {
            self.last_seen.insert(id, now);
        }
        stamped
    }

    /// Refresh a tracked object. Returns false for unknown ids.
    pub fn touch(&mut self, id: u64, now: f64) -> bool {
        match self.last_seen.get_mut(&id) {
            Some(seen) => {
                *seen = now;
                self.unstamped.remove(&id);
                true
            }
            None => false,
        }
    }

    pub fn is_tracked(&self, id: u64) -> bool {
        self.last_seen.contains_key(&id)
    }

    pub fn last_seen(&self, id: u64) -> Option<f64> {
        if self.unstamped.contains(&id) {
            return None;
        }
        self.last_seen.get(&id).copied()
    }

    /// Drop every record of `id`. Dependents are left in place.
    pub fn forget(&mut self, id: u64) {
        self.last_seen.remove(&id);
        self.unstamped.remove(&id);
        self.unlink(id);
        self.platform_beams.remove(&id);
        self.beam_gates.remove(&id);
    }

    /// Ids whose last refresh is older than the limit, in ascending id order.
    pub fn expired(&self, now: f64) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .last_seen
            .iter()
            .filter(|(id, seen)| **seen + self.expire_limit < now && !self.unstamped.contains(*id))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// `id` and everything that depends on it, deepest dependents first.
    pub fn cascade(&self, id: u64) -> Vec<u64> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        self.collect(id, &mut order, &mut visited);
        order
    }

    fn collect(&self, id: u64, order: &mut Vec<u64>, visited: &mut HashSet<u64>) {
        if !visited.insert(id) {
            return;
        }
        let children = self
            .platform_beams
            .get(&id)
            .into_iter()
            .chain(self.beam_gates.get(&id))
            .flatten();
        for child in children {
            self.collect(*child, order, visited);
        }
        order.push(id);
    }

    /// Whether the periodic expiration check is due.
    pub fn check_due(&self, now: f64) -> bool {
        now - self.last_check >= self.check_interval
    }

    /// Remove every expired object and its dependents from `container`.
    ///
    /// Returns one EXPIRE event per removed object, deepest first, and
    /// compacts the container once if anything was removed.
    pub fn sweep(&mut self, container: &mut HeaderContainer, now: f64) -> Result<Vec<Event>> {
        self.last_check = now;
        let mut events = Vec::new();
        let mut removed = HashSet::new();
        for id in self.expired(now) {
            if removed.contains(&id) {
                continue;
            }
            events.extend(self.remove_cascade(container, id, now, &mut removed)?);
        }

        if !events.is_empty() {
            container.compact()?;
            global_metrics().objects_expired(events.len() as u64);
            info!(expired = events.len(), "Expired stale objects");
        }
        Ok(events)
    }

    /// Explicitly remove `id` and its dependents.
    ///
    /// The container is not compacted; the caller schedules that.
    pub fn remove(&mut self, container: &mut HeaderContainer, id: u64, now: f64) -> Result<Vec<Event>> {
        if !self.is_tracked(id) && !container.contains(id) {
            warn!(id, "Remove of unknown object");
            return Err(ProtocolError::NotFound(id));
        }
        let mut removed = HashSet::new();
        self.remove_cascade(container, id, now, &mut removed)
    }

    fn remove_cascade(
        &mut self,
        container: &mut HeaderContainer,
        id: u64,
        now: f64,
        removed: &mut HashSet<u64>,
    ) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for victim in self.cascade(id) {
            if !removed.insert(victim) {
                continue;
            }
            container.remove(victim)?;
            self.forget(victim);
            debug!(id = victim, root = id, "Removed object");
            events.push(Event::expire(victim, now));
        }
        Ok(events)
    }

    fn unlink(&mut self, id: u64) {
        let Some(host) = self.hosts.remove(&id) else {
            return;
        };
        for map in [&mut self.platform_beams, &mut self.beam_gates] {
            if let Some(children) = map.get_mut(&host) {
                children.retain(|c| *c != id);
                if children.is_empty() {
                    map.remove(&host);
                }
            }
        }
    }
}

impl Default for ObjectLifecycle {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRE_LIMIT, crate::config::EXPIRE_CHECK_INTERVAL)
    }
}
