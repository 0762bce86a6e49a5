//! Aggregates per-slice endpoint contributions into per-service endpoint views.
//!
//! A service's endpoints may be partitioned across any number of slices, each of which is
//! updated independently. The cache holds the latest contribution of every live slice, keyed by
//! service hostname and then by slice name, and produces a service's merged view on demand by
//! concatenating its slices' contributions. The merged view is never stored, so it can't drift
//! from its inputs.
//!
//! ```text
//! [ hostname ] -> [ slice ] -> [ Endpoint, ... ]
//! ```
//!
//! Slices are kept in insertion order so that merged views are stable across reads: replacing a
//! slice's contribution keeps its position, while a slice that is removed and later re-added is
//! appended.

use ahash::AHashMap as HashMap;
use indexmap::IndexMap;
use mesh_endpoint_controller_core::Endpoint;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

/// Holds the endpoint contributions of all live slices.
///
/// A single lock guards the whole cache: writers are exclusive across all services, which is
/// acceptable because slice updates are infrequent relative to reads. Each contribution is
/// replaced with a single assignment, so readers never observe a partially-written slice.
#[derive(Debug, Default)]
pub struct SliceCache {
    by_service: RwLock<HashMap<String, BySlice>>,
}

/// Immutable once stored; a slice update swaps in a new contribution.
type Contribution = Arc<[Endpoint]>;

type BySlice = IndexMap<String, Contribution, ahash::RandomState>;

// === impl SliceCache ===

impl SliceCache {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replaces the contribution of `slice` to `hostname`'s endpoints.
    ///
    /// An empty contribution removes the slice. Once a service has no remaining slices, its entry
    /// is removed as well.
    pub fn update(&self, hostname: &str, slice: &str, endpoints: Vec<Endpoint>) {
        let mut by_service = self.by_service.write();

        if endpoints.is_empty() {
            if let Some(slices) = by_service.get_mut(hostname) {
                if slices.shift_remove(slice).is_some() {
                    trace!(%hostname, %slice, "Removed slice");
                }
                if slices.is_empty() {
                    by_service.remove(hostname);
                    trace!(%hostname, "Removed service");
                }
            }
            return;
        }

        trace!(%hostname, %slice, endpoints = endpoints.len(), "Updating slice");
        let endpoints = Contribution::from(endpoints);
        match by_service.get_mut(hostname) {
            Some(slices) => {
                slices.insert(slice.to_string(), endpoints);
            }
            None => {
                let mut slices = BySlice::default();
                slices.insert(slice.to_string(), endpoints);
                by_service.insert(hostname.to_string(), slices);
            }
        }
    }

    /// Returns the merged endpoints of all live slices for `hostname`.
    ///
    /// Slices are concatenated in insertion order; the order of endpoints within a slice is
    /// preserved. An unknown hostname yields an empty list.
    pub fn get(&self, hostname: &str) -> Vec<Endpoint> {
        self.by_service
            .read()
            .get(hostname)
            .map(merge)
            .unwrap_or_default()
    }

    /// Returns the current contribution of a single slice.
    pub fn slice(&self, hostname: &str, slice: &str) -> Option<Arc<[Endpoint]>> {
        self.by_service.read().get(hostname)?.get(slice).cloned()
    }

    /// Lists the hostnames that have at least one live slice.
    #[cfg(test)]
    pub(crate) fn hostnames(&self) -> Vec<String> {
        self.by_service.read().keys().cloned().collect()
    }

    /// Visits the merged endpoints of every service while holding a single read lock, so that
    /// all visited views are taken from the same snapshot.
    pub fn for_each(&self, mut f: impl FnMut(&str, &mut dyn Iterator<Item = &Endpoint>)) {
        for (hostname, slices) in self.by_service.read().iter() {
            let mut endpoints = slices.values().flat_map(|eps| eps.iter());
            f(hostname, &mut endpoints);
        }
    }

    /// The number of services with live slices.
    pub fn len(&self) -> usize {
        self.by_service.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_service.read().is_empty()
    }

    /// The number of live slices across all services.
    pub fn slice_count(&self) -> usize {
        self.by_service.read().values().map(|s| s.len()).sum()
    }

    /// The number of endpoints across all services.
    pub fn endpoint_count(&self) -> usize {
        self.by_service
            .read()
            .values()
            .flat_map(|s| s.values())
            .map(|eps| eps.len())
            .sum()
    }
}

fn merge(slices: &BySlice) -> Vec<Endpoint> {
    let len = slices.values().map(|eps| eps.len()).sum();
    let mut endpoints = Vec::with_capacity(len);
    for eps in slices.values() {
        endpoints.extend(eps.iter().cloned());
    }
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_endpoint_controller_core::{Health, Locality};
    use std::net::IpAddr;

    fn mk_endpoint(hostname: &str, ip: &str, port: u16) -> Endpoint {
        Endpoint {
            hostname: hostname.to_string(),
            address: ip.parse::<IpAddr>().unwrap(),
            port,
            port_name: Some("http".to_string()),
            locality: Locality::default(),
            health: Health::Ready,
            workload: None,
        }
    }

    fn addrs(endpoints: &[Endpoint]) -> Vec<String> {
        endpoints.iter().map(|ep| ep.socket_addr().to_string()).collect()
    }

    #[test]
    fn unknown_hostname_is_empty() {
        let cache = SliceCache::default();
        assert!(cache.get("svc.ns").is_empty());
        assert!(cache.slice("svc.ns", "svc-ep-1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn update_then_delete() {
        let cache = SliceCache::default();
        cache.update(
            "svc.ns",
            "svc-ep-1",
            vec![
                mk_endpoint("svc.ns", "10.0.0.1", 80),
                mk_endpoint("svc.ns", "10.0.0.2", 80),
            ],
        );
        assert_eq!(addrs(&cache.get("svc.ns")), ["10.0.0.1:80", "10.0.0.2:80"]);

        cache.update("svc.ns", "svc-ep-1", vec![]);
        assert!(cache.get("svc.ns").is_empty());
        assert!(cache.slice("svc.ns", "svc-ep-1").is_none());
        assert_eq!(cache.slice_count(), 0);
        assert!(cache.hostnames().is_empty(), "empty services must be pruned");
    }

    #[test]
    fn merges_slices_in_insertion_order() {
        let cache = SliceCache::default();
        cache.update("svc.ns", "b", vec![mk_endpoint("svc.ns", "10.0.0.2", 80)]);
        cache.update("svc.ns", "a", vec![mk_endpoint("svc.ns", "10.0.0.1", 80)]);
        assert_eq!(addrs(&cache.get("svc.ns")), ["10.0.0.2:80", "10.0.0.1:80"]);

        // Replacing a slice keeps its position.
        cache.update("svc.ns", "b", vec![mk_endpoint("svc.ns", "10.0.0.3", 80)]);
        assert_eq!(addrs(&cache.get("svc.ns")), ["10.0.0.3:80", "10.0.0.1:80"]);

        // Removing and re-adding a slice appends it.
        cache.update("svc.ns", "b", vec![]);
        cache.update("svc.ns", "b", vec![mk_endpoint("svc.ns", "10.0.0.4", 80)]);
        assert_eq!(addrs(&cache.get("svc.ns")), ["10.0.0.1:80", "10.0.0.4:80"]);
    }

    #[test]
    fn update_is_idempotent() {
        let cache = SliceCache::default();
        let eps = vec![
            mk_endpoint("svc.ns", "10.0.0.1", 80),
            mk_endpoint("svc.ns", "10.0.0.2", 80),
        ];
        cache.update("svc.ns", "a", eps.clone());
        cache.update("svc.ns", "b", vec![mk_endpoint("svc.ns", "10.0.0.3", 80)]);
        let before = cache.get("svc.ns");
        cache.update("svc.ns", "a", eps);
        assert_eq!(cache.get("svc.ns"), before);
        assert_eq!(cache.slice_count(), 2);
    }

    #[test]
    fn slices_are_isolated() {
        let cache = SliceCache::default();
        cache.update("svc.ns", "s1", vec![mk_endpoint("svc.ns", "10.0.0.1", 80)]);
        cache.update("svc.ns", "s2", vec![mk_endpoint("svc.ns", "10.0.0.2", 80)]);
        let s2 = cache.slice("svc.ns", "s2").unwrap();

        cache.update("svc.ns", "s1", vec![mk_endpoint("svc.ns", "10.0.0.9", 80)]);
        assert_eq!(cache.slice("svc.ns", "s2").unwrap(), s2);
        cache.update("svc.ns", "s1", vec![]);
        assert_eq!(cache.slice("svc.ns", "s2").unwrap(), s2);
        assert_eq!(addrs(&cache.get("svc.ns")), ["10.0.0.2:80"]);
    }

    #[test]
    fn services_are_isolated() {
        let cache = SliceCache::default();
        cache.update("a.ns", "s", vec![mk_endpoint("a.ns", "10.0.0.1", 80)]);
        cache.update("b.ns", "s", vec![mk_endpoint("b.ns", "10.0.0.2", 80)]);
        cache.update("a.ns", "s", vec![]);
        assert!(cache.get("a.ns").is_empty());
        assert_eq!(addrs(&cache.get("b.ns")), ["10.0.0.2:80"]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.endpoint_count(), 1);
    }

    #[test]
    fn deleting_unknown_slice_is_a_noop() {
        let cache = SliceCache::default();
        cache.update("svc.ns", "missing", vec![]);
        assert!(cache.is_empty());

        cache.update("svc.ns", "a", vec![mk_endpoint("svc.ns", "10.0.0.1", 80)]);
        cache.update("svc.ns", "missing", vec![]);
        assert_eq!(cache.slice_count(), 1);
    }

    #[test]
    fn for_each_visits_merged_views() {
        let cache = SliceCache::default();
        cache.update("a.ns", "1", vec![mk_endpoint("a.ns", "10.0.0.1", 80)]);
        cache.update("a.ns", "2", vec![mk_endpoint("a.ns", "10.0.0.2", 80)]);
        cache.update("b.ns", "1", vec![mk_endpoint("b.ns", "10.0.0.3", 80)]);

        let mut seen = Vec::new();
        cache.for_each(|hostname, eps| {
            seen.push((hostname.to_string(), eps.count()));
        });
        seen.sort();
        assert_eq!(seen, [("a.ns".to_string(), 2), ("b.ns".to_string(), 1)]);
    }

    /// Concurrent writers to distinct slices of one service never lose or tear each other's
    /// contributions, while readers run alongside them.
    #[test]
    fn concurrent_updates() {
        let cache = SliceCache::shared();
        let writers = (0..8u8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let slice = format!("slice-{i}");
                    for n in 0..100u8 {
                        let eps = (0..4u8)
                            .map(|j| mk_endpoint("svc.ns", &format!("10.{i}.{n}.{j}"), 80))
                            .collect();
                        cache.update("svc.ns", &slice, eps);
                    }
                })
            })
            .collect::<Vec<_>>();
        let reader = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    // Every slice is always written in groups of four.
                    assert_eq!(cache.get("svc.ns").len() % 4, 0);
                }
            })
        };
        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        assert_eq!(cache.slice_count(), 8);
        let eps = cache.get("svc.ns");
        assert_eq!(eps.len(), 32);
        for i in 0..8u8 {
            let slice = cache.slice("svc.ns", &format!("slice-{i}")).unwrap();
            for (j, ep) in slice.iter().enumerate() {
                assert_eq!(ep.address.to_string(), format!("10.{i}.99.{j}"));
            }
        }
    }
}
