//! Namespace and LimitRange lookups
//!
//! The admission engine never calls the API server while handling a review.
//! Namespaces and LimitRanges are mirrored into local reflector stores by
//! background watches, and the engine reads them through the
//! [`NamespaceLister`] and [`LimitRangeLister`] seams so tests can swap in
//! mocks.

use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{LimitRange, Namespace};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::{Error, Result};

/// Read access to cluster namespaces
#[cfg_attr(test, automock)]
pub trait NamespaceLister: Send + Sync {
    /// Get a namespace by name, failing if it is not cached
    fn get(&self, name: &str) -> Result<Arc<Namespace>>;
}

/// Read access to the LimitRanges of a namespace
#[cfg_attr(test, automock)]
pub trait LimitRangeLister: Send + Sync {
    /// List every LimitRange in `namespace`
    fn list(&self, namespace: &str) -> Result<Vec<Arc<LimitRange>>>;
}

// =============================================================================
// Reflector-backed Implementation
// =============================================================================

/// Namespaces served from a reflector store
#[derive(Clone)]
pub struct CachedNamespaces {
    store: Store<Namespace>,
}

impl CachedNamespaces {
    /// Wrap an existing store
    pub fn new(store: Store<Namespace>) -> Self {
        Self { store }
    }
}

impl NamespaceLister for CachedNamespaces {
    fn get(&self, name: &str) -> Result<Arc<Namespace>> {
        self.store
            .get(&ObjectRef::new(name))
            .ok_or_else(|| Error::lookup(format!("namespace \"{name}\" not found")))
    }
}

/// LimitRanges served from a reflector store
#[derive(Clone)]
pub struct CachedLimitRanges {
    store: Store<LimitRange>,
}

impl CachedLimitRanges {
    /// Wrap an existing store
    pub fn new(store: Store<LimitRange>) -> Self {
        Self { store }
    }
}

impl LimitRangeLister for CachedLimitRanges {
    fn list(&self, namespace: &str) -> Result<Vec<Arc<LimitRange>>> {
        Ok(self
            .store
            .state()
            .into_iter()
            .filter(|lr| lr.metadata.namespace.as_deref() == Some(namespace))
            .collect())
    }
}

/// Cluster-wide caches for the two kinds the engine reads
#[derive(Clone)]
pub struct ClusterCache {
    /// Namespace cache
    pub namespaces: CachedNamespaces,
    /// LimitRange cache
    pub limit_ranges: CachedLimitRanges,
}

impl ClusterCache {
    /// Start background watches for Namespaces and LimitRanges
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(client: Client) -> Self {
        let namespaces = spawn_reflector(Api::<Namespace>::all(client.clone()), "namespaces");
        let limit_ranges = spawn_reflector(Api::<LimitRange>::all(client), "limitranges");

        Self {
            namespaces: CachedNamespaces::new(namespaces),
            limit_ranges: CachedLimitRanges::new(limit_ranges),
        }
    }

    /// Wait for the initial list of both kinds to land in the caches
    pub async fn wait_until_ready(&self) -> Result<()> {
        self.namespaces
            .store
            .wait_until_ready()
            .await
            .map_err(|e| Error::lookup(format!("namespace cache did not sync: {e}")))?;
        self.limit_ranges
            .store
            .wait_until_ready()
            .await
            .map_err(|e| Error::lookup(format!("limit range cache did not sync: {e}")))?;

        info!(
            namespaces = self.namespaces.store.state().len(),
            limit_ranges = self.limit_ranges.store.state().len(),
            "Cluster caches synced"
        );
        Ok(())
    }
}

fn spawn_reflector<K>(api: Api<K>, kind: &'static str) -> Store<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff()
        .touched_objects();

    tokio::spawn(stream.for_each(move |event| {
        if let Err(e) = event {
            warn!(kind, error = %e, "Cache watch error, backing off");
        }
        futures::future::ready(())
    }));

    reader
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::LimitRangeSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn limit_range(namespace: &str, name: &str) -> LimitRange {
        LimitRange {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(LimitRangeSpec { limits: vec![] }),
        }
    }

    #[test]
    fn cached_namespace_lookup() {
        let (reader, mut writer) = reflector::store::<Namespace>();
        writer.apply_watcher_event(&watcher::Event::Apply(namespace("team-a")));

        let namespaces = CachedNamespaces::new(reader);
        let ns = namespaces.get("team-a").unwrap();
        assert_eq!(ns.metadata.name.as_deref(), Some("team-a"));
    }

    #[test]
    fn cache_miss_is_lookup_error() {
        let (reader, _writer) = reflector::store::<Namespace>();
        let namespaces = CachedNamespaces::new(reader);

        let err = namespaces.get("missing").unwrap_err();
        assert!(matches!(err, Error::Lookup(_)));
        assert!(err.to_string().contains("\"missing\" not found"));
    }

    #[test]
    fn limit_ranges_are_filtered_by_namespace() {
        let (reader, mut writer) = reflector::store::<LimitRange>();
        writer.apply_watcher_event(&watcher::Event::Apply(limit_range("team-a", "defaults")));
        writer.apply_watcher_event(&watcher::Event::Apply(limit_range("team-a", "strict")));
        writer.apply_watcher_event(&watcher::Event::Apply(limit_range("team-b", "defaults")));

        let limits = CachedLimitRanges::new(reader);
        assert_eq!(limits.list("team-a").unwrap().len(), 2);
        assert_eq!(limits.list("team-b").unwrap().len(), 1);
        assert!(limits.list("team-c").unwrap().is_empty());
    }
}
