//! Global device registry.
//!
//! Structural changes (insert, remove) and name lookups take one mutex.
//! Each change republishes an immutable id-keyed snapshot through
//! `ArcSwap`, so identifier lookups from the remote-config callbacks never
//! take the lock. A device removed from the registry stays alive for as
//! long as any snapshot or caller still holds it.

use super::Device;
use crate::backend::{BackendState, DatapathBackend};
use crate::error::{P4rtError, Result};
use crate::{debug_log, warn_log};
use arc_swap::ArcSwap;
use p4rt_types::DeviceId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

type DeviceSnapshot = BTreeMap<DeviceId, Arc<Device>>;

#[derive(Default)]
struct RegistryInner {
    by_name: BTreeMap<String, Arc<Device>>,
}

impl RegistryInner {
    fn lowest_free_id(&self) -> DeviceId {
        let used: BTreeSet<DeviceId> = self.by_name.values().map(|d| d.id()).collect();
        let mut candidate = 0u64;
        while used.contains(&DeviceId::new(candidate)) {
            candidate += 1;
        }
        DeviceId::new(candidate)
    }

    fn snapshot(&self) -> DeviceSnapshot {
        self.by_name
            .values()
            .map(|d| (d.id(), Arc::clone(d)))
            .collect()
    }
}

/// Name- and identifier-keyed collection of registered devices.
pub struct DeviceRegistry {
    inner: Mutex<RegistryInner>,
    by_id: ArcSwap<DeviceSnapshot>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            by_id: ArcSwap::from_pointee(BTreeMap::new()),
        }
    }

    /// Registers a new device built from freshly allocated backend state.
    ///
    /// The device gets the lowest identifier not held by a registered
    /// device. If the name is taken, the state is handed back to the
    /// backend and `AlreadyExists` is returned.
    pub(crate) fn insert(
        &self,
        name: &str,
        dp_type: &str,
        backend: Arc<dyn DatapathBackend>,
        state: BackendState,
    ) -> Result<Arc<Device>> {
        let mut inner = self.inner.lock();
        if inner.by_name.contains_key(name) {
            drop(inner);
            warn_log!("DeviceRegistry", device = name, "Device name already in use");
            backend.device_dealloc(name, state);
            return Err(P4rtError::already_exists(format!("device {}", name)));
        }

        let id = inner.lowest_free_id();
        let device = Device::new(name, dp_type, id, backend, state);
        inner.by_name.insert(name.to_string(), Arc::clone(&device));
        self.by_id.store(Arc::new(inner.snapshot()));

        debug_log!(
            "DeviceRegistry",
            device = name,
            id = %id,
            dp_type = dp_type,
            "Device registered"
        );
        Ok(device)
    }

    /// Unlinks `device`. Returns false if it was not registered.
    ///
    /// Once this returns, name and identifier lookups no longer see the
    /// device; holders of an `Arc` keep it alive.
    pub(crate) fn remove(&self, device: &Arc<Device>) -> bool {
        let mut inner = self.inner.lock();
        let registered = inner
            .by_name
            .get(device.name())
            .is_some_and(|d| Arc::ptr_eq(d, device));
        if !registered {
            return false;
        }

        inner.by_name.remove(device.name());
        self.by_id.store(Arc::new(inner.snapshot()));
        debug_log!(
            "DeviceRegistry",
            device = %device.name(),
            id = %device.id(),
            "Device unregistered"
        );
        true
    }

    /// Runs `f` holding the registry lock.
    ///
    /// Per-device field writes (program slot, schema) go through here so
    /// they are ordered with structural changes. Lock order is registry
    /// first, device field second.
    pub(crate) fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.lock();
        f()
    }

    /// Looks up a device by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<Device>> {
        self.inner.lock().by_name.get(name).cloned()
    }

    /// Looks up a device by identifier without taking the registry lock.
    pub fn lookup_by_id(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.by_id.load().get(&id).cloned()
    }

    /// Current snapshot of every registered device, keyed by identifier.
    pub fn snapshot(&self) -> Arc<BTreeMap<DeviceId, Arc<Device>>> {
        self.by_id.load_full()
    }

    /// Registered devices in name order.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.inner.lock().by_name.values().cloned().collect()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.inner.lock().by_name.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_name.is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendEvent, MemoryBackend, MemoryBackendConfig};
    use pretty_assertions::assert_eq;

    fn setup() -> (DeviceRegistry, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new(MemoryBackendConfig::default()));
        (DeviceRegistry::new(), backend)
    }

    fn insert(
        registry: &DeviceRegistry,
        backend: &Arc<MemoryBackend>,
        name: &str,
    ) -> Result<Arc<Device>> {
        let state = backend.device_alloc()?;
        registry.insert(name, "system", backend.clone(), state)
    }

    #[test]
    fn test_insert_and_lookup() {
        let (registry, backend) = setup();
        let device = insert(&registry, &backend, "br0").unwrap();

        assert_eq!(device.id(), DeviceId::new(0));
        assert!(Arc::ptr_eq(&registry.lookup("br0").unwrap(), &device));
        assert!(Arc::ptr_eq(
            &registry.lookup_by_id(DeviceId::new(0)).unwrap(),
            &device
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (registry, backend) = setup();
        let _br0 = insert(&registry, &backend, "br0").unwrap();
        assert!(matches!(
            insert(&registry, &backend, "br0"),
            Err(P4rtError::AlreadyExists { .. })
        ));
        assert_eq!(registry.len(), 1);
        assert_eq!(backend.count(|e| matches!(e, BackendEvent::Dealloc { .. })), 1);
    }

    #[test]
    fn test_lowest_free_id_reused() {
        let (registry, backend) = setup();
        let br0 = insert(&registry, &backend, "br0").unwrap();
        let br1 = insert(&registry, &backend, "br1").unwrap();
        assert_eq!(br1.id(), DeviceId::new(1));

        assert!(registry.remove(&br0));
        let br2 = insert(&registry, &backend, "br2").unwrap();
        assert_eq!(br2.id(), DeviceId::new(0));
    }

    #[test]
    fn test_remove_is_immediately_visible() {
        let (registry, backend) = setup();
        let device = insert(&registry, &backend, "br0").unwrap();
        let reader = registry.snapshot();

        assert!(registry.remove(&device));
        assert!(registry.lookup("br0").is_none());
        assert!(registry.lookup_by_id(device.id()).is_none());
        assert!(!registry.remove(&device));

        // The old snapshot and the caller still keep it alive.
        assert_eq!(reader.get(&DeviceId::new(0)).unwrap().name(), "br0");
        drop(device);
        assert_eq!(backend.count(|e| matches!(e, BackendEvent::Dealloc { .. })), 0);
        drop(reader);
        assert_eq!(backend.count(|e| matches!(e, BackendEvent::Dealloc { .. })), 1);
    }

    #[test]
    fn test_remove_ignores_stale_handle() {
        let (registry, backend) = setup();
        let old = insert(&registry, &backend, "br0").unwrap();
        assert!(registry.remove(&old));
        let new = insert(&registry, &backend, "br0").unwrap();

        assert!(!registry.remove(&old));
        assert!(Arc::ptr_eq(&registry.lookup("br0").unwrap(), &new));
    }
}
