//! Network-device collaborator.
//!
//! A [`NetDev`] is an opened interface handle; dropping the last `Arc`
//! closes it. [`NetDevProvider`] opens handles by name and type.

use crate::error::{P4rtError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// An opened network device.
pub trait NetDev: Send + Sync + fmt::Debug {
    /// Interface name.
    fn name(&self) -> &str;

    /// Interface type, e.g. "system", "tap", "internal".
    fn netdev_type(&self) -> &str;
}

/// Opens network devices by name.
pub trait NetDevProvider: Send + Sync {
    /// Opens `name` as `netdev_type`.
    fn open(&self, name: &str, netdev_type: &str) -> Result<Arc<dyn NetDev>>;
}

/// Maps a bridge-level port type to the type used to open the device.
///
/// Datapaths here are userspace only, so internal ports are taps.
pub fn port_open_type(port_type: &str) -> &str {
    if port_type == "internal" {
        "tap"
    } else {
        port_type
    }
}

type OpenCounts = Arc<Mutex<BTreeMap<String, usize>>>;

/// Handle returned by [`MemoryNetDevProvider`].
pub struct MemoryNetDev {
    name: String,
    netdev_type: String,
    open: OpenCounts,
}

impl NetDev for MemoryNetDev {
    fn name(&self) -> &str {
        &self.name
    }

    fn netdev_type(&self) -> &str {
        &self.netdev_type
    }
}

impl fmt::Debug for MemoryNetDev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNetDev")
            .field("name", &self.name)
            .field("netdev_type", &self.netdev_type)
            .finish()
    }
}

impl Drop for MemoryNetDev {
    fn drop(&mut self) {
        let mut open = self.open.lock();
        if let Some(count) = open.get_mut(&self.name) {
            *count -= 1;
            if *count == 0 {
                open.remove(&self.name);
            }
        }
    }
}

/// In-memory provider that tracks open handles per name.
#[derive(Default)]
pub struct MemoryNetDevProvider {
    open: OpenCounts,
    refused: Mutex<BTreeSet<String>>,
}

impl MemoryNetDevProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes future opens of `name` fail.
    pub fn refuse(&self, name: &str) {
        self.refused.lock().insert(name.to_string());
    }

    /// Allows `name` to be opened again.
    pub fn allow(&self, name: &str) {
        self.refused.lock().remove(name);
    }

    /// Number of live handles for `name`.
    pub fn open_count(&self, name: &str) -> usize {
        self.open.lock().get(name).copied().unwrap_or(0)
    }

    /// Opens a handle with the concrete type, for callers outside the trait.
    pub fn open_memory(&self, name: &str, netdev_type: &str) -> Result<Arc<MemoryNetDev>> {
        if self.refused.lock().contains(name) {
            return Err(P4rtError::netdev(name, "No such device"));
        }
        *self.open.lock().entry(name.to_string()).or_insert(0) += 1;
        Ok(Arc::new(MemoryNetDev {
            name: name.to_string(),
            netdev_type: netdev_type.to_string(),
            open: Arc::clone(&self.open),
        }))
    }
}

impl NetDevProvider for MemoryNetDevProvider {
    fn open(&self, name: &str, netdev_type: &str) -> Result<Arc<dyn NetDev>> {
        let netdev: Arc<dyn NetDev> = self.open_memory(name, netdev_type)?;
        Ok(netdev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_port_open_type() {
        assert_eq!(port_open_type("internal"), "tap");
        assert_eq!(port_open_type("system"), "system");
        assert_eq!(port_open_type(""), "");
    }

    #[test]
    fn test_open_and_close_tracking() {
        let provider = MemoryNetDevProvider::new();
        let a = provider.open("eth0", "system").unwrap();
        let b = provider.open("eth0", "system").unwrap();
        assert_eq!(a.name(), "eth0");
        assert_eq!(provider.open_count("eth0"), 2);

        drop(a);
        assert_eq!(provider.open_count("eth0"), 1);
        drop(b);
        assert_eq!(provider.open_count("eth0"), 0);
    }

    #[test]
    fn test_refuse() {
        let provider = MemoryNetDevProvider::new();
        provider.refuse("eth9");
        assert!(matches!(
            provider.open("eth9", "system"),
            Err(P4rtError::NetDev { .. })
        ));
        assert_eq!(provider.open_count("eth9"), 0);

        provider.allow("eth9");
        assert!(provider.open("eth9", "system").is_ok());
    }
}
