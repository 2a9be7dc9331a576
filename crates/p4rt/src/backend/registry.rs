//! Registry of datapath backends, in probe order.

use super::DatapathBackend;
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::error::{P4rtError, Result};
use crate::{audit_log, error_log, info_log, warn_log};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Process-wide list of backends.
///
/// Identity is the backend object itself: registering the same `Arc`
/// twice fails, while two distinct objects may claim overlapping types
/// (the first registered wins on lookup).
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<Vec<Arc<dyn DatapathBackend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a backend.
    pub fn register(&self, backend: Arc<dyn DatapathBackend>) -> Result<()> {
        let mut backends = self.backends.write();
        if backends
            .iter()
            .any(|b| std::ptr::addr_eq(Arc::as_ptr(b), Arc::as_ptr(&backend)))
        {
            warn_log!(
                "BackendRegistry",
                backend = backend.name(),
                "Backend already registered"
            );
            return Err(P4rtError::AlreadyRegistered {
                backend: backend.name().to_string(),
            });
        }

        let mut types = BTreeSet::new();
        backend.enumerate_types(&mut types);
        info_log!(
            "BackendRegistry",
            backend = backend.name(),
            types = ?types,
            "Registered backend"
        );
        audit_log!(AuditRecord::new(
            AuditCategory::ConfigurationChange,
            "BackendRegistry",
            "register_backend"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(backend.name())
        .with_object_type("backend")
        .with_details(serde_json::json!({ "types": types })));

        backends.push(backend);
        Ok(())
    }

    /// Calls every backend's `init` hook.
    ///
    /// A failing backend is logged and skipped; the first error is
    /// returned after all backends have been initialized.
    pub fn init_all(&self) -> Result<()> {
        let backends = self.backends.read().clone();
        let mut first_error = None;
        for backend in backends {
            if let Err(e) = backend.init() {
                error_log!(
                    "BackendRegistry",
                    backend = backend.name(),
                    error = %e,
                    "Backend init failed"
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Finds the first backend that supports `dp_type`.
    pub fn resolve(&self, dp_type: &str) -> Result<Arc<dyn DatapathBackend>> {
        let backends = self.backends.read();
        for backend in backends.iter() {
            let mut types = BTreeSet::new();
            backend.enumerate_types(&mut types);
            if types.contains(dp_type) {
                return Ok(Arc::clone(backend));
            }
        }
        warn_log!("BackendRegistry", dp_type = dp_type, "Unknown datapath type");
        Err(P4rtError::unsupported_type(dp_type))
    }

    /// Union of every backend's supported types.
    pub fn enumerate_all_types(&self) -> BTreeSet<String> {
        let mut types = BTreeSet::new();
        for backend in self.backends.read().iter() {
            backend.enumerate_types(&mut types);
        }
        types
    }

    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }
}
