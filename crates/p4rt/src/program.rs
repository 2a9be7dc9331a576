//! The per-device program slot.
//!
//! A device holds at most one [`Program`]. Installing into an occupied
//! slot swaps the bytes of the existing program and re-inserts it; an
//! empty slot gets a freshly allocated program.
//!
//! Installs and removals on one device are serialized by the device's
//! install lock. Attaching or detaching the slot's program takes the
//! registry lock first, then the slot lock. Backend loads run without the
//! registry lock, so a slow load only stalls its own device.

use crate::backend::{BackendState, DatapathBackend};
use crate::device::{Device, DeviceRegistry};
use crate::error::{P4rtError, Result};
use crate::{debug_log, info_log};
use std::any::Any;
use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

/// A compiled data-plane image bound to one device.
pub struct Program {
    owner: Weak<Device>,
    data: Vec<u8>,
    backend: Arc<dyn DatapathBackend>,
    state: Option<BackendState>,
}

impl Program {
    fn new(
        owner: Weak<Device>,
        data: Vec<u8>,
        backend: Arc<dyn DatapathBackend>,
        state: BackendState,
    ) -> Self {
        Self {
            owner,
            data,
            backend,
            state: Some(state),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The owning device, unless it is being reclaimed.
    pub fn owner(&self) -> Option<Arc<Device>> {
        self.owner.upgrade()
    }

    /// Backend-private state, if it has type `T`.
    pub fn backend_state<T: Any>(&self) -> Option<&T> {
        self.state.as_deref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program").field("len", &self.len()).finish()
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            self.backend.program_dealloc(state);
        }
    }
}

fn not_live(device: &Device) -> P4rtError {
    P4rtError::invalid_state(
        device.name(),
        format!("cannot install program in state {}", device.state()),
    )
}

/// Loads `data` into `device`'s program slot.
///
/// On failure a fresh program is deallocated and an existing one keeps
/// its previous bytes.
pub(crate) fn install(devices: &DeviceRegistry, device: &Device, data: Vec<u8>) -> Result<()> {
    let backend = device.backend();
    let len = data.len();
    let _serial = device.program_install.lock();

    if !devices.with_lock(|| device.is_live()) {
        return Err(not_live(device));
    }

    // The slot only changes under the install lock, which is held here.
    let data = {
        let mut slot = device.program.lock();
        match slot.as_mut() {
            Some(program) => {
                let previous = mem::replace(&mut program.data, data);
                if let Err(e) = backend.program_insert(device, program) {
                    program.data = previous;
                    return Err(e);
                }
                None
            }
            None => Some(data),
        }
    };

    if let Some(data) = data {
        let state = backend.program_alloc()?;
        let program = Program::new(device.downgrade(), data, Arc::clone(backend), state);
        backend.program_insert(device, &program)?;

        let rejected = devices.with_lock(|| {
            if !device.is_live() {
                return Some(program);
            }
            *device.program.lock() = Some(program);
            None
        });
        if let Some(program) = rejected {
            backend.program_delete(device, &program);
            return Err(not_live(device));
        }
    }

    info_log!(
        "ProgramSlot",
        device = %device.name(),
        len = len,
        "Program installed"
    );
    Ok(())
}

/// Deletes and deallocates the installed program. Returns false if the
/// slot was already empty.
pub(crate) fn remove(devices: &DeviceRegistry, device: &Device) -> bool {
    let _serial = device.program_install.lock();
    let Some(program) = devices.with_lock(|| device.program.lock().take()) else {
        return false;
    };
    device.backend().program_delete(device, &program);
    debug_log!(
        "ProgramSlot",
        device = %device.name(),
        len = program.len(),
        "Program removed"
    );
    true
}
