//! Bridge-facing API.
//!
//! Port add/delete, port listing, feature queries and program loading,
//! as called by the bridge-management layer. Device create/destroy and
//! polling live on [`LifecycleManager`] itself.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::device::{Device, SwitchFeatures};
use crate::error::{P4rtError, Result};
use crate::lifecycle::LifecycleManager;
use crate::netdev::NetDev;
use crate::port::{self, PortInfo, ReconcileOutcome};
use crate::program;
use crate::{audit_log, debug_log, info_log, warn_log, warn_rl};
use p4rt_types::PortNo;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Path that selects standard input as the program source.
pub const STDIN_PATH: &str = "-";

fn ensure_live(device: &Device) -> Result<()> {
    if device.is_live() {
        Ok(())
    } else {
        Err(P4rtError::invalid_state(
            device.name(),
            format!("device is {}", device.state()),
        ))
    }
}

fn port_audit(action: &str, device: &Device, name: &str) -> AuditRecord {
    AuditRecord::new(AuditCategory::ResourceModify, "Bridge", action)
        .with_object_id(format!("{}:{}", device.name(), name))
        .with_object_type("port")
}

/// Opens the program source at `path`, or stdin for `-`.
fn open_program(path: &Path) -> Result<Box<dyn Read>> {
    if path == Path::new(STDIN_PATH) {
        return Ok(Box::new(io::stdin()));
    }

    let file = File::open(path).map_err(|e| {
        debug_log!("Bridge", path = %path.display(), error = %e, "Cannot open program");
        P4rtError::NotFound {
            path: path.display().to_string(),
        }
    })?;
    Ok(Box::new(file))
}

/// Reads a whole program image from `source`.
fn read_program_from(mut source: impl Read) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    source.read_to_end(&mut data)?;
    Ok(data)
}

impl LifecycleManager {
    /// Attaches `netdev` to `device` and brings the port table in line.
    ///
    /// Returns the number the port ended up with. A network device that
    /// will not open leaves the port ignored rather than failing the add;
    /// any other failure to track the port is returned.
    pub fn port_add(
        &self,
        device: &Device,
        netdev: &dyn NetDev,
        port_no: Option<PortNo>,
    ) -> Result<Option<PortNo>> {
        ensure_live(device)?;
        let name = netdev.name().to_string();

        if let Err(e) = device.backend().port_add(device, netdev, port_no) {
            warn_log!(
                "Bridge",
                device = %device.name(),
                port = %name,
                error = %e,
                "Backend refused port"
            );
            audit_log!(port_audit("port_add", device, &name)
                .with_outcome(AuditOutcome::Failure)
                .with_error(e.to_string()));
            return Err(e);
        }

        if let Err(e) = port::reconcile(device, &name, self.netdevs().as_ref(), self.limiter()) {
            warn_rl!(
                self.limiter(),
                "Bridge",
                device = %device.name(),
                port = %name,
                error = %e,
                "Port not tracked after add"
            );
            audit_log!(port_audit("port_add", device, &name)
                .with_outcome(AuditOutcome::Failure)
                .with_error(e.to_string()));
            return Err(e);
        }

        let assigned = match device.backend().port_query_by_name(device, &name) {
            Ok(spec) => spec
                .port_no
                .or_else(|| device.ports.lock().find_by_name(&name)),
            Err(_) => None,
        };

        self.stats_mut().ports_added += 1;
        info_log!(
            "Bridge",
            device = %device.name(),
            port = %name,
            port_no = ?assigned,
            "Added port"
        );
        audit_log!(port_audit("port_add", device, &name)
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "port_no": assigned.map(|p| p.as_u16()),
            })));
        Ok(assigned)
    }

    /// Detaches the port wrapping network device `name`.
    pub fn port_del(&self, device: &Device, name: &str) -> Result<()> {
        ensure_live(device)?;
        let port_no = device
            .ports
            .lock()
            .find_by_name(name)
            .ok_or_else(|| P4rtError::no_such_port(device.name(), name))?;

        if let Err(e) = device.backend().port_del(device, port_no) {
            warn_log!(
                "Bridge",
                device = %device.name(),
                port = name,
                error = %e,
                "Backend failed to delete port"
            );
            audit_log!(port_audit("port_del", device, name)
                .with_outcome(AuditOutcome::Failure)
                .with_error(e.to_string()));
            return Err(e);
        }

        let name = name.to_string();
        match port::reconcile(device, &name, self.netdevs().as_ref(), self.limiter()) {
            Ok(ReconcileOutcome::Absent) => {
                port::remove_by_name(device, &name);
            }
            Ok(_) => {}
            Err(e) => {
                warn_rl!(
                    self.limiter(),
                    "Bridge",
                    device = %device.name(),
                    port = %name,
                    error = %e,
                    "Port update after delete failed"
                );
            }
        }

        self.stats_mut().ports_deleted += 1;
        info_log!(
            "Bridge",
            device = %device.name(),
            port = %name,
            port_no = %port_no,
            "Deleted port"
        );
        audit_log!(port_audit("port_del", device, &name).with_outcome(AuditOutcome::Success));
        Ok(())
    }

    /// Names of the network devices in `device`'s port table.
    pub fn get_ports(&self, device: &Device) -> BTreeSet<String> {
        device.port_names()
    }

    pub fn get_port(&self, device: &Device, port_no: PortNo) -> Result<PortInfo> {
        device
            .port(port_no)
            .ok_or_else(|| P4rtError::no_such_port_no(device.name(), port_no))
    }

    /// Port and table counts of the device named `name`.
    pub fn query_switch_features(&self, name: &str) -> Result<SwitchFeatures> {
        self.lookup(name)
            .map(|device| device.features())
            .ok_or_else(|| P4rtError::no_such_device(name))
    }

    /// Loads the program at `path` unless one is already installed.
    ///
    /// A path of `-` reads standard input.
    pub fn initialize_datapath(&self, device: &Device, path: &Path) -> Result<()> {
        if device.has_program() {
            debug_log!(
                "Bridge",
                device = %device.name(),
                "Datapath already initialized"
            );
            return Ok(());
        }

        let data = open_program(path).and_then(read_program_from).map_err(|e| {
            warn_rl!(
                self.limiter(),
                "Bridge",
                device = %device.name(),
                path = %path.display(),
                error = %e,
                "Failed to read program"
            );
            e
        })?;
        self.install_program(device, data)
    }

    /// Installs `data` as `device`'s program, replacing any previous one.
    pub fn install_program(&self, device: &Device, data: Vec<u8>) -> Result<()> {
        let len = data.len();
        let record = AuditRecord::new(AuditCategory::ResourceModify, "Bridge", "install_program")
            .with_object_id(device.name())
            .with_object_type("program")
            .with_details(serde_json::json!({ "len": len }));

        match program::install(self.devices(), device, data) {
            Ok(()) => {
                self.stats_mut().programs_installed += 1;
                audit_log!(record.with_outcome(AuditOutcome::Success));
                Ok(())
            }
            Err(e) => {
                warn_rl!(
                    self.limiter(),
                    "Bridge",
                    device = %device.name(),
                    len = len,
                    error = %e,
                    "Failed to initialize P4 datapath"
                );
                audit_log!(record
                    .with_outcome(AuditOutcome::Failure)
                    .with_error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Removes `device`'s program, if any. Always succeeds.
    pub fn prog_del(&self, device: &Device) -> Result<()> {
        if program::remove(self.devices(), device) {
            audit_log!(AuditRecord::new(
                AuditCategory::ResourceDelete,
                "Bridge",
                "remove_program"
            )
            .with_outcome(AuditOutcome::Success)
            .with_object_id(device.name())
            .with_object_type("program"));
        }
        Ok(())
    }
}
