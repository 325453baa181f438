//! Collaborator contracts
//!
//! The engine never talks to a device directly; it drives these traits.
//! Implementations (WS-Management, racadm over SSH, recorded fixtures) live
//! with the consumer.

use crate::error::Result;
use crate::raid::DiskType;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Address and credentials of one management controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub user: String,
    pub password: String,
}

/// Identifier of an asynchronous job on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Management-protocol operations against one device.
///
/// Export and import block until the device job finishes. A rejected import
/// surfaces as [`crate::Error::ConfigRejected`]; an invocation that never
/// produced a job id surfaces as [`crate::Error::JobNotCreated`]; everything
/// else network-shaped is [`crate::Error::Transport`].
pub trait ManagementClient {
    /// Remote-service readiness code; `0` means the controller is idle and
    /// accepting requests.
    fn controller_status(&mut self) -> Result<i32>;

    /// Export the full system configuration to `path`.
    fn export_config(&mut self, path: &Path) -> Result<()>;

    /// Import the configuration document stored at `path`.
    fn import_config(&mut self, path: &Path) -> Result<JobId>;

    /// Physical-disk inventory: disk FQDD to media type.
    fn physical_disks(&mut self) -> Result<BTreeMap<String, DiskType>>;

    /// Whether every virtual disk has finished initializing.
    fn virtual_disks_ready(&mut self) -> Result<bool>;

    /// Ids of jobs currently running or scheduled on the device.
    fn running_jobs(&mut self) -> Result<Vec<String>>;

    /// Ask the device to delete every job in its queue.
    fn clear_job_queue(&mut self) -> Result<()>;

    fn job_queue_len(&mut self) -> Result<u32>;

    /// Names of the BIOS attributes this device accepts.
    fn bios_capabilities(&mut self) -> Result<BTreeSet<String>>;

    fn reboot(&mut self) -> Result<()>;
}

/// Hard reset of the management controller itself.
///
/// Implementations note: the device's reset command is known to print
/// "could not change directory to home" on stderr while succeeding; that
/// output must not be treated as a failure.
pub trait DeviceReset {
    fn reset(&mut self) -> Result<()>;
}

/// Lookup of whether the target device accepts a BIOS attribute name.
pub trait BiosRegistry {
    fn contains(&mut self, name: &str) -> Result<bool>;
}

impl BiosRegistry for BTreeSet<String> {
    fn contains(&mut self, name: &str) -> Result<bool> {
        Ok(BTreeSet::contains(self, name))
    }
}

/// [`BiosRegistry`] over a live client; the enumeration is fetched once on
/// first lookup and cached for the rest of the cycle.
pub struct ClientBiosRegistry<'a, C: ManagementClient + ?Sized> {
    client: &'a mut C,
    cache: Option<BTreeSet<String>>,
}

impl<'a, C: ManagementClient + ?Sized> ClientBiosRegistry<'a, C> {
    pub fn new(client: &'a mut C) -> Self {
        Self {
            client,
            cache: None,
        }
    }
}

impl<C: ManagementClient + ?Sized> BiosRegistry for ClientBiosRegistry<'_, C> {
    fn contains(&mut self, name: &str) -> Result<bool> {
        if self.cache.is_none() {
            self.cache = Some(self.client.bios_capabilities()?);
        }
        Ok(self
            .cache
            .as_ref()
            .is_some_and(|caps| caps.contains(name)))
    }
}
