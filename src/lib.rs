//! # idracfg
//!
//! Declarative configuration reconciliation for Dell iDRAC-class management
//! controllers.
//!
//! The engine works against the device's `SystemConfiguration` XML profile:
//! it exports the current configuration, compiles declared intent into a
//! normalized change-set, decides whether the device already satisfies it,
//! and if not merges the changes onto a snapshot and submits the result,
//! recovering once from a rejected import with a controller reset.
//!
//! ## Core Concepts
//!
//! - **Document**: the parsed `SystemConfiguration` tree, with the device's
//!   comment-encoded attributes surfaced as shadow values
//! - **ChangeSet**: whole replacements, partial merges and removals keyed by
//!   component FQDD
//! - **Intent**: the declared state handed over by the resource framework
//!   (boot device, BIOS overrides, RAID layout, network topology)
//! - **Reconciler**: the control loop tying export, diff, merge, import and
//!   recovery together
//!
//! ## Provider Traits
//!
//! Device access is injected through traits so the engine carries no
//! transport dependency:
//!
//! - [`ManagementClient`]: export/import, job queue and inventory queries
//! - [`DeviceReset`]: hard reset of the management controller
//! - [`BiosRegistry`]: capability lookups for BIOS attribute names
//! - [`Clock`]: sleep source for the bounded waits
//!
//! Tests drive the [`Reconciler`] end-to-end with fakes of these traits.

pub mod changeset;
pub mod compiler;
pub mod controller;
pub mod document;
pub mod error;
pub mod intent;
pub mod merge;
pub mod nic;
pub mod poll;
pub mod raid;
pub mod store;
pub mod sync;
pub mod transport;

// Re-export main types at crate root
pub use changeset::{ChangeSet, Node, Removals, RemoveTree};
pub use compiler::{compile, preset, BIOS_FQDD, LC_FQDD};
pub use controller::{Budgets, Outcome, Reconciler, Wait};
pub use document::{Attribute, Component, Document};
pub use error::{Error, Result};
pub use intent::{
    BootDevice, Card, EnsureState, Intent, Interface, NetworkKind, NetworkObject,
    NetworkTopology, Partition, RaidIntent, RaidLevel, SanBoot, StaticNetwork,
    VirtualDiskSpec,
};
pub use merge::merge;
pub use nic::NicPlanner;
pub use poll::{poll_until, Clock, PollOutcome, SystemClock};
pub use raid::{span_for, ControllerPlan, DiskType, RaidPlan, VirtualDisk};
pub use store::{ConfigStore, Postfix};
pub use sync::in_sync;
pub use transport::{
    BiosRegistry, ClientBiosRegistry, DeviceReset, Endpoint, JobId, ManagementClient,
};
