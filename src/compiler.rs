//! Change-set compilation
//!
//! Turns declared intent into the normalized change-set: baseline BIOS and
//! lifecycle-controller settings, boot-device defaults, per-attribute BIOS
//! overrides, the NIC partition plan and the boot-from-SAN block. RAID
//! changes are merged later by the document merger, after the sync check has
//! been consulted, so that an already-satisfied layout is not recomputed.

use crate::changeset::{ChangeSet, Node};
use crate::document::{Component, Document};
use crate::intent::{BootDevice, Intent, NOT_APPLICABLE};
use crate::nic::NicPlanner;

/// The BIOS settings block.
pub const BIOS_FQDD: &str = "BIOS.Setup.1-1";

/// The lifecycle controller component.
pub const LC_FQDD: &str = "LifecycleController.Embedded.1";

/// Compile the declared intent into a change-set against the exported
/// document. The result carries everything except the RAID plan.
pub fn compile(intent: &Intent, exported: &Document) -> ChangeSet {
    let mut changes = default_changes(intent);

    let planner = NicPlanner::new(&intent.network, intent.boot_device, intent.ensure);
    changes.merge_from(planner.changes(exported));

    if intent.boot_device.is_san() {
        changes.merge_from(planner.san_changes(intent.san_boot.as_ref()));
        if !intent.ensure.is_teardown() {
            // Boot from SAN: local boot paths must be out of the way
            log::debug!("configuring the boot-from-SAN boot device");
            changes.set_partial(BIOS_FQDD, "InternalSdCard", "Off");
            changes.set_partial(BIOS_FQDD, "IntegratedRaid", "Disabled");
        }
    }
    changes
}

fn default_changes(intent: &Intent) -> ChangeSet {
    let mut changes = ChangeSet::new();

    // Baseline for every configuration
    changes.set_partial(BIOS_FQDD, "ProcVirtualization", "Enabled");
    changes.set_partial(BIOS_FQDD, "BootMode", "Bios");
    changes.set_whole(
        LC_FQDD,
        "LCAttributes.1#CollectSystemInventoryOnRestart",
        "Enabled",
    );

    // Boot-device defaults. RAID stays enabled on teardown so the controller
    // can still be inventoried afterwards.
    if intent.ensure.is_teardown() {
        changes.set_partial(BIOS_FQDD, "IntegratedRaid", "Enabled");
    } else {
        match intent.boot_device {
            BootDevice::Hd => {
                changes.set_partial(BIOS_FQDD, "IntegratedRaid", "Enabled");
                changes.set_partial(BIOS_FQDD, "InternalSdCard", "Off");
            }
            BootDevice::Sd => {
                changes.set_partial(BIOS_FQDD, "IntegratedRaid", "Disabled");
                changes.set_partial(BIOS_FQDD, "InternalSdCard", "On");
            }
            device if device.is_none_class() => {
                changes.remove_attribute(BIOS_FQDD, "BiosBootSeq");
            }
            _ => {}
        }
    }

    // Per-attribute overrides from intent
    for (name, value) in &intent.bios_settings {
        if value.is_empty() {
            continue;
        }
        if value == NOT_APPLICABLE {
            changes.remove_attribute(BIOS_FQDD, name);
        } else {
            changes.set_partial(BIOS_FQDD, name, value.clone());
        }
    }
    changes
}

const PRESET_NIC_ATTRS: [&str; 3] = ["VirtualizationMode", "NicPartitioning", "LegacyBootProto"];

/// Build the minimal preparatory document imported before the main
/// submission. Ordering bugs in the device's import make some attributes
/// (IntegratedRaid, InternalSdCard, NPAR mode) invalid targets until a prior
/// import has switched them, so those are submitted on their own first.
/// Returns `None` when nothing needs presetting.
pub fn preset(changes: &ChangeSet, exported: &Document) -> Option<Document> {
    let additions = changes.combined_edits();
    let mut doc = Document::default();

    if let Some(children) = additions.get(BIOS_FQDD).and_then(Node::children) {
        let device_bios = exported.component(BIOS_FQDD);
        let mut bios = Component::new(BIOS_FQDD);
        for name in ["IntegratedRaid", "InternalSdCard"] {
            let on_device = device_bios.is_some_and(|c| c.has_live_attribute(name));
            if let (true, Some(Node::Set(value))) = (on_device, children.get(name)) {
                bios.set_attribute(name, value.clone());
            }
        }
        if !bios.attributes.is_empty() {
            doc.components.push(bios);
        }
    }

    for (fqdd, node) in &additions {
        if !fqdd.contains("NIC.") {
            continue;
        }
        let Some(children) = node.children() else {
            continue;
        };
        let mut nic = Component::new(fqdd.clone());
        for name in PRESET_NIC_ATTRS {
            if let Some(Node::Set(value)) = children.get(name) {
                nic.set_attribute(name, value.clone());
            }
        }
        if !nic.attributes.is_empty() {
            doc.components.push(nic);
        }
    }

    if doc.components.is_empty() {
        None
    } else {
        Some(doc)
    }
}
