//! Sync verdict
//!
//! Walks a change-set against an exported document and decides whether the
//! device already satisfies the declared configuration. Evaluation stops at
//! the first mismatch, but every verdict-flipping finding is logged so the
//! offending attribute can be diagnosed without re-running.

use crate::changeset::{ChangeSet, Node, RemoveTree};
use crate::compiler::BIOS_FQDD;
use crate::document::{Component, Document};
use crate::error::{Error, Result};
use crate::intent::{EnsureState, Intent};
use crate::raid::RaidPlan;

/// Attributes whose enabling values must be backed by an actual device;
/// asking to turn on hardware the server does not have is a hard failure,
/// not an out-of-sync verdict.
const IMPORTANT_DEVICE_ATTRS: [&str; 1] = ["InternalSdCard"];

#[derive(Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Attribute,
    Component,
}

/// Check whether the exported document already satisfies the change-set and
/// the RAID plan.
///
/// Fails with [`Error::CapabilityMismatch`] when the intent enables a device
/// attribute the server does not expose at all.
pub fn in_sync(
    changes: &ChangeSet,
    plan: &RaidPlan,
    exported: &Document,
    intent: &Intent,
) -> Result<bool> {
    let edits = changes.combined_edits();
    check_important_attrs(&edits, exported)?;

    for (fqdd, node) in &edits {
        if !component_in_sync(exported.find_component(fqdd), fqdd, node, intent.ensure) {
            return Ok(false);
        }
    }
    for (fqdd, tree) in &changes.remove.attributes {
        if !remove_satisfied(exported, None, fqdd, tree, NodeKind::Attribute) {
            return Ok(false);
        }
    }
    for (fqdd, tree) in &changes.remove.components {
        if !remove_satisfied(exported, None, fqdd, tree, NodeKind::Component) {
            return Ok(false);
        }
    }
    Ok(plan.in_sync(exported, intent.boot_device, intent.ensure))
}

fn check_important_attrs(
    edits: &std::collections::BTreeMap<String, Node>,
    exported: &Document,
) -> Result<()> {
    let Some(bios_edits) = edits.get(BIOS_FQDD).and_then(Node::children) else {
        return Ok(());
    };
    let device_bios = exported.component(BIOS_FQDD);
    for name in IMPORTANT_DEVICE_ATTRS {
        let Some(Node::Set(value)) = bios_edits.get(name) else {
            continue;
        };
        let on_device = device_bios.is_some_and(|c| c.has_live_attribute(name));
        if !on_device && matches!(value.as_str(), "On" | "Enabled") {
            return Err(Error::CapabilityMismatch {
                attribute: name.to_string(),
                value: value.clone(),
            });
        }
    }
    Ok(())
}

fn component_in_sync(
    component: Option<&Component>,
    path: &str,
    node: &Node,
    ensure: EnsureState,
) -> bool {
    let Some(children) = node.children() else {
        return true;
    };
    let Some(component) = component else {
        log::debug!("Component {path} is missing from the exported config. Will need to import new configuration.");
        return false;
    };
    for (name, child) in children {
        match child {
            Node::Set(value) => {
                let Some(existing) = component.value(name) else {
                    log::debug!(
                        "Could not find a value for {name} under {path}. Will need to import new configuration."
                    );
                    return false;
                };
                if existing == value {
                    continue;
                }
                if name == "BiosBootSeq" {
                    if !boot_seq_in_sync(value, existing, ensure) {
                        log::debug!(
                            "Value of BiosBootSeq does not match up. Existing Seq: {existing}, trying to set to {value}"
                        );
                        return false;
                    }
                } else {
                    log::debug!(
                        "Need to set {name}={value} under {path}. Server's config has this set to {name}={existing}."
                    );
                    return false;
                }
            }
            Node::List(values) => {
                let mut existing: Vec<&str> = component.values_of(name);
                existing.sort_unstable();
                let mut wanted: Vec<&str> = values.iter().map(String::as_str).collect();
                wanted.sort_unstable();
                if existing != wanted {
                    log::debug!(
                        "Need {name} under {path} to be {wanted:?}, but the server has {existing:?}."
                    );
                    return false;
                }
            }
            Node::Component(_) => {
                let sub_path = format!("{path}/{name}");
                if !component_in_sync(component.child(name), &sub_path, child, ensure) {
                    return false;
                }
            }
        }
    }
    true
}

/// Boot sequences compare as whitespace-normalized token lists. A pure
/// reordering still boots the same set of devices and counts as in sync,
/// except on teardown where the sequence must be rewritten exactly.
fn boot_seq_in_sync(wanted: &str, existing: &str, ensure: EnsureState) -> bool {
    let wanted_tokens = seq_tokens(wanted);
    let existing_tokens = seq_tokens(existing);
    if wanted_tokens == existing_tokens {
        return true;
    }
    let mut wanted_sorted = wanted_tokens;
    let mut existing_sorted = existing_tokens;
    wanted_sorted.sort_unstable();
    existing_sorted.sort_unstable();
    wanted_sorted == existing_sorted && !ensure.is_teardown()
}

fn seq_tokens(seq: &str) -> Vec<String> {
    seq.replace(' ', "")
        .split(',')
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn remove_satisfied(
    doc: &Document,
    parent: Option<&Component>,
    name: &str,
    tree: &RemoveTree,
    kind: NodeKind,
) -> bool {
    if tree.is_leaf() {
        let present = match kind {
            NodeKind::Attribute => parent.is_some_and(|c| c.has_live_attribute(name)),
            NodeKind::Component => match parent {
                Some(c) => c.child(name).is_some(),
                None => doc.component(name).is_some(),
            },
        };
        if present {
            let what = match kind {
                NodeKind::Attribute => "Attribute",
                NodeKind::Component => "Component",
            };
            log::debug!(
                "{what} {name} exists in the exported config. Need to import to ensure it is removed from configuration."
            );
        }
        return !present;
    }
    let next = match parent {
        Some(c) => c.child(name),
        None => doc.component(name),
    };
    match next {
        // Nothing to descend into: the targets are already gone
        None => true,
        Some(component) => tree
            .0
            .iter()
            .all(|(child, sub)| remove_satisfied(doc, Some(component), child, sub, kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::BootDevice;

    fn intent_hd() -> Intent {
        Intent::new("ABC1234", BootDevice::Hd)
    }

    fn doc(xml: &str) -> Document {
        Document::parse(xml).unwrap()
    }

    const SYNCED: &str = r#"<SystemConfiguration ServiceTag="ABC1234">
  <Component FQDD="BIOS.Setup.1-1">
    <Attribute Name="ProcVirtualization">Enabled</Attribute>
    <Attribute Name="BootMode">Bios</Attribute>
    <Attribute Name="IntegratedRaid">Enabled</Attribute>
    <Attribute Name="InternalSdCard">Off</Attribute>
  </Component>
</SystemConfiguration>"#;

    #[test]
    fn satisfied_edits_are_in_sync() {
        let mut changes = ChangeSet::new();
        changes.set_partial(BIOS_FQDD, "ProcVirtualization", "Enabled");
        changes.set_partial(BIOS_FQDD, "BootMode", "Bios");
        let verdict = in_sync(&changes, &RaidPlan::default(), &doc(SYNCED), &intent_hd());
        assert!(verdict.unwrap());
    }

    #[test]
    fn differing_value_is_out_of_sync() {
        let mut changes = ChangeSet::new();
        changes.set_partial(BIOS_FQDD, "InternalSdCard", "On");
        // InternalSdCard exists on the device, so this is a plain mismatch
        let verdict = in_sync(&changes, &RaidPlan::default(), &doc(SYNCED), &intent_hd());
        assert!(!verdict.unwrap());
    }

    #[test]
    fn missing_attribute_is_out_of_sync() {
        let mut changes = ChangeSet::new();
        changes.set_partial(BIOS_FQDD, "LogicalProc", "Enabled");
        let verdict = in_sync(&changes, &RaidPlan::default(), &doc(SYNCED), &intent_hd());
        assert!(!verdict.unwrap());
    }

    #[test]
    fn shadow_value_satisfies_edit() {
        let xml = r#"<SystemConfiguration>
  <Component FQDD="BIOS.Setup.1-1">
    <Attribute Name="InternalSdCard">Off</Attribute>
    <!-- <Attribute Name="BiosBootSeq">HardDisk.List.1-1</Attribute> -->
  </Component>
</SystemConfiguration>"#;
        let mut changes = ChangeSet::new();
        changes.set_partial(BIOS_FQDD, "BiosBootSeq", "HardDisk.List.1-1");
        let verdict = in_sync(&changes, &RaidPlan::default(), &doc(xml), &intent_hd());
        assert!(verdict.unwrap());
    }

    #[test]
    fn capability_mismatch_is_an_error_not_a_verdict() {
        let no_sd = r#"<SystemConfiguration>
  <Component FQDD="BIOS.Setup.1-1">
    <Attribute Name="IntegratedRaid">Enabled</Attribute>
  </Component>
</SystemConfiguration>"#;
        let mut changes = ChangeSet::new();
        changes.set_partial(BIOS_FQDD, "InternalSdCard", "On");
        let err = in_sync(&changes, &RaidPlan::default(), &doc(no_sd), &intent_hd()).unwrap_err();
        match err {
            Error::CapabilityMismatch { attribute, value } => {
                assert_eq!(attribute, "InternalSdCard");
                assert_eq!(value, "On");
            }
            other => panic!("expected CapabilityMismatch, got {other}"),
        }
    }

    #[test]
    fn disabling_a_missing_device_is_not_a_capability_error() {
        let no_sd = r#"<SystemConfiguration>
  <Component FQDD="BIOS.Setup.1-1">
    <Attribute Name="IntegratedRaid">Enabled</Attribute>
  </Component>
</SystemConfiguration>"#;
        let mut changes = ChangeSet::new();
        changes.set_partial(BIOS_FQDD, "InternalSdCard", "Off");
        // Out of sync (no value on device), but not an error
        let verdict = in_sync(&changes, &RaidPlan::default(), &doc(no_sd), &intent_hd());
        assert!(!verdict.unwrap());
    }

    #[test]
    fn boot_seq_reorder_is_in_sync_unless_teardown() {
        let xml = r#"<SystemConfiguration>
  <Component FQDD="BIOS.Setup.1-1">
    <Attribute Name="BiosBootSeq"> NIC.Integrated.1-1-1 , HardDisk.List.1-1</Attribute>
  </Component>
</SystemConfiguration>"#;
        let mut changes = ChangeSet::new();
        changes.set_partial(BIOS_FQDD, "BiosBootSeq", "HardDisk.List.1-1,NIC.Integrated.1-1-1");
        let mut intent = intent_hd();
        let verdict = in_sync(&changes, &RaidPlan::default(), &doc(xml), &intent);
        assert!(verdict.unwrap());

        intent.ensure = EnsureState::Teardown;
        let verdict = in_sync(&changes, &RaidPlan::default(), &doc(xml), &intent);
        assert!(!verdict.unwrap());
    }

    #[test]
    fn boot_seq_whitespace_is_ignored() {
        let xml = r#"<SystemConfiguration>
  <Component FQDD="BIOS.Setup.1-1">
    <Attribute Name="BiosBootSeq"> A , B ,C</Attribute>
  </Component>
</SystemConfiguration>"#;
        let mut changes = ChangeSet::new();
        changes.set_partial(BIOS_FQDD, "BiosBootSeq", "A,B,C");
        let verdict = in_sync(&changes, &RaidPlan::default(), &doc(xml), &intent_hd());
        assert!(verdict.unwrap());
    }

    #[test]
    fn pending_removal_of_present_node_is_out_of_sync() {
        let mut changes = ChangeSet::new();
        changes.remove_attribute(BIOS_FQDD, "InternalSdCard");
        let verdict = in_sync(&changes, &RaidPlan::default(), &doc(SYNCED), &intent_hd());
        assert!(!verdict.unwrap());
    }

    #[test]
    fn pending_removal_of_absent_node_is_satisfied() {
        let mut changes = ChangeSet::new();
        changes.remove_attribute(BIOS_FQDD, "NoSuchAttr");
        changes.remove_component("NIC.Integrated.1-9-9");
        let verdict = in_sync(&changes, &RaidPlan::default(), &doc(SYNCED), &intent_hd());
        assert!(verdict.unwrap());
    }

    #[test]
    fn removal_targets_only_live_nodes() {
        let xml = r#"<SystemConfiguration>
  <Component FQDD="BIOS.Setup.1-1">
    <!-- <Attribute Name="BiosBootSeq">HardDisk.List.1-1</Attribute> -->
  </Component>
</SystemConfiguration>"#;
        let mut changes = ChangeSet::new();
        changes.remove_attribute(BIOS_FQDD, "BiosBootSeq");
        // only a shadow exists; nothing live to remove
        let verdict = in_sync(&changes, &RaidPlan::default(), &doc(xml), &intent_hd());
        assert!(verdict.unwrap());
    }
}
