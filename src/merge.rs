//! Document merging
//!
//! Applies a change-set onto a base document to produce the submission
//! payload: whole replacements first, then partial merges, then removals,
//! followed by the cleanup passes that strip comments, cross-server
//! identity attributes and BIOS settings the target cannot accept.

use crate::changeset::{ChangeSet, Node, RemoveTree};
use crate::compiler::BIOS_FQDD;
use crate::document::{Component, Document};
use crate::error::Result;
use crate::intent::Intent;
use crate::raid::RaidPlan;
use crate::transport::BiosRegistry;

/// Attribute-name families on the management controller component that must
/// not carry across servers (BMC identity, static addressing, flash
/// partition records).
const IDRAC_INVALID_FAMILIES: [&str; 5] = [
    "OS-BMC.",
    "IPBlocking.",
    "IPv4Static.",
    "IPv6Static.",
    "vFlashPartition.",
];

/// BIOS attributes that never show up in the capability enumeration and must
/// not be treated as absent.
const ENUMERATION_EXEMPT: [&str; 2] = ["BiosBootSeq", "HddSeq"];

const IDRAC_FQDD: &str = "iDRAC.Embedded.1";

/// Merge the change-set onto `base`, producing the document to submit.
///
/// `base` is the snapshot being patched (the target's own export, or the
/// reference export when cloning); `current` is always the target's live
/// export and is consulted for the suppression checks and the RAID plan.
/// The output is a new tree; neither input is mutated.
pub fn merge(
    base: &Document,
    current: &Document,
    changes: &ChangeSet,
    plan: &RaidPlan,
    intent: &Intent,
    registry: &mut dyn BiosRegistry,
) -> Result<Document> {
    let mut doc = base.clone();
    let mut changes = changes.clone();

    // NIC/FC components are fully regenerated from the change-set
    if !intent.boot_device.is_none_class() {
        doc.remove_components_where(|f| f.contains("NIC.") || f.contains("FC."));
    }

    doc.set_root_attr("ServiceTag", intent.service_tag.clone());

    suppress_redundant_boot_seq(&mut changes, current, intent);
    drop_missing_device_edits(&mut changes, current);

    changes.merge_from(plan.changes(
        intent.boot_device,
        intent.ensure,
        intent.clone_reference,
        current,
    ));

    // Whole nodes: replace if present, create if not
    for (fqdd, node) in &changes.whole {
        doc.remove_component(fqdd);
        doc.components.push(build_component(fqdd, node));
    }
    // Partial nodes: data edited/added within an existing (or new) subtree
    for (fqdd, node) in &changes.partial {
        apply_partial(doc.component_or_insert(fqdd), node);
    }
    for (fqdd, tree) in &changes.remove.attributes {
        apply_remove(&mut doc, fqdd, tree, RemoveKind::Attribute);
    }
    for (fqdd, tree) in &changes.remove.components {
        apply_remove(&mut doc, fqdd, tree, RemoveKind::Component);
    }

    // The device must never ingest its own diagnostic comments back
    doc.strip_shadows();
    remove_invalid_settings(&mut doc, registry)?;
    Ok(doc)
}

/// Setting `BiosBootSeq` to the value it already has makes the device error
/// the whole import, so a redundant edit is dropped. On teardown the edit
/// always applies: the hard disk is expected to already be gone from the
/// live sequence.
fn suppress_redundant_boot_seq(changes: &mut ChangeSet, current: &Document, intent: &Intent) {
    if intent.ensure.is_teardown() {
        return;
    }
    let existing = current
        .component(BIOS_FQDD)
        .and_then(|c| c.value("BiosBootSeq"))
        .map(ToString::to_string);
    let Some(existing) = existing else {
        return;
    };
    let Some(bios) = changes.partial.get_mut(BIOS_FQDD).and_then(Node::children_mut) else {
        return;
    };
    if let Some(Node::Set(declared)) = bios.get("BiosBootSeq") {
        if normalize_seq(declared) == normalize_seq(&existing) {
            log::debug!("BiosBootSeq already set to {existing}; suppressing the redundant edit.");
            bios.remove("BiosBootSeq");
        }
    }
}

fn normalize_seq(seq: &str) -> Vec<String> {
    seq.replace(' ', "")
        .split(',')
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Disabling a device the server does not have is a no-op the import would
/// still reject; drop those edits instead.
fn drop_missing_device_edits(changes: &mut ChangeSet, current: &Document) {
    let Some(bios) = changes.partial.get_mut(BIOS_FQDD).and_then(Node::children_mut) else {
        return;
    };
    for name in ["InternalSdCard", "IntegratedRaid"] {
        if current.contains_live_attribute(name) {
            continue;
        }
        if let Some(Node::Set(value)) = bios.get(name) {
            if matches!(value.as_str(), "Off" | "Disabled") {
                log::debug!(
                    "Trying to set {name} to {value}, but the relevant device does not exist on the server. The attribute will be ignored."
                );
                bios.remove(name);
            }
        }
    }
}

fn build_component(fqdd: &str, node: &Node) -> Component {
    let mut component = Component::new(fqdd);
    if let Some(children) = node.children() {
        for (name, child) in children {
            match child {
                Node::Set(value) => component.push_attribute(name, value.clone()),
                Node::List(values) => {
                    for value in values {
                        component.push_attribute(name, value.clone());
                    }
                }
                Node::Component(_) => component.children.push(build_component(name, child)),
            }
        }
    }
    component
}

fn apply_partial(component: &mut Component, node: &Node) {
    let Some(children) = node.children() else {
        return;
    };
    for (name, child) in children {
        match child {
            Node::Set(value) => component.set_attribute(name, value.clone()),
            Node::List(values) => {
                component.remove_attribute(name);
                for value in values {
                    component.push_attribute(name, value.clone());
                }
            }
            Node::Component(_) => {
                if component.child(name).is_none() {
                    component.children.push(Component::new(name.clone()));
                }
                if let Some(sub) = component.child_mut(name) {
                    apply_partial(sub, child);
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
enum RemoveKind {
    Attribute,
    Component,
}

/// Ensure the named nodes do not exist; removing an absent target is a
/// no-op. Attribute removals start under the named top-level component;
/// component removals name the top-level component itself when the tree is
/// a leaf.
fn apply_remove(doc: &mut Document, fqdd: &str, tree: &RemoveTree, kind: RemoveKind) {
    if tree.is_leaf() {
        if matches!(kind, RemoveKind::Component) {
            doc.remove_component(fqdd);
        }
        return;
    }
    if let Some(component) = doc.component_mut(fqdd) {
        for (sub_name, sub_tree) in &tree.0 {
            apply_remove_in(component, sub_name, sub_tree, kind);
        }
    }
}

fn apply_remove_in(component: &mut Component, name: &str, tree: &RemoveTree, kind: RemoveKind) {
    if tree.is_leaf() {
        match kind {
            RemoveKind::Attribute => {
                component.remove_attribute(name);
            }
            RemoveKind::Component => {
                component.remove_child(name);
            }
        }
        return;
    }
    if let Some(child) = component.child_mut(name) {
        for (sub_name, sub_tree) in &tree.0 {
            apply_remove_in(child, sub_name, sub_tree, kind);
        }
    }
}

/// Purge attributes that are only valid on the server they were exported
/// from, plus BIOS settings the target's capability enumeration does not
/// confirm.
fn remove_invalid_settings(doc: &mut Document, registry: &mut dyn BiosRegistry) -> Result<()> {
    if let Some(idrac) = doc.component_mut(IDRAC_FQDD) {
        idrac.attributes.retain(|a| {
            !IDRAC_INVALID_FAMILIES
                .iter()
                .any(|family| a.name.contains(family))
        });
    }
    if let Some(bios) = doc.component_mut(BIOS_FQDD) {
        // HddSeq causes trouble when carried over; only one disk type is on
        bios.remove_attribute("HddSeq");
        let names: Vec<String> = bios.attributes.iter().map(|a| a.name.clone()).collect();
        for name in names {
            if ENUMERATION_EXEMPT.contains(&name.as_str()) {
                continue;
            }
            if !registry.contains(&name)? {
                log::info!(
                    "Trying to set bios setting {name}, but it does not exist on target server. The attribute will not be set."
                );
                bios.remove_attribute(&name);
            }
        }
    }
    Ok(())
}
