//! RAID layout planning
//!
//! Computes the virtual-disk and hot-spare change-set from the declared RAID
//! intent plus the physical-disk-type inventory, and answers whether the
//! controller already carries the requested layout.

use crate::changeset::{ChangeSet, Node};
use crate::document::Document;
use crate::intent::{BootDevice, EnsureState, RaidIntent, RaidLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Media type of a physical disk, from the device's disk-view enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    Hdd,
    Ssd,
}

/// One virtual disk to create on a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDisk {
    pub disks: Vec<String>,
    pub level: RaidLevel,
    /// Type of the first member disk; `None` when the disk is not in the
    /// inventory.
    pub disk_type: Option<DiskType>,
}

/// Requested layout for one controller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControllerPlan {
    pub virtual_disks: Vec<VirtualDisk>,
    pub hotspares: Vec<String>,
}

/// Per-controller RAID plan derived from intent plus inventory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RaidPlan {
    pub controllers: BTreeMap<String, ControllerPlan>,
}

/// Span geometry for a RAID level over `disk_count` member disks.
/// Nested levels split into fixed-length spans; everything else is a single
/// span across all members.
pub fn span_for(level: RaidLevel, disk_count: usize) -> (usize, usize) {
    match level {
        RaidLevel::Raid10 => (2, disk_count / 2),
        RaidLevel::Raid50 => (3, disk_count / 3),
        RaidLevel::Raid60 => (4, disk_count / 4),
        _ => (disk_count, 1),
    }
}

impl RaidPlan {
    /// Group the declared virtual disks by controller and attach hot-spares.
    ///
    /// A hot-spare type with no virtual disk of that type anywhere in the
    /// plan has nothing to spare for; those spares are dropped with a
    /// warning rather than treated as an error.
    pub fn build(intent: &RaidIntent, inventory: &BTreeMap<String, DiskType>) -> RaidPlan {
        let mut plan = RaidPlan::default();
        for spec in &intent.virtual_disks {
            let disk_type = spec.disks.first().and_then(|d| inventory.get(d)).copied();
            plan.controllers
                .entry(spec.controller.clone())
                .or_default()
                .virtual_disks
                .push(VirtualDisk {
                    disks: spec.disks.clone(),
                    level: spec.level,
                    disk_type,
                });
        }
        let spares = [
            (DiskType::Hdd, &intent.hdd_hotspares),
            (DiskType::Ssd, &intent.ssd_hotspares),
        ];
        for (disk_type, disks) in spares {
            if disks.is_empty() {
                continue;
            }
            let has_type = plan
                .controllers
                .values()
                .flat_map(|c| &c.virtual_disks)
                .any(|vd| vd.disk_type == Some(disk_type));
            if !has_type {
                log::warn!(
                    "Trying to assign {disk_type:?} hotspares, but no {disk_type:?} virtual disks are being created. Ignoring them."
                );
                continue;
            }
            for disk in disks {
                // The controller FQDD is the trailing segment of the disk FQDD
                if let Some(controller) = disk.rsplit(':').next() {
                    plan.controllers
                        .entry(controller.to_string())
                        .or_default()
                        .hotspares
                        .push(disk.clone());
                }
            }
        }
        plan
    }

    /// Compute the RAID portion of the change-set.
    pub fn changes(
        &self,
        boot_device: BootDevice,
        ensure: EnsureState,
        clone_reference: bool,
        exported: &Document,
    ) -> ChangeSet {
        let mut changes = ChangeSet::new();
        if !clone_reference && ensure.is_teardown() {
            log::debug!("Setting RAID configuration to be cleared as part of teardown.");
            for controller in self.controllers.keys() {
                changes.set_whole(controller, "RAIDresetConfig", "True");
            }
            return changes;
        }
        if boot_device.wants_raid() {
            if !self.in_sync(exported, boot_device, ensure) {
                for (controller, plan) in &self.controllers {
                    changes
                        .whole
                        .insert(controller.clone(), build_controller_node(controller, plan));
                }
            }
        } else {
            // No RAID wanted on this boot device: clear out whatever the
            // device currently exposes.
            for fqdd in exported.component_fqdds_where(|f| f.contains("RAID.")) {
                changes.remove_component(&fqdd);
            }
        }
        changes
    }

    /// Whether the exported document already carries the requested layout.
    ///
    /// Only meaningful for the boot device classes that keep a RAID layout;
    /// teardown always reports out of sync, since the existing layout must
    /// be cleared.
    pub fn in_sync(
        &self,
        exported: &Document,
        boot_device: BootDevice,
        ensure: EnsureState,
    ) -> bool {
        if boot_device.wants_raid() {
            for (controller, plan) in &self.controllers {
                let existing: Vec<_> = exported
                    .component(controller)
                    .map(|c| {
                        c.children
                            .iter()
                            .filter(|child| child.fqdd.starts_with("Disk."))
                            .collect()
                    })
                    .unwrap_or_default();
                if existing.is_empty() || existing.len() != plan.virtual_disks.len() {
                    log::debug!(
                        "RAID config needs to be updated. Existing virtual disks don't match up to requested configuration for {controller}"
                    );
                    return false;
                }
                for disk in existing {
                    let disk_name = disk.fqdd.split(':').next().unwrap_or(&disk.fqdd);
                    let disk_num: usize = disk_name
                        .rsplit('.')
                        .next()
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(usize::MAX);
                    let Some(requested) = plan.virtual_disks.get(disk_num) else {
                        log::debug!(
                            "RAID config needs to be updated. Extra disk(s) found on the server's current RAID configuration."
                        );
                        return false;
                    };
                    // RAIDTypes is sometimes commented out; the shadow value
                    // stands in for it.
                    let level = disk
                        .value("RAIDTypes")
                        .map(|v| v.replace(' ', "").to_lowercase());
                    if level.as_deref() != Some(&requested.level.normalized()) {
                        log::debug!(
                            "RAID config needs to be updated. Needed {disk_name}'s raid level to be {}, but got {}",
                            requested.level.normalized(),
                            level.as_deref().unwrap_or("nothing")
                        );
                        return false;
                    }
                    let mut existing_members: Vec<&str> = disk.values_of("IncludedPhysicalDiskID");
                    existing_members.sort_unstable();
                    let mut requested_members: Vec<&str> =
                        requested.disks.iter().map(String::as_str).collect();
                    requested_members.sort_unstable();
                    if existing_members != requested_members {
                        log::debug!(
                            "RAID config needs to be updated. Needed IncludedPhysicalDiskIDs to be {requested_members:?} for {disk_name}, but got {existing_members:?}"
                        );
                        return false;
                    }
                }
            }
            if ensure.is_teardown() {
                log::debug!("RAID config needs to be cleared for teardown.");
                return false;
            }
        }
        log::info!("RAID configuration does not need to be updated.");
        true
    }
}

fn build_controller_node(controller: &str, plan: &ControllerPlan) -> Node {
    let mut node = Node::component();
    node.insert("RAIDresetConfig", Node::set("True"));
    node.insert("RAIDforeignConfig", Node::set("Clear"));
    for (index, vd) in plan.virtual_disks.iter().enumerate() {
        let (span_length, span_depth) = span_for(vd.level, vd.disks.len());
        let mut disk_node = Node::component();
        disk_node.insert("RAIDaction", Node::set("Create"));
        disk_node.insert("RAIDinitOperation", Node::set("Fast"));
        disk_node.insert("Name", Node::set(format!("VD{index}")));
        disk_node.insert("Size", Node::set("0"));
        disk_node.insert("StripeSize", Node::set("128"));
        disk_node.insert("SpanDepth", Node::set(span_depth.to_string()));
        disk_node.insert("SpanLength", Node::set(span_length.to_string()));
        disk_node.insert("RAIDTypes", Node::set(vd.level.to_device()));
        disk_node.insert("IncludedPhysicalDiskID", Node::List(vd.disks.clone()));
        node.insert(format!("Disk.Virtual.{index}:{controller}"), disk_node);
        for disk in &vd.disks {
            mark_physical_disk(&mut node, disk, &[("RAIDPDState", "Ready")]);
        }
    }
    for spare in &plan.hotspares {
        mark_physical_disk(
            &mut node,
            spare,
            &[("RAIDHotSpareStatus", "Global"), ("RAIDPDState", "Ready")],
        );
    }
    node
}

/// Record physical-disk state under its enclosure component
/// (`Disk.Bay.N:<enclosure>:<controller>` nests as enclosure -> disk).
fn mark_physical_disk(controller_node: &mut Node, disk_fqdd: &str, attrs: &[(&str, &str)]) {
    let Some((_, enclosure)) = disk_fqdd.split_once(':') else {
        return;
    };
    if let Some(children) = controller_node.children_mut() {
        let enclosure_node = children
            .entry(enclosure.to_string())
            .or_insert_with(Node::component);
        if let Some(enclosure_children) = enclosure_node.children_mut() {
            let disk_node = enclosure_children
                .entry(disk_fqdd.to_string())
                .or_insert_with(Node::component);
            for (name, value) in attrs {
                disk_node.insert(*name, Node::set(*value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::VirtualDiskSpec;

    fn inventory(disks: &[(&str, DiskType)]) -> BTreeMap<String, DiskType> {
        disks
            .iter()
            .map(|(fqdd, t)| ((*fqdd).to_string(), *t))
            .collect()
    }

    fn disk_fqdds(count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("Disk.Bay.{i}:Enclosure.Internal.0-1:RAID.Integrated.1-1"))
            .collect()
    }

    #[test]
    fn span_table() {
        assert_eq!(span_for(RaidLevel::Raid10, 4), (2, 2));
        assert_eq!(span_for(RaidLevel::Raid50, 6), (3, 2));
        assert_eq!(span_for(RaidLevel::Raid60, 8), (4, 2));
        assert_eq!(span_for(RaidLevel::Raid5, 3), (3, 1));
    }

    #[test]
    fn groups_virtual_disks_by_controller() {
        let disks = disk_fqdds(4);
        let intent = RaidIntent {
            virtual_disks: vec![VirtualDiskSpec {
                controller: "RAID.Integrated.1-1".into(),
                disks: disks.clone(),
                level: RaidLevel::Raid10,
            }],
            hdd_hotspares: vec!["Disk.Bay.4:Enclosure.Internal.0-1:RAID.Integrated.1-1".into()],
            ssd_hotspares: vec![],
        };
        let inv = inventory(&[
            (&disks[0], DiskType::Hdd),
            (&disks[1], DiskType::Hdd),
            (&disks[2], DiskType::Hdd),
            (&disks[3], DiskType::Hdd),
        ]);
        let plan = RaidPlan::build(&intent, &inv);
        let controller = &plan.controllers["RAID.Integrated.1-1"];
        assert_eq!(controller.virtual_disks.len(), 1);
        assert_eq!(controller.virtual_disks[0].disk_type, Some(DiskType::Hdd));
        assert_eq!(controller.hotspares.len(), 1);
    }

    #[test]
    fn ssd_hotspares_dropped_without_ssd_virtual_disks() {
        let disks = disk_fqdds(2);
        let intent = RaidIntent {
            virtual_disks: vec![VirtualDiskSpec {
                controller: "RAID.Integrated.1-1".into(),
                disks: disks.clone(),
                level: RaidLevel::Raid1,
            }],
            hdd_hotspares: vec![],
            ssd_hotspares: vec!["Disk.Bay.5:Enclosure.Internal.0-1:RAID.Integrated.1-1".into()],
        };
        let inv = inventory(&[(&disks[0], DiskType::Hdd), (&disks[1], DiskType::Hdd)]);
        let plan = RaidPlan::build(&intent, &inv);
        assert!(plan.controllers["RAID.Integrated.1-1"].hotspares.is_empty());
        // and the spare never reaches the submitted changes
        let changes = plan.changes(
            BootDevice::Hd,
            EnsureState::Present,
            false,
            &Document::default(),
        );
        let node = &changes.whole["RAID.Integrated.1-1"];
        let enclosure = node.children().unwrap()["Enclosure.Internal.0-1:RAID.Integrated.1-1"]
            .children()
            .unwrap();
        assert!(!enclosure.contains_key("Disk.Bay.5:Enclosure.Internal.0-1:RAID.Integrated.1-1"));
    }

    #[test]
    fn create_changes_include_span_and_members() {
        let disks = disk_fqdds(4);
        let intent = RaidIntent {
            virtual_disks: vec![VirtualDiskSpec {
                controller: "RAID.Integrated.1-1".into(),
                disks: disks.clone(),
                level: RaidLevel::Raid10,
            }],
            ..RaidIntent::default()
        };
        let inv = inventory(&[(&disks[0], DiskType::Hdd)]);
        let plan = RaidPlan::build(&intent, &inv);
        let changes = plan.changes(
            BootDevice::Hd,
            EnsureState::Present,
            false,
            &Document::default(),
        );
        let controller = changes.whole["RAID.Integrated.1-1"].children().unwrap();
        assert_eq!(controller["RAIDresetConfig"], Node::set("True"));
        let vd = controller["Disk.Virtual.0:RAID.Integrated.1-1"]
            .children()
            .unwrap();
        assert_eq!(vd["SpanLength"], Node::set("2"));
        assert_eq!(vd["SpanDepth"], Node::set("2"));
        assert_eq!(vd["RAIDTypes"], Node::set("RAID 10"));
        assert_eq!(vd["IncludedPhysicalDiskID"], Node::List(disks));
    }

    #[test]
    fn teardown_always_out_of_sync() {
        let plan = RaidPlan::default();
        assert!(!plan.in_sync(
            &Document::default(),
            BootDevice::Hd,
            EnsureState::Teardown
        ));
    }

    #[test]
    fn in_sync_reads_commented_members() {
        let disks = disk_fqdds(2);
        let intent = RaidIntent {
            virtual_disks: vec![VirtualDiskSpec {
                controller: "RAID.Integrated.1-1".into(),
                disks: disks.clone(),
                level: RaidLevel::Raid1,
            }],
            ..RaidIntent::default()
        };
        let plan = RaidPlan::build(&intent, &inventory(&[(&disks[0], DiskType::Hdd)]));
        let xml = format!(
            r#"<SystemConfiguration>
  <Component FQDD="RAID.Integrated.1-1">
    <Component FQDD="Disk.Virtual.0:RAID.Integrated.1-1">
      <!-- <Attribute Name="RAIDTypes">RAID 1</Attribute> -->
      <!-- <Attribute Name="IncludedPhysicalDiskID">{}</Attribute> -->
      <!-- <Attribute Name="IncludedPhysicalDiskID">{}</Attribute> -->
    </Component>
  </Component>
</SystemConfiguration>"#,
            disks[1], disks[0]
        );
        let doc = Document::parse(&xml).unwrap();
        assert!(plan.in_sync(&doc, BootDevice::Hd, EnsureState::Present));
        assert!(!plan.in_sync(&doc, BootDevice::NoneWithRaid, EnsureState::Teardown));
    }

    #[test]
    fn mismatched_level_out_of_sync() {
        let disks = disk_fqdds(2);
        let intent = RaidIntent {
            virtual_disks: vec![VirtualDiskSpec {
                controller: "RAID.Integrated.1-1".into(),
                disks: disks.clone(),
                level: RaidLevel::Raid0,
            }],
            ..RaidIntent::default()
        };
        let plan = RaidPlan::build(&intent, &inventory(&[(&disks[0], DiskType::Hdd)]));
        let xml = format!(
            r#"<SystemConfiguration>
  <Component FQDD="RAID.Integrated.1-1">
    <Component FQDD="Disk.Virtual.0:RAID.Integrated.1-1">
      <Attribute Name="RAIDTypes">RAID 1</Attribute>
      <!-- <Attribute Name="IncludedPhysicalDiskID">{}</Attribute> -->
      <!-- <Attribute Name="IncludedPhysicalDiskID">{}</Attribute> -->
    </Component>
  </Component>
</SystemConfiguration>"#,
            disks[0], disks[1]
        );
        let doc = Document::parse(&xml).unwrap();
        assert!(!plan.in_sync(&doc, BootDevice::Hd, EnsureState::Present));
    }

    #[test]
    fn other_boot_devices_remove_raid_components() {
        let plan = RaidPlan::default();
        let doc = Document::parse(
            r#"<SystemConfiguration>
  <Component FQDD="RAID.Integrated.1-1"/>
</SystemConfiguration>"#,
        )
        .unwrap();
        let changes = plan.changes(BootDevice::Sd, EnsureState::Present, false, &doc);
        assert!(changes.remove.components.contains_key("RAID.Integrated.1-1"));
    }
}
