//! NIC partition planning
//!
//! Computes per-partition attribute changes (NPAR mode, iSCSI/FCoE offload,
//! bandwidth shares, legacy boot protocol, virtual MAC resets) from the
//! declared network topology plus the partitions the device currently
//! exposes, and the boot-from-SAN initiator block for iSCSI/FC boot.

use crate::changeset::{ChangeSet, Node};
use crate::document::Document;
use crate::intent::{
    BootDevice, EnsureState, NetworkKind, NetworkTopology, Partition, SanBoot, NULL_MAC,
};

/// The boot-sequence entry for local hard disks.
const HARD_DISK_SEQ: &str = "HardDisk.List.1-1";

pub struct NicPlanner<'a> {
    topology: &'a NetworkTopology,
    boot_device: BootDevice,
    ensure: EnsureState,
}

impl<'a> NicPlanner<'a> {
    pub fn new(
        topology: &'a NetworkTopology,
        boot_device: BootDevice,
        ensure: EnsureState,
    ) -> Self {
        Self {
            topology,
            boot_device,
            ensure,
        }
    }

    /// Per-partition changes against the exported document.
    pub fn changes(&self, exported: &Document) -> ChangeSet {
        let mut changes = ChangeSet::new();
        let targets = self.topology.fqdds();

        // Partitions present on the device but absent from the declared set
        // are leftovers (e.g. after disabling partitioning) and would make
        // the import fail; schedule them for removal.
        let existing =
            exported.component_fqdds_where(|f| f.contains("NIC.") || f.contains("FC."));
        for fqdd in existing {
            if !targets.contains(&fqdd) {
                changes.remove_component(&fqdd);
            }
        }

        // Don't touch the boot order when the boot device is none-class
        if !self.boot_device.is_none_class() {
            let mut seq = Vec::new();
            if let Some(pxe) = self.topology.partitions_with(NetworkKind::Pxe).first() {
                seq.push(pxe.fqdd.clone());
            }
            seq.push(HARD_DISK_SEQ.to_string());
            changes.set_partial("BIOS.Setup.1-1", "BiosBootSeq", seq.join(", "));
        }

        for card in &self.topology.cards {
            for interface in &card.interfaces {
                for partition in &interface.partitions {
                    if self.boot_device.is_none_class() && partition.networks.is_empty() {
                        continue;
                    }
                    let node =
                        self.partition_node(partition, interface.partitioned, exported);
                    if let Some(children) = node.children() {
                        if !children.is_empty() {
                            changes.whole.insert(partition.fqdd.clone(), node);
                        }
                    }
                }
            }
        }
        changes
    }

    fn partition_node(
        &self,
        partition: &Partition,
        partitioned: bool,
        exported: &Document,
    ) -> Node {
        let mut node = Node::component();
        // Intel cards don't expose VLanMode; only set it where the device
        // already has it.
        if partition.partition_no == 1
            && exported
                .find_component(&partition.fqdd)
                .is_some_and(|c| c.has_live_attribute("VLanMode"))
        {
            node.insert("VLanMode", Node::set("Disabled"));
        }
        if partitioned {
            let mut nic_mode = "Enabled";
            let mut iscsi_offload = None;
            if !self.boot_device.is_san() {
                if partition.has_network(NetworkKind::IscsiSan) {
                    iscsi_offload = Some("Enabled");
                    // FCoE offload must be disabled whenever iSCSI offload is
                    // enabled, and vice versa
                    node.insert("FCoEOffloadMode", Node::set("Disabled"));
                } else if partition.has_network(NetworkKind::Fcoe) {
                    iscsi_offload = Some("Disabled");
                    node.insert("FCoEOffloadMode", Node::set("Enabled"));
                    nic_mode = "Disabled";
                } else {
                    iscsi_offload = Some("Disabled");
                    node.insert("FCoEOffloadMode", Node::set("Disabled"));
                }
            }
            node.insert("NicMode", Node::set(nic_mode));
            if let Some(mode) = iscsi_offload {
                node.insert("iScsiOffloadMode", Node::set(mode));
            }
            // Reset virtual addresses wherever their offload mode is active
            if nic_mode == "Enabled" {
                node.insert("VirtMacAddr", Node::set(NULL_MAC));
            }
            if iscsi_offload == Some("Enabled") {
                node.insert("VirtIscsiMacAddr", Node::set(NULL_MAC));
            }
            if let Some(min) = partition.min_bandwidth {
                node.insert("MinBandwidth", Node::set(min.to_string()));
            }
            if let Some(max) = partition.max_bandwidth {
                node.insert("MaxBandwidth", Node::set(max.to_string()));
            }
            if partition.partition_no == 1 {
                node.insert("VirtualizationMode", Node::set("NPAR"));
                node.insert("NicPartitioning", Node::set("Enabled"));
            }
        } else if partition.partition_no == 1 {
            for (name, value) in [("VirtualizationMode", "NONE"), ("NicPartitioning", "Disabled")]
            {
                if exported.contains_live_attribute(name) {
                    node.insert(name, Node::set(value));
                } else {
                    log::debug!(
                        "Trying to set {name} but the relevant device does not exist on the server. The attribute will be ignored."
                    );
                }
            }
        }
        if partition.has_network(NetworkKind::Pxe) {
            node.insert("LegacyBootProto", Node::set("PXE"));
        }
        node
    }

    /// Boot-from-SAN changes for iSCSI/FC boot devices: initiator blocks on
    /// the storage partitions, the boot sequence override, and the virtual
    /// MAC identities on every declared partition.
    pub fn san_changes(&self, san: Option<&SanBoot>) -> ChangeSet {
        let mut changes = ChangeSet::new();
        match self.boot_device {
            BootDevice::Iscsi => {
                let mut boot_seq = Vec::new();
                for partition in self.topology.partitions_with(NetworkKind::IscsiSan) {
                    let network = partition
                        .network(NetworkKind::IscsiSan)
                        .and_then(|n| n.static_config.as_ref());
                    let Some(network) = network else {
                        log::warn!(
                            "Found non-static iSCSI network while configuring boot from SAN"
                        );
                        continue;
                    };
                    let node = self.iscsi_initiator_node(partition, network, san);
                    changes.whole.insert(partition.fqdd.clone(), node);
                    boot_seq.push(partition.fqdd.clone());
                }
                changes.set_partial("BIOS.Setup.1-1", "BiosBootSeq", boot_seq.join(","));
            }
            BootDevice::Fc => {
                changes.set_partial("BIOS.Setup.1-1", "BiosBootSeq", HARD_DISK_SEQ);
            }
            _ => return changes,
        }
        // Pin the virtual MAC identities on every partition that carries one
        for partition in self.topology.partitions() {
            if let Some(mac) = &partition.lan_mac {
                changes.set_partial(&partition.fqdd, "VirtMacAddr", mac.clone());
            }
            if let Some(mac) = &partition.iscsi_mac {
                changes.set_partial(&partition.fqdd, "VirtIscsiMacAddr", mac.clone());
            }
        }
        changes
    }

    fn iscsi_initiator_node(
        &self,
        partition: &Partition,
        network: &crate::intent::StaticNetwork,
        san: Option<&SanBoot>,
    ) -> Node {
        let teardown = self.ensure.is_teardown();
        let mut node = Node::component();
        match (&partition.lan_mac, teardown) {
            (_, true) => {
                node.insert("VirtMacAddr", Node::set(NULL_MAC));
            }
            (Some(mac), false) => {
                node.insert("VirtMacAddr", Node::set(mac.clone()));
            }
            (None, false) => {}
        }
        match (&partition.iscsi_mac, teardown) {
            (_, true) => {
                node.insert("VirtIscsiMacAddr", Node::set(NULL_MAC));
            }
            (Some(mac), false) => {
                node.insert("VirtIscsiMacAddr", Node::set(mac.clone()));
            }
            (None, false) => {}
        }
        node.insert("TcpIpViaDHCP", Node::set("Disabled"));
        node.insert("IscsiViaDHCP", Node::set("Disabled"));
        node.insert("ChapAuthEnable", Node::set("Disabled"));
        node.insert("IscsiTgtBoot", Node::set("Enabled"));
        node.insert("IscsiInitiatorIpAddr", Node::set(network.ip_address.clone()));
        node.insert("IscsiInitiatorSubnet", Node::set(network.subnet.clone()));
        node.insert("IscsiInitiatorGateway", Node::set(network.gateway.clone()));
        if let Some(iqn) = &partition.iscsi_iqn {
            node.insert("IscsiInitiatorName", Node::set(iqn.clone()));
        }
        node.insert("ConnectFirstTgt", Node::set("Enabled"));
        if teardown {
            node.insert("FirstTgtIpAddress", Node::set("0.0.0.0"));
            node.insert("FirstTgtIscsiName", Node::set(""));
        } else if let Some(san) = san {
            node.insert("FirstTgtIpAddress", Node::set(san.target_ip.clone()));
            node.insert("FirstTgtIscsiName", Node::set(san.target_iqn.clone()));
        }
        node.insert("FirstTgtTcpPort", Node::set("3260"));
        node.insert("LegacyBootProto", Node::set("iSCSI"));
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{Card, Interface, NetworkObject, StaticNetwork};

    fn partition(fqdd: &str, no: u8, networks: Vec<NetworkObject>) -> Partition {
        Partition {
            fqdd: fqdd.into(),
            partition_no: no,
            min_bandwidth: Some(25),
            max_bandwidth: Some(100),
            networks,
            lan_mac: None,
            iscsi_mac: None,
            iscsi_iqn: None,
        }
    }

    fn net(kind: NetworkKind) -> NetworkObject {
        NetworkObject {
            kind,
            static_config: None,
        }
    }

    fn topology(partitioned: bool, partitions: Vec<Partition>) -> NetworkTopology {
        NetworkTopology {
            cards: vec![Card {
                interfaces: vec![Interface {
                    partitioned,
                    partitions,
                }],
            }],
        }
    }

    fn exported_with_nics(fqdds: &[&str]) -> Document {
        let mut doc = Document::default();
        for fqdd in fqdds {
            doc.component_or_insert(fqdd);
        }
        doc
    }

    #[test]
    fn partitioned_interface_enables_npar_on_first_partition() {
        let topo = topology(
            true,
            vec![
                partition("NIC.Integrated.1-1-1", 1, vec![net(NetworkKind::Pxe)]),
                partition("NIC.Integrated.1-1-2", 2, vec![]),
            ],
        );
        let planner = NicPlanner::new(&topo, BootDevice::Hd, EnsureState::Present);
        let changes = planner.changes(&Document::default());
        let p1 = changes.whole["NIC.Integrated.1-1-1"].children().unwrap();
        assert_eq!(p1["VirtualizationMode"], Node::set("NPAR"));
        assert_eq!(p1["NicPartitioning"], Node::set("Enabled"));
        assert_eq!(p1["LegacyBootProto"], Node::set("PXE"));
        assert_eq!(p1["VirtMacAddr"], Node::set(NULL_MAC));
        let p2 = changes.whole["NIC.Integrated.1-1-2"].children().unwrap();
        assert!(!p2.contains_key("VirtualizationMode"));
        assert_eq!(p2["MinBandwidth"], Node::set("25"));
    }

    #[test]
    fn iscsi_binding_flips_offloads_and_resets_mac() {
        let topo = topology(
            true,
            vec![partition(
                "NIC.Integrated.1-1-3",
                3,
                vec![net(NetworkKind::IscsiSan)],
            )],
        );
        let planner = NicPlanner::new(&topo, BootDevice::Hd, EnsureState::Present);
        let changes = planner.changes(&Document::default());
        let p = changes.whole["NIC.Integrated.1-1-3"].children().unwrap();
        assert_eq!(p["iScsiOffloadMode"], Node::set("Enabled"));
        assert_eq!(p["FCoEOffloadMode"], Node::set("Disabled"));
        assert_eq!(p["VirtIscsiMacAddr"], Node::set(NULL_MAC));
    }

    #[test]
    fn fcoe_binding_disables_nic_mode() {
        let topo = topology(
            true,
            vec![partition(
                "NIC.Integrated.1-1-2",
                2,
                vec![net(NetworkKind::Fcoe)],
            )],
        );
        let planner = NicPlanner::new(&topo, BootDevice::Hd, EnsureState::Present);
        let changes = planner.changes(&Document::default());
        let p = changes.whole["NIC.Integrated.1-1-2"].children().unwrap();
        assert_eq!(p["NicMode"], Node::set("Disabled"));
        assert_eq!(p["FCoEOffloadMode"], Node::set("Enabled"));
        assert!(!p.contains_key("VirtMacAddr"));
    }

    #[test]
    fn stale_device_partitions_scheduled_for_removal() {
        let topo = topology(
            false,
            vec![partition("NIC.Integrated.1-1-1", 1, vec![])],
        );
        let exported = exported_with_nics(&[
            "NIC.Integrated.1-1-1",
            "NIC.Integrated.1-1-2",
            "NIC.Integrated.1-1-3",
        ]);
        let planner = NicPlanner::new(&topo, BootDevice::Hd, EnsureState::Present);
        let changes = planner.changes(&exported);
        assert!(changes.remove.components.contains_key("NIC.Integrated.1-1-2"));
        assert!(changes.remove.components.contains_key("NIC.Integrated.1-1-3"));
        assert!(!changes.remove.components.contains_key("NIC.Integrated.1-1-1"));
    }

    #[test]
    fn unpartitioned_disables_npar_only_where_device_has_it() {
        let topo = topology(false, vec![partition("NIC.Integrated.1-1-1", 1, vec![])]);
        // Device exposes NicPartitioning but not VirtualizationMode
        let xml = r#"<SystemConfiguration>
  <Component FQDD="NIC.Integrated.1-1-1">
    <Attribute Name="NicPartitioning">Enabled</Attribute>
  </Component>
</SystemConfiguration>"#;
        let exported = Document::parse(xml).unwrap();
        let planner = NicPlanner::new(&topo, BootDevice::Hd, EnsureState::Present);
        let changes = planner.changes(&exported);
        let p = changes.whole["NIC.Integrated.1-1-1"].children().unwrap();
        assert_eq!(p["NicPartitioning"], Node::set("Disabled"));
        assert!(!p.contains_key("VirtualizationMode"));
    }

    #[test]
    fn boot_sequence_prefers_pxe_partition() {
        let topo = topology(
            true,
            vec![partition(
                "NIC.Integrated.1-2-1",
                1,
                vec![net(NetworkKind::Pxe)],
            )],
        );
        let planner = NicPlanner::new(&topo, BootDevice::Hd, EnsureState::Present);
        let changes = planner.changes(&Document::default());
        let bios = changes.partial["BIOS.Setup.1-1"].children().unwrap();
        assert_eq!(
            bios["BiosBootSeq"],
            Node::set("NIC.Integrated.1-2-1, HardDisk.List.1-1")
        );
    }

    #[test]
    fn none_boot_device_skips_unbound_partitions_and_boot_order() {
        let topo = topology(
            true,
            vec![
                partition("NIC.Integrated.1-1-1", 1, vec![]),
                partition("NIC.Integrated.1-1-2", 2, vec![net(NetworkKind::Pxe)]),
            ],
        );
        let planner = NicPlanner::new(&topo, BootDevice::None, EnsureState::Present);
        let changes = planner.changes(&Document::default());
        assert!(!changes.partial.contains_key("BIOS.Setup.1-1"));
        assert!(!changes.whole.contains_key("NIC.Integrated.1-1-1"));
        assert!(changes.whole.contains_key("NIC.Integrated.1-1-2"));
    }

    #[test]
    fn iscsi_boot_builds_initiator_block() {
        let mut p = partition(
            "NIC.Integrated.1-1-3",
            3,
            vec![NetworkObject {
                kind: NetworkKind::IscsiSan,
                static_config: Some(StaticNetwork {
                    ip_address: "10.0.0.5".into(),
                    subnet: "255.255.255.0".into(),
                    gateway: "10.0.0.1".into(),
                }),
            }],
        );
        p.lan_mac = Some("aa:bb:cc:dd:ee:01".into());
        p.iscsi_mac = Some("aa:bb:cc:dd:ee:02".into());
        p.iscsi_iqn = Some("iqn.2026-08.com.example:init".into());
        let topo = topology(true, vec![p]);
        let planner = NicPlanner::new(&topo, BootDevice::Iscsi, EnsureState::Present);
        let san = SanBoot {
            target_ip: "10.0.0.50".into(),
            target_iqn: "iqn.2026-08.com.example:tgt".into(),
        };
        let changes = planner.san_changes(Some(&san));
        let node = changes.whole["NIC.Integrated.1-1-3"].children().unwrap();
        assert_eq!(node["IscsiTgtBoot"], Node::set("Enabled"));
        assert_eq!(node["IscsiInitiatorIpAddr"], Node::set("10.0.0.5"));
        assert_eq!(node["FirstTgtIpAddress"], Node::set("10.0.0.50"));
        assert_eq!(node["LegacyBootProto"], Node::set("iSCSI"));
        let bios = changes.partial["BIOS.Setup.1-1"].children().unwrap();
        assert_eq!(bios["BiosBootSeq"], Node::set("NIC.Integrated.1-1-3"));
        // identity pinning lands in partial
        let pinned = changes.partial["NIC.Integrated.1-1-3"].children().unwrap();
        assert_eq!(pinned["VirtMacAddr"], Node::set("aa:bb:cc:dd:ee:01"));
    }

    #[test]
    fn teardown_zeroes_san_targets() {
        let p = partition(
            "NIC.Integrated.1-1-3",
            3,
            vec![NetworkObject {
                kind: NetworkKind::IscsiSan,
                static_config: Some(StaticNetwork {
                    ip_address: "10.0.0.5".into(),
                    subnet: "255.255.255.0".into(),
                    gateway: "10.0.0.1".into(),
                }),
            }],
        );
        let topo = topology(true, vec![p]);
        let planner = NicPlanner::new(&topo, BootDevice::Iscsi, EnsureState::Teardown);
        let changes = planner.san_changes(None);
        let node = changes.whole["NIC.Integrated.1-1-3"].children().unwrap();
        assert_eq!(node["VirtMacAddr"], Node::set(NULL_MAC));
        assert_eq!(node["FirstTgtIpAddress"], Node::set("0.0.0.0"));
        assert_eq!(node["FirstTgtIscsiName"], Node::set(""));
    }
}
