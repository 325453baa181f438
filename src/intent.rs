//! Declared configuration intent
//!
//! Input types handed over by the resource framework driving the provider
//! lifecycle: BIOS overrides, boot device selection, RAID layout and the
//! network topology down to NIC partitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sentinel BIOS value meaning "remove this attribute instead of setting it".
pub const NOT_APPLICABLE: &str = "n/a";

/// The all-zero MAC used to reset virtual addresses to hardware defaults.
pub const NULL_MAC: &str = "00:00:00:00:00:00";

/// Boot device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootDevice {
    #[serde(rename = "HD")]
    Hd,
    #[serde(rename = "SD")]
    Sd,
    #[serde(rename = "iSCSI")]
    Iscsi,
    #[serde(rename = "FC")]
    Fc,
    #[serde(rename = "none")]
    None,
    #[serde(rename = "none_with_raid")]
    NoneWithRaid,
}

impl BootDevice {
    /// The `none`-prefixed devices leave the boot order alone and mark the
    /// boot-sequence attribute for removal instead.
    pub fn is_none_class(self) -> bool {
        matches!(self, Self::None | Self::NoneWithRaid)
    }

    /// Boot from SAN over the fabric (iSCSI or FC).
    pub fn is_san(self) -> bool {
        matches!(self, Self::Iscsi | Self::Fc)
    }

    /// Boot device classes for which a RAID layout is expected on the
    /// controller.
    pub fn wants_raid(self) -> bool {
        matches!(self, Self::Hd | Self::NoneWithRaid)
    }
}

impl fmt::Display for BootDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hd => "HD",
            Self::Sd => "SD",
            Self::Iscsi => "iSCSI",
            Self::Fc => "FC",
            Self::None => "none",
            Self::NoneWithRaid => "none_with_raid",
        };
        f.write_str(s)
    }
}

/// Whether the configuration is being established or torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsureState {
    #[default]
    Present,
    Teardown,
}

impl EnsureState {
    pub fn is_teardown(self) -> bool {
        matches!(self, Self::Teardown)
    }
}

/// RAID level of a virtual disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaidLevel {
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    Raid10,
    Raid50,
    Raid60,
}

impl RaidLevel {
    /// The encoding the device uses in `RAIDTypes` (`"RAID 10"`).
    pub fn to_device(self) -> &'static str {
        match self {
            Self::Raid0 => "RAID 0",
            Self::Raid1 => "RAID 1",
            Self::Raid5 => "RAID 5",
            Self::Raid6 => "RAID 6",
            Self::Raid10 => "RAID 10",
            Self::Raid50 => "RAID 50",
            Self::Raid60 => "RAID 60",
        }
    }

    /// Normalized spelling used for comparisons (`"raid10"`). Matches device
    /// values once spaces are stripped and case is folded.
    pub fn normalized(self) -> String {
        self.to_device().replace(' ', "").to_lowercase()
    }
}

/// One requested virtual disk: ordered member disks plus the RAID level.
/// The disk type (HDD/SSD) is implied by the first member disk's inventory
/// entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDiskSpec {
    pub controller: String,
    pub disks: Vec<String>,
    pub level: RaidLevel,
}

/// Declared RAID layout.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RaidIntent {
    #[serde(default)]
    pub virtual_disks: Vec<VirtualDiskSpec>,
    #[serde(default)]
    pub hdd_hotspares: Vec<String>,
    #[serde(default)]
    pub ssd_hotspares: Vec<String>,
}

/// Kind of a network object bound to a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkKind {
    Pxe,
    #[serde(rename = "STORAGE_ISCSI_SAN")]
    IscsiSan,
    #[serde(rename = "STORAGE_FCOE_SAN")]
    Fcoe,
    #[serde(other)]
    Other,
}

/// Static addressing for a storage network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticNetwork {
    pub ip_address: String,
    pub subnet: String,
    pub gateway: String,
}

/// A typed network bound to a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkObject {
    pub kind: NetworkKind,
    #[serde(default)]
    pub static_config: Option<StaticNetwork>,
}

impl NetworkObject {
    pub fn is_static(&self) -> bool {
        self.static_config.is_some()
    }
}

/// One NIC partition and its declared bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub fqdd: String,
    /// 1-based partition number within the interface.
    pub partition_no: u8,
    #[serde(default)]
    pub min_bandwidth: Option<u32>,
    #[serde(default)]
    pub max_bandwidth: Option<u32>,
    #[serde(default)]
    pub networks: Vec<NetworkObject>,
    #[serde(default)]
    pub lan_mac: Option<String>,
    #[serde(default)]
    pub iscsi_mac: Option<String>,
    #[serde(default)]
    pub iscsi_iqn: Option<String>,
}

impl Partition {
    pub fn has_network(&self, kind: NetworkKind) -> bool {
        self.networks.iter().any(|n| n.kind == kind)
    }

    pub fn network(&self, kind: NetworkKind) -> Option<&NetworkObject> {
        self.networks.iter().find(|n| n.kind == kind)
    }
}

/// One physical interface (port) on a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Whether NPAR partitioning is requested on this interface.
    pub partitioned: bool,
    pub partitions: Vec<Partition>,
}

/// One NIC card.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Card {
    pub interfaces: Vec<Interface>,
}

/// Declared network topology: cards -> interfaces -> partitions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkTopology {
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl NetworkTopology {
    /// All partitions in declaration order.
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.cards
            .iter()
            .flat_map(|c| &c.interfaces)
            .flat_map(|i| &i.partitions)
    }

    /// Partitions bound to a network of the given kind, in order.
    pub fn partitions_with(&self, kind: NetworkKind) -> Vec<&Partition> {
        self.partitions().filter(|p| p.has_network(kind)).collect()
    }

    /// Every declared partition FQDD.
    pub fn fqdds(&self) -> Vec<String> {
        self.partitions().map(|p| p.fqdd.clone()).collect()
    }
}

/// Boot-from-SAN first-target parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanBoot {
    pub target_ip: String,
    pub target_iqn: String,
}

/// The complete declared intent for one target device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub service_tag: String,
    pub boot_device: BootDevice,
    #[serde(default)]
    pub ensure: EnsureState,
    /// BIOS attribute overrides; the value [`NOT_APPLICABLE`] converts into
    /// a removal instead of a set.
    #[serde(default)]
    pub bios_settings: BTreeMap<String, String>,
    #[serde(default)]
    pub raid: RaidIntent,
    #[serde(default)]
    pub network: NetworkTopology,
    /// Merge onto the `reference` snapshot (clone from another server)
    /// instead of the target's own export.
    #[serde(default)]
    pub clone_reference: bool,
    /// Submit even when the export already satisfies the change-set.
    #[serde(default)]
    pub force_reboot: bool,
    #[serde(default)]
    pub san_boot: Option<SanBoot>,
}

impl Intent {
    pub fn new(service_tag: impl Into<String>, boot_device: BootDevice) -> Self {
        Self {
            service_tag: service_tag.into(),
            boot_device,
            ensure: EnsureState::default(),
            bios_settings: BTreeMap::new(),
            raid: RaidIntent::default(),
            network: NetworkTopology::default(),
            clone_reference: false,
            force_reboot: false,
            san_boot: None,
        }
    }
}
