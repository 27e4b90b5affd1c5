//! Access profiles, device identity and stack configuration
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use heapless::Vec;
use strum::Display;

use crate::Ts;

/// Maximum number of subbands per access profile
pub const MAX_SUBBANDS: usize = 8;

/// Maximum number of access profiles held by [`StaticConfig`]
pub const MAX_ACCESS_PROFILES: usize = 4;

/// CSMA-CA backoff mode
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CsmaCaMode {
    /// Unslotted, no backoff
    Unc,
    /// Adaptive aloha, no initial delay
    Aind,
    /// Random adaptive aloha
    Raind,
    /// Random increase geometric delay
    Rigd,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanType {
    Foreground,
    Background,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelCoding {
    Pn9,
    FecPn9,
    Cw,
}

/// Channel class, sets the over-the-air data rate
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelClass {
    LoRate,
    NormalRate,
    HiRate,
}

impl ChannelClass {
    /// Approximate bytes transmitted per tick
    pub fn bytes_per_tick(&self) -> usize {
        match self {
            ChannelClass::LoRate => 1,
            ChannelClass::NormalRate => 6,
            ChannelClass::HiRate => 20,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrequencyBand {
    Band433,
    Band868,
    Band915,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelHeader {
    pub coding: ChannelCoding,
    pub class: ChannelClass,
    pub band: FrequencyBand,
}

impl Default for ChannelHeader {
    fn default() -> Self {
        Self {
            coding: ChannelCoding::Pn9,
            class: ChannelClass::NormalRate,
            band: FrequencyBand::Band433,
        }
    }
}

/// Contiguous range of channels within an access profile
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Subband {
    pub channel_header: ChannelHeader,
    pub channel_index_start: u16,
    pub channel_index_end: u16,
    /// Transmit power in dBm
    pub eirp: i8,
    /// CCA threshold offset
    pub ccao: u8,
}

impl Default for Subband {
    fn default() -> Self {
        Self {
            channel_header: ChannelHeader::default(),
            channel_index_start: 0,
            channel_index_end: 0,
            eirp: 0,
            ccao: 0,
        }
    }
}

/// Radio configuration applied to scans and transmissions
#[derive(Clone, Debug, PartialEq)]
pub struct AccessProfile {
    pub subnet: u8,
    pub scan_type: ScanType,
    pub csma_ca_mode: CsmaCaMode,
    pub subbands: Vec<Subband, MAX_SUBBANDS>,

    /// Channel access budget for a single transmission, in ticks
    pub transmission_timeout_period: u16,

    /// Scan automation period in ticks (0 for continuous scanning)
    pub scan_automation_period: u16,
}

impl Default for AccessProfile {
    fn default() -> Self {
        let mut subbands = Vec::new();
        let _ = subbands.push(Subband::default());

        Self {
            subnet: 0x05,
            scan_type: ScanType::Foreground,
            csma_ca_mode: CsmaCaMode::Unc,
            subbands,
            transmission_timeout_period: 50,
            scan_automation_period: 0,
        }
    }
}

impl AccessProfile {
    /// Active subband, only a single subband is currently supported
    pub fn subband(&self) -> Option<&Subband> {
        self.subbands.first()
    }
}

/// Device identity used for addressing and frame filtering
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceIdentity {
    /// Unique 64-bit device id
    pub uid: [u8; 8],
    /// Optional virtual (short) id
    pub vid: Option<[u8; 2]>,
    /// Access class advertised in origin templates
    pub access_class: u8,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            uid: [0u8; 8],
            vid: None,
            access_class: 0,
        }
    }
}

/// Read-only configuration store (filesystem) collaborator
pub trait ConfigStore {
    /// Fetch an access profile by index
    fn access_profile(&self, index: u8) -> Option<AccessProfile>;

    /// Fetch the device identity
    fn identity(&self) -> DeviceIdentity;
}

/// In-memory configuration store
#[derive(Clone, Debug, PartialEq, Default)]
pub struct StaticConfig {
    pub profiles: Vec<AccessProfile, MAX_ACCESS_PROFILES>,
    pub identity: DeviceIdentity,
}

impl StaticConfig {
    pub fn new(profile: AccessProfile, identity: DeviceIdentity) -> Self {
        let mut profiles = Vec::new();
        let _ = profiles.push(profile);

        Self { profiles, identity }
    }
}

impl ConfigStore for StaticConfig {
    fn access_profile(&self, index: u8) -> Option<AccessProfile> {
        self.profiles.get(index as usize).cloned()
    }

    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }
}

/// Configuration for the data link layer
#[derive(Clone, Debug, PartialEq)]
pub struct DllConfig {
    /// Energy detect threshold in dBm, the channel is clear at or below this level
    pub e_cca: i16,

    /// Guard interval (t_g) in ticks, used between CCA1 and CCA2 and as the
    /// minimum remaining channel access time
    pub guard_interval: u16,

    /// Time charged against the channel access budget for each failed assessment
    pub cca_duration: u16,

    /// Transmit power applied to outgoing frames in dBm
    pub tx_eirp: i8,
}

impl Default for DllConfig {
    fn default() -> Self {
        Self {
            e_cca: -86,
            guard_interval: 5,
            cca_duration: 1,
            tx_eirp: 10,
        }
    }
}

/// Configuration for the transport layer
#[derive(Clone, Debug, PartialEq)]
pub struct TransportConfig {
    /// Transaction response period in ticks
    pub response_period: Ts,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            response_period: 50,
        }
    }
}

/// Top level stack configuration
#[derive(Clone, Debug, PartialEq, Default)]
pub struct StackConfig {
    pub dll: DllConfig,
    pub transport: TransportConfig,

    /// Index of the access profile used for scanning
    pub access_profile_index: u8,
}
