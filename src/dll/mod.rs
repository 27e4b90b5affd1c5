//! DASH7 Data Link Layer
//!
//! Handles frame filtering, scan automation / foreground scanning and
//! CSMA-CA channel access for outgoing frames. Operations are invoked from
//! scheduler tasks, notifications for the transport layer are returned as
//! [`DllEvent`]s.
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use log::{debug, info, trace, warn};
use rand_core::RngCore;

use crate::Ts;
use crate::config::{AccessProfile, ChannelClass, DeviceIdentity, DllConfig};
use crate::error::CoreError;
use crate::hw::{ChannelId, HwRadio, RxConfig, RxMode, TxConfig};
use crate::packet::{AddresseeId, FrameError};
use crate::pool::{PacketHandle, PacketPool};
use crate::sched::{Scheduler, Task};

pub mod state;
pub use state::DllState;

pub mod csma;
use csma::{Backoff, CsmaSession};

pub mod header;
use header::{eirp_index, DllHeader};

/// Notifications from the data link layer to the transport layer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DllEvent {
    /// Channel access completed, the packet is on air if `succeeded`
    ChannelAccess{ succeeded: bool, handle: PacketHandle },
    /// Transmission of the packet completed
    Transmitted(PacketHandle),
    /// A frame passed filtering and was decoded
    Received(PacketHandle),
}

/// Data link layer statistics
#[derive(Clone, Debug, PartialEq, Default)]
pub struct DllStats {
    pub tx_count: u32,
    pub rx_count: u32,
    pub rx_filtered: u32,
    pub rx_invalid: u32,
    pub cca_busy: u32,
    pub cca_fail: u32,
}

/// Data link layer context
pub struct Dll<R, G> {
    radio: R,
    rng: G,
    config: DllConfig,
    identity: DeviceIdentity,
    profile: AccessProfile,

    state: DllState,
    csma: Option<CsmaSession>,
    current: Option<PacketHandle>,

    stats: DllStats,
}

impl <R, G> Dll<R, G>
where
    R: HwRadio,
    G: RngCore,
{
    pub fn new(radio: R, rng: G, config: DllConfig, identity: DeviceIdentity, profile: AccessProfile) -> Self {
        Self {
            radio,
            rng,
            config,
            identity,
            profile,
            state: DllState::Idle,
            csma: None,
            current: None,
            stats: DllStats::default(),
        }
    }

    pub fn state(&self) -> DllState {
        self.state
    }

    pub fn stats(&self) -> &DllStats {
        &self.stats
    }

    pub fn access_profile(&self) -> &AccessProfile {
        &self.profile
    }

    /// Replace the active access profile
    pub fn set_access_profile(&mut self, profile: AccessProfile) {
        debug!("Applying access profile (subnet: 0x{:02x}, csma: {})", profile.subnet, profile.csma_ca_mode);
        self.profile = profile;
    }

    /// Channel access state for the in-flight transmission
    pub fn csma(&self) -> Option<&CsmaSession> {
        self.csma.as_ref()
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    fn switch_state(&mut self, next: DllState) -> Result<(), CoreError<R::Error>> {
        let s = DllState::transition(self.state, next)?;

        trace!("DLL {} -> {}", self.state, s);
        self.state = s;

        Ok(())
    }

    fn channel(&self) -> ChannelId {
        match self.profile.subband() {
            Some(s) => ChannelId{ header: s.channel_header, index: s.channel_index_start },
            None => ChannelId::default(),
        }
    }

    fn rx_config(&self) -> RxConfig {
        RxConfig{ channel: self.channel() }
    }

    fn channel_class(&self) -> ChannelClass {
        match self.profile.subband() {
            Some(s) => s.channel_header.class,
            None => ChannelClass::NormalRate,
        }
    }

    /// Continuous receive on the active subband when nothing else is running
    pub fn execute_scan_automation(&mut self) -> Result<(), CoreError<R::Error>> {
        match self.state {
            DllState::Idle | DllState::ForegroundScan | DllState::ScanAutomation => (),
            _ => {
                debug!("DLL busy ({}), skipping scan automation", self.state);
                return Ok(())
            }
        }

        if self.profile.subbands.is_empty() {
            if self.state != DllState::Idle {
                self.switch_state(DllState::Idle)?;
            }
            self.radio.set_idle().map_err(CoreError::Radio)?;
            return Ok(());
        }

        if self.profile.subbands.len() > 1 {
            warn!("Multiple subbands not supported, scanning first only");
        }

        if self.state != DllState::ScanAutomation {
            self.switch_state(DllState::ScanAutomation)?;
        }

        let cfg = self.rx_config();
        self.radio.set_rx(Some(&cfg), RxMode::Packets).map_err(CoreError::Radio)?;

        Ok(())
    }

    /// Hold a receive window open for an active dialog
    pub fn start_foreground_scan(&mut self) -> Result<(), CoreError<R::Error>> {
        self.switch_state(DllState::ForegroundScan)?;

        let cfg = self.rx_config();
        self.radio.set_rx(Some(&cfg), RxMode::Packets).map_err(CoreError::Radio)?;

        Ok(())
    }

    /// End a foreground scan and return to scan automation
    pub fn stop_foreground_scan(&mut self) -> Result<(), CoreError<R::Error>> {
        if self.state != DllState::ForegroundScan {
            return Err(CoreError::DllTransition(crate::error::InvalidTransition{
                from: self.state,
                to: DllState::ScanAutomation,
            }));
        }

        self.execute_scan_automation()
    }

    /// Assemble an outgoing frame and begin channel access
    pub fn tx_frame<const N: usize>(&mut self, pool: &mut PacketPool<N>, sched: &mut Scheduler, h: PacketHandle, now: Ts) -> Result<Option<DllEvent>, CoreError<R::Error>> {
        let tx_cfg = TxConfig{ channel: self.channel(), eirp: self.config.tx_eirp };

        let p = pool.get_mut(h)?;

        p.dll_header = DllHeader {
            subnet: self.profile.subnet,
            eirp_index: eirp_index(self.config.tx_eirp),
            target: p.addressee.map(|a| a.id).unwrap_or(AddresseeId::Broadcast),
        };

        let n = p.assemble()?;
        p.frame.tx_meta.cfg = Some(tx_cfg);

        debug!("TX frame ({} bytes) to {:?}", n, p.dll_header.target);

        self.current = Some(h);
        self.switch_state(DllState::CsmaStarted)?;

        self.execute_csma_ca(pool, sched, now)
    }

    /// Run the CSMA-CA backoff procedure for the current packet
    pub fn execute_csma_ca<const N: usize>(&mut self, pool: &mut PacketPool<N>, sched: &mut Scheduler, now: Ts) -> Result<Option<DllEvent>, CoreError<R::Error>> {
        let h = match (self.state, self.current) {
            (DllState::CsmaStarted, Some(h)) | (DllState::CsmaRetry, Some(h)) => h,
            _ => {
                debug!("No channel access pending ({})", self.state);
                return Ok(None);
            }
        };

        // Mute the receiver while backing off
        self.radio.set_rx(None, RxMode::Muted).map_err(CoreError::Radio)?;

        let len = pool.get(h)?.frame.length_field();
        let tx_duration = csma::tx_duration(len, self.channel_class());
        let mode = self.profile.csma_ca_mode;

        let backoff = match self.state {
            DllState::CsmaStarted => {
                let (s, b) = CsmaSession::start(mode, self.profile.transmission_timeout_period, tx_duration, now, &mut self.rng);
                self.csma = Some(s);
                b
            },
            _ => match self.csma.as_mut() {
                Some(s) => s.retry(mode, now, self.config.cca_duration as i32, self.config.guard_interval as i32, &mut self.rng),
                None => Backoff::Fail,
            },
        };

        match backoff {
            Backoff::Fail => self.cca_failed(sched, h).map(Some),
            Backoff::Assess{ offset } => {
                self.switch_state(DllState::Cca1)?;

                match offset {
                    0 => sched.post(Task::ExecuteCca)?,
                    _ => sched.post_delayed(Task::ExecuteCca, now, offset as Ts)?,
                }

                Ok(None)
            }
        }
    }

    fn cca_failed(&mut self, sched: &mut Scheduler, h: PacketHandle) -> Result<DllEvent, CoreError<R::Error>> {
        info!("Channel access failed");

        self.switch_state(DllState::CcaFail)?;
        self.stats.cca_fail += 1;
        self.csma = None;
        self.current = None;

        sched.post(Task::ScanAutomation)?;

        Ok(DllEvent::ChannelAccess{ succeeded: false, handle: h })
    }

    /// Start a clear channel assessment
    pub fn execute_cca(&mut self) -> Result<(), CoreError<R::Error>> {
        match self.state {
            DllState::Cca1 | DllState::Cca2 => (),
            _ => {
                debug!("Ignoring stale CCA request ({})", self.state);
                return Ok(());
            }
        }

        let cfg = self.rx_config();
        self.radio.set_rx(Some(&cfg), RxMode::Rssi).map_err(CoreError::Radio)?;

        Ok(())
    }

    /// Handle an RSSI sample for the running assessment
    pub fn on_cca_rssi<const N: usize>(&mut self, pool: &mut PacketPool<N>, sched: &mut Scheduler, rssi: i16, now: Ts) -> Result<Option<DllEvent>, CoreError<R::Error>> {
        let h = match (self.state, self.current) {
            (DllState::Cca1, Some(h)) | (DllState::Cca2, Some(h)) => h,
            _ => {
                debug!("Ignoring RSSI sample outside CCA ({})", self.state);
                return Ok(None);
            }
        };

        if rssi > self.config.e_cca {
            debug!("Channel not clear ({}), RSSI: {}", self.state, rssi);
            self.stats.cca_busy += 1;

            self.switch_state(DllState::CsmaRetry)?;
            sched.post(Task::ExecuteCsmaCa)?;

            return Ok(None);
        }

        if self.state == DllState::Cca1 {
            debug!("CCA1 RSSI: {}", rssi);

            self.switch_state(DllState::Cca2)?;
            sched.post_delayed(Task::ExecuteCca, now, self.config.guard_interval as Ts)?;

            return Ok(None);
        }

        debug!("CCA2 RSSI: {}, transmitting", rssi);

        self.switch_state(DllState::TxForeground)?;

        let token = pool.frame_token(h)?;
        let p = pool.get(h)?;
        trace!("TX: {:02x?}", p.frame.data());

        self.radio.send(token, &p.frame).map_err(CoreError::Radio)?;

        Ok(Some(DllEvent::ChannelAccess{ succeeded: true, handle: h }))
    }

    /// Handle completion of a transmission
    pub fn on_transmit_completed(&mut self, h: PacketHandle) -> Result<Option<DllEvent>, CoreError<R::Error>> {
        if self.current != Some(h) {
            warn!("Unexpected transmit completion for {:?}", h);
            return Ok(None);
        }

        self.switch_state(DllState::TxForegroundCompleted)?;

        self.stats.tx_count += 1;
        self.csma = None;
        self.current = None;

        // Listen for responses until the transport response period ends
        self.start_foreground_scan()?;

        Ok(Some(DllEvent::Transmitted(h)))
    }

    /// Process a frame marked as received, applying subnet and address filters
    pub fn process_received<const N: usize>(&mut self, pool: &mut PacketPool<N>, sched: &mut Scheduler) -> Result<Option<DllEvent>, CoreError<R::Error>> {
        let h = match pool.take_received() {
            Some(h) => h,
            None => {
                debug!("No received packet pending");
                return Ok(None);
            }
        };

        self.radio.set_idle().map_err(CoreError::Radio)?;
        pool.mark_processing(h)?;

        // Further frames are handled in their own task
        if pool.take_received().is_some() {
            sched.post(Task::ProcessReceived)?;
        }

        let scanning = matches!(self.state, DllState::ScanAutomation | DllState::ForegroundScan);
        if !scanning {
            warn!("Received frame while not scanning ({}), dropping", self.state);
            pool.release(h)?;
            return Ok(None);
        }

        let accepted = self.filter(pool, h)?;

        // Resume receiving
        self.radio.set_rx(None, RxMode::Packets).map_err(CoreError::Radio)?;

        match accepted {
            true => {
                self.stats.rx_count += 1;
                Ok(Some(DllEvent::Received(h)))
            },
            false => {
                pool.release(h)?;
                Ok(None)
            }
        }
    }

    /// Decode a received frame, returning whether it is for this device
    fn filter<const N: usize>(&mut self, pool: &mut PacketPool<N>, h: PacketHandle) -> Result<bool, CoreError<R::Error>> {
        let p = pool.get_mut(h)?;

        let offset = match p.disassemble_dll() {
            Ok(o) => o,
            Err(e) => return self.invalid_frame(e),
        };

        let hdr = &p.dll_header;
        trace!("RX DLL header: {:?} (rssi: {})", hdr, p.frame.rx_meta.rssi);

        if hdr.subnet != self.profile.subnet {
            debug!("Subnet 0x{:02x} does not match access profile, skipping packet", hdr.subnet);
            self.stats.rx_filtered += 1;
            return Ok(false);
        }

        let addressed = match &hdr.target {
            AddresseeId::Broadcast => true,
            AddresseeId::Vid(v) => self.identity.vid.as_ref() == Some(v),
            AddresseeId::Uid(u) => u == &self.identity.uid,
        };
        if !addressed {
            debug!("Device ID filtering failed, skipping packet");
            self.stats.rx_filtered += 1;
            return Ok(false);
        }

        if let Err(e) = p.disassemble_upper(offset) {
            return self.invalid_frame(e);
        }

        Ok(true)
    }

    fn invalid_frame(&mut self, e: FrameError) -> Result<bool, CoreError<R::Error>> {
        if e.is_unsupported() {
            return Err(CoreError::Frame(e));
        }

        debug!("Invalid frame ({:?}), skipping packet", e);
        self.stats.rx_invalid += 1;

        Ok(false)
    }
}
