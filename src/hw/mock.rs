//! Simulated radio for tests and demos
//!
//! [`SimRadio`] completes transmissions immediately, reports scripted RSSI
//! samples for channel assessment and can be linked to a peer with
//! [`SimRadio::pair`] so frames sent by one radio arrive at the other.
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::vec::Vec;

use log::{debug, trace};

use crate::Ts;
use crate::error::CoreError;
use crate::packet::{RawFrame, RxMeta};
use crate::pool::FrameToken;

use super::{FrameAllocator, HwRadio, RadioEvent, RxConfig, RxMode};

/// Default RSSI reported when no samples are scripted (clear channel)
pub const SIM_NOISE_FLOOR: i16 = -120;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SimState {
    Idle,
    Receive(RxMode),
    Transmit(FrameToken),
}

#[derive(Debug)]
struct Inner {
    state: SimState,
    rx_cfg: Option<RxConfig>,
    rssi: VecDeque<i16>,
    noise_floor: i16,
    incoming: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    rx_modes: Vec<RxMode>,
    peer: Option<Weak<Mutex<Inner>>>,
}

/// Simulated radio, clones share the same underlying device
#[derive(Clone, Debug)]
pub struct SimRadio {
    inner: Arc<Mutex<Inner>>,
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRadio {
    pub fn new() -> Self {
        let inner = Inner {
            state: SimState::Idle,
            rx_cfg: None,
            rssi: VecDeque::new(),
            noise_floor: SIM_NOISE_FLOOR,
            incoming: VecDeque::new(),
            sent: Vec::new(),
            rx_modes: Vec::new(),
            peer: None,
        };

        Self { inner: Arc::new(Mutex::new(inner)) }
    }

    /// Create a pair of radios sharing the same air interface
    pub fn pair() -> (Self, Self) {
        let (a, b) = (Self::new(), Self::new());

        a.lock().peer = Some(Arc::downgrade(&b.inner));
        b.lock().peer = Some(Arc::downgrade(&a.inner));

        (a, b)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Poisoning only occurs if a test already panicked
        match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }

    /// Queue RSSI samples for upcoming channel assessments
    pub fn push_rssi(&self, samples: &[i16]) {
        self.lock().rssi.extend(samples.iter().copied());
    }

    /// Set the RSSI reported once scripted samples are exhausted
    pub fn set_noise_floor(&self, rssi: i16) {
        self.lock().noise_floor = rssi;
    }

    /// Deliver a frame to this radio as if received over the air
    pub fn inject(&self, frame: &[u8]) {
        self.lock().incoming.push_back(frame.to_vec());
    }

    /// Frames transmitted so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Receive modes requested so far
    pub fn rx_modes(&self) -> Vec<RxMode> {
        self.lock().rx_modes.clone()
    }

    pub fn state(&self) -> SimState {
        self.lock().state
    }

    pub fn rx_config(&self) -> Option<RxConfig> {
        self.lock().rx_cfg
    }
}

impl HwRadio for SimRadio {
    type Error = Infallible;

    fn set_rx(&mut self, cfg: Option<&RxConfig>, mode: RxMode) -> Result<(), Self::Error> {
        let mut i = self.lock();

        if let Some(c) = cfg {
            i.rx_cfg = Some(*c);
        }

        i.rx_modes.push(mode);
        i.state = match mode {
            RxMode::Muted => SimState::Idle,
            _ => SimState::Receive(mode),
        };

        Ok(())
    }

    fn set_idle(&mut self) -> Result<(), Self::Error> {
        self.lock().state = SimState::Idle;
        Ok(())
    }

    fn send(&mut self, token: FrameToken, frame: &RawFrame) -> Result<(), Self::Error> {
        let mut i = self.lock();

        debug!("Sim transmit {:02x?}", frame.data());

        i.sent.push(frame.data().to_vec());
        i.state = SimState::Transmit(token);

        // Frames only reach a peer that is listening at the time of transmission
        if let Some(p) = i.peer.as_ref().and_then(|p| p.upgrade()) {
            let mut peer = match p.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };

            match peer.state {
                SimState::Receive(RxMode::Packets) => peer.incoming.push_back(frame.data().to_vec()),
                _ => debug!("Peer not receiving, frame lost"),
            }
        }

        Ok(())
    }

    fn poll<A: FrameAllocator>(&mut self, bufs: &mut A, now: Ts) -> Result<Option<RadioEvent>, CoreError<Self::Error>> {
        let mut i = self.lock();

        match i.state {
            SimState::Idle | SimState::Receive(RxMode::Muted) => Ok(None),
            SimState::Transmit(token) => {
                i.state = SimState::Idle;
                Ok(Some(RadioEvent::TransmitDone(token)))
            },
            SimState::Receive(RxMode::Rssi) => {
                let rssi = match i.rssi.pop_front() {
                    Some(r) => r,
                    None => i.noise_floor,
                };

                trace!("Sim rssi {}", rssi);

                i.state = SimState::Receive(RxMode::Muted);

                Ok(Some(RadioEvent::RssiValid(rssi)))
            },
            SimState::Receive(RxMode::Packets) => {
                let data = match i.incoming.pop_front() {
                    Some(d) => d,
                    None => return Ok(None),
                };

                let token = bufs.alloc_frame()?;
                let frame = bufs.frame_mut(token).ok_or(CoreError::NoPacket)?;

                frame.load(&data)?;
                frame.rx_meta = RxMeta{ timestamp: now, rssi: i.noise_floor };

                Ok(Some(RadioEvent::PacketReceived(token)))
            },
        }
    }
}
