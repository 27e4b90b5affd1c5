//! Radio driver interface
//!
//! The core drives the radio through [`HwRadio`]. Completion events are
//! collected by [`HwRadio::poll`], which runs in the "interrupt" side of the
//! stack: it may only fill pool buffers lent via [`FrameAllocator`] and
//! report a [`RadioEvent`], all protocol state changes happen later when
//! the stack runs the resulting tasks.
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use crate::Ts;
use crate::config::ChannelHeader;
use crate::error::CoreError;
use crate::packet::RawFrame;
use crate::pool::{FrameToken, PoolError};

pub mod adapter;
pub use adapter::RadioAdapter;

#[cfg(any(test, feature="mocks"))]
pub mod mock;

/// Physical channel
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelId {
    pub header: ChannelHeader,
    pub index: u16,
}

/// Receive configuration
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxConfig {
    pub channel: ChannelId,
}

/// Transmit configuration
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxConfig {
    pub channel: ChannelId,
    /// Transmit power in dBm
    pub eirp: i8,
}

/// Receiver mode
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxMode {
    /// Receive and report packets
    Packets,
    /// Report a single RSSI sample (clear channel assessment)
    Rssi,
    /// Receiver off
    Muted,
}

/// Radio completion events
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioEvent {
    /// A frame was written into the buffer identified by the token
    PacketReceived(FrameToken),
    /// RSSI sample requested via [`RxMode::Rssi`]
    RssiValid(i16),
    /// Transmission of the frame identified by the token completed
    TransmitDone(FrameToken),
}

/// Receive buffer provider, implemented by the packet pool
pub trait FrameAllocator {
    /// Lend a free frame buffer to the driver
    fn alloc_frame(&mut self) -> Result<FrameToken, PoolError>;

    /// Access a lent frame buffer
    fn frame_mut(&mut self, token: FrameToken) -> Option<&mut RawFrame>;

    /// Return an unused frame buffer
    fn release_frame(&mut self, token: FrameToken) -> Result<(), PoolError>;
}

/// Radio driver abstraction used by the data link layer
pub trait HwRadio {
    type Error: Debug;

    /// Configure and (re)start the receiver, `None` keeps the current configuration
    fn set_rx(&mut self, cfg: Option<&RxConfig>, mode: RxMode) -> Result<(), Self::Error>;

    /// Stop receiving / transmitting
    fn set_idle(&mut self) -> Result<(), Self::Error>;

    /// Start transmitting a frame, completion is reported by [`HwRadio::poll`]
    fn send(&mut self, token: FrameToken, frame: &RawFrame) -> Result<(), Self::Error>;

    /// Poll the radio for completion events
    fn poll<A: FrameAllocator>(&mut self, bufs: &mut A, now: Ts) -> Result<Option<RadioEvent>, CoreError<Self::Error>>;
}
