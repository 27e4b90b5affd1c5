//! Fixed capacity packet pool
//!
//! Packets are handed out by [`PacketHandle`] and move through
//! `Free -> Allocated -> Received -> Processing -> Free`. Radio drivers
//! borrow frame buffers via the [`FrameAllocator`] trait using generation
//! tagged [`FrameToken`]s so stale tokens cannot alias re-used slots.
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use log::{trace, warn};
use strum::Display;

use crate::hw::FrameAllocator;
use crate::packet::{Packet, RawFrame};

/// Handle to a packet held in a [`PacketPool`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacketHandle(usize);

impl PacketHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Token identifying a frame buffer lent to the radio driver
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameToken {
    slot: usize,
    generation: u16,
}

/// Lifecycle state of a pool slot
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotStatus {
    Free,
    Allocated,
    Received,
    Processing,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PoolError {
    /// No free slots remaining
    Exhausted,
    /// Handle does not refer to a slot in this pool
    InvalidHandle(PacketHandle),
    /// Slot is not in a status permitting the operation
    InvalidStatus(PacketHandle, SlotStatus),
    /// Frame token is stale or unknown
    UnknownFrame(FrameToken),
}

/// Pool of `N` statically allocated packets
pub struct PacketPool<const N: usize> {
    packets: [Packet; N],
    status: [SlotStatus; N],
    generation: [u16; N],
}

impl <const N: usize> Default for PacketPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl <const N: usize> PacketPool<N> {
    pub fn new() -> Self {
        Self {
            packets: core::array::from_fn(|_| Packet::default()),
            status: [SlotStatus::Free; N],
            generation: [0u16; N],
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.status.iter().filter(|s| **s == SlotStatus::Free).count()
    }

    pub fn status(&self, h: PacketHandle) -> Result<SlotStatus, PoolError> {
        self.status.get(h.0).copied().ok_or(PoolError::InvalidHandle(h))
    }

    fn expect_status(&self, h: PacketHandle, expected: &[SlotStatus]) -> Result<(), PoolError> {
        let s = self.status(h)?;
        if !expected.contains(&s) {
            return Err(PoolError::InvalidStatus(h, s));
        }
        Ok(())
    }

    /// Allocate a free packet
    pub fn allocate(&mut self) -> Result<PacketHandle, PoolError> {
        let i = self.status.iter()
            .position(|s| *s == SlotStatus::Free)
            .ok_or(PoolError::Exhausted)?;

        self.status[i] = SlotStatus::Allocated;
        self.generation[i] = self.generation[i].wrapping_add(1);

        trace!("Pool allocate {}", i);

        Ok(PacketHandle(i))
    }

    /// Return a packet to the pool, clearing its contents
    pub fn release(&mut self, h: PacketHandle) -> Result<(), PoolError> {
        let s = self.status(h)?;
        if s == SlotStatus::Free {
            warn!("Pool double free of {}", h.0);
            return Err(PoolError::InvalidStatus(h, s));
        }

        trace!("Pool release {} ({})", h.0, s);

        self.packets[h.0] = Packet::default();
        self.status[h.0] = SlotStatus::Free;

        Ok(())
    }

    /// Mark an allocated packet as holding a received frame
    pub fn mark_received(&mut self, h: PacketHandle) -> Result<(), PoolError> {
        self.expect_status(h, &[SlotStatus::Allocated])?;
        self.status[h.0] = SlotStatus::Received;
        Ok(())
    }

    /// Find the oldest (lowest index) packet awaiting processing
    pub fn take_received(&self) -> Option<PacketHandle> {
        self.status.iter()
            .position(|s| *s == SlotStatus::Received)
            .map(PacketHandle)
    }

    /// Mark a received (or locally allocated) packet as under processing
    pub fn mark_processing(&mut self, h: PacketHandle) -> Result<(), PoolError> {
        self.expect_status(h, &[SlotStatus::Received, SlotStatus::Allocated])?;
        self.status[h.0] = SlotStatus::Processing;
        Ok(())
    }

    /// Resolve the packet owning a frame lent to the radio
    pub fn find_by_frame(&self, token: FrameToken) -> Option<PacketHandle> {
        if token.slot >= N || self.generation[token.slot] != token.generation {
            return None;
        }
        match self.status[token.slot] {
            SlotStatus::Free => None,
            _ => Some(PacketHandle(token.slot)),
        }
    }

    /// Fetch the frame token for an allocated packet (for transmission)
    pub fn frame_token(&self, h: PacketHandle) -> Result<FrameToken, PoolError> {
        self.expect_status(h, &[SlotStatus::Allocated, SlotStatus::Processing])?;
        Ok(FrameToken{ slot: h.0, generation: self.generation[h.0] })
    }

    pub fn get(&self, h: PacketHandle) -> Result<&Packet, PoolError> {
        match self.status(h)? {
            SlotStatus::Free => Err(PoolError::InvalidStatus(h, SlotStatus::Free)),
            _ => Ok(&self.packets[h.0]),
        }
    }

    pub fn get_mut(&mut self, h: PacketHandle) -> Result<&mut Packet, PoolError> {
        match self.status(h)? {
            SlotStatus::Free => Err(PoolError::InvalidStatus(h, SlotStatus::Free)),
            _ => Ok(&mut self.packets[h.0]),
        }
    }
}

impl <const N: usize> FrameAllocator for PacketPool<N> {
    fn alloc_frame(&mut self) -> Result<FrameToken, PoolError> {
        let h = self.allocate()?;
        Ok(FrameToken{ slot: h.0, generation: self.generation[h.0] })
    }

    fn frame_mut(&mut self, token: FrameToken) -> Option<&mut RawFrame> {
        let h = self.find_by_frame(token)?;
        Some(&mut self.packets[h.0].frame)
    }

    fn release_frame(&mut self, token: FrameToken) -> Result<(), PoolError> {
        let h = self.find_by_frame(token).ok_or(PoolError::UnknownFrame(token))?;
        self.release(h)
    }
}
