//! Data link layer frame header
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use bitflags::bitflags;

use crate::packet::{AddresseeId, FrameError};

bitflags! {
    /// DLL control byte flags, the low 6 bits carry the EIRP index
    pub struct DllCtrl: u8 {
        const TARGET_ADDRESS = 0x80;
        const VID = 0x40;
    }
}

const EIRP_INDEX_MASK: u8 = 0x3F;

/// Convert a transmit power in dBm to an EIRP index (`eirp = 2 * index - 40`)
pub fn eirp_index(eirp: i8) -> u8 {
    let i = (eirp as i16 + 40) / 2;
    i.clamp(0, EIRP_INDEX_MASK as i16) as u8
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DllHeader {
    pub subnet: u8,
    /// EIRP index (6 bits)
    pub eirp_index: u8,
    pub target: AddresseeId,
}

impl Default for DllHeader {
    fn default() -> Self {
        Self {
            subnet: 0,
            eirp_index: 0,
            target: AddresseeId::Broadcast,
        }
    }
}

impl DllHeader {
    pub fn ctrl(&self) -> DllCtrl {
        match self.target {
            AddresseeId::Broadcast => DllCtrl::empty(),
            AddresseeId::Vid(_) => DllCtrl::TARGET_ADDRESS | DllCtrl::VID,
            AddresseeId::Uid(_) => DllCtrl::TARGET_ADDRESS,
        }
    }

    pub fn encode(&self, buff: &mut [u8]) -> Result<usize, FrameError> {
        if buff.len() < 2 {
            return Err(FrameError::BufferFull);
        }

        buff[0] = self.subnet;
        buff[1] = self.ctrl().bits() | (self.eirp_index & EIRP_INDEX_MASK);

        let n = self.target.encode(&mut buff[2..])?;

        Ok(2 + n)
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), FrameError> {
        if buff.len() < 2 {
            return Err(FrameError::NotEnoughBytes);
        }

        let subnet = buff[0];
        let ctrl = DllCtrl::from_bits_truncate(buff[1]);
        let eirp_index = buff[1] & EIRP_INDEX_MASK;

        let (target, n) = match ctrl.contains(DllCtrl::TARGET_ADDRESS) {
            true => AddresseeId::decode(&buff[2..], ctrl.contains(DllCtrl::VID))?,
            false => (AddresseeId::Broadcast, 0),
        };

        Ok((Self{ subnet, eirp_index, target }, 2 + n))
    }
}
