//! DASH7 network layer header
//!
//! Only the origin identity template is supported, network layer security
//! and hopping are rejected.
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use bitflags::bitflags;

use crate::packet::{Addressee, AddresseeId, FrameError, Unsupported};

bitflags! {
    /// Network control byte flags, the low 4 bits carry the origin access class
    pub struct NpCtrl: u8 {
        const NLS = 0x80;
        const ORIGIN_ID = 0x20;
        const ORIGIN_VID = 0x10;
    }
}

const ACCESS_CLASS_MASK: u8 = 0x0F;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NpHeader {
    /// Network layer security enabled
    pub nls: bool,
    /// Origin template, a broadcast id omits the origin address
    pub origin: Addressee,
}

impl Default for NpHeader {
    fn default() -> Self {
        Self {
            nls: false,
            origin: Addressee::broadcast(0),
        }
    }
}

impl NpHeader {
    /// Header carrying an origin identity template
    pub fn with_origin(origin: Addressee) -> Self {
        Self { nls: false, origin }
    }

    pub fn ctrl(&self) -> NpCtrl {
        let mut c = match self.origin.id {
            AddresseeId::Broadcast => NpCtrl::empty(),
            AddresseeId::Vid(_) => NpCtrl::ORIGIN_ID | NpCtrl::ORIGIN_VID,
            AddresseeId::Uid(_) => NpCtrl::ORIGIN_ID,
        };
        c.set(NpCtrl::NLS, self.nls);
        c
    }

    pub fn encode(&self, buff: &mut [u8]) -> Result<usize, FrameError> {
        if self.nls {
            return Err(FrameError::Unsupported(Unsupported::Nls));
        }
        if buff.is_empty() {
            return Err(FrameError::BufferFull);
        }

        buff[0] = self.ctrl().bits() | (self.origin.access_class & ACCESS_CLASS_MASK);

        let n = self.origin.id.encode(&mut buff[1..])?;

        Ok(1 + n)
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), FrameError> {
        if buff.is_empty() {
            return Err(FrameError::NotEnoughBytes);
        }

        let ctrl = NpCtrl::from_bits_truncate(buff[0]);
        if ctrl.contains(NpCtrl::NLS) {
            return Err(FrameError::Unsupported(Unsupported::Nls));
        }

        let access_class = buff[0] & ACCESS_CLASS_MASK;

        let (id, n) = match ctrl.contains(NpCtrl::ORIGIN_ID) {
            true => AddresseeId::decode(&buff[1..], ctrl.contains(NpCtrl::ORIGIN_VID))?,
            false => (AddresseeId::Broadcast, 0),
        };

        Ok((Self{ nls: false, origin: Addressee{ access_class, id } }, 1 + n))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_decode_origin() {
        let tests = &[
            (NpHeader::default(), &[0x00][..]),
            (
                NpHeader::with_origin(Addressee{ access_class: 3, id: AddresseeId::Vid([0xaa, 0xbb]) }),
                &[0x33, 0xaa, 0xbb][..],
            ),
            (
                NpHeader::with_origin(Addressee{ access_class: 0x0f, id: AddresseeId::Uid([8, 7, 6, 5, 4, 3, 2, 1]) }),
                &[0x2f, 8, 7, 6, 5, 4, 3, 2, 1][..],
            ),
        ];

        for (h, encoded) in tests.iter() {
            let mut buff = [0u8; 16];
            let n = h.encode(&mut buff).unwrap();
            assert_eq!(&buff[..n], *encoded);

            let (d, n) = NpHeader::decode(encoded).unwrap();
            assert_eq!(n, encoded.len());
            assert_eq!(&d, h);
        }
    }

    #[test]
    fn security_unsupported() {
        assert_eq!(NpHeader::decode(&[0x80]), Err(FrameError::Unsupported(Unsupported::Nls)));

        let h = NpHeader{ nls: true, ..Default::default() };
        assert_eq!(h.encode(&mut [0u8; 4]), Err(FrameError::Unsupported(Unsupported::Nls)));
    }
}
