//! DASH7 packet object and frame assembly
//!
//! A [`Packet`] owns its raw radio frame alongside the decoded per-layer
//! headers. On the wire a frame is laid out as:
//!
//! ```text
//! | len (1) | DLL header | NP header | TP header | payload | CRC16 (2) |
//! ```
//!
//! where `len` counts every byte following it (including the CRC).
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use heapless::Vec;

use crate::Ts;
use crate::hw::TxConfig;
use crate::dll::header::DllHeader;
use crate::d7anp::NpHeader;
use crate::d7atp::header::TpHeader;

/// Raw frame buffer size (the length byte limits frames to 256 bytes)
pub const MAX_FRAME_LEN: usize = 256;

/// Maximum application payload carried in a single frame
pub const MAX_PAYLOAD_LEN: usize = 224;

/// Length byte + CRC
const FRAME_OVERHEAD: usize = 3;

/// Frame encode / decode errors
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Frame ended before the expected field
    NotEnoughBytes,
    /// Encoded frame does not fit the buffer
    BufferFull,
    /// Length byte does not match the received frame
    InvalidLength,
    /// CRC mismatch
    InvalidCrc,
    /// Frame uses a protocol feature this stack does not implement
    Unsupported(Unsupported),
}

/// Protocol features recognised on the wire but not implemented
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Unsupported {
    /// Transport timeout template
    TimeoutTemplate,
    /// Multi-segment acknowledgement bitmap
    AckBitmap,
    /// Network layer security
    Nls,
}

impl FrameError {
    /// Unsupported features indicate a broken protocol assumption rather
    /// than a corrupt or foreign frame
    pub fn is_unsupported(&self) -> bool {
        matches!(self, FrameError::Unsupported(_))
    }
}

/// Addressee identifier
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddresseeId {
    /// No identifier (broadcast)
    Broadcast,
    /// 2-byte virtual id
    Vid([u8; 2]),
    /// 8-byte unique id
    Uid([u8; 8]),
}

impl AddresseeId {
    pub fn is_broadcast(&self) -> bool {
        *self == AddresseeId::Broadcast
    }

    pub fn is_vid(&self) -> bool {
        matches!(self, AddresseeId::Vid(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AddresseeId::Broadcast => &[],
            AddresseeId::Vid(v) => v,
            AddresseeId::Uid(u) => u,
        }
    }

    /// Encode the identifier bytes (if any)
    pub fn encode(&self, buff: &mut [u8]) -> Result<usize, FrameError> {
        let b = self.as_bytes();
        if buff.len() < b.len() {
            return Err(FrameError::BufferFull);
        }

        buff[..b.len()].copy_from_slice(b);

        Ok(b.len())
    }

    /// Decode a 2 (`vid`) or 8 byte identifier
    pub fn decode(buff: &[u8], vid: bool) -> Result<(Self, usize), FrameError> {
        if vid {
            if buff.len() < 2 {
                return Err(FrameError::NotEnoughBytes);
            }
            Ok((AddresseeId::Vid([buff[0], buff[1]]), 2))
        } else {
            if buff.len() < 8 {
                return Err(FrameError::NotEnoughBytes);
            }
            let mut uid = [0u8; 8];
            uid.copy_from_slice(&buff[..8]);
            Ok((AddresseeId::Uid(uid), 8))
        }
    }
}

/// Destination (or origin) identity of a frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Addressee {
    /// Access class (4 bits)
    pub access_class: u8,
    pub id: AddresseeId,
}

impl Addressee {
    pub fn broadcast(access_class: u8) -> Self {
        Self { access_class, id: AddresseeId::Broadcast }
    }
}

/// Receive metadata attached by the radio driver
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct RxMeta {
    pub timestamp: Ts,
    pub rssi: i16,
}

/// Transmit metadata attached by the data link layer
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TxMeta {
    pub cfg: Option<TxConfig>,
}

/// Statically sized radio frame buffer
#[derive(Clone, Debug)]
pub struct RawFrame {
    data: [u8; MAX_FRAME_LEN],
    len: usize,
    pub rx_meta: RxMeta,
    pub tx_meta: TxMeta,
}

impl Default for RawFrame {
    fn default() -> Self {
        Self {
            data: [0u8; MAX_FRAME_LEN],
            len: 0,
            rx_meta: RxMeta::default(),
            tx_meta: TxMeta::default(),
        }
    }
}

impl RawFrame {
    /// Frame contents
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Whole underlying buffer, for drivers filling received frames
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Set the number of valid bytes in the buffer
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(MAX_FRAME_LEN);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Value of the length byte, ie. the number of bytes following it
    pub fn length_field(&self) -> usize {
        match self.len {
            0 => 0,
            _ => self.data[0] as usize,
        }
    }

    /// Load a complete frame into the buffer
    pub fn load(&mut self, d: &[u8]) -> Result<(), FrameError> {
        if d.len() > MAX_FRAME_LEN {
            return Err(FrameError::BufferFull);
        }

        self.data[..d.len()].copy_from_slice(d);
        self.len = d.len();

        Ok(())
    }
}

/// Packet object, owns a radio frame and its decoded headers
#[derive(Clone, Debug, Default)]
pub struct Packet {
    pub frame: RawFrame,

    pub dll_header: DllHeader,

    pub np_header: NpHeader,

    pub tp_header: TpHeader,

    /// Destination resolved by the transport layer
    pub addressee: Option<Addressee>,

    payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl Packet {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, body: &[u8]) -> Result<(), FrameError> {
        self.payload = Vec::from_slice(body).map_err(|_| FrameError::BufferFull)?;

        Ok(())
    }

    /// Encode headers and payload into the raw frame, returning the frame length
    pub fn assemble(&mut self) -> Result<usize, FrameError> {
        let Packet{ frame, dll_header, np_header, tp_header, payload, .. } = self;
        let buff = frame.buffer_mut();

        // Length is filled in once known
        let mut n = 1;

        n += dll_header.encode(&mut buff[n..])?;
        n += np_header.encode(&mut buff[n..])?;
        n += tp_header.encode(&mut buff[n..])?;

        if n + payload.len() + 2 > MAX_FRAME_LEN {
            return Err(FrameError::BufferFull);
        }

        buff[n..n + payload.len()].copy_from_slice(payload);
        n += payload.len();

        buff[0] = (n + 2 - 1) as u8;

        let crc = crc16(&buff[..n]);
        buff[n] = (crc >> 8) as u8;
        buff[n + 1] = crc as u8;
        n += 2;

        frame.set_len(n);

        Ok(n)
    }

    /// Check frame length and CRC, returning the end of the frame body
    fn check_frame(&self) -> Result<usize, FrameError> {
        let data = self.frame.data();
        if data.len() < FRAME_OVERHEAD {
            return Err(FrameError::NotEnoughBytes);
        }

        let total = data[0] as usize + 1;
        if total < FRAME_OVERHEAD || total > data.len() {
            return Err(FrameError::InvalidLength);
        }

        let body_end = total - 2;
        let crc = ((data[body_end] as u16) << 8) | data[body_end + 1] as u16;
        if crc != crc16(&data[..body_end]) {
            return Err(FrameError::InvalidCrc);
        }

        Ok(body_end)
    }

    /// Validate the frame and decode the DLL header, returning the offset
    /// of the network header
    pub fn disassemble_dll(&mut self) -> Result<usize, FrameError> {
        let body_end = self.check_frame()?;

        let (hdr, n) = DllHeader::decode(&self.frame.data()[1..body_end])?;
        self.dll_header = hdr;

        Ok(1 + n)
    }

    /// Decode network and transport headers and the payload following
    /// the DLL header
    pub fn disassemble_upper(&mut self, offset: usize) -> Result<(), FrameError> {
        let body_end = self.check_frame()?;
        if offset > body_end {
            return Err(FrameError::NotEnoughBytes);
        }

        let body = &self.frame.data()[offset..body_end];

        let (np, n1) = NpHeader::decode(body)?;
        let (tp, n2) = TpHeader::decode(&body[n1..])?;

        self.payload = Vec::from_slice(&body[n1 + n2..]).map_err(|_| FrameError::BufferFull)?;
        self.np_header = np;
        self.tp_header = tp;

        Ok(())
    }

    /// Decode a complete frame
    pub fn disassemble(&mut self) -> Result<(), FrameError> {
        let offset = self.disassemble_dll()?;
        self.disassemble_upper(offset)
    }
}

/// CRC-16/CCITT (poly 0x1021, init 0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::d7atp::header::{TpCtrl, AckTemplate};

    fn packet(target: AddresseeId, ack: bool) -> Packet {
        let mut p = Packet::default();

        p.dll_header = DllHeader {
            subnet: 0x05,
            eirp_index: 3,
            target,
        };
        p.np_header = NpHeader {
            nls: false,
            origin: Addressee{ access_class: 2, id: AddresseeId::Uid([1, 2, 3, 4, 5, 6, 7, 8]) },
        };

        let mut ctrl = TpCtrl::START | TpCtrl::STOP;
        ctrl.set(TpCtrl::ACK_TEMPLATE, ack);
        p.tp_header = TpHeader {
            ctrl,
            dialog_id: 0x12,
            transaction_id: 0x34,
            ack_template: match ack {
                true => Some(AckTemplate{ transaction_id_start: 0x34 }),
                false => None,
            },
        };

        p.set_payload(&[0xaa, 0xbb, 0xcc]).unwrap();

        p
    }

    #[test]
    fn crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn frame_round_trip() {
        let cases = [
            (AddresseeId::Broadcast, false),
            (AddresseeId::Vid([0xab, 0xcd]), true),
            (AddresseeId::Uid([8, 7, 6, 5, 4, 3, 2, 1]), false),
            (AddresseeId::Uid([8, 7, 6, 5, 4, 3, 2, 1]), true),
        ];

        for (target, ack) in cases.iter() {
            let mut tx = packet(*target, *ack);
            let n = tx.assemble().unwrap();

            assert_eq!(tx.frame.length_field(), n - 1);

            let mut rx = Packet::default();
            rx.frame.load(tx.frame.data()).unwrap();
            rx.disassemble().unwrap();

            assert_eq!(rx.dll_header, tx.dll_header);
            assert_eq!(rx.np_header, tx.np_header);
            assert_eq!(rx.tp_header, tx.tp_header);
            assert_eq!(rx.payload(), tx.payload());
        }
    }

    #[test]
    fn corrupt_frame_rejected() {
        let mut tx = packet(AddresseeId::Broadcast, false);
        let n = tx.assemble().unwrap();

        let mut d = [0u8; MAX_FRAME_LEN];
        d[..n].copy_from_slice(tx.frame.data());
        d[4] ^= 0x01;

        let mut rx = Packet::default();
        rx.frame.load(&d[..n]).unwrap();
        assert_eq!(rx.disassemble(), Err(FrameError::InvalidCrc));

        let mut rx = Packet::default();
        rx.frame.load(&tx.frame.data()[..n - 1]).unwrap();
        assert_eq!(rx.disassemble(), Err(FrameError::InvalidLength));
    }
}
