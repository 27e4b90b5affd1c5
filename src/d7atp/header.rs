//! Transport layer header
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use bitflags::bitflags;

use crate::packet::{FrameError, Unsupported};

bitflags! {
    /// Transport control byte
    pub struct TpCtrl: u8 {
        /// First transaction of a dialog
        const START = 0x80;
        /// Last transaction of a dialog
        const STOP = 0x40;
        const TIMEOUT_TEMPLATE = 0x20;
        /// Multi-segment acknowledgement bitmap follows the ack template
        const ACK_BITMAP = 0x10;
        const ACK_NOT_VOID = 0x08;
        const ACK_RECORD = 0x04;
        const ACK_REQUESTED = 0x02;
        /// Ack template present
        const ACK_TEMPLATE = 0x01;
    }
}

/// Acknowledgement template
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AckTemplate {
    pub transaction_id_start: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TpHeader {
    pub ctrl: TpCtrl,
    pub dialog_id: u8,
    pub transaction_id: u8,
    pub ack_template: Option<AckTemplate>,
}

impl Default for TpHeader {
    fn default() -> Self {
        Self {
            ctrl: TpCtrl::empty(),
            dialog_id: 0,
            transaction_id: 0,
            ack_template: None,
        }
    }
}

fn check_supported(ctrl: TpCtrl) -> Result<(), FrameError> {
    if ctrl.contains(TpCtrl::TIMEOUT_TEMPLATE) {
        return Err(FrameError::Unsupported(Unsupported::TimeoutTemplate));
    }
    if ctrl.contains(TpCtrl::ACK_BITMAP) {
        return Err(FrameError::Unsupported(Unsupported::AckBitmap));
    }
    Ok(())
}

impl TpHeader {
    pub fn encode(&self, buff: &mut [u8]) -> Result<usize, FrameError> {
        check_supported(self.ctrl)?;

        let mut ctrl = self.ctrl;
        ctrl.set(TpCtrl::ACK_TEMPLATE, self.ack_template.is_some());

        let len = 3 + self.ack_template.map(|_| 1).unwrap_or(0);
        if buff.len() < len {
            return Err(FrameError::BufferFull);
        }

        buff[0] = ctrl.bits();
        buff[1] = self.dialog_id;
        buff[2] = self.transaction_id;

        if let Some(t) = &self.ack_template {
            buff[3] = t.transaction_id_start;
        }

        Ok(len)
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), FrameError> {
        if buff.len() < 3 {
            return Err(FrameError::NotEnoughBytes);
        }

        let ctrl = TpCtrl::from_bits_truncate(buff[0]);
        check_supported(ctrl)?;

        let mut h = Self {
            ctrl,
            dialog_id: buff[1],
            transaction_id: buff[2],
            ack_template: None,
        };

        if !ctrl.contains(TpCtrl::ACK_TEMPLATE) {
            return Ok((h, 3));
        }

        if buff.len() < 4 {
            return Err(FrameError::NotEnoughBytes);
        }
        h.ack_template = Some(AckTemplate{ transaction_id_start: buff[3] });

        Ok((h, 4))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_decode_header() {
        let tests = &[
            (
                TpHeader{ ctrl: TpCtrl::START | TpCtrl::STOP | TpCtrl::ACK_REQUESTED, dialog_id: 0x10, transaction_id: 0x20, ack_template: None },
                &[0xc2, 0x10, 0x20][..],
            ),
            (
                TpHeader{ ctrl: TpCtrl::STOP | TpCtrl::ACK_TEMPLATE, dialog_id: 0x10, transaction_id: 0x20, ack_template: Some(AckTemplate{ transaction_id_start: 0x20 }) },
                &[0x41, 0x10, 0x20, 0x20][..],
            ),
        ];

        for (h, encoded) in tests.iter() {
            let mut buff = [0u8; 8];
            let n = h.encode(&mut buff).unwrap();
            assert_eq!(&buff[..n], *encoded);

            let (d, n) = TpHeader::decode(encoded).unwrap();
            assert_eq!(n, encoded.len());
            assert_eq!(&d, h);
        }
    }

    #[test]
    fn missing_ack_template() {
        assert_eq!(TpHeader::decode(&[0x01, 0x10, 0x20]), Err(FrameError::NotEnoughBytes));
    }

    #[test]
    fn unsupported_features() {
        assert_eq!(
            TpHeader::decode(&[0x20, 0x10, 0x20]),
            Err(FrameError::Unsupported(Unsupported::TimeoutTemplate))
        );
        assert_eq!(
            TpHeader::decode(&[0x11, 0x10, 0x20, 0x20]),
            Err(FrameError::Unsupported(Unsupported::AckBitmap))
        );

        let h = TpHeader{ ctrl: TpCtrl::TIMEOUT_TEMPLATE, ..Default::default() };
        assert_eq!(h.encode(&mut [0u8; 8]), Err(FrameError::Unsupported(Unsupported::TimeoutTemplate)));
    }
}
