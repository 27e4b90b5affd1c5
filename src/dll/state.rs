//! Data link layer states and transition table
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use strum::{Display, EnumIter};

use crate::error::InvalidTransition;

/// Data link layer state
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumIter)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DllState {
    Idle,
    ScanAutomation,
    ForegroundScan,
    BackgroundScan,
    CsmaStarted,
    CsmaRetry,
    Cca1,
    Cca2,
    /// Momentary failure signal, resolves to [`DllState::Idle`]
    CcaFail,
    TxForeground,
    TxForegroundCompleted,
}

impl DllState {
    /// Check whether `from -> to` is permitted
    pub fn is_legal(from: DllState, to: DllState) -> bool {
        use DllState::*;

        match to {
            CsmaStarted => matches!(from, Idle | ScanAutomation | ForegroundScan),
            CsmaRetry => matches!(from, Cca1 | Cca2),
            Cca1 => matches!(from, CsmaStarted | CsmaRetry),
            Cca2 => matches!(from, Cca1),
            TxForeground => matches!(from, Cca2),
            TxForegroundCompleted => matches!(from, TxForeground),
            ForegroundScan => matches!(from, Idle | ScanAutomation | TxForegroundCompleted),
            Idle => matches!(from, ForegroundScan),
            ScanAutomation => matches!(from, ForegroundScan | Idle),
            CcaFail => matches!(from, Cca1 | Cca2 | CsmaStarted | CsmaRetry),
            BackgroundScan => false,
        }
    }

    /// Apply a transition, returning the resulting state
    pub fn transition(from: DllState, to: DllState) -> Result<DllState, InvalidTransition<DllState>> {
        if !Self::is_legal(from, to) {
            return Err(InvalidTransition{ from, to });
        }

        match to {
            DllState::CcaFail => Ok(DllState::Idle),
            _ => Ok(to),
        }
    }
}

#[cfg(test)]
mod test {
    use strum::IntoEnumIterator;

    use super::*;
    use DllState::*;

    const LEGAL: &[(DllState, DllState)] = &[
        (Idle, CsmaStarted),
        (ScanAutomation, CsmaStarted),
        (ForegroundScan, CsmaStarted),
        (Cca1, CsmaRetry),
        (Cca2, CsmaRetry),
        (CsmaStarted, Cca1),
        (CsmaRetry, Cca1),
        (Cca1, Cca2),
        (Cca2, TxForeground),
        (TxForeground, TxForegroundCompleted),
        (Idle, ForegroundScan),
        (ScanAutomation, ForegroundScan),
        (TxForegroundCompleted, ForegroundScan),
        (ForegroundScan, Idle),
        (ForegroundScan, ScanAutomation),
        (Idle, ScanAutomation),
        (Cca1, CcaFail),
        (Cca2, CcaFail),
        (CsmaStarted, CcaFail),
        (CsmaRetry, CcaFail),
    ];

    #[test]
    fn transition_table() {
        for from in DllState::iter() {
            for to in DllState::iter() {
                let legal = LEGAL.contains(&(from, to));
                let res = DllState::transition(from, to);

                match (legal, res) {
                    (true, Ok(s)) if to == CcaFail => assert_eq!(s, Idle),
                    (true, Ok(s)) => assert_eq!(s, to),
                    (false, Err(e)) => assert_eq!(e, InvalidTransition{ from, to }),
                    (_, r) => panic!("Transition {} -> {} unexpected result: {:?}", from, to, r),
                }
            }
        }
    }

    #[test]
    fn cca_fail_is_not_a_resting_state() {
        for from in DllState::iter() {
            assert!(!DllState::is_legal(CcaFail, from));
        }
    }
}
