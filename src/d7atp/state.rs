//! Transport layer dialog states and transition table
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use strum::{Display, EnumIter};

use crate::error::InvalidTransition;

/// Transport dialog state
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumIter)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TpState {
    Idle,
    MasterRequestPeriod,
    MasterResponsePeriod,
    SlaveSendingResponse,
    SlaveResponsePeriod,
    /// Reserved, not entered
    Terminated,
}

impl TpState {
    /// Check whether `from -> to` is permitted
    pub fn is_legal(from: TpState, to: TpState) -> bool {
        use TpState::*;

        match to {
            MasterRequestPeriod => from == Idle,
            MasterResponsePeriod => from == MasterRequestPeriod,
            // Slaves may respond again while still in the response period
            SlaveSendingResponse => matches!(from, Idle | SlaveResponsePeriod),
            SlaveResponsePeriod => from == SlaveSendingResponse,
            Idle => matches!(from, MasterRequestPeriod | MasterResponsePeriod | SlaveSendingResponse | SlaveResponsePeriod),
            Terminated => false,
        }
    }

    pub fn transition(from: TpState, to: TpState) -> Result<TpState, InvalidTransition<TpState>> {
        match Self::is_legal(from, to) {
            true => Ok(to),
            false => Err(InvalidTransition{ from, to }),
        }
    }

    /// Awaiting responses or retransmissions
    pub fn is_response_period(&self) -> bool {
        matches!(self, TpState::MasterResponsePeriod | TpState::SlaveResponsePeriod)
    }
}
