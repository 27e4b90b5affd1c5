//! Stack error types
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use crate::dll::DllState;
use crate::d7atp::TpState;
use crate::packet::FrameError;
use crate::pool::PoolError;
use crate::sched::SchedError;

/// Attempted state machine transition not permitted by the transition table
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidTransition<S> {
    pub from: S,
    pub to: S,
}

/// Stack errors
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError<E> {
    /// Wrapper for unhandled / underlying radio errors
    Radio(E),

    /// Packet pool misuse or exhaustion
    Pool(PoolError),

    /// Scheduler queue overflow
    Sched(SchedError),

    /// Illegal data link layer state change
    DllTransition(InvalidTransition<DllState>),

    /// Illegal transport layer state change
    TransportTransition(InvalidTransition<TpState>),

    /// Frame could not be encoded or uses unsupported features
    Frame(FrameError),

    /// Configured access profile index does not exist
    NoAccessProfile(u8),

    /// Operation requires a packet that is not present
    NoPacket,

    /// A previous fatal error stopped the stack
    Faulted,
}

impl <E> CoreError<E> {
    /// Fatal errors indicate broken protocol invariants and stop the stack,
    /// radio errors are reported to the caller and may be retried
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CoreError::Radio(_))
    }

    /// Drop the radio error type, used when latching faults
    pub fn discard_radio(&self) -> Option<CoreError<()>> {
        let e = match self {
            CoreError::Radio(_) => return None,
            CoreError::Pool(e) => CoreError::Pool(*e),
            CoreError::Sched(e) => CoreError::Sched(*e),
            CoreError::DllTransition(e) => CoreError::DllTransition(*e),
            CoreError::TransportTransition(e) => CoreError::TransportTransition(*e),
            CoreError::Frame(e) => CoreError::Frame(*e),
            CoreError::NoAccessProfile(i) => CoreError::NoAccessProfile(*i),
            CoreError::NoPacket => CoreError::NoPacket,
            CoreError::Faulted => CoreError::Faulted,
        };
        Some(e)
    }
}

impl <E> From<PoolError> for CoreError<E> {
    fn from(e: PoolError) -> Self {
        CoreError::Pool(e)
    }
}

impl <E> From<SchedError> for CoreError<E> {
    fn from(e: SchedError) -> Self {
        CoreError::Sched(e)
    }
}

impl <E> From<FrameError> for CoreError<E> {
    fn from(e: FrameError) -> Self {
        CoreError::Frame(e)
    }
}

impl <E> From<InvalidTransition<DllState>> for CoreError<E> {
    fn from(e: InvalidTransition<DllState>) -> Self {
        CoreError::DllTransition(e)
    }
}

impl <E> From<InvalidTransition<TpState>> for CoreError<E> {
    fn from(e: InvalidTransition<TpState>) -> Self {
        CoreError::TransportTransition(e)
    }
}
