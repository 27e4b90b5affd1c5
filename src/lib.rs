//! DASH7 data link and transport engine
//!
//! Provides the media access (DLL / CSMA-CA) and transport dialog (D7ATP)
//! layers of a DASH7 stack, sharing a fixed packet pool and driven by a
//! cooperative task scheduler. Radio hardware, configuration storage and
//! the session layer are supplied by the caller via traits.
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

#![no_std]

use core::fmt::Debug;

use radio::{State, Transmit, Receive, Rssi, ReceiveInfo};

#[cfg(any(test, feature="std"))]
extern crate std;

pub mod timer;

pub mod sched;

pub mod config;

pub mod packet;

pub mod pool;

pub mod hw;

pub mod dll;

pub mod d7anp;

pub mod d7atp;

pub mod session;

pub mod stack;

pub mod error;

pub mod prelude;


/// Timestamps are 64-bit ticks (milliseconds)
pub type Ts = u64;

/// Radio interface combines the `radio` traits used by [`hw::RadioAdapter`]
pub trait Radio<S: radio::RadioState, I: radio::ReceiveInfo, E: Debug>: radio::State<State=S, Error=E> + radio::Transmit<Error=E> + radio::Receive<Info=I, Error=E> + radio::Rssi<Error=E> {}

/// Default Radio impl for radio devices
impl <T, S: radio::RadioState, I: ReceiveInfo, E: Debug> Radio<S, I, E> for T where
    T: State<State=S, Error=E> + Transmit<Error=E> + Receive<Info=I, Error=E> + Rssi<Error=E>,
{}
