//! D7AP crate prelude
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

pub use crate::{Radio, Ts};

pub use crate::stack::Stack;

pub use crate::error::CoreError;
pub use crate::timer::{Timer as StackTimer};

pub use crate::config::{AccessProfile, ConfigStore, CsmaCaMode, DeviceIdentity, DllConfig, StackConfig, StaticConfig, TransportConfig};

pub use crate::hw::{HwRadio, RadioAdapter, RxMode};

pub use crate::packet::{Addressee, AddresseeId, Packet};
pub use crate::pool::PacketHandle;

pub use crate::dll::{DllState, DllStats};
pub use crate::d7atp::TpState;

pub use crate::session::{ResponseMode, RxDisposition, Session, SessionQos};
