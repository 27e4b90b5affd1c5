//! Session layer interface
//!
//! The session layer originates dialogs and interprets their outcomes. It is
//! supplied by the caller, the transport layer notifies it via [`Session`].
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use strum::Display;

use crate::packet::Packet;
use crate::pool::PacketHandle;

/// Requested response mode for a dialog
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponseMode {
    /// No response expected
    None,
    /// Responses from all addressees
    All,
    /// Response from any addressee
    Any,
    /// Unacknowledged, no repetitions
    NoRepeat,
    /// Respond only on error
    OnError,
    /// Response from the preferred addressee
    Preferred,
}

impl ResponseMode {
    /// Whether requests in this mode set the ack-requested flag
    pub fn ack_requested(&self) -> bool {
        *self != ResponseMode::None
    }
}

/// Session quality of service settings
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionQos {
    pub resp_mode: ResponseMode,
    /// Responders with nothing to report still acknowledge
    pub ack_not_void: bool,
    /// Acknowledgement period in ticks
    pub ack_period: u8,
    pub retry_single: u8,
    pub retry_total: u8,
}

impl Default for SessionQos {
    fn default() -> Self {
        Self {
            resp_mode: ResponseMode::None,
            ack_not_void: false,
            ack_period: 1,
            retry_single: 0,
            retry_total: 0,
        }
    }
}

/// What to do with a received packet once the session layer has seen it
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxDisposition {
    /// Return the packet to the pool
    Release,
    /// Session keeps the packet and releases it later
    Retain,
    /// Turn the request into a response and transmit it
    Respond,
}

/// Session layer callbacks
pub trait Session {
    /// A packet sent by this node left the radio
    fn packet_transmitted(&mut self, handle: PacketHandle, packet: &Packet);

    /// Channel access for an outgoing packet completed
    fn channel_access_completed(&mut self, succeeded: bool);

    /// The transaction response period elapsed without further responses
    fn response_period_elapsed(&mut self);

    /// A packet addressed to this node was received
    fn process_received_packet(&mut self, handle: PacketHandle, packet: &mut Packet) -> RxDisposition;
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::vec::Vec;

    use crate::d7atp::header::TpHeader;
    use crate::packet::{AddresseeId, Packet};
    use crate::pool::PacketHandle;

    use super::{RxDisposition, Session};

    /// Session events recorded by [`RecordingSession`]
    #[derive(Clone, Debug, PartialEq)]
    pub enum SessionEvent {
        Transmitted(TpHeader),
        ChannelAccess(bool),
        ResponsePeriodElapsed,
        Received{ origin: AddresseeId, header: TpHeader, payload: Vec<u8> },
    }

    /// Session that records notifications and answers requests with a fixed disposition
    #[derive(Clone, Debug)]
    pub struct RecordingSession {
        pub events: Vec<SessionEvent>,
        /// Disposition for requests with the ack-requested flag set
        pub on_request: RxDisposition,
        /// Response payload written before responding
        pub response: Vec<u8>,
        /// Packets kept with [`RxDisposition::Retain`]
        pub retained: Vec<PacketHandle>,
    }

    impl RecordingSession {
        pub fn new(on_request: RxDisposition) -> Self {
            Self {
                events: Vec::new(),
                on_request,
                response: Vec::new(),
                retained: Vec::new(),
            }
        }

        pub fn received(&self) -> usize {
            self.events.iter().filter(|e| matches!(e, SessionEvent::Received{ .. })).count()
        }
    }

    impl Session for RecordingSession {
        fn packet_transmitted(&mut self, _handle: PacketHandle, packet: &Packet) {
            self.events.push(SessionEvent::Transmitted(packet.tp_header));
        }

        fn channel_access_completed(&mut self, succeeded: bool) {
            self.events.push(SessionEvent::ChannelAccess(succeeded));
        }

        fn response_period_elapsed(&mut self) {
            self.events.push(SessionEvent::ResponsePeriodElapsed);
        }

        fn process_received_packet(&mut self, handle: PacketHandle, packet: &mut Packet) -> RxDisposition {
            self.events.push(SessionEvent::Received{
                origin: packet.np_header.origin.id,
                header: packet.tp_header,
                payload: packet.payload().to_vec(),
            });

            let requested = packet.tp_header.ctrl.contains(crate::d7atp::header::TpCtrl::ACK_REQUESTED);
            match (requested, self.on_request) {
                (true, RxDisposition::Respond) => {
                    if packet.set_payload(&self.response).is_err() {
                        return RxDisposition::Release;
                    }
                    RxDisposition::Respond
                },
                (true, RxDisposition::Retain) => {
                    self.retained.push(handle);
                    RxDisposition::Retain
                },
                (true, d) => d,
                (false, _) => RxDisposition::Release,
            }
        }
    }
}
