//! DASH7 Transport Layer (D7ATP)
//!
//! Drives master (request, response period) and slave (sending response,
//! response period) dialog roles on top of the data link layer.
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use log::{debug, info, trace, warn};
use rand_core::RngCore;

use crate::Ts;
use crate::config::{AccessProfile, TransportConfig};
use crate::d7anp::NpHeader;
use crate::dll::{Dll, DllEvent};
use crate::error::{CoreError, InvalidTransition};
use crate::hw::HwRadio;
use crate::packet::Addressee;
use crate::pool::{PacketHandle, PacketPool};
use crate::sched::{Scheduler, Task};
use crate::session::{RxDisposition, Session, SessionQos};

pub mod state;
pub use state::TpState;

pub mod header;
use header::{AckTemplate, TpCtrl, TpHeader};

/// Dialog / transaction identity
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DialogId {
    pub dialog_id: u8,
    pub transaction_id: u8,
}

/// Transport layer context
pub struct Transport {
    config: TransportConfig,
    /// Identity template attached to outgoing frames
    origin: Addressee,
    state: TpState,
    dialog: Option<DialogId>,
}

impl Transport {
    pub fn new(config: TransportConfig, origin: Addressee) -> Self {
        Self {
            config,
            origin,
            state: TpState::Idle,
            dialog: None,
        }
    }

    pub fn state(&self) -> TpState {
        self.state
    }

    /// Active dialog, if any
    pub fn dialog(&self) -> Option<DialogId> {
        self.dialog
    }

    fn switch_state(&mut self, next: TpState) -> Result<(), InvalidTransition<TpState>> {
        let s = TpState::transition(self.state, next)?;

        info!("D7ATP {} -> {}", self.state, s);
        self.state = s;

        Ok(())
    }

    /// Start a dialog as master, handing the request to the data link layer
    #[allow(clippy::too_many_arguments)]
    pub fn start_dialog<R, G, const N: usize>(
        &mut self, dll: &mut Dll<R, G>, pool: &mut PacketPool<N>, sched: &mut Scheduler, now: Ts,
        dialog_id: u8, transaction_id: u8, h: PacketHandle, qos: &SessionQos, profile: Option<&AccessProfile>,
    ) -> Result<Option<DllEvent>, CoreError<R::Error>>
    where
        R: HwRadio,
        G: RngCore,
    {
        self.switch_state(TpState::MasterRequestPeriod)?;

        let p = pool.get_mut(h)?;

        let mut ctrl = TpCtrl::START | TpCtrl::STOP;
        ctrl.set(TpCtrl::ACK_REQUESTED, qos.resp_mode.ack_requested());
        ctrl.set(TpCtrl::ACK_NOT_VOID, qos.ack_not_void);

        p.tp_header = TpHeader {
            ctrl,
            dialog_id,
            transaction_id,
            ack_template: None,
        };

        // Origin template on the first transaction of a dialog
        p.np_header = NpHeader::with_origin(self.origin);

        debug!("Start dialog {}:{} ({}) to {:?}", dialog_id, transaction_id, qos.resp_mode, p.addressee);

        if let Some(ap) = profile {
            dll.set_access_profile(ap.clone());
        }

        self.dialog = Some(DialogId{ dialog_id, transaction_id });

        dll.tx_frame(pool, sched, h, now)
    }

    /// Turn a received request into a response and transmit it
    pub fn respond_to_dialog<R, G, const N: usize>(
        &mut self, dll: &mut Dll<R, G>, pool: &mut PacketPool<N>, sched: &mut Scheduler, now: Ts, h: PacketHandle,
    ) -> Result<Option<DllEvent>, CoreError<R::Error>>
    where
        R: HwRadio,
        G: RngCore,
    {
        // Re-entrant response, the running response period restarts after transmission
        if self.state == TpState::SlaveResponsePeriod {
            sched.cancel(&Task::ResponsePeriodExpired);
        }

        self.switch_state(TpState::SlaveSendingResponse)?;

        let p = pool.get_mut(h)?;

        let ack_requested = p.tp_header.ctrl.contains(TpCtrl::ACK_REQUESTED);

        let ctrl = &mut p.tp_header.ctrl;
        ctrl.remove(TpCtrl::START | TpCtrl::ACK_REQUESTED | TpCtrl::ACK_NOT_VOID | TpCtrl::ACK_RECORD | TpCtrl::TIMEOUT_TEMPLATE);
        ctrl.set(TpCtrl::ACK_TEMPLATE, ack_requested);

        // Dialog and transaction ids are kept
        p.tp_header.ack_template = match ack_requested {
            true => Some(AckTemplate{ transaction_id_start: p.tp_header.transaction_id }),
            false => None,
        };

        // Reply to the request origin
        p.addressee = Some(p.np_header.origin);
        p.np_header = NpHeader::with_origin(self.origin);

        self.dialog = Some(DialogId{ dialog_id: p.tp_header.dialog_id, transaction_id: p.tp_header.transaction_id });

        debug!("Respond to dialog {:?} (ack template: {})", self.dialog, ack_requested);

        dll.tx_frame(pool, sched, h, now)
    }

    /// Transmission completed, start the response period
    pub fn on_packet_transmitted<S, E, const N: usize>(
        &mut self, pool: &mut PacketPool<N>, sched: &mut Scheduler, session: &mut S, h: PacketHandle, now: Ts,
    ) -> Result<(), CoreError<E>>
    where
        S: Session,
    {
        let next = match self.state {
            TpState::MasterRequestPeriod => TpState::MasterResponsePeriod,
            TpState::SlaveSendingResponse => TpState::SlaveResponsePeriod,
            _ => return Err(CoreError::TransportTransition(InvalidTransition{ from: self.state, to: TpState::MasterResponsePeriod })),
        };
        self.switch_state(next)?;

        debug!("Packet transmitted, starting response period timer ({} ticks)", self.config.response_period);

        sched.post_delayed(Task::ResponsePeriodExpired, now, self.config.response_period)?;

        session.packet_transmitted(h, pool.get(h)?);

        Ok(())
    }

    /// Response period ended, tear down the dialog
    pub fn on_response_period_expired<R, G, S>(&mut self, dll: &mut Dll<R, G>, session: &mut S) -> Result<(), CoreError<R::Error>>
    where
        R: HwRadio,
        G: RngCore,
        S: Session,
    {
        if !self.state.is_response_period() {
            return Err(CoreError::TransportTransition(InvalidTransition{ from: self.state, to: TpState::Idle }));
        }

        info!("Transaction response period expired");

        self.switch_state(TpState::Idle)?;
        self.dialog = None;

        dll.stop_foreground_scan()?;

        session.response_period_elapsed();

        Ok(())
    }

    /// Channel access failed, the dialog ends without transmitting
    pub fn on_channel_access_failed<E>(&mut self) -> Result<(), CoreError<E>> {
        info!("CSMA-CA insertion failed, stopping transaction");

        self.switch_state(TpState::Idle)?;
        self.dialog = None;

        Ok(())
    }

    /// Pass a received packet to the session layer
    #[allow(clippy::too_many_arguments)]
    pub fn on_packet_received<R, G, S, const N: usize>(
        &mut self, dll: &mut Dll<R, G>, pool: &mut PacketPool<N>, sched: &mut Scheduler, session: &mut S, h: PacketHandle, now: Ts,
    ) -> Result<Option<DllEvent>, CoreError<R::Error>>
    where
        R: HwRadio,
        G: RngCore,
        S: Session,
    {
        match self.state {
            TpState::Idle | TpState::SlaveResponsePeriod => (),
            TpState::MasterResponsePeriod => {
                if pool.get(h)?.dll_header.target.is_broadcast() {
                    warn!("Expecting response but received packet has no target address, skipping");
                    pool.release(h)?;
                    return Ok(None);
                }
            },
            // The data link layer only delivers frames while scanning
            _ => {
                pool.release(h)?;
                return Err(CoreError::TransportTransition(InvalidTransition{ from: self.state, to: TpState::Idle }));
            }
        }

        let disposition = session.process_received_packet(h, pool.get_mut(h)?);

        trace!("Session disposition: {:?}", disposition);

        match disposition {
            RxDisposition::Release => {
                pool.release(h)?;
                Ok(None)
            },
            RxDisposition::Retain => Ok(None),
            RxDisposition::Respond => self.respond_to_dialog(dll, pool, sched, now, h),
        }
    }
}
