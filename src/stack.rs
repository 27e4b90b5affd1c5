//! DASH7 stack
//!
//! Owns the packet pool, scheduler, data link and transport layers and the
//! session collaborator. [`Stack::tick`] polls the radio, runs pending tasks
//! and dispatches data link events to the transport layer.
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use log::{debug, error, trace, warn};
use rand_core::RngCore;

use crate::Ts;
use crate::config::{AccessProfile, ConfigStore, StackConfig};
use crate::d7atp::{Transport, TpState};
use crate::dll::{Dll, DllEvent, DllState, DllStats};
use crate::error::CoreError;
use crate::hw::{HwRadio, RadioEvent};
use crate::packet::{Addressee, AddresseeId, Packet};
use crate::pool::{PacketHandle, PacketPool, PoolError};
use crate::sched::{Scheduler, Task};
use crate::session::{Session, SessionQos};
use crate::timer::Timer;

/// DASH7 stack with a pool of `N` packets
pub struct Stack<R, G, T, S, const N: usize> {
    dll: Dll<R, G>,
    tp: Transport,
    pool: PacketPool<N>,
    sched: Scheduler,
    timer: T,
    session: S,

    /// First fatal error, stops the stack
    fault: Option<CoreError<()>>,
}

impl <R, G, T, S, const N: usize> Stack<R, G, T, S, N>
where
    R: HwRadio,
    G: RngCore,
    T: Timer,
    S: Session,
{
    /// Create a new stack using the access profile selected by `config`
    pub fn new<C: ConfigStore>(radio: R, rng: G, timer: T, session: S, store: &C, config: StackConfig) -> Result<Self, CoreError<R::Error>> {
        let profile = store.access_profile(config.access_profile_index)
            .ok_or(CoreError::NoAccessProfile(config.access_profile_index))?;
        let identity = store.identity();

        debug!("Stack init (uid: {:02x?}, subnet: 0x{:02x})", identity.uid, profile.subnet);

        let origin = Addressee{ access_class: identity.access_class, id: AddresseeId::Uid(identity.uid) };

        let mut sched = Scheduler::new();
        sched.post(Task::ScanAutomation)?;

        Ok(Self {
            dll: Dll::new(radio, rng, config.dll, identity, profile),
            tp: Transport::new(config.transport, origin),
            pool: PacketPool::new(),
            sched,
            timer,
            session,
            fault: None,
        })
    }

    pub fn dll_state(&self) -> DllState {
        self.dll.state()
    }

    pub fn tp_state(&self) -> TpState {
        self.tp.state()
    }

    pub fn stats(&self) -> &DllStats {
        self.dll.stats()
    }

    pub fn access_profile(&self) -> &AccessProfile {
        self.dll.access_profile()
    }

    pub fn pool(&self) -> &PacketPool<N> {
        &self.pool
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn radio(&self) -> &R {
        self.dll.radio()
    }

    /// Deadline of the next delayed task, for sleeping between ticks
    pub fn next_deadline(&self) -> Option<Ts> {
        self.sched.next_deadline()
    }

    /// Fatal error that stopped the stack, if any
    pub fn fault(&self) -> Option<&CoreError<()>> {
        self.fault.as_ref()
    }

    fn check_fault(&self) -> Result<(), CoreError<R::Error>> {
        match self.fault {
            Some(_) => Err(CoreError::Faulted),
            None => Ok(()),
        }
    }

    /// Record fatal errors so later calls are rejected
    fn latch<V>(&mut self, r: Result<V, CoreError<R::Error>>) -> Result<V, CoreError<R::Error>> {
        if let Err(e) = &r {
            if let Some(f) = e.discard_radio() {
                error!("Fatal stack error: {:?}", f);
                self.fault = Some(f);
            }
        }
        r
    }

    /// Allocate a packet for an outgoing request
    pub fn alloc_packet(&mut self) -> Result<PacketHandle, CoreError<R::Error>> {
        self.check_fault()?;

        let h = self.pool.allocate()?;
        Ok(h)
    }

    pub fn packet(&self, h: PacketHandle) -> Result<&Packet, CoreError<R::Error>> {
        self.check_fault()?;

        let p = self.pool.get(h)?;
        Ok(p)
    }

    pub fn packet_mut(&mut self, h: PacketHandle) -> Result<&mut Packet, CoreError<R::Error>> {
        self.check_fault()?;

        let p = self.pool.get_mut(h)?;
        Ok(p)
    }

    /// Return a packet retained by the session
    pub fn release(&mut self, h: PacketHandle) -> Result<(), CoreError<R::Error>> {
        self.check_fault()?;

        let r = self.pool.release(h).map_err(CoreError::from);
        self.latch(r)
    }

    /// Start a dialog transmitting the packet `h`
    pub fn start_dialog(&mut self, dialog_id: u8, transaction_id: u8, h: PacketHandle, qos: &SessionQos, profile: Option<&AccessProfile>) -> Result<(), CoreError<R::Error>> {
        self.check_fault()?;
        let now = self.timer.ticks();

        let r = self.tp.start_dialog(&mut self.dll, &mut self.pool, &mut self.sched, now, dialog_id, transaction_id, h, qos, profile)
            .and_then(|e| self.dispatch_all(e, now));

        self.latch(r)
    }

    /// Respond to a received request held in `h`
    pub fn respond_to_dialog(&mut self, h: PacketHandle) -> Result<(), CoreError<R::Error>> {
        self.check_fault()?;
        let now = self.timer.ticks();

        let r = self.tp.respond_to_dialog(&mut self.dll, &mut self.pool, &mut self.sched, now, h)
            .and_then(|e| self.dispatch_all(e, now));

        self.latch(r)
    }

    /// Request a foreground scan receive window
    pub fn start_foreground_scan(&mut self) -> Result<(), CoreError<R::Error>> {
        self.check_fault()?;

        let r = self.sched.post(Task::StartForegroundScan).map_err(CoreError::from);
        self.latch(r)
    }

    /// Poll the radio and run all tasks ready at the current time
    pub fn tick(&mut self) -> Result<(), CoreError<R::Error>> {
        self.check_fault()?;
        let now = self.timer.ticks();

        let r = self.run(now);
        self.latch(r)
    }

    fn run(&mut self, now: Ts) -> Result<(), CoreError<R::Error>> {
        loop {
            let polled = match self.dll.radio_mut().poll(&mut self.pool, now)? {
                Some(evt) => {
                    self.bridge(evt)?;
                    true
                },
                None => false,
            };

            let task = match self.sched.next(now) {
                Some(t) => t,
                None if polled => continue,
                None => break,
            };

            trace!("Run task {:?}", task);

            let e = self.run_task(task, now)?;
            self.dispatch_all(e, now)?;
        }

        Ok(())
    }

    /// Convert radio events to tasks, this must not touch layer state
    fn bridge(&mut self, evt: RadioEvent) -> Result<(), CoreError<R::Error>> {
        match evt {
            RadioEvent::PacketReceived(token) => {
                let h = self.pool.find_by_frame(token).ok_or(PoolError::UnknownFrame(token))?;
                self.pool.mark_received(h)?;
                self.sched.post(Task::ProcessReceived)?;
            },
            RadioEvent::RssiValid(rssi) => {
                self.sched.post(Task::CcaRssi(rssi))?;
            },
            RadioEvent::TransmitDone(token) => {
                let h = self.pool.find_by_frame(token).ok_or(PoolError::UnknownFrame(token))?;
                self.sched.post(Task::TransmitCompleted(h))?;
            },
        }

        Ok(())
    }

    fn run_task(&mut self, task: Task, now: Ts) -> Result<Option<DllEvent>, CoreError<R::Error>> {
        match task {
            Task::ProcessReceived => self.dll.process_received(&mut self.pool, &mut self.sched),
            Task::ExecuteCca => self.dll.execute_cca().map(|_| None),
            Task::ExecuteCsmaCa => self.dll.execute_csma_ca(&mut self.pool, &mut self.sched, now),
            Task::ScanAutomation => self.dll.execute_scan_automation().map(|_| None),
            Task::StartForegroundScan => {
                match self.dll.state() {
                    DllState::Idle | DllState::ScanAutomation => self.dll.start_foreground_scan()?,
                    s => warn!("Cannot start foreground scan in state {}", s),
                }
                Ok(None)
            },
            Task::CcaRssi(rssi) => self.dll.on_cca_rssi(&mut self.pool, &mut self.sched, rssi, now),
            Task::TransmitCompleted(h) => self.dll.on_transmit_completed(h),
            Task::ResponsePeriodExpired => {
                self.tp.on_response_period_expired(&mut self.dll, &mut self.session)?;
                Ok(None)
            },
        }
    }

    fn dispatch_all(&mut self, mut evt: Option<DllEvent>, now: Ts) -> Result<(), CoreError<R::Error>> {
        while let Some(e) = evt {
            evt = self.dispatch(e, now)?;
        }
        Ok(())
    }

    /// Deliver a data link event to the transport layer
    fn dispatch(&mut self, evt: DllEvent, now: Ts) -> Result<Option<DllEvent>, CoreError<R::Error>> {
        trace!("DLL event {:?}", evt);

        match evt {
            DllEvent::ChannelAccess{ succeeded, handle } => {
                if !succeeded {
                    self.tp.on_channel_access_failed::<R::Error>()?;
                    self.pool.release(handle)?;
                }
                self.session.channel_access_completed(succeeded);
                Ok(None)
            },
            DllEvent::Transmitted(h) => {
                self.tp.on_packet_transmitted::<S, R::Error, N>(&mut self.pool, &mut self.sched, &mut self.session, h, now)?;
                self.pool.release(h)?;
                Ok(None)
            },
            DllEvent::Received(h) => {
                self.tp.on_packet_received(&mut self.dll, &mut self.pool, &mut self.sched, &mut self.session, h, now)
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::vec;

    use rand::rngs::mock::StepRng;

    use crate::config::{DeviceIdentity, StaticConfig};
    use crate::d7atp::header::{AckTemplate, TpCtrl, TpHeader};
    use crate::dll::header::DllHeader;
    use crate::hw::mock::SimRadio;
    use crate::session::{ResponseMode, RxDisposition};
    use crate::session::mock::{RecordingSession, SessionEvent};
    use crate::timer::mock::MockTimer;

    use super::*;

    const MASTER: [u8; 8] = [0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7];
    const SLAVE: [u8; 8] = [0xb0, 0xb1, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7];

    type TestStack = Stack<SimRadio, StepRng, MockTimer, RecordingSession, 4>;

    fn node(radio: SimRadio, timer: MockTimer, uid: [u8; 8], on_request: RxDisposition) -> TestStack {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let identity = DeviceIdentity{ uid, vid: None, access_class: 1 };
        let store = StaticConfig::new(AccessProfile::default(), identity);

        Stack::new(radio, StepRng::new(0, 1), timer, RecordingSession::new(on_request), &store, StackConfig::default()).unwrap()
    }

    /// Tick until `f` holds, returning the time at which it did
    fn tick_until<F: Fn(&TestStack) -> bool>(s: &mut TestStack, timer: &mut MockTimer, limit: Ts, f: F) -> Ts {
        for _i in 0..limit {
            s.tick().unwrap();
            if f(s) {
                return timer.ticks();
            }
            timer.advance(1);
        }
        panic!("Condition not reached within {} ticks", limit);
    }

    #[test]
    fn missing_access_profile() {
        let store = StaticConfig::new(AccessProfile::default(), DeviceIdentity::default());
        let config = StackConfig{ access_profile_index: 3, ..Default::default() };

        let r = TestStack::new(SimRadio::new(), StepRng::new(0, 1), MockTimer::new(), RecordingSession::new(RxDisposition::Release), &store, config);
        assert!(matches!(r, Err(CoreError::NoAccessProfile(3))));
    }

    #[test]
    fn broadcast_without_response() {
        let radio = SimRadio::new();
        let mut timer = MockTimer::new();
        let mut s = node(radio.clone(), timer.clone(), MASTER, RxDisposition::Release);

        s.tick().unwrap();
        assert_eq!(s.dll_state(), DllState::ScanAutomation);

        let h = s.alloc_packet().unwrap();
        s.packet_mut(h).unwrap().set_payload(&[0xaa, 0xbb]).unwrap();

        s.start_dialog(1, 1, h, &SessionQos::default(), None).unwrap();
        assert_eq!(s.tp_state(), TpState::MasterRequestPeriod);

        // Clear channel, sent after the CCA1 / CCA2 guard interval
        let sent_at = tick_until(&mut s, &mut timer, 20, |s| s.tp_state() == TpState::MasterResponsePeriod);
        assert_eq!(sent_at, 5);
        assert_eq!(s.dll_state(), DllState::ForegroundScan);
        assert_eq!(radio.sent().len(), 1);

        let done_at = tick_until(&mut s, &mut timer, 100, |s| s.tp_state() == TpState::Idle);
        assert_eq!(done_at, sent_at + 50);
        assert_eq!(s.dll_state(), DllState::ScanAutomation);
        assert_eq!(s.pool().available(), 4);

        let header = TpHeader{ ctrl: TpCtrl::START | TpCtrl::STOP, dialog_id: 1, transaction_id: 1, ack_template: None };
        assert_eq!(s.session().events, vec![
            SessionEvent::ChannelAccess(true),
            SessionEvent::Transmitted(header),
            SessionEvent::ResponsePeriodElapsed,
        ]);
    }

    #[test]
    fn busy_channel_aborts_dialog() {
        let radio = SimRadio::new();
        let mut timer = MockTimer::new();
        let mut s = node(radio.clone(), timer.clone(), MASTER, RxDisposition::Release);
        radio.set_noise_floor(-50);

        s.tick().unwrap();

        let h = s.alloc_packet().unwrap();
        s.start_dialog(1, 1, h, &SessionQos::default(), None).unwrap();

        tick_until(&mut s, &mut timer, 100, |s| s.tp_state() == TpState::Idle);

        assert!(radio.sent().is_empty());
        assert_eq!(s.session().events, vec![SessionEvent::ChannelAccess(false)]);
        assert_eq!(s.dll_state(), DllState::ScanAutomation);
        assert_eq!(s.stats().cca_fail, 1);
        assert_eq!(s.pool().available(), 4);
    }

    #[test]
    fn foreign_subnet_dropped() {
        let radio = SimRadio::new();
        let mut timer = MockTimer::new();
        let mut s = node(radio.clone(), timer.clone(), SLAVE, RxDisposition::Respond);

        s.tick().unwrap();

        let mut p = Packet::default();
        p.dll_header = DllHeader{ subnet: 0x06, eirp_index: 0, target: AddresseeId::Broadcast };
        p.set_payload(&[1, 2, 3]).unwrap();
        p.assemble().unwrap();
        radio.inject(p.frame.data());

        timer.advance(1);
        s.tick().unwrap();

        assert!(s.session().events.is_empty());
        assert_eq!(s.pool().available(), 4);
        assert_eq!(s.stats().rx_filtered, 1);
        assert_eq!(s.dll_state(), DllState::ScanAutomation);
        assert_eq!(s.tp_state(), TpState::Idle);
    }

    #[test]
    fn request_response_dialog() {
        let (radio_m, radio_s) = SimRadio::pair();
        let mut timer = MockTimer::new();

        let mut master = node(radio_m, timer.clone(), MASTER, RxDisposition::Release);
        let mut slave = node(radio_s, timer.clone(), SLAVE, RxDisposition::Respond);
        slave.session_mut().response = vec![0x55, 0x66];

        master.tick().unwrap();
        slave.tick().unwrap();

        let h = master.alloc_packet().unwrap();
        {
            let p = master.packet_mut(h).unwrap();
            p.addressee = Some(Addressee{ access_class: 1, id: AddresseeId::Uid(SLAVE) });
            p.set_payload(&[0x01, 0x02]).unwrap();
        }

        let qos = SessionQos{ resp_mode: ResponseMode::Any, ..Default::default() };
        master.start_dialog(4, 9, h, &qos, None).unwrap();

        for _t in 0..100 {
            master.tick().unwrap();
            slave.tick().unwrap();
            timer.advance(1);
        }

        let request = TpHeader{ ctrl: TpCtrl::START | TpCtrl::STOP | TpCtrl::ACK_REQUESTED, dialog_id: 4, transaction_id: 9, ack_template: None };
        let response = TpHeader{ ctrl: TpCtrl::STOP | TpCtrl::ACK_TEMPLATE, dialog_id: 4, transaction_id: 9, ack_template: Some(AckTemplate{ transaction_id_start: 9 }) };

        assert_eq!(slave.session().events, vec![
            SessionEvent::Received{ origin: AddresseeId::Uid(MASTER), header: request, payload: vec![0x01, 0x02] },
            SessionEvent::ChannelAccess(true),
            SessionEvent::Transmitted(response),
            SessionEvent::ResponsePeriodElapsed,
        ]);

        assert_eq!(master.session().events, vec![
            SessionEvent::ChannelAccess(true),
            SessionEvent::Transmitted(request),
            SessionEvent::Received{ origin: AddresseeId::Uid(SLAVE), header: response, payload: vec![0x55, 0x66] },
            SessionEvent::ResponsePeriodElapsed,
        ]);

        for n in [&master, &slave].iter() {
            assert_eq!(n.tp_state(), TpState::Idle);
            assert_eq!(n.dll_state(), DllState::ScanAutomation);
            assert_eq!(n.pool().available(), 4);
        }
    }

    #[test]
    fn retained_packet_released_by_session() {
        let (radio_m, radio_s) = SimRadio::pair();
        let mut timer = MockTimer::new();

        let mut master = node(radio_m, timer.clone(), MASTER, RxDisposition::Release);
        let mut slave = node(radio_s, timer.clone(), SLAVE, RxDisposition::Retain);

        master.tick().unwrap();
        slave.tick().unwrap();

        let h = master.alloc_packet().unwrap();
        let qos = SessionQos{ resp_mode: ResponseMode::Any, ..Default::default() };
        master.start_dialog(1, 2, h, &qos, None).unwrap();

        for _t in 0..10 {
            master.tick().unwrap();
            slave.tick().unwrap();
            timer.advance(1);
        }

        // Held until the session lets go
        assert_eq!(slave.session().received(), 1);
        assert_eq!(slave.pool().available(), 3);

        let rx = slave.session().retained[0];
        assert_eq!(slave.pool().take_received(), None);
        assert_eq!(slave.packet(rx).unwrap().np_header.origin.id, AddresseeId::Uid(MASTER));

        // Answer later from the retained packet
        slave.respond_to_dialog(rx).unwrap();
        assert_eq!(slave.tp_state(), TpState::SlaveSendingResponse);

        for _t in 0..10 {
            master.tick().unwrap();
            slave.tick().unwrap();
            timer.advance(1);
        }

        assert_eq!(master.session().received(), 1);
        assert_eq!(slave.pool().available(), 4);
    }

    #[test]
    fn fault_latches() {
        let mut timer = MockTimer::new();
        let mut s = node(SimRadio::new(), timer.clone(), MASTER, RxDisposition::Release);
        s.tick().unwrap();

        let a = s.alloc_packet().unwrap();
        let b = s.alloc_packet().unwrap();

        s.start_dialog(1, 1, a, &SessionQos::default(), None).unwrap();

        // Only one transaction may be open
        let r = s.start_dialog(1, 2, b, &SessionQos::default(), None);
        assert!(matches!(r, Err(CoreError::TransportTransition(_))));
        assert!(s.fault().is_some());

        timer.advance(1);
        assert!(matches!(s.tick(), Err(CoreError::Faulted)));
        assert!(matches!(s.alloc_packet(), Err(CoreError::Faulted)));

        // Pool contents are no longer reachable
        assert!(matches!(s.packet(b), Err(CoreError::Faulted)));
        assert!(matches!(s.packet_mut(b), Err(CoreError::Faulted)));
    }

    #[test]
    fn foreground_scan_request() {
        let radio = SimRadio::new();
        let mut s = node(radio, MockTimer::new(), SLAVE, RxDisposition::Release);

        s.start_foreground_scan().unwrap();
        s.tick().unwrap();

        assert_eq!(s.dll_state(), DllState::ForegroundScan);
    }
}
