//! [`HwRadio`] implementation for devices implementing the `radio` traits
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;
use core::marker::PhantomData;

use log::{debug, trace};
use radio::{RadioState, ReceiveInfo};

use crate::{Radio, Ts};
use crate::error::CoreError;
use crate::packet::{RawFrame, RxMeta};
use crate::pool::FrameToken;

use super::{FrameAllocator, HwRadio, RadioEvent, RxConfig, RxMode};

#[derive(Copy, Clone, Debug, PartialEq)]
enum AdapterState {
    Idle,
    Receive(RxMode),
    Transmit(FrameToken),
}

/// Adapts a `radio` device to the stack's [`HwRadio`] interface
pub struct RadioAdapter<R, S, I, E> {
    radio: R,
    state: AdapterState,
    rx_cfg: Option<RxConfig>,

    _s: PhantomData<S>,
    _i: PhantomData<I>,
    _e: PhantomData<E>,
}

impl <R, S, I, E> RadioAdapter<R, S, I, E>
where
    R: Radio<S, I, E>,
    S: RadioState,
    I: ReceiveInfo,
    E: Debug,
{
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            state: AdapterState::Idle,
            rx_cfg: None,
            _s: PhantomData,
            _i: PhantomData,
            _e: PhantomData,
        }
    }

    /// Active receive configuration
    pub fn rx_config(&self) -> Option<&RxConfig> {
        self.rx_cfg.as_ref()
    }

    /// Fetch a received frame into a pool buffer
    fn receive<A: FrameAllocator>(&mut self, bufs: &mut A, now: Ts) -> Result<Option<RadioEvent>, CoreError<E>> {
        // Pool exhaustion is a configuration error
        let token = bufs.alloc_frame()?;

        let frame: &mut RawFrame = bufs.frame_mut(token).ok_or(CoreError::NoPacket)?;

        let (n, info) = match self.radio.get_received(frame.buffer_mut()) {
            Ok(v) => v,
            Err(e) => {
                bufs.release_frame(token)?;
                return Err(CoreError::Radio(e));
            }
        };
        frame.set_len(n);
        frame.rx_meta = RxMeta{ timestamp: now, rssi: info.rssi() };

        debug!("Received {} byte frame (rssi: {})", n, info.rssi());

        // Resume receiving, the buffer goes back to the pool if this fails
        if let Err(e) = self.radio.start_receive() {
            bufs.release_frame(token)?;
            return Err(CoreError::Radio(e));
        }

        Ok(Some(RadioEvent::PacketReceived(token)))
    }
}

impl <R, S, I, E> HwRadio for RadioAdapter<R, S, I, E>
where
    R: Radio<S, I, E>,
    S: RadioState,
    I: ReceiveInfo,
    E: Debug,
{
    type Error = E;

    fn set_rx(&mut self, cfg: Option<&RxConfig>, mode: RxMode) -> Result<(), Self::Error> {
        if let Some(c) = cfg {
            trace!("Apply rx config {:?}", c);
            self.rx_cfg = Some(*c);
        }

        match mode {
            RxMode::Packets | RxMode::Rssi => {
                self.radio.start_receive()?;
                self.state = AdapterState::Receive(mode);
            },
            RxMode::Muted => {
                self.radio.set_state(S::idle())?;
                self.state = AdapterState::Idle;
            }
        }

        Ok(())
    }

    fn set_idle(&mut self) -> Result<(), Self::Error> {
        self.radio.set_state(S::idle())?;
        self.state = AdapterState::Idle;
        Ok(())
    }

    fn send(&mut self, token: FrameToken, frame: &RawFrame) -> Result<(), Self::Error> {
        if let Some(cfg) = &frame.tx_meta.cfg {
            trace!("Apply tx config {:?}", cfg);
        }

        self.radio.start_transmit(frame.data())?;
        self.state = AdapterState::Transmit(token);

        Ok(())
    }

    fn poll<A: FrameAllocator>(&mut self, bufs: &mut A, now: Ts) -> Result<Option<RadioEvent>, CoreError<Self::Error>> {
        match self.state {
            AdapterState::Idle | AdapterState::Receive(RxMode::Muted) => Ok(None),
            AdapterState::Receive(RxMode::Rssi) => {
                let rssi = self.radio.poll_rssi().map_err(CoreError::Radio)?;

                // A single sample per request
                self.state = AdapterState::Receive(RxMode::Muted);

                Ok(Some(RadioEvent::RssiValid(rssi)))
            },
            AdapterState::Receive(RxMode::Packets) => {
                match self.radio.check_receive(true).map_err(CoreError::Radio)? {
                    true => self.receive(bufs, now),
                    false => Ok(None),
                }
            },
            AdapterState::Transmit(token) => {
                match self.radio.check_transmit().map_err(CoreError::Radio)? {
                    true => {
                        self.state = AdapterState::Idle;
                        Ok(Some(RadioEvent::TransmitDone(token)))
                    },
                    false => Ok(None),
                }
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::vec;

    use radio::{BasicInfo, mock::*};

    use crate::pool::{PacketPool, PoolError, SlotStatus};

    use super::*;

    fn setup() -> (MockRadio, PacketPool<2>) {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        (MockRadio::new(&[]), PacketPool::new())
    }

    #[test]
    fn receive_packet() {
        let (mut radio, mut pool) = setup();
        let mut adapter = RadioAdapter::new(radio.clone());

        radio.expect(&[
            Transaction::start_receive(None),
        ]);
        adapter.set_rx(Some(&RxConfig::default()), RxMode::Packets).unwrap();
        assert_eq!(adapter.rx_config(), Some(&RxConfig::default()));

        // Nothing pending
        radio.expect(&[
            Transaction::check_receive(true, Ok(false)),
        ]);
        assert_eq!(adapter.poll(&mut pool, 10).unwrap(), None);

        // Frame arrives
        let data = vec![0x03, 0xaa, 0xbb, 0xcc];
        radio.expect(&[
            Transaction::check_receive(true, Ok(true)),
            Transaction::get_received(Ok((data.clone(), BasicInfo::default()))),
            Transaction::start_receive(None),
        ]);

        let evt = adapter.poll(&mut pool, 20).unwrap();
        let token = match evt {
            Some(RadioEvent::PacketReceived(t)) => t,
            _ => panic!("Unexpected event: {:?}", evt),
        };

        let h = pool.find_by_frame(token).unwrap();
        assert_eq!(pool.status(h), Ok(SlotStatus::Allocated));

        let f = pool.frame_mut(token).unwrap();
        assert_eq!(f.data(), &data[..]);
        assert_eq!(f.rx_meta.timestamp, 20);
    }

    #[test]
    fn receive_without_buffers() {
        let (mut radio, mut pool) = setup();
        let mut adapter = RadioAdapter::new(radio.clone());

        let _a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        radio.expect(&[
            Transaction::start_receive(None),
            Transaction::check_receive(true, Ok(true)),
        ]);

        adapter.set_rx(None, RxMode::Packets).unwrap();

        let res = adapter.poll(&mut pool, 0);
        assert!(matches!(res, Err(CoreError::Pool(PoolError::Exhausted))));
    }

    #[test]
    fn receive_restart_failure_returns_buffer() {
        let (mut radio, mut pool) = setup();
        let mut adapter = RadioAdapter::new(radio.clone());

        radio.expect(&[
            Transaction::start_receive(None),
            Transaction::check_receive(true, Ok(true)),
            Transaction::get_received(Ok((vec![0x01, 0xaa], BasicInfo::default()))),
            Transaction::start_receive(Some(MockError::Timeout)),
        ]);

        adapter.set_rx(None, RxMode::Packets).unwrap();

        let res = adapter.poll(&mut pool, 0);
        assert!(matches!(res, Err(CoreError::Radio(MockError::Timeout))));
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn rssi_sample() {
        let (mut radio, mut pool) = setup();
        let mut adapter = RadioAdapter::new(radio.clone());

        radio.expect(&[
            Transaction::start_receive(None),
            Transaction::poll_rssi(Ok(-95)),
        ]);

        adapter.set_rx(None, RxMode::Rssi).unwrap();
        assert_eq!(adapter.poll(&mut pool, 0).unwrap(), Some(RadioEvent::RssiValid(-95)));

        // Only one sample is reported per request
        assert_eq!(adapter.poll(&mut pool, 1).unwrap(), None);
    }

    #[test]
    fn transmit_frame() {
        let (mut radio, mut pool) = setup();
        let mut adapter = RadioAdapter::new(radio.clone());

        let h = pool.allocate().unwrap();
        let token = pool.frame_token(h).unwrap();

        let data = [0x02, 0x11, 0x22];
        pool.get_mut(h).unwrap().frame.load(&data).unwrap();

        radio.expect(&[
            Transaction::start_transmit(data.to_vec(), None),
            Transaction::check_transmit(Ok(false)),
            Transaction::check_transmit(Ok(true)),
            Transaction::set_state(MockState::Idle, None),
        ]);

        let frame = pool.get(h).unwrap().frame.clone();
        adapter.send(token, &frame).unwrap();

        assert_eq!(adapter.poll(&mut pool, 0).unwrap(), None);
        assert_eq!(adapter.poll(&mut pool, 1).unwrap(), Some(RadioEvent::TransmitDone(token)));

        adapter.set_idle().unwrap();
    }
}
