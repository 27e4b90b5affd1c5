//! DASH7 Simulation Example
//!
//! Runs a master and a slave node over a simulated air interface, the master
//! periodically starts a dialog and the slave answers each request.
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn, error};

use structopt::StructOpt;
use humantime::Duration;

use d7ap::prelude::*;
use d7ap::hw::mock::SimRadio;
use d7ap::d7atp::header::TpCtrl;


#[derive(Debug, StructOpt)]
struct Options {

    #[structopt(long, default_value="5s")]
    /// Period between master requests
    pub period: Duration,

    #[structopt(long, default_value="any")]
    /// Response mode for master requests (none, any)
    pub resp_mode: String,

    #[structopt(long)]
    /// Simulated channel RSSI in dBm, above -86 the channel is busy
    pub noise_floor: Option<i16>,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

#[derive(Clone, Debug)]
pub struct SystemTimer {
    start: Instant,
}

impl SystemTimer {
    fn new() -> Self {
        Self {
            start: Instant::now()
        }
    }
}

impl StackTimer for SystemTimer {
    fn ticks(&self) -> Ts {
        Instant::now().duration_since(self.start).as_millis() as Ts
    }
}

/// Session layer logging dialog outcomes
struct DemoSession {
    name: &'static str,
    response: Vec<u8>,
}

impl Session for DemoSession {
    fn packet_transmitted(&mut self, _handle: PacketHandle, packet: &Packet) {
        info!("{}: transmitted {} byte payload ({:?})", self.name, packet.payload().len(), packet.tp_header.ctrl);
    }

    fn channel_access_completed(&mut self, succeeded: bool) {
        if !succeeded {
            warn!("{}: channel access failed", self.name);
        }
    }

    fn response_period_elapsed(&mut self) {
        info!("{}: dialog complete", self.name);
    }

    fn process_received_packet(&mut self, _handle: PacketHandle, packet: &mut Packet) -> RxDisposition {
        info!("{}: received {:02x?} from {:?}", self.name, packet.payload(), packet.np_header.origin.id);

        if !packet.tp_header.ctrl.contains(TpCtrl::ACK_REQUESTED) {
            return RxDisposition::Release;
        }

        match packet.set_payload(&self.response) {
            Ok(_) => RxDisposition::Respond,
            Err(e) => {
                error!("{}: response encoding failed: {:?}", self.name, e);
                RxDisposition::Release
            }
        }
    }
}

type SimStack = Stack<SimRadio, rand::rngs::ThreadRng, SystemTimer, DemoSession, 8>;

fn node(name: &'static str, radio: SimRadio, timer: SystemTimer) -> anyhow::Result<SimStack> {
    let identity = DeviceIdentity{
        uid: rand::random(),
        vid: None,
        access_class: 1,
    };
    debug!("{} uid: {:02x?}", name, identity.uid);

    let store = StaticConfig::new(AccessProfile::default(), identity);
    let session = DemoSession{ name, response: name.as_bytes().to_vec() };

    match Stack::new(radio, rand::thread_rng(), timer, session, &store, StackConfig::default()) {
        Ok(s) => Ok(s),
        Err(e) => Err(anyhow::anyhow!("Error initialising {}: {:?}", name, e)),
    }
}

fn main() -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    // Bind exit handler
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    // Load options
    let opts = Options::from_args();

    // Initialise logging
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_ignore_str("d7ap::sched")
        .build();
    let _ = simplelog::SimpleLogger::init(opts.log_level, log_cfg);

    info!("Starting d7ap simulation");

    let resp_mode = match opts.resp_mode.as_str() {
        "none" => ResponseMode::None,
        "any" => ResponseMode::Any,
        m => return Err(anyhow::anyhow!("Unsupported response mode: {}", m)),
    };

    let (radio_m, radio_s) = SimRadio::pair();
    if let Some(n) = opts.noise_floor {
        radio_m.set_noise_floor(n);
        radio_s.set_noise_floor(n);
    }

    let timer = SystemTimer::new();
    let mut master = node("master", radio_m, timer.clone())?;
    let mut slave = node("slave", radio_s, timer.clone())?;

    let period = opts.period.as_millis() as Ts;
    let qos = SessionQos{ resp_mode, ..Default::default() };

    let mut dialog_id = 0u8;
    let mut last_tx = timer.ticks();

    debug!("Starting loop");

    while running.load(Ordering::SeqCst) {
        let now = timer.ticks();

        for (name, n) in [("master", &mut master), ("slave", &mut slave)].iter_mut() {
            if let Err(e) = n.tick() {
                return Err(anyhow::anyhow!("{} tick error: {:?}", name, e));
            }
        }

        // Periodic request
        if now > last_tx + period && master.tp_state() == TpState::Idle {
            let h = match master.alloc_packet() {
                Ok(h) => h,
                Err(e) => {
                    warn!("No packet available: {:?}", e);
                    last_tx = now;
                    continue;
                }
            };

            if let Err(e) = master.packet_mut(h).and_then(|p| p.set_payload(&[dialog_id; 16]).map_err(CoreError::from)) {
                return Err(anyhow::anyhow!("Payload error: {:?}", e));
            }

            info!("Starting dialog {} at {} ms", dialog_id, now);

            if let Err(e) = master.start_dialog(dialog_id, 0, h, &qos, None) {
                return Err(anyhow::anyhow!("Start dialog error: {:?}", e));
            }

            dialog_id = dialog_id.wrapping_add(1);
            last_tx = now;
        }

        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    let stats = master.stats();
    info!("Master stats: {:?}", stats);
    info!("Slave stats: {:?}", slave.stats());

    Ok(())
}
