//! CSMA-CA backoff computation
//!
//! Pure per-attempt channel access bookkeeping, the data link layer drives
//! the resulting assessments and transmissions.
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use log::debug;
use rand_core::RngCore;

use crate::Ts;
use crate::config::{ChannelClass, CsmaCaMode};

/// Estimated on-air duration (ticks) of a frame with the given length field
pub fn tx_duration(frame_len: usize, class: ChannelClass) -> i32 {
    (frame_len / class.bytes_per_tick()) as i32 + 1
}

/// Uniform random value in `[0, bound)`, zero for an empty range
fn random_below<R: RngCore>(rng: &mut R, bound: i32) -> i32 {
    if bound <= 0 {
        return 0;
    }
    (rng.next_u32() % bound as u32) as i32
}

/// Outcome of a backoff computation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// Assess the channel after `offset` ticks
    Assess{ offset: i32 },
    /// Channel access budget exhausted
    Fail,
}

/// Channel access state for a single transmission attempt
#[derive(Clone, Debug, PartialEq)]
pub struct CsmaSession {
    /// Channel access budget
    pub tca: i32,
    /// Initial budget (RIGD)
    pub tca0: i32,
    /// Remaining time-out
    pub to: i32,
    pub slot_duration: i32,
    /// RIGD retry index
    pub rigd_n: u32,
    pub tx_duration: i32,

    last_ts: Ts,
    last_offset: i32,
}

impl CsmaSession {
    /// Begin channel access for a frame taking `tx_duration` ticks to send
    pub fn start<R: RngCore>(mode: CsmaCaMode, timeout_period: u16, tx_duration: i32, now: Ts, rng: &mut R) -> (Self, Backoff) {
        let tca = timeout_period as i32 - tx_duration;

        debug!("Tca = {} = {} - {}", tca, timeout_period, tx_duration);

        let mut s = Self {
            tca,
            tca0: tca,
            to: tca,
            slot_duration: 0,
            rigd_n: 0,
            tx_duration,
            last_ts: now,
            last_offset: 0,
        };

        if tca <= 0 {
            debug!("Tca not positive, channel access failed");
            return (s, Backoff::Fail);
        }

        let offset = match mode {
            CsmaCaMode::Unc => 0,
            CsmaCaMode::Aind => {
                // No initial offset
                s.slot_duration = tx_duration;
                0
            },
            CsmaCaMode::Raind => {
                s.slot_duration = tx_duration;
                random_below(rng, tca / tx_duration) * tx_duration
            },
            CsmaCaMode::Rigd => {
                s.slot_duration = s.rigd_slot();
                random_below(rng, s.slot_duration)
            },
        };

        debug!("{} slot duration: {} offset: {}", mode, s.slot_duration, offset);

        s.to = s.tca - offset;
        s.last_offset = offset;

        (s, Backoff::Assess{ offset })
    }

    /// RIGD slot duration for the current retry index
    fn rigd_slot(&self) -> i32 {
        self.tca0.checked_shr(self.rigd_n + 1).unwrap_or(0)
    }

    /// Compute the next backoff after a busy assessment at `now`.
    ///
    /// Time spent assessing since the last computation (at least
    /// `cca_duration`) is charged against the remaining time-out.
    pub fn retry<R: RngCore>(&mut self, mode: CsmaCaMode, now: Ts, cca_duration: i32, guard_interval: i32, rng: &mut R) -> Backoff {
        let spent = now.saturating_sub(self.last_ts) as i32 - self.last_offset;
        self.to -= spent.max(cca_duration);
        self.last_ts = now;

        if self.to < guard_interval {
            debug!("To {} below guard interval, channel access failed", self.to);
            return Backoff::Fail;
        }

        self.tca = self.to;

        let offset = match mode {
            CsmaCaMode::Unc => 0,
            CsmaCaMode::Aind | CsmaCaMode::Raind => {
                random_below(rng, self.tca / self.tx_duration) * self.tx_duration
            },
            CsmaCaMode::Rigd => {
                self.rigd_n += 1;
                self.slot_duration = self.rigd_slot();
                random_below(rng, self.slot_duration)
            },
        };

        debug!("Retry To: {} offset: {}", self.to, offset);

        self.to = self.tca - offset;
        self.last_offset = offset;

        Backoff::Assess{ offset }
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::mock::StepRng;

    use super::*;

    const GUARD: i32 = 5;

    #[test]
    fn tx_duration_by_class() {
        assert_eq!(tx_duration(11, ChannelClass::LoRate), 12);
        assert_eq!(tx_duration(11, ChannelClass::NormalRate), 2);
        assert_eq!(tx_duration(11, ChannelClass::HiRate), 1);
    }

    #[test]
    fn tca_positive_and_deterministic() {
        let modes = [CsmaCaMode::Unc, CsmaCaMode::Aind, CsmaCaMode::Raind, CsmaCaMode::Rigd];

        for m in modes.iter() {
            let (a, _) = CsmaSession::start(*m, 50, 4, 0, &mut StepRng::new(3, 7));
            let (b, _) = CsmaSession::start(*m, 50, 4, 0, &mut StepRng::new(3, 7));

            assert_eq!(a.tca, 46);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn timeout_not_exceeding_tx_duration_fails() {
        let mut rng = StepRng::new(0, 1);

        let (_s, b) = CsmaSession::start(CsmaCaMode::Unc, 4, 4, 0, &mut rng);
        assert_eq!(b, Backoff::Fail);

        let (_s, b) = CsmaSession::start(CsmaCaMode::Raind, 3, 4, 0, &mut rng);
        assert_eq!(b, Backoff::Fail);
    }

    #[test]
    fn unc_never_delays() {
        let mut rng = StepRng::new(17, 13);

        let (mut s, b) = CsmaSession::start(CsmaCaMode::Unc, 100, 2, 0, &mut rng);
        assert_eq!(b, Backoff::Assess{ offset: 0 });
        assert_eq!(s.to, 98);

        let mut retries = 0;
        while let Backoff::Assess{ offset } = s.retry(CsmaCaMode::Unc, 0, 1, GUARD, &mut rng) {
            assert_eq!(offset, 0);
            retries += 1;
        }

        // Each failed assessment costs a single tick
        assert_eq!(retries, 98 - GUARD);
    }

    #[test]
    fn aind_has_no_initial_offset() {
        let (s, b) = CsmaSession::start(CsmaCaMode::Aind, 50, 4, 0, &mut StepRng::new(9, 1));

        assert_eq!(b, Backoff::Assess{ offset: 0 });
        assert_eq!(s.slot_duration, 4);
        assert_eq!(s.to, 46);
    }

    #[test]
    fn raind_offset_in_whole_slots() {
        let mut rng = StepRng::new(0, 5);

        for _i in 0..20 {
            let (s, b) = CsmaSession::start(CsmaCaMode::Raind, 50, 4, 0, &mut rng);
            let offset = match b {
                Backoff::Assess{ offset } => offset,
                Backoff::Fail => panic!("Unexpected failure"),
            };

            assert_eq!(offset % 4, 0);
            assert!(offset < s.tca);
            assert_eq!(s.to, s.tca - offset);
        }
    }

    #[test]
    fn aind_retry_offset_in_whole_slots() {
        let mut rng = StepRng::new(0, 7);

        let (mut s, _) = CsmaSession::start(CsmaCaMode::Aind, 200, 4, 0, &mut rng);

        let mut delayed = 0;
        while let Backoff::Assess{ offset } = s.retry(CsmaCaMode::Aind, 0, 1, GUARD, &mut rng) {
            assert_eq!(offset % s.tx_duration, 0);
            assert!(offset < s.tca);
            assert_eq!(s.to, s.tca - offset);

            if offset > 0 {
                delayed += 1;
            }
        }

        assert!(delayed > 0);
    }

    #[test]
    fn rigd_offset_within_slot() {
        let mut rng = StepRng::new(0, 37);

        let (mut s, b) = CsmaSession::start(CsmaCaMode::Rigd, 260, 4, 0, &mut rng);
        match b {
            Backoff::Assess{ offset } => assert!(offset < s.slot_duration),
            Backoff::Fail => panic!("Unexpected failure"),
        }

        while s.rigd_n < 7 {
            match s.retry(CsmaCaMode::Rigd, 0, 1, GUARD, &mut rng) {
                Backoff::Assess{ offset } => assert!(offset < s.slot_duration),
                Backoff::Fail => break,
            }
        }
    }

    #[test]
    fn rigd_slot_strictly_decreasing() {
        let mut rng = StepRng::new(0, 0);

        let (mut s, _) = CsmaSession::start(CsmaCaMode::Rigd, 260, 4, 0, &mut rng);
        assert_eq!(s.tca0, 256);
        assert_eq!(s.slot_duration, 128);

        let mut slot = s.slot_duration;
        for n in 1..7 {
            let b = s.retry(CsmaCaMode::Rigd, 0, 1, GUARD, &mut rng);
            assert!(matches!(b, Backoff::Assess{ .. }));
            assert_eq!(s.rigd_n, n);
            assert!(s.slot_duration < slot);
            slot = s.slot_duration;
        }
    }

    #[test]
    fn retry_charges_elapsed_time() {
        let mut rng = StepRng::new(0, 0);

        let (mut s, _) = CsmaSession::start(CsmaCaMode::Unc, 50, 4, 100, &mut rng);
        assert_eq!(s.to, 46);

        // CCA1 + guard + CCA2
        assert_eq!(s.retry(CsmaCaMode::Unc, 106, 1, GUARD, &mut rng), Backoff::Assess{ offset: 0 });
        assert_eq!(s.to, 40);

        assert_eq!(s.retry(CsmaCaMode::Unc, 150, 1, GUARD, &mut rng), Backoff::Fail);
    }
}
