//! Stack Timer API
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use crate::Ts;

/// Timer trait provides the monotonic tick source used to schedule
/// CSMA-CA backoffs and transaction response periods.
///
/// All methods are monotonic and relative to the same unknown epoc
pub trait Timer {
    /// Returns the number of ticks (milliseconds) since some unknown epoc
    fn ticks(&self) -> Ts;
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};

    use crate::Ts;

    /// Mock timer implementation to assist with testing,
    /// clones share the same underlying tick count
    #[derive(Clone, Debug)]
    pub struct MockTimer (Arc<Mutex<Ts>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(0)))
        }

        pub fn set(&mut self, val: Ts) {
            *self.0.lock().unwrap() = val;
        }

        pub fn advance(&mut self, ticks: Ts) {
            let mut v  = self.0.lock().unwrap();
            *v += ticks;
        }
    }

    impl super::Timer for MockTimer {
        fn ticks(&self) -> Ts {
            *self.0.lock().unwrap()
        }
    }
}
