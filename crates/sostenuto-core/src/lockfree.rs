//! Atomics shared between the audio thread and the sample thread pool.
//!
//! Each wrapper sits on its own cache line so that a flag written by the
//! pool thread does not invalidate the read position the audio thread polls.

use atomic_float::{AtomicF32, AtomicF64};
use std::sync::atomic::{AtomicBool, Ordering};

macro_rules! padded_atomic {
    ($(#[$meta:meta])* $name:ident, $inner:ty, $value:ty, $zero:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        #[repr(align(64))]
        pub struct $name {
            value: $inner,
        }

        impl $name {
            pub fn new(value: $value) -> Self {
                Self {
                    value: <$inner>::new(value),
                }
            }

            #[inline]
            pub fn get(&self) -> $value {
                self.value.load(Ordering::Acquire)
            }

            #[inline]
            pub fn set(&self, value: $value) {
                self.value.store(value, Ordering::Release);
            }

            /// Stores `value` and returns what was there before.
            #[inline]
            pub fn swap(&self, value: $value) -> $value {
                self.value.swap(value, Ordering::AcqRel)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new($zero)
            }
        }
    };
}

padded_atomic!(
    /// Peak meters such as a loader's disk usage.
    AtomicFloat,
    AtomicF32,
    f32,
    0.0
);

padded_atomic!(
    /// Fractional playback positions.
    AtomicDouble,
    AtomicF64,
    f64,
    0.0
);

padded_atomic!(
    /// Job and voice state bits.
    AtomicFlag,
    AtomicBool,
    bool,
    false
);

impl AtomicFloat {
    /// Raises the stored value to `value` if it is higher. Returns the previous value.
    #[inline]
    pub fn fetch_max(&self, value: f32) -> f32 {
        self.value.fetch_max(value, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fetch_max_keeps_peak() {
        let usage = AtomicFloat::new(0.25);
        usage.fetch_max(0.1);
        assert_eq!(usage.get(), 0.25);
        usage.fetch_max(0.75);
        assert_eq!(usage.swap(0.0), 0.75);
        assert_eq!(usage.get(), 0.0);
    }

    #[test]
    fn test_position_round_trip() {
        let pos = AtomicDouble::default();
        pos.set(1234.75);
        assert_eq!(pos.get(), 1234.75);
    }

    #[test]
    fn test_flag_swap_has_one_winner() {
        let flag = Arc::new(AtomicFlag::default());
        let winners: usize = (0..8)
            .map(|_| {
                let flag = Arc::clone(&flag);
                thread::spawn(move || !flag.swap(true) as usize)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();
        assert_eq!(winners, 1);
        assert!(flag.get());
    }

    #[test]
    fn test_alignment() {
        assert_eq!(std::mem::align_of::<AtomicFlag>(), 64);
        assert_eq!(std::mem::align_of::<AtomicDouble>(), 64);
        assert_eq!(std::mem::align_of::<AtomicFloat>(), 64);
    }
}
