//! Requested channel power with write coalescing
//!
//! `set` only records intent. The session flushes the store to hardware when
//! it is dirty, or when the force-rewrite interval has elapsed since the last
//! flush so that a device which lost its state gets it back.

use razer_pwm_core::{
    clamp_percent, to_fractional_byte, BoardConfig, DefaultBoard, CHANNEL_COUNT,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default watchdog resend interval
pub const DEFAULT_FORCE_WRITE_INTERVAL: Duration = Duration::from_millis(2500);

/// Point-in-time copy of the store used by one flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerSnapshot {
    /// Fractional power per channel, indexed by channel
    pub fractional: [u8; CHANNEL_COUNT],
    /// Store revision the copy was taken at
    pub revision: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    percent: BTreeMap<u8, u8>,
    dirty: bool,
    last_written: Option<Instant>,
    revision: u64,
}

/// Per-channel requested power, safe to share between threads
#[derive(Debug)]
pub struct ChannelPowerStore {
    state: Mutex<StoreState>,
    force_write_interval: Duration,
}

impl Default for ChannelPowerStore {
    fn default() -> Self {
        Self::new(DEFAULT_FORCE_WRITE_INTERVAL)
    }
}

impl ChannelPowerStore {
    pub fn new(force_write_interval: Duration) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            force_write_interval,
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        // The state is plain data, a panic elsewhere cannot leave it torn
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a requested power, clamped to 0-100
    ///
    /// Marks the store dirty even if the value did not change.
    pub fn set(&self, channel: u8, percent: i32) {
        let mut state = self.state();
        state.percent.insert(channel, clamp_percent(percent));
        state.dirty = true;
        state.revision += 1;
    }

    /// Requested power as a fractional byte
    pub fn get(&self, channel: u8) -> u8 {
        to_fractional_byte(self.percent(channel))
    }

    /// Requested power as a percentage
    pub fn percent(&self, channel: u8) -> u8 {
        self.state()
            .percent
            .get(&channel)
            .copied()
            .unwrap_or(DefaultBoard::DEFAULT_POWER_PERCENT)
    }

    pub fn is_dirty(&self) -> bool {
        self.state().dirty
    }

    /// Clear the dirty flag and stamp the write time with `Instant::now()`
    pub fn reset_dirty(&self) {
        let mut state = self.state();
        state.dirty = false;
        state.last_written = Some(Instant::now());
    }

    /// Stamp a completed flush of `revision`
    ///
    /// The dirty flag survives if `set` was called after the snapshot was taken.
    pub fn reset_dirty_at(&self, revision: u64, now: Instant) {
        let mut state = self.state();
        if state.revision == revision {
            state.dirty = false;
        }
        state.last_written = Some(now);
    }

    /// Whether the watchdog resend is due
    ///
    /// True when nothing was ever written.
    pub fn should_force_rewrite(&self, now: Instant) -> bool {
        match self.state().last_written {
            Some(last) => now.saturating_duration_since(last) >= self.force_write_interval,
            None => true,
        }
    }

    /// Whether a flush is needed right now
    pub fn needs_write(&self, now: Instant) -> bool {
        self.is_dirty() || self.should_force_rewrite(now)
    }

    /// Drop every entry and reset dirty and timestamp state
    pub fn clear(&self) {
        let mut state = self.state();
        state.percent.clear();
        state.dirty = false;
        state.last_written = None;
        state.revision += 1;
    }

    /// Fractional values of every channel in channel order
    pub fn snapshot(&self) -> PowerSnapshot {
        let state = self.state();
        let mut fractional = [0u8; CHANNEL_COUNT];
        for (channel, value) in fractional.iter_mut().enumerate() {
            let percent = state
                .percent
                .get(&(channel as u8))
                .copied()
                .unwrap_or(DefaultBoard::DEFAULT_POWER_PERCENT);
            *value = to_fractional_byte(percent);
        }
        PowerSnapshot {
            fractional,
            revision: state.revision,
        }
    }

    pub fn force_write_interval(&self) -> Duration {
        self.force_write_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_default_is_midpoint() {
        let store = ChannelPowerStore::default();
        assert_eq!(store.percent(0), 50);
        assert_eq!(store.get(0), 128);
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_set_clamps() {
        let store = ChannelPowerStore::default();
        store.set(1, -5);
        assert_eq!(store.percent(1), 0);
        assert_eq!(store.get(1), 0);

        store.set(2, 150);
        assert_eq!(store.percent(2), 100);
        assert_eq!(store.get(2), 255);

        store.set(3, 57);
        assert_eq!(store.get(3), 0x91);
    }

    #[test]
    fn test_set_marks_dirty_even_when_unchanged() {
        let store = ChannelPowerStore::default();
        store.set(0, 50);
        store.reset_dirty();
        assert!(!store.is_dirty());

        store.set(0, 50);
        assert!(store.is_dirty());
    }

    #[test]
    fn test_force_rewrite_timing() {
        let store = ChannelPowerStore::default();
        let start = Instant::now();

        // Never written
        assert!(store.should_force_rewrite(start));

        store.reset_dirty_at(store.snapshot().revision, start);
        assert!(!store.should_force_rewrite(start));
        assert!(!store.should_force_rewrite(start + Duration::from_millis(2499)));
        assert!(store.should_force_rewrite(start + Duration::from_millis(2500)));
        assert!(store.should_force_rewrite(start + Duration::from_secs(10)));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_reset_dirty_stamps_now() {
        let store = ChannelPowerStore::default();
        store.set(4, 20);
        store.reset_dirty();
        assert!(!store.is_dirty());
        assert!(!store.should_force_rewrite(Instant::now()));
        assert!(store.should_force_rewrite(Instant::now() + DEFAULT_FORCE_WRITE_INTERVAL));
    }

    #[test]
    fn test_custom_force_interval() {
        let store = ChannelPowerStore::new(Duration::from_millis(100));
        let start = Instant::now();
        store.reset_dirty_at(0, start);
        assert!(!store.needs_write(start + Duration::from_millis(99)));
        assert!(store.needs_write(start + Duration::from_millis(100)));
    }

    #[test]
    fn test_clear_resets_everything() {
        let store = ChannelPowerStore::default();
        store.set(5, 90);
        store.reset_dirty();
        store.set(6, 10);

        store.clear();
        assert!(!store.is_dirty());
        assert_eq!(store.percent(5), 50);
        assert_eq!(store.percent(6), 50);
        assert!(store.should_force_rewrite(Instant::now()));
    }

    #[test]
    fn test_snapshot_in_channel_order() {
        let store = ChannelPowerStore::default();
        store.set(0, 0);
        store.set(7, 100);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.fractional[0], 0);
        assert_eq!(snapshot.fractional[7], 255);
        for channel in 1..7 {
            assert_eq!(snapshot.fractional[channel], 128);
        }
    }

    #[test]
    fn test_set_during_flush_keeps_dirty() {
        let store = ChannelPowerStore::default();
        store.set(0, 30);
        let snapshot = store.snapshot();

        // Arrives while the snapshot is being written out
        store.set(1, 40);
        store.reset_dirty_at(snapshot.revision, Instant::now());
        assert!(store.is_dirty());

        let snapshot = store.snapshot();
        store.reset_dirty_at(snapshot.revision, Instant::now());
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_concurrent_set() {
        let store = Arc::new(ChannelPowerStore::default());
        let handles: Vec<_> = (0..CHANNEL_COUNT as u8)
            .map(|channel| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for percent in 0..=100 {
                        store.set(channel, percent);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(store.is_dirty());
        let snapshot = store.snapshot();
        assert!(snapshot.fractional.iter().all(|&f| f == 255));
    }
}
