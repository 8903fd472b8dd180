//! Periodic refresh of every device session
//!
//! Each interval tick runs as its own task. A tick that finds the previous one
//! still running is skipped, not queued: a busy device can stretch a refresh
//! past the interval.
//!
//! One misbehaving device never stops the others. A device that failed with a
//! disconnect-class error is closed and reopened on a later tick, with its
//! requested power restored. A device that never came up gets the configured
//! startup power once it does.

use crate::devices::{self, Session};
use razer_pwm_core::{StaticConfig, CHANNEL_COUNT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Every device was visited
    Completed { refreshed: usize, failed: usize },
    /// The previous tick was still running
    Skipped,
    /// The poller was stopped
    Stopped,
}

/// State shared with the blocking refresh task
struct PollState {
    sessions: Vec<Session>,
    /// Whether each session already holds its startup power
    configured: Vec<AtomicBool>,
    config: Arc<StaticConfig>,
    stopped: AtomicBool,
}

pub struct Poller {
    state: Arc<PollState>,
    in_flight: Arc<Mutex<()>>,
}

impl Poller {
    /// Sessions connected at this point are taken to hold their startup
    /// power already (see `devices::connect_all`).
    pub fn new(sessions: Vec<Session>, config: Arc<StaticConfig>) -> Self {
        let configured = sessions
            .iter()
            .map(|s| AtomicBool::new(s.is_connected()))
            .collect();
        Self {
            state: Arc::new(PollState {
                sessions,
                configured,
                config,
                stopped: AtomicBool::new(false),
            }),
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Run one refresh pass unless one is already in progress
    pub async fn tick(&self) -> TickOutcome {
        let Ok(running) = Arc::clone(&self.in_flight).try_lock_owned() else {
            debug!("Previous refresh still running, skipping tick");
            return TickOutcome::Skipped;
        };
        // Checked under the lock: `stop` sets the flag before taking it
        if self.state.stopped.load(Ordering::SeqCst) {
            return TickOutcome::Stopped;
        }

        let state = Arc::clone(&self.state);
        let outcome = tokio::task::spawn_blocking(move || {
            let outcome = state.refresh_all();
            drop(running);
            outcome
        })
        .await;

        match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Refresh task failed: {}", e);
                TickOutcome::Completed {
                    refreshed: 0,
                    failed: self.state.sessions.len(),
                }
            }
        }
    }

    /// Tick every `period` until stopped or the future is dropped
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "Polling {} device(s) every {} ms",
            self.state.sessions.len(),
            period.as_millis()
        );

        while !self.state.stopped.load(Ordering::SeqCst) {
            ticker.tick().await;
            let poller = Arc::clone(&self);
            tokio::spawn(async move {
                poller.tick().await;
            });
        }
    }

    /// Stop ticking and wait for an in-flight refresh to finish
    ///
    /// Once this returns no tick touches the sessions again, including ticks
    /// that were already spawned.
    pub async fn stop(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        let _idle = self.in_flight.lock().await;
    }

    pub fn sessions(&self) -> &[Session] {
        &self.state.sessions
    }
}

impl PollState {
    /// Blocking refresh pass over every session
    fn refresh_all(&self) -> TickOutcome {
        let mut refreshed = 0;
        let mut failed = 0;

        for (index, session) in self.sessions.iter().enumerate() {
            if self.stopped.load(Ordering::SeqCst) {
                debug!("Poller stopped, ending refresh pass early");
                break;
            }

            if !session.is_connected() {
                if !self.config.poller.reconnect || !self.reopen(index, session) {
                    failed += 1;
                    continue;
                }
            }

            match session.refresh() {
                Ok(()) => refreshed += 1,
                Err(e) => {
                    failed += 1;
                    error!("{}: Refresh failed: {}", session.name(), e);
                    if e.is_disconnect() {
                        warn!("{}: Device disconnected", session.name());
                        session.disconnect();
                    }
                }
            }
        }

        TickOutcome::Completed { refreshed, failed }
    }

    /// Reconnect a session
    ///
    /// A session that held its startup power gets back what was requested
    /// before it dropped; one that never did gets the startup power.
    fn reopen(&self, index: usize, session: &Session) -> bool {
        let requested: Vec<u8> = (0..CHANNEL_COUNT as u8)
            .map(|channel| session.requested_power(channel).unwrap_or_default())
            .collect();

        info!("{}: Reconnecting", session.name());
        if !session.connect() {
            return false;
        }

        if self.configured[index].swap(true, Ordering::SeqCst) {
            for (channel, percent) in requested.into_iter().enumerate() {
                if let Err(e) = session.set_channel_power(channel as u8, percent as i32) {
                    warn!("{}: Failed to restore channel {}: {}", session.name(), channel, e);
                }
            }
        } else {
            devices::apply_startup_power(session, &self.config);
        }
        info!("{}: Reconnected", session.name());
        true
    }
}
