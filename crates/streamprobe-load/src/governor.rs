//! Centralized rate control.
//!
//! A single governor task evaluates the scenario's rate profile once per tick
//! and publishes the target inter-arrival delay on a `watch` channel. Sessions
//! read the latest value and schedule themselves; there is no shared counter.
//!
//! ```text
//! rate
//!  ▲        burst
//!  │       ┌──┐      ┌──┐
//!  │   ┌───┘  └──────┘  └───┐
//!  │  /                      \
//!  │ /                        \
//!  └┴──────────────────────────┴──▶ t
//!   ramp-up     steady      ramp-down
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use streamprobe_core::RateProfile;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default governor tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// Phase of the rate profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Linear ramp towards the steady rate.
    RampUp,
    /// Steady rate.
    Steady,
    /// Steady rate times the burst multiplier.
    Burst,
    /// Linear ramp towards zero.
    RampDown,
    /// Run duration elapsed or stop requested.
    Done,
}

/// Target pace published by the governor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pace {
    /// Current phase.
    pub phase: Phase,
    /// Target per-session rate in messages per second.
    pub rate: f64,
    /// Target per-session inter-arrival delay; `None` while the rate is zero.
    pub interval: Option<Duration>,
}

impl Pace {
    fn from_rate(phase: Phase, rate: f64) -> Self {
        let rate = if rate.is_finite() { rate.max(0.0) } else { 0.0 };
        // rates too small for a representable interval emit nothing
        let interval = (rate > 0.0)
            .then(|| Duration::try_from_secs_f64(1.0 / rate).ok())
            .flatten();
        Self {
            phase,
            rate,
            interval,
        }
    }

    /// Terminal pace.
    #[must_use]
    pub const fn done() -> Self {
        Self {
            phase: Phase::Done,
            rate: 0.0,
            interval: None,
        }
    }

    /// Returns true once sessions must stop emitting.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }
}

/// Evaluates the rate profile at `elapsed` seconds into a run of
/// `duration` seconds.
#[must_use]
pub fn pace_at(profile: &RateProfile, elapsed: f64, duration: f64) -> Pace {
    if elapsed >= duration {
        return Pace::done();
    }
    let steady = profile.messages_per_second;
    let ramp_down_start = duration - profile.ramp_down_seconds;

    if profile.ramp_up_seconds > 0.0 && elapsed < profile.ramp_up_seconds {
        let factor = (elapsed / profile.ramp_up_seconds).clamp(0.0, 1.0);
        return Pace::from_rate(Phase::RampUp, steady * factor);
    }
    if profile.ramp_down_seconds > 0.0 && elapsed > ramp_down_start {
        let factor = ((duration - elapsed) / profile.ramp_down_seconds).clamp(0.0, 1.0);
        return Pace::from_rate(Phase::RampDown, steady * factor);
    }

    if profile.has_bursts() {
        let into_steady = elapsed - profile.ramp_up_seconds;
        let offset = into_steady % profile.burst_every_seconds;
        if offset >= profile.burst_every_seconds - profile.burst_length_seconds {
            return Pace::from_rate(Phase::Burst, steady * profile.burst_multiplier);
        }
    }
    Pace::from_rate(Phase::Steady, steady)
}

/// Waits until `stop` turns true. Never resolves if the sender is gone.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Rate governor task.
#[derive(Debug, Clone)]
pub struct RateGovernor {
    profile: RateProfile,
    duration: Duration,
    tick: Duration,
}

impl RateGovernor {
    /// Creates a governor for a profile and run duration.
    #[must_use]
    pub fn new(profile: RateProfile, duration: Duration) -> Self {
        Self {
            profile,
            duration,
            tick: DEFAULT_TICK,
        }
    }

    /// Sets the tick.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Returns the tick.
    #[must_use]
    pub const fn tick(&self) -> Duration {
        self.tick
    }

    /// Spawns the governor. The returned receiver yields [`Phase::Done`] when
    /// the duration elapses or `stop` turns true.
    #[must_use]
    pub fn spawn(self, mut stop: watch::Receiver<bool>) -> (watch::Receiver<Pace>, JoinHandle<()>) {
        let duration = self.duration.as_secs_f64();
        let (tx, rx) = watch::channel(pace_at(&self.profile, 0.0, duration));

        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let mut ticker = tokio::time::interval(self.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut phase = tx.borrow().phase;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = stop_requested(&mut stop) => {
                        let _ = tx.send(Pace::done());
                        tracing::debug!("rate governor stopped on request");
                        break;
                    }
                }

                let pace = pace_at(&self.profile, start.elapsed().as_secs_f64(), duration);
                if pace.phase != phase {
                    tracing::debug!(from = ?phase, to = ?pace.phase, rate = pace.rate, "rate phase changed");
                    phase = pace.phase;
                }
                if tx.send(pace).is_err() || pace.is_done() {
                    break;
                }
            }
        });
        (rx, handle)
    }
}
