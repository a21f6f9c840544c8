//! Seeded failure injection.
//!
//! Every decision is drawn from a per-session `StdRng`, so a scenario with a
//! fixed seed injects the same delays and duplicates on every run.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use streamprobe_core::FailureInjection;

/// Derives an independent per-session seed from the scenario seed.
///
/// `stream` separates RNG streams of the same session (payload draws and
/// injection decisions) so changing one never shifts the other.
#[must_use]
pub fn derive_session_seed(seed: u64, session: u32, stream: u64) -> u64 {
    // SplitMix64 finalizer
    let mut x = seed ^ (u64::from(session) << 1) ^ stream.rotate_left(32);
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Injection decided for one emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Injection {
    /// Delay applied before sending; counted into measured latency.
    pub delay: Option<Duration>,
    /// Re-send the previous message instead of a new one.
    pub duplicate: bool,
}

impl Injection {
    /// No injection.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            delay: None,
            duplicate: false,
        }
    }

    /// Returns true if anything is injected.
    #[must_use]
    pub const fn is_some(&self) -> bool {
        self.delay.is_some() || self.duplicate
    }
}

/// Per-session failure injector.
#[derive(Debug)]
pub struct FailureInjector {
    profile: FailureInjection,
    rng: StdRng,
}

impl FailureInjector {
    /// Creates an injector with its own seeded RNG.
    #[must_use]
    pub fn new(profile: FailureInjection, seed: u64) -> Self {
        Self {
            profile,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns true if injection is enabled.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.profile.enabled
    }

    /// Returns the profile.
    #[must_use]
    pub const fn profile(&self) -> &FailureInjection {
        &self.profile
    }

    /// Draws the injection for the next emission.
    pub fn decide(&mut self) -> Injection {
        if !self.profile.enabled {
            return Injection::none();
        }

        let delay = self
            .rng
            .gen_bool(self.profile.delay_probability.clamp(0.0, 1.0))
            .then(|| {
                let ms = self
                    .rng
                    .gen_range(self.profile.delay_min_ms..=self.profile.delay_max_ms);
                Duration::from_millis(ms)
            });
        let duplicate = self
            .rng
            .gen_bool(self.profile.duplicate_probability.clamp(0.0, 1.0));

        let injection = Injection { delay, duplicate };
        if injection.is_some() {
            tracing::trace!(?injection, "injecting failure");
        }
        injection
    }
}
