//! Weighted payload mix.

use rand::Rng;
use rand::distributions::{Alphanumeric, Distribution, WeightedIndex};
use streamprobe_core::PayloadWeight;

use crate::error::{LoadError, Result};

/// Sampler over a scenario's weighted payload mix.
#[derive(Debug, Clone)]
pub struct PayloadMix {
    entries: Vec<PayloadWeight>,
    index: WeightedIndex<u32>,
}

impl PayloadMix {
    /// Builds a sampler.
    ///
    /// # Errors
    /// Returns `LoadError::PayloadMix` if the mix is empty or has no positive
    /// weight.
    pub fn new(entries: &[PayloadWeight]) -> Result<Self> {
        let index = WeightedIndex::new(entries.iter().map(|e| e.weight))
            .map_err(|e| LoadError::PayloadMix(e.to_string()))?;
        Ok(Self {
            entries: entries.to_vec(),
            index,
        })
    }

    /// Draws one entry.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &PayloadWeight {
        &self.entries[self.index.sample(rng)]
    }

    /// Draws an entry and renders a body of its size.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> (String, String) {
        let entry = self.pick(rng);
        let body = (0..entry.size_bytes)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect();
        (entry.kind.clone(), body)
    }
}
