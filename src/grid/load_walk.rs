use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

/// Tuning constants for the demand random walk.
///
/// All `*_fraction` and `*_band` values are fractions of the feeder's base load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WalkParams {
    /// Variance band on ordinary cycles.
    pub normal_band: f32,
    /// Variance band on every `wide_every`-th cycle.
    pub wide_band: f32,
    /// Cycle period of the wide band.
    pub wide_every: u64,
    /// Cycle period of spike opportunities.
    pub spike_every: u64,
    /// Probability that a spike opportunity fires.
    pub spike_probability: f32,
    /// Variance forced by a spike.
    pub spike_fraction: f32,
    /// Fraction of the band a single step may move.
    pub step_fraction: f32,
    /// Multiplier pulling variance back toward zero each cycle (0 < decay < 1).
    pub decay: f32,
    /// Fraction of the band a runaway variance is reset to.
    pub rebound: f32,
}

impl Default for WalkParams {
    fn default() -> Self {
        Self {
            normal_band: 0.05,
            wide_band: 0.08,
            wide_every: 5,
            spike_every: 10,
            spike_probability: 0.5,
            spike_fraction: 0.12,
            step_fraction: 0.2,
            decay: 0.95,
            rebound: 0.8,
        }
    }
}

/// The two uniform `[0, 1)` draws consumed by one walk step.
#[derive(Debug, Clone, Copy)]
pub struct WalkDraws {
    /// Gate for the spike opportunity.
    pub spike_gate: f32,
    /// Jitter for the ordinary step.
    pub jitter: f32,
}

/// Computes the next variance for one feeder.
///
/// Pure: identical inputs always give the same output. `cycle` starts at 1.
pub fn next_variance(
    params: &WalkParams,
    variance: f32,
    base_load_kw: f32,
    cycle: u64,
    draws: WalkDraws,
) -> f32 {
    let band = if params.wide_every > 0 && cycle % params.wide_every == 0 {
        base_load_kw * params.wide_band
    } else {
        base_load_kw * params.normal_band
    };

    let spikes = params.spike_every > 0 && cycle % params.spike_every == 0;
    let mut next = if spikes && draws.spike_gate < params.spike_probability {
        base_load_kw * params.spike_fraction
    } else {
        let stepped = variance + (draws.jitter - 0.5) * band * params.step_fraction;
        if stepped.abs() > band {
            stepped.signum() * band * params.rebound
        } else {
            stepped
        }
    };

    next *= params.decay;
    next
}

/// Seeded source of walk draws so runs are reproducible.
#[derive(Debug, Clone)]
pub struct LoadWalk {
    params: WalkParams,
    rng: StdRng,
}

impl LoadWalk {
    pub fn new(params: WalkParams, seed: u64) -> Self {
        Self {
            params,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn params(&self) -> &WalkParams {
        &self.params
    }

    /// Draws fresh randomness and advances one feeder's variance.
    pub fn step(&mut self, variance: f32, base_load_kw: f32, cycle: u64) -> f32 {
        let draws = WalkDraws {
            spike_gate: self.rng.random::<f32>(),
            jitter: self.rng.random::<f32>(),
        };
        next_variance(&self.params, variance, base_load_kw, cycle, draws)
    }
}
