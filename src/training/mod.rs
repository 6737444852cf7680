//! Sequence learning protocol: input construction, noise, trials.
//!
//! A run trains the network on a fixed sequence of overlapping input
//! patterns and then tests recall from a cue:
//!
//! 1. **Training** (`trainingTrials` trials) — each trial starts from a
//!    random initial firing pattern at the desired activity, then clamps
//!    every row of the sequence in turn (with optional off-noise) while
//!    synapses modify.
//! 2. **Testing** (`testingTrials` trials) — learning is switched off; each
//!    trial starts from a random initial pattern and only the first
//!    `stutter` steps receive the first pattern as a cue. The rest of the
//!    trial is driven by recurrent activity alone.
//!
//! Every recorded step is handed to a [`StepObserver`], which decides what
//! to keep (see [`crate::record::FiringFiles`]).

use crate::core::{NetError, NetResult, Network};
use log::{debug, info};
use ndarray::{s, Array2};
use rand::Rng;

/// Training/testing protocol parameters.
///
/// `sequenceLength`, `stutter`, `patternSize` and `spacing` must be present
/// in a run file; the trial counts and noise fall back to their defaults.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Number of distinct patterns in the sequence. Default 20.
    #[serde(rename = "sequenceLength")]
    pub sequence_length: usize,
    /// Consecutive timesteps each pattern is presented for. Default 1.
    pub stutter: usize,
    /// Neurons switched on by each pattern. Default 20.
    #[serde(rename = "patternSize")]
    pub pattern_size: usize,
    /// Offset between the first neurons of consecutive patterns. Default 5.
    pub spacing: usize,
    /// Probability that an on-bit of the input is dropped. Default 0.
    #[serde(rename = "pExternalOffNoise", default)]
    pub p_external_off_noise: f64,
    /// Default 120.
    #[serde(rename = "trainingTrials", default = "default_training_trials")]
    pub training_trials: usize,
    /// Default 10.
    #[serde(rename = "testingTrials", default = "default_testing_trials")]
    pub testing_trials: usize,
    /// Training trial whose firing is kept as the "early" sample. Default 10.
    #[serde(rename = "earlyTrialToSave", default = "default_early_trial_to_save")]
    pub early_trial_to_save: usize,
    /// Desired activity for the last training trial; the network's own value when absent.
    #[serde(rename = "a_last_train", default)]
    pub desired_activity_on_last_train: Option<f64>,
}

fn default_training_trials() -> usize {
    120
}

fn default_testing_trials() -> usize {
    10
}

fn default_early_trial_to_save() -> usize {
    10
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            sequence_length: 20,
            stutter: 1,
            pattern_size: 20,
            spacing: 5,
            p_external_off_noise: 0.0,
            training_trials: default_training_trials(),
            testing_trials: default_testing_trials(),
            early_trial_to_save: default_early_trial_to_save(),
            desired_activity_on_last_train: None,
        }
    }
}

impl ProtocolConfig {
    /// Timesteps in one trial: every pattern, `stutter` times.
    ///
    /// Saturates on overflow; [`ProtocolConfig::validate`] rejects such protocols.
    pub fn timesteps_per_trial(&self) -> usize {
        self.sequence_length.saturating_mul(self.stutter)
    }

    /// Neurons covered by the whole sequence, or `None` on overflow.
    pub fn span(&self) -> Option<usize> {
        self.sequence_length
            .checked_sub(1)?
            .checked_mul(self.spacing)?
            .checked_add(self.pattern_size)
    }

    /// Check the protocol against a population of `num_neurons`.
    ///
    /// # Errors
    /// - `InvalidConfig` for an empty sequence, zero stutter, an
    ///   out-of-range probability, sizes that overflow, or patterns that run
    ///   past the last neuron
    pub fn validate(&self, num_neurons: usize) -> NetResult<()> {
        if self.sequence_length == 0 || self.stutter == 0 {
            return Err(NetError::InvalidConfig(
                "sequenceLength and stutter must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.p_external_off_noise) {
            return Err(NetError::InvalidConfig(format!(
                "pExternalOffNoise must be in [0, 1], got {}",
                self.p_external_off_noise
            )));
        }
        if let Some(a) = self.desired_activity_on_last_train {
            if !(0.0..=1.0).contains(&a) {
                return Err(NetError::InvalidConfig(format!(
                    "a_last_train must be in [0, 1], got {}",
                    a
                )));
            }
        }
        if self.sequence_length.checked_mul(self.stutter).is_none() {
            return Err(NetError::InvalidConfig(format!(
                "sequenceLength {} x stutter {} overflows",
                self.sequence_length, self.stutter
            )));
        }
        let span = self.span().ok_or_else(|| {
            NetError::InvalidConfig(format!(
                "sequence of {} patterns with spacing {} and size {} overflows",
                self.sequence_length, self.spacing, self.pattern_size
            ))
        })?;
        if span > num_neurons {
            return Err(NetError::InvalidConfig(format!(
                "sequence spans {} neurons but the network has {}",
                span, num_neurons
            )));
        }
        Ok(())
    }
}

/// Which part of a run a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Training,
    Testing,
    /// Cue followed by unclamped steps, outside any protocol
    FreeRun,
}

/// One recorded timestep.
#[derive(Debug, Clone, Copy)]
pub struct StepEvent<'a> {
    pub phase: Phase,
    pub trial: usize,
    pub timestep: usize,
    /// Firing state after the step's update
    pub firings: &'a [bool],
    /// Fraction of the population that fired
    pub activity: f64,
}

/// Receives every recorded timestep of a run.
pub trait StepObserver {
    /// # Errors
    /// Implementations return `Output` when they fail to persist the step;
    /// the run stops at the first failure.
    fn observe(&mut self, event: &StepEvent<'_>) -> NetResult<()>;
}

/// Discards every step.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl StepObserver for NullObserver {
    fn observe(&mut self, _event: &StepEvent<'_>) -> NetResult<()> {
        Ok(())
    }
}

/// Summary of one trial.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TrialMetrics {
    pub phase: Phase,
    pub trial: usize,
    /// Mean fraction of neurons firing across the trial's recorded steps
    pub mean_activity: f64,
    /// Peak per-step activity
    pub max_activity: f64,
    /// Mean synaptic weight after the trial
    pub mean_weight: f64,
}

#[derive(Debug, Default)]
struct ActivityTracker {
    sum: f64,
    max: f64,
    steps: usize,
}

impl ActivityTracker {
    fn push(&mut self, activity: f64) {
        self.sum += activity;
        self.max = self.max.max(activity);
        self.steps += 1;
    }

    fn finish<R: Rng>(self, phase: Phase, trial: usize, net: &Network<R>) -> TrialMetrics {
        let weights = net.weights();
        let mean_weight = if weights.is_empty() {
            0.0
        } else {
            weights.iter().sum::<f64>() / weights.len() as f64
        };
        TrialMetrics {
            phase,
            trial,
            mean_activity: if self.steps == 0 {
                0.0
            } else {
                self.sum / self.steps as f64
            },
            max_activity: self.max,
            mean_weight,
        }
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// Build the input sequence: one row per timestep, one column per neuron.
///
/// Pattern `k` switches on neurons `k*spacing .. k*spacing + patternSize`
/// and occupies rows `k*stutter .. (k+1)*stutter`.
///
/// # Errors
/// - `InvalidConfig` if the protocol fails [`ProtocolConfig::validate`]
pub fn build_sequence(protocol: &ProtocolConfig, num_neurons: usize) -> NetResult<Array2<bool>> {
    protocol.validate(num_neurons)?;

    let mut input = Array2::from_elem((protocol.timesteps_per_trial(), num_neurons), false);
    for pattern in 0..protocol.sequence_length {
        let first = pattern * protocol.spacing;
        let last = first + protocol.pattern_size;
        for repeat in 0..protocol.stutter {
            let row = pattern * protocol.stutter + repeat;
            input.slice_mut(s![row, first..last]).fill(true);
        }
    }
    Ok(input)
}

/// Drop each on-bit independently with probability `p_off`.
pub fn off_noise<G: Rng + ?Sized>(pattern: &[bool], p_off: f64, rng: &mut G) -> Vec<bool> {
    pattern
        .iter()
        .map(|&on| on && rng.gen::<f64>() >= p_off)
        .collect()
}

/// Random initial firing with exactly `floor(n * a)` neurons on.
///
/// Sweeps the population repeatedly, switching on each neuron not yet
/// chosen with probability `a`, until enough are on.
pub fn initial_firing<G: Rng + ?Sized>(
    num_neurons: usize,
    desired_activity: f64,
    rng: &mut G,
) -> Vec<bool> {
    let mut firing = vec![false; num_neurons];
    let mut needed = ((num_neurons as f64 * desired_activity).floor() as usize).min(num_neurons);

    while needed > 0 {
        for slot in firing.iter_mut() {
            if needed == 0 {
                break;
            }
            if rng.gen::<f64>() < desired_activity && !*slot {
                *slot = true;
                needed -= 1;
            }
        }
    }
    firing
}

/// Cue for a free run: the first `ceil(n * a)` neurons on.
pub fn initial_cue(num_neurons: usize, desired_activity: f64) -> Vec<bool> {
    let count = ((num_neurons as f64 * desired_activity).ceil() as usize).min(num_neurons);
    (0..num_neurons).map(|i| i < count).collect()
}

/// Put the network into a random state at its desired activity.
///
/// Uses [`Network::divine_intervention_fire`], so the step runs without
/// feedforward inhibition and erases all other firing. The step is not
/// recorded.
pub fn apply_initial_firing<R: Rng, G: Rng + ?Sized>(
    net: &mut Network<R>,
    rng: &mut G,
) -> NetResult<()> {
    let firing = initial_firing(net.num_neurons(), net.config().desired_activity, rng);
    net.divine_intervention_fire(&firing)?;
    net.step();
    Ok(())
}

// ============================================================================
// Runs
// ============================================================================

fn observe_step<R: Rng, O: StepObserver + ?Sized>(
    net: &Network<R>,
    phase: Phase,
    trial: usize,
    timestep: usize,
    observer: &mut O,
    tracker: &mut ActivityTracker,
) -> NetResult<()> {
    let firings = net.firings();
    let activity = net.activity();
    tracker.push(activity);
    observer.observe(&StepEvent {
        phase,
        trial,
        timestep,
        firings: &firings,
        activity,
    })
}

/// Train on the sequence, then test recall.
///
/// `rng` drives initial firing and input noise; the network's own generator
/// drives competitive tie-breaks. Learning is left disabled afterwards and
/// the desired activity stays at the last training trial's value.
///
/// # Errors
/// - `InvalidConfig` if the protocol does not fit the network
/// - whatever the observer returns
pub fn run_protocol<R, G, O>(
    net: &mut Network<R>,
    protocol: &ProtocolConfig,
    rng: &mut G,
    observer: &mut O,
) -> NetResult<Vec<TrialMetrics>>
where
    R: Rng,
    G: Rng + ?Sized,
    O: StepObserver + ?Sized,
{
    let n = net.num_neurons();
    let input = build_sequence(protocol, n)?;
    let steps = protocol.timesteps_per_trial();
    let last_train_activity = protocol
        .desired_activity_on_last_train
        .unwrap_or(net.config().desired_activity);
    let p_off = protocol.p_external_off_noise;

    let mut metrics = Vec::with_capacity(protocol.training_trials + protocol.testing_trials);

    info!(
        "Training: {} trials x {} steps, {} neurons",
        protocol.training_trials, steps, n
    );
    for trial in 0..protocol.training_trials {
        if trial + 1 == protocol.training_trials {
            net.set_desired_activity(last_train_activity);
        }
        apply_initial_firing(net, rng)?;

        let mut tracker = ActivityTracker::default();
        for t in 0..steps {
            let row = input.row(t).to_vec();
            net.externally_fire(&off_noise(&row, p_off, rng))?;
            net.step();
            observe_step(net, Phase::Training, trial, t, observer, &mut tracker)?;
        }

        let m = tracker.finish(Phase::Training, trial, net);
        debug!(
            "Train {:3} | activity {:.2}% | mean weight {:.4}",
            trial,
            100.0 * m.mean_activity,
            m.mean_weight
        );
        metrics.push(m);
    }

    net.set_learning_rate(0.0);
    let cue = input.row(0).to_vec();

    info!("Testing: {} trials", protocol.testing_trials);
    for trial in 0..protocol.testing_trials {
        apply_initial_firing(net, rng)?;

        let mut tracker = ActivityTracker::default();
        for t in 0..steps {
            if t < protocol.stutter {
                net.externally_fire(&off_noise(&cue, p_off, rng))?;
            }
            net.step();
            observe_step(net, Phase::Testing, trial, t, observer, &mut tracker)?;
        }

        let m = tracker.finish(Phase::Testing, trial, net);
        debug!("Test {:3} | activity {:.2}%", trial, 100.0 * m.mean_activity);
        metrics.push(m);
    }

    Ok(metrics)
}

/// Clamp `cue` for one step, then let the network run on its own.
///
/// Records `steps + 1` steps: the cued one and every free step.
///
/// # Errors
/// - `ShapeMismatch` if the cue does not match the population
/// - whatever the observer returns
pub fn free_run<R, O>(
    net: &mut Network<R>,
    cue: &[bool],
    steps: usize,
    observer: &mut O,
) -> NetResult<TrialMetrics>
where
    R: Rng,
    O: StepObserver + ?Sized,
{
    let mut tracker = ActivityTracker::default();

    net.step_with_input(cue)?;
    observe_step(net, Phase::FreeRun, 0, 0, observer, &mut tracker)?;

    for t in 1..=steps {
        net.step();
        observe_step(net, Phase::FreeRun, 0, t, observer, &mut tracker)?;
    }
    Ok(tracker.finish(Phase::FreeRun, 0, net))
}

// ============================================================================
// Tests
// ============================================================================
