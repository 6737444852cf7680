//! Core network engine.
//!
//! This module provides the recurrent network and its per-timestep cycle:
//! - Sparse random topology ([`topology`])
//! - Feedforward push of the previous step's firing into excitation
//! - Firing selection by divisive inhibition or by competitive ranking
//! - Hebbian synaptic modification gated by postsynaptic firing
//!
//! ## Timestep
//!
//! ```text
//! externally_fire(z)    // optional one-shot clamp
//! feedforward()         // e_j += Σ_{i fired} w_ij
//! update()              // threshold/decay or top-k selection, then learning
//! ```
//!
//! Constant-inhibition mode normalizes each neuron's excitation:
//! ```text
//! y_j = e_j / (e_j + Kr·m(t-1) + Ki·x(t) + K0)      fire iff y_j > 0.5
//! ```
//! where `m(t-1)` counts last step's firing and `x(t)` counts clamped neurons.

pub mod neuron;
pub mod topology;

pub use neuron::{Inhibition, Neuron, Synapse, FIRING_THRESHOLD};

use crate::record::format_firings;
use crate::NetConfig;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::error::Error;
use std::fmt;
use std::time::Instant;

/// Error type for network operations.
#[derive(Debug, Clone, PartialEq)]
pub enum NetError {
    /// Firing pattern or sequence of the wrong size
    ShapeMismatch(String),
    /// Invalid network or protocol configuration
    InvalidConfig(String),
    /// Firing dump line that is not a sequence of 0/1 tokens
    Parse(String),
    /// Failure writing recorded firing output
    Output(String),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::ShapeMismatch(msg) => write!(f, "Shape mismatch: {}", msg),
            NetError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            NetError::Parse(msg) => write!(f, "Parse error: {}", msg),
            NetError::Output(msg) => write!(f, "Output error: {}", msg),
        }
    }
}

impl Error for NetError {}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        NetError::Output(err.to_string())
    }
}

pub type NetResult<T> = Result<T, NetError>;

/// A Levy-style CA3 recurrent network.
///
/// # Architecture
///
/// - **Neurons:** `N` units indexed `0..N`, each owning its outgoing synapses
/// - **Wiring:** fixed after construction; every neuron has the same out-degree
/// - **Counters:** forced (clamped) count, previous-step firing count and
///   current-step firing count, which feed the inhibition terms
/// - **RNG:** owned and used for wiring and for competitive tie-breaking
///
/// The generator type defaults to [`StdRng`]; any [`Rng`] can be injected
/// through [`Network::with_rng`].
#[derive(Debug, Clone)]
pub struct Network<R: Rng = StdRng> {
    config: NetConfig,
    neurons: Vec<Neuron>,
    num_forced_to_fire: usize,
    num_previously_fired: usize,
    num_currently_fired: usize,
    rng: R,
}

impl Network<StdRng> {
    /// Build a network seeded from OS entropy.
    ///
    /// # Errors
    /// - `InvalidConfig` if `config` fails [`NetConfig::validate`]
    pub fn new(config: NetConfig) -> NetResult<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Build a reproducible network: wiring and tie-breaks follow `seed`.
    pub fn seeded(config: NetConfig, seed: u64) -> NetResult<Self> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Network<R> {
    /// Create the neuron population and wire it.
    ///
    /// # Errors
    /// - `InvalidConfig` if `config` fails [`NetConfig::validate`]
    pub fn with_rng(config: NetConfig, mut rng: R) -> NetResult<Self> {
        config.validate()?;

        let n = config.num_neurons;
        let degree = topology::out_degree(n, config.connection_probability);

        info!("Wiring {} neurons, out-degree {}", n, degree);
        let started = Instant::now();
        let mut neurons = vec![Neuron::new(); n];
        topology::wire(&mut neurons, degree, config.w0, &mut rng);
        info!("  Wiring took {} ms", started.elapsed().as_millis());

        Ok(Self {
            config,
            neurons,
            num_forced_to_fire: 0,
            num_previously_fired: 0,
            num_currently_fired: 0,
            rng,
        })
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn num_neurons(&self) -> usize {
        self.neurons.len()
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    pub fn neuron(&self, index: usize) -> Option<&Neuron> {
        self.neurons.get(index)
    }

    /// Mutable neuron access for seeding dynamic state. Outgoing synapses
    /// are read-only outside the engine, so wiring stays fixed.
    pub fn neuron_mut(&mut self, index: usize) -> Option<&mut Neuron> {
        self.neurons.get_mut(index)
    }

    /// Neurons clamped by the last [`Network::externally_fire`].
    pub fn num_forced_to_fire(&self) -> usize {
        self.num_forced_to_fire
    }

    /// Neurons that fired on the last completed update.
    pub fn num_previously_fired(&self) -> usize {
        self.num_previously_fired
    }

    pub fn num_currently_fired(&self) -> usize {
        self.num_currently_fired
    }

    /// Fraction of the population that fired on the last update.
    pub fn activity(&self) -> f64 {
        if self.neurons.is_empty() {
            return 0.0;
        }
        self.num_previously_fired as f64 / self.neurons.len() as f64
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.config.learning_rate = learning_rate;
    }

    pub fn set_desired_activity(&mut self, desired_activity: f64) {
        self.config.desired_activity = desired_activity;
    }

    // ------------------------------------------------------------------------
    // External firing control
    // ------------------------------------------------------------------------

    fn check_pattern(&self, pattern: &[bool]) -> NetResult<()> {
        if pattern.len() != self.neurons.len() {
            return Err(NetError::ShapeMismatch(format!(
                "Firing pattern: expected {} neurons, got {}",
                self.neurons.len(),
                pattern.len()
            )));
        }
        Ok(())
    }

    /// Clamp the marked neurons on for the next update.
    ///
    /// Unmarked neurons are unclamped but keep their last `fired` state, so
    /// they still feed forward. The clamped count drives feedforward
    /// inhibition (`Ki`).
    ///
    /// # Errors
    /// - `ShapeMismatch` if `pattern.len() != N`; nothing is changed
    pub fn externally_fire(&mut self, pattern: &[bool]) -> NetResult<()> {
        self.check_pattern(pattern)?;
        for (neuron, &on) in self.neurons.iter_mut().zip(pattern) {
            neuron.externally_fired = on;
        }
        self.num_forced_to_fire = pattern.iter().filter(|&&on| on).count();
        Ok(())
    }

    /// Force the network into a firing state without feedforward inhibition.
    ///
    /// Marked neurons are clamped on; unmarked neurons are unclamped and
    /// have `fired` reset, so only the marked set feeds forward. The clamped
    /// count is zeroed.
    ///
    /// # Errors
    /// - `ShapeMismatch` if `pattern.len() != N`; nothing is changed
    pub fn divine_intervention_fire(&mut self, pattern: &[bool]) -> NetResult<()> {
        self.check_pattern(pattern)?;
        for (neuron, &on) in self.neurons.iter_mut().zip(pattern) {
            neuron.externally_fired = on;
            if !on {
                neuron.fired = false;
            }
        }
        self.num_forced_to_fire = 0;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Timestep
    // ------------------------------------------------------------------------

    /// Push the previous step's firing through the synapses.
    ///
    /// For every neuron with `fired == true`, each synapse weight is added to
    /// its target's excitation.
    pub fn feedforward(&mut self) {
        for source in 0..self.neurons.len() {
            if !self.neurons[source].fired {
                continue;
            }
            for s in 0..self.neurons[source].synapses.len() {
                let Synapse { target, weight } = self.neurons[source].synapses[s];
                self.neurons[target].add_excitation(weight);
            }
        }
    }

    /// Decide this step's firing for the whole population, then learn.
    ///
    /// Competitive and constant-inhibition selection never mix within a
    /// step. Learning runs only when `learning_rate > 0`.
    pub fn update(&mut self) {
        if self.config.is_competitive {
            self.update_competitive();
        } else {
            self.update_with_inhibitory_constants();
        }

        debug!("activity = {:.2}%", 100.0 * self.activity());

        if self.config.learning_rate > 0.0 {
            self.apply_learning();
        }
    }

    /// One full timestep: feedforward then update.
    pub fn step(&mut self) {
        self.feedforward();
        self.update();
    }

    /// Clamp `pattern` with [`Network::externally_fire`] and run one step.
    pub fn step_with_input(&mut self, pattern: &[bool]) -> NetResult<()> {
        self.externally_fire(pattern)?;
        self.step();
        Ok(())
    }

    /// Inhibition block frozen for one threshold phase.
    pub fn inhibition(&self) -> Inhibition {
        Inhibition {
            k0: self.config.k0,
            ki: self.config.ki,
            kr: self.config.kr,
            num_previously_fired: self.num_previously_fired as f64,
            num_forced_to_fire: self.num_forced_to_fire as f64,
            preserve_parameter: self.config.preserve_parameter,
        }
    }

    fn update_with_inhibitory_constants(&mut self) {
        let inhibition = self.inhibition();

        // Each neuron depends only on its own excitation and the frozen block.
        let fired = self
            .neurons
            .par_iter_mut()
            .map(|neuron| neuron.update(&inhibition))
            .filter(|&fired| fired)
            .count();

        self.num_currently_fired = fired;
        self.num_previously_fired = fired;
    }

    /// Number of top-ranked neurons beyond rank zero selected in competitive mode.
    ///
    /// Ranks `0..=floor(N * a)` fire, so `floor(N * a) + 1` neurons fire
    /// whenever the population is large enough.
    pub fn num_desired_to_fire(&self) -> usize {
        (self.neurons.len() as f64 * self.config.desired_activity).floor() as usize
    }

    fn update_competitive(&mut self) {
        let preserve = self.config.preserve_parameter;
        let num_desired = self.num_desired_to_fire();

        for neuron in self.neurons.iter_mut().filter(|n| n.externally_fired) {
            neuron.excitation = f64::MAX;
            neuron.externally_fired = false;
        }

        // Shuffle first so that the stable sort breaks ties at random.
        let mut ranking: Vec<usize> = (0..self.neurons.len()).collect();
        ranking.shuffle(&mut self.rng);
        ranking.sort_by(|&a, &b| {
            self.neurons[b]
                .excitation
                .total_cmp(&self.neurons[a].excitation)
        });

        let mut fired = 0;
        for (rank, &index) in ranking.iter().enumerate() {
            let wins = rank <= num_desired;
            self.neurons[index].settle_ranked(wins, preserve);
            if wins {
                fired += 1;
            }
        }

        self.num_currently_fired = fired;
        self.num_previously_fired = fired;
    }

    fn apply_learning(&mut self) {
        let rate = self.config.learning_rate;
        let fired = self.firings();
        self.neurons
            .par_iter_mut()
            .for_each(|neuron| neuron.learn(&fired, rate));
    }

    // ------------------------------------------------------------------------
    // Readout
    // ------------------------------------------------------------------------

    /// Firing state of every neuron after the last update.
    pub fn firings(&self) -> Vec<bool> {
        self.neurons.iter().map(|n| n.fired).collect()
    }

    /// Firing state rendered as one dump line (see [`crate::record`]).
    pub fn firing_line(&self) -> String {
        format_firings(&self.firings())
    }

    /// Weights of every synapse, source-major, in wiring order.
    pub fn weights(&self) -> Vec<f64> {
        self.neurons
            .iter()
            .flat_map(|n| n.synapses.iter().map(|s| s.weight))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn config(n: usize) -> NetConfig {
        NetConfig {
            num_neurons: n,
            connection_probability: 0.1,
            ..NetConfig::default()
        }
    }

    fn pattern(n: usize, on: &[usize]) -> Vec<bool> {
        let mut p = vec![false; n];
        for &i in on {
            p[i] = true;
        }
        p
    }

    #[test]
    fn test_network_init() {
        let net = Network::seeded(config(100), 1).unwrap();
        assert_eq!(net.num_neurons(), 100);
        assert!(net.neurons().iter().all(|n| n.out_degree() == 10));
        assert_eq!(net.num_previously_fired(), 0);
    }

    #[test]
    fn test_invalid_config() {
        assert!(Network::seeded(config(0), 1).is_err());
        let bad = NetConfig {
            connection_probability: 1.5,
            ..config(10)
        };
        assert!(Network::seeded(bad, 1).is_err());
    }

    #[test]
    fn test_pattern_length_checked() {
        let mut net = Network::seeded(config(20), 1).unwrap();
        let err = net.externally_fire(&[true; 19]).unwrap_err();
        assert!(matches!(err, NetError::ShapeMismatch(_)));
        assert!(net.divine_intervention_fire(&[true; 21]).is_err());
        assert!(net.neurons().iter().all(|n| !n.externally_fired));
    }

    #[test]
    fn test_externally_fire_counts_and_keeps_fired() {
        let mut net = Network::seeded(config(10), 1).unwrap();
        net.neurons[5].fired = true;
        net.externally_fire(&pattern(10, &[0, 1, 2])).unwrap();

        assert_eq!(net.num_forced_to_fire(), 3);
        assert!(net.neurons[0].externally_fired);
        assert!(!net.neurons[5].externally_fired);
        assert!(net.neurons[5].fired);
    }

    #[test]
    fn test_divine_intervention_resets_unmarked() {
        let mut net = Network::seeded(config(10), 1).unwrap();
        net.externally_fire(&pattern(10, &[0, 1])).unwrap();
        net.neurons[5].fired = true;
        net.divine_intervention_fire(&pattern(10, &[2])).unwrap();

        assert_eq!(net.num_forced_to_fire(), 0);
        assert!(net.neurons[2].externally_fired);
        assert!(!net.neurons[0].externally_fired);
        assert!(!net.neurons[5].fired);
    }

    #[test]
    fn test_clamp_is_one_shot() {
        let mut net = Network::seeded(config(30), 2).unwrap();
        net.externally_fire(&pattern(30, &[3])).unwrap();
        net.step();
        assert!(net.neurons[3].fired);
        assert!(net.neurons().iter().all(|n| !n.externally_fired));
    }

    #[test]
    fn test_feedforward_sums_weights() {
        let mut net = Network::seeded(config(30), 3).unwrap();
        net.neurons[0].fired = true;
        net.neurons[1].fired = true;
        net.feedforward();

        for j in 0..30 {
            let incoming = [0, 1]
                .iter()
                .filter(|&&i| net.neurons[i].projects_to(j))
                .count();
            assert_abs_diff_eq!(net.neurons[j].excitation, 0.45 * incoming as f64, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_competitive_fires_num_desired_plus_one() {
        let cfg = NetConfig {
            desired_activity: 0.1,
            is_competitive: true,
            ..config(100)
        };
        let mut net = Network::seeded(cfg, 4).unwrap();
        for (i, neuron) in net.neurons.iter_mut().enumerate() {
            neuron.excitation = i as f64;
        }
        net.update();

        assert_eq!(net.num_previously_fired(), 11);
        assert_eq!(net.num_desired_to_fire(), 10);
        for (i, neuron) in net.neurons().iter().enumerate() {
            assert_eq!(neuron.fired, i >= 89, "neuron {i}");
            assert_eq!(neuron.excitation, 0.0);
        }
    }

    #[test]
    fn test_competitive_clamp_wins() {
        let cfg = NetConfig {
            desired_activity: 0.0,
            is_competitive: true,
            ..config(50)
        };
        let mut net = Network::seeded(cfg, 5).unwrap();
        net.neurons[10].excitation = 100.0;
        net.externally_fire(&pattern(50, &[42])).unwrap();
        net.update();

        assert_eq!(net.num_previously_fired(), 1);
        assert!(net.neurons[42].fired);
        assert!(!net.neurons[10].fired);
        assert!(!net.neurons[42].externally_fired);
    }

    #[test]
    fn test_competitive_decay() {
        let cfg = NetConfig {
            desired_activity: 0.0,
            is_competitive: true,
            preserve_parameter: 0.5,
            ..config(10)
        };
        let mut net = Network::seeded(cfg, 6).unwrap();
        net.neurons[0].excitation = 1.0;
        for neuron in net.neurons.iter_mut() {
            neuron.activation = 0.6;
        }
        net.update();

        assert!(net.neurons[0].fired);
        assert_eq!(net.neurons[0].activation, 1.0);
        for neuron in &net.neurons[1..] {
            assert_eq!(neuron.activation, 0.6 * 0.5);
            assert_eq!(neuron.previous_activation, 0.6);
        }
    }

    #[test]
    fn test_competitive_mode_learns_onto_winners() {
        let cfg = NetConfig {
            desired_activity: 0.0,
            is_competitive: true,
            learning_rate: 0.1,
            ..config(50)
        };
        let mut net = Network::seeded(cfg, 10).unwrap();
        let winner = net.neurons()[0].synapses()[0].target;
        for (i, neuron) in net.neurons.iter_mut().enumerate() {
            neuron.activation = i as f64 / 50.0;
        }
        net.neurons[winner].excitation = 3.0;
        let before: Vec<Vec<f64>> = net
            .neurons()
            .iter()
            .map(|n| n.synapses().iter().map(|s| s.weight).collect())
            .collect();
        net.update();

        assert_eq!(net.num_previously_fired(), 1);
        assert!(net.neurons[winner].fired);
        let mut onto_winner = 0;
        for (i, neuron) in net.neurons().iter().enumerate() {
            let pre = i as f64 / 50.0;
            for (synapse, &w) in neuron.synapses().iter().zip(&before[i]) {
                if synapse.target == winner {
                    onto_winner += 1;
                    assert_abs_diff_eq!(synapse.weight, w + 0.1 * (pre - w), epsilon = 1e-12);
                } else {
                    assert_eq!(synapse.weight, w);
                }
            }
        }
        assert!(onto_winner > 0);
    }

    #[test]
    fn test_neuron_mut_keeps_wiring() {
        let mut net = Network::seeded(config(30), 11).unwrap();
        let wiring: Vec<Vec<usize>> = net
            .neurons()
            .iter()
            .map(|n| n.synapses().iter().map(|s| s.target).collect())
            .collect();

        let neuron = net.neuron_mut(0).unwrap();
        neuron.fired = true;
        neuron.activation = 1.0;
        net.step();

        for (neuron, targets) in net.neurons().iter().zip(&wiring) {
            let now: Vec<usize> = neuron.synapses().iter().map(|s| s.target).collect();
            assert_eq!(&now, targets);
        }
        assert!(net.neuron_mut(30).is_none());
    }

    #[test]
    fn test_learning_disabled_keeps_weights() {
        let mut net = Network::seeded(config(40), 7).unwrap();
        let before = net.weights();
        net.step_with_input(&pattern(40, &[0, 1, 2, 3])).unwrap();
        net.step();
        assert_eq!(before, net.weights());
    }

    #[test]
    fn test_update_counts_inhibitory_firing() {
        let mut net = Network::seeded(config(40), 8).unwrap();
        net.step_with_input(&pattern(40, &[0, 1, 2, 3, 4])).unwrap();
        assert_eq!(net.num_previously_fired(), 5);
        assert_eq!(net.num_currently_fired(), 5);
        assert_abs_diff_eq!(net.activity(), 5.0 / 40.0, epsilon = 1e-12);
    }

    #[test]
    fn test_firing_line_format() {
        let mut net = Network::seeded(config(4), 9).unwrap();
        net.step_with_input(&pattern(4, &[1, 3])).unwrap();
        assert_eq!(net.firing_line(), "0 1 0 1 ");
    }
}
