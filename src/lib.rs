//! # ca3net
//!
//! A Levy-style CA3 recurrent network: a discrete-time model of hippocampal
//! region CA3 used to study sequence learning and recall.
//!
//! ## Overview
//!
//! Binary McCulloch-Pitts units with graded activation traces are wired
//! sparsely and at random. Each timestep, neurons that fired push their
//! synaptic weights into their targets' excitation; firing is then decided
//! either by divisive (shunting, feedforward and recurrent) inhibition or by
//! competitive top-k selection, and synapses onto firing neurons move toward
//! the presynaptic activation trace.
//!
//! ## Structure
//!
//! - [`core`] — Neurons, synapses, wiring and the timestep cycle
//! - [`training`] — Sequence construction and the training/testing protocol
//! - [`record`] — Textual firing-vector dumps
//! - [`config`] — Run files (YAML) for the command-line drivers

pub mod config;
pub mod core;
pub mod record;
pub mod training;

pub use config::{ConfigError, RunConfig};
pub use crate::core::{Inhibition, NetError, NetResult, Network, Neuron, Synapse};
pub use record::{format_firings, parse_firing_line, FiringFiles, FiringWriter};
pub use training::{
    apply_initial_firing, build_sequence, free_run, initial_cue, initial_firing, off_noise,
    run_protocol, NullObserver, Phase, ProtocolConfig, StepEvent, StepObserver, TrialMetrics,
};

/// Network parameters.
///
/// Keys in run files follow the names the model is usually published with
/// (`n`, `a`, `K0`, `Ki`, `Kr`, `w0`, ...). `n`, `a`, `w0`,
/// `preserveParameter` and `synmodrate` must be present; the remaining keys
/// fall back to their defaults.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetConfig {
    /// Number of neurons. Default 2048.
    #[serde(rename = "n")]
    pub num_neurons: usize,
    /// Probability of one neuron projecting to another, self excluded. Default 0.1.
    #[serde(
        rename = "connectionProbability",
        default = "default_connection_probability"
    )]
    pub connection_probability: f64,
    /// Shunting inhibition. Default 0.832.
    #[serde(rename = "K0", default = "default_k0")]
    pub k0: f64,
    /// Feedforward inhibition (K_FF), scaled by the clamped count. Default 0.01.
    #[serde(rename = "Ki", default = "default_ki")]
    pub ki: f64,
    /// Recurrent inhibition (K_FB), scaled by last step's firing count. Default 0.05.
    #[serde(rename = "Kr", default = "default_kr")]
    pub kr: f64,
    /// Initial synaptic weight. Default 0.45.
    pub w0: f64,
    /// Target fraction of neurons firing per step. Default 0.075.
    #[serde(rename = "a")]
    pub desired_activity: f64,
    /// Fraction of activation a silent neuron keeps (alpha). Default 0.
    #[serde(rename = "preserveParameter")]
    pub preserve_parameter: f64,
    /// Synaptic modification rate; 0 disables learning. Default 0.
    #[serde(rename = "synmodrate")]
    pub learning_rate: f64,
    /// Select the top `N * a` neurons instead of thresholding. Default false.
    #[serde(rename = "isCompetitive", default)]
    pub is_competitive: bool,
}

fn default_connection_probability() -> f64 {
    0.1
}

fn default_k0() -> f64 {
    0.832
}

fn default_ki() -> f64 {
    0.01
}

fn default_kr() -> f64 {
    0.05
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            num_neurons: 2048,
            connection_probability: default_connection_probability(),
            k0: default_k0(),
            ki: default_ki(),
            kr: default_kr(),
            w0: 0.45,
            desired_activity: 0.075,
            preserve_parameter: 0.0,
            learning_rate: 0.0,
            is_competitive: false,
        }
    }
}

fn check_fraction(name: &str, value: f64) -> NetResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(NetError::InvalidConfig(format!(
            "{} must be in [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

fn check_non_negative(name: &str, value: f64) -> NetResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(NetError::InvalidConfig(format!(
            "{} must be finite and non-negative, got {}",
            name, value
        )));
    }
    Ok(())
}

impl NetConfig {
    /// Reject parameter sets the engine cannot run.
    ///
    /// # Errors
    /// - `InvalidConfig` for an empty population, fractions outside [0, 1],
    ///   or negative / non-finite constants
    pub fn validate(&self) -> NetResult<()> {
        if self.num_neurons == 0 {
            return Err(NetError::InvalidConfig(
                "n must be at least 1".to_string(),
            ));
        }
        check_fraction("connectionProbability", self.connection_probability)?;
        check_fraction("a", self.desired_activity)?;
        check_fraction("preserveParameter", self.preserve_parameter)?;
        check_non_negative("K0", self.k0)?;
        check_non_negative("Ki", self.ki)?;
        check_non_negative("Kr", self.kr)?;
        check_non_negative("synmodrate", self.learning_rate)?;
        if !self.w0.is_finite() {
            return Err(NetError::InvalidConfig(format!(
                "w0 must be finite, got {}",
                self.w0
            )));
        }
        Ok(())
    }
}
