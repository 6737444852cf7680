//! Neuron and synapse state.
//!
//! A [`Neuron`] is a McCulloch-Pitts style unit with a graded activation
//! trace. It owns its outgoing [`Synapse`]s; synapses refer to their target
//! by index into the network's neuron vector, so the network is the only
//! owner of neuron storage.
//!
//! Step-global quantities a neuron needs to threshold itself (inhibition
//! constants and the activity counters of the previous phase) are passed in
//! as a frozen [`Inhibition`] block rather than read through a back-link.

/// Directed weighted edge to a postsynaptic neuron.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Synapse {
    /// Index of the postsynaptic neuron
    pub target: usize,
    /// Synaptic weight, added to the target's excitation when the source fires
    pub weight: f64,
}

impl Synapse {
    pub fn new(target: usize, weight: f64) -> Self {
        Self { target, weight }
    }

    /// Hebbian delta rule: pull the weight toward the presynaptic trace.
    ///
    /// ```text
    /// w += rate * (pre - w)
    /// ```
    #[inline]
    pub fn modify(&mut self, presynaptic_trace: f64, rate: f64) {
        self.weight += rate * (presynaptic_trace - self.weight);
    }
}

/// Frozen step-global inputs to the threshold phase.
///
/// Built once by the network before any neuron updates, so every neuron in
/// a step sees the same counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inhibition {
    /// Shunting inhibition
    pub k0: f64,
    /// Feedforward inhibition per externally forced neuron
    pub ki: f64,
    /// Recurrent inhibition per neuron that fired last step
    pub kr: f64,
    /// Number of neurons that fired on the previous step
    pub num_previously_fired: f64,
    /// Number of neurons clamped on by external input
    pub num_forced_to_fire: f64,
    /// Fraction of activation kept by a neuron that does not fire
    pub preserve_parameter: f64,
}

impl Inhibition {
    /// Divisive normalization of an excitation value.
    ///
    /// ```text
    /// y = e / (e + Kr * prev + Ki * forced + K0)
    /// ```
    ///
    /// Returns `None` when the denominator is exactly zero.
    pub fn normalize(&self, excitation: f64) -> Option<f64> {
        let denominator = excitation
            + self.kr * self.num_previously_fired
            + self.ki * self.num_forced_to_fire
            + self.k0;
        if denominator == 0.0 {
            None
        } else {
            Some(excitation / denominator)
        }
    }
}

/// Normalized excitation a neuron must exceed to fire in constant-inhibition mode.
pub const FIRING_THRESHOLD: f64 = 0.5;

/// A single network unit.
#[derive(Debug, Clone, Default)]
pub struct Neuron {
    /// Graded activity trace: 1.0 on firing, decays by the preserve factor otherwise
    pub activation: f64,
    /// Synaptic input accumulated by feedforward; cleared by every update
    pub excitation: f64,
    /// Activation captured at the start of the most recent update
    pub previous_activation: f64,
    /// Output of the most recent update
    pub fired: bool,
    /// One-shot external clamp, consumed by the next update
    pub externally_fired: bool,
    /// Outgoing connections, in wiring order; fixed once the network is built
    pub(crate) synapses: Vec<Synapse>,
}

impl Neuron {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn project_to(&mut self, target: usize, weight: f64) {
        self.synapses.push(Synapse::new(target, weight));
    }

    /// Outgoing connections, in wiring order.
    pub fn synapses(&self) -> &[Synapse] {
        &self.synapses
    }

    pub fn projects_to(&self, target: usize) -> bool {
        self.synapses.iter().any(|s| s.target == target)
    }

    pub fn out_degree(&self) -> usize {
        self.synapses.len()
    }

    #[inline]
    pub fn add_excitation(&mut self, amount: f64) {
        self.excitation += amount;
    }

    /// Threshold and decay under constant inhibition. Returns whether the neuron fired.
    ///
    /// A clamped neuron fires regardless of its excitation. Otherwise the
    /// excitation is normalized by [`Inhibition::normalize`] and compared
    /// against [`FIRING_THRESHOLD`]; a zero denominator counts as silence.
    /// Excitation and the clamp flag are cleared on every path.
    pub fn update(&mut self, inhibition: &Inhibition) -> bool {
        self.previous_activation = self.activation;

        let fires = self.externally_fired
            || inhibition
                .normalize(self.excitation)
                .is_some_and(|y| y > FIRING_THRESHOLD);

        self.settle(fires, inhibition.preserve_parameter);
        self.externally_fired = false;
        fires
    }

    /// Apply an externally decided firing outcome (competitive ranking).
    ///
    /// Snapshots the previous activation and clears excitation exactly as
    /// [`Neuron::update`] does.
    pub fn settle_ranked(&mut self, wins: bool, preserve_parameter: f64) {
        self.previous_activation = self.activation;
        self.settle(wins, preserve_parameter);
    }

    fn settle(&mut self, fires: bool, preserve_parameter: f64) {
        self.fired = fires;
        if fires {
            self.activation = 1.0;
        } else {
            self.activation *= preserve_parameter;
        }
        self.excitation = 0.0;
    }

    /// Modify every outgoing synapse whose target fired this step.
    ///
    /// `fired` is the frozen firing snapshot of the whole population.
    pub fn learn(&mut self, fired: &[bool], rate: f64) {
        let trace = self.previous_activation;
        for synapse in self.synapses.iter_mut().filter(|s| fired[s.target]) {
            synapse.modify(trace, rate);
        }
    }
}
