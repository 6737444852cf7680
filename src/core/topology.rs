//! Sparse random wiring.
//!
//! Every neuron projects to exactly `round(p * N)` distinct other neurons
//! (capped at `N - 1`), all starting at the same weight. Sparse degrees use
//! rejection sampling; once the degree exceeds half of the available
//! candidates a distinct index sample is drawn directly so that wiring
//! never stalls as `p` approaches 1.

use super::neuron::Neuron;
use rand::seq::index;
use rand::Rng;

/// Out-degree produced by [`wire`] for a population of `num_neurons`.
pub fn out_degree(num_neurons: usize, connection_probability: f64) -> usize {
    let wanted = (connection_probability * num_neurons as f64).round() as usize;
    wanted.min(num_neurons.saturating_sub(1))
}

/// Connect `neurons` in place. Existing synapses are left untouched.
pub fn wire<R: Rng + ?Sized>(neurons: &mut [Neuron], degree: usize, w0: f64, rng: &mut R) {
    let n = neurons.len();
    if n < 2 || degree == 0 {
        return;
    }
    let degree = degree.min(n - 1);
    let dense = degree * 2 > n - 1;

    // Reused across sources; cleared after each one.
    let mut taken = vec![false; n];

    for source in 0..n {
        if dense {
            // Sample among the n-1 candidates and skip over the source index.
            for j in index::sample(rng, n - 1, degree).into_iter() {
                let target = if j >= source { j + 1 } else { j };
                neurons[source].project_to(target, w0);
            }
            continue;
        }

        let mut needed = degree;
        while needed > 0 {
            let target = rng.gen_range(0..n);
            if target == source || taken[target] {
                continue;
            }
            taken[target] = true;
            neurons[source].project_to(target, w0);
            needed -= 1;
        }
        for synapse in &neurons[source].synapses {
            taken[synapse.target] = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn build(n: usize, p: f64, seed: u64) -> Vec<Neuron> {
        let mut neurons = vec![Neuron::new(); n];
        let mut rng = StdRng::seed_from_u64(seed);
        wire(&mut neurons, out_degree(n, p), 0.45, &mut rng);
        neurons
    }

    fn assert_simple_graph(neurons: &[Neuron], degree: usize) {
        for (i, neuron) in neurons.iter().enumerate() {
            assert_eq!(neuron.out_degree(), degree, "neuron {i}");
            let targets: HashSet<usize> = neuron.synapses.iter().map(|s| s.target).collect();
            assert_eq!(targets.len(), degree, "duplicate edge from {i}");
            assert!(!targets.contains(&i), "self-loop on {i}");
            assert!(neuron.synapses.iter().all(|s| s.weight == 0.45));
        }
    }

    #[test]
    fn test_out_degree_rounds() {
        assert_eq!(out_degree(10, 0.3), 3);
        assert_eq!(out_degree(100, 0.106), 11);
        assert_eq!(out_degree(100, 0.104), 10);
    }

    #[test]
    fn test_out_degree_capped() {
        assert_eq!(out_degree(10, 1.0), 9);
        assert_eq!(out_degree(1, 1.0), 0);
        assert_eq!(out_degree(0, 0.5), 0);
    }

    #[test]
    fn test_sparse_wiring() {
        let neurons = build(200, 0.1, 7);
        assert_simple_graph(&neurons, 20);
    }

    #[test]
    fn test_dense_wiring_terminates() {
        let neurons = build(12, 0.95, 3);
        assert_simple_graph(&neurons, 11);

        let neurons = build(30, 0.6, 3);
        assert_simple_graph(&neurons, 18);
    }

    #[test]
    fn test_wiring_is_seeded() {
        let a = build(50, 0.2, 11);
        let b = build(50, 0.2, 11);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.synapses, y.synapses);
        }
    }
}
