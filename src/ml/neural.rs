//! Small feed-forward network
//!
//! Fully connected sigmoid layers (`inputs -> 5 -> 3 -> 1` by default)
//! trained with per-sample back-propagation and momentum. Training stops
//! after a fixed iteration budget or once the mean squared error reaches the
//! configured threshold, whichever comes first.

use super::training::{check_rows, sigmoid, Classifier, Standardizer, TrainingRow};
use crate::config::TrainingConfig;
use crate::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Initial weights are drawn from `[-INIT_RANGE, INIT_RANGE)`
const INIT_RANGE: f64 = 0.2;

#[derive(Debug, Clone)]
struct Layer {
    /// `weights[j][k]`: input `k` into neuron `j`
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
    weight_changes: Vec<Vec<f64>>,
    bias_changes: Vec<f64>,
}

impl Layer {
    fn new(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        Self {
            weights: (0..outputs)
                .map(|_| (0..inputs).map(|_| rng.gen_range(-INIT_RANGE..INIT_RANGE)).collect())
                .collect(),
            biases: (0..outputs).map(|_| rng.gen_range(-INIT_RANGE..INIT_RANGE)).collect(),
            weight_changes: vec![vec![0.0; inputs]; outputs],
            bias_changes: vec![0.0; outputs],
        }
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.biases)
            .map(|(w, b)| sigmoid(b + w.iter().zip(input).map(|(wi, x)| wi * x).sum::<f64>()))
            .collect()
    }
}

/// Result of a training run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingStats {
    pub iterations: usize,
    pub error: f64,
}

#[derive(Debug, Clone)]
pub struct NeuralNetwork {
    hidden: Vec<usize>,
    iterations: usize,
    error_threshold: f64,
    learning_rate: f64,
    momentum: f64,
    seed: u64,
    scaler: Standardizer,
    layers: Vec<Layer>,
    last_stats: Option<TrainingStats>,
}

impl NeuralNetwork {
    pub fn new(hidden: Vec<usize>, iterations: usize, error_threshold: f64, seed: u64) -> Self {
        Self {
            hidden,
            iterations,
            error_threshold,
            learning_rate: 0.3,
            momentum: 0.1,
            seed,
            scaler: Standardizer::default(),
            layers: Vec::new(),
            last_stats: None,
        }
    }

    pub fn with_learning(mut self, learning_rate: f64, momentum: f64) -> Self {
        self.learning_rate = learning_rate;
        self.momentum = momentum;
        self
    }

    pub fn last_stats(&self) -> Option<TrainingStats> {
        self.last_stats
    }

    /// Layer sizes including input and output
    pub fn topology(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.layers.len() + 1);
        if let Some(first) = self.layers.first() {
            sizes.push(first.weights.first().map_or(0, Vec::len));
        }
        sizes.extend(self.layers.iter().map(|l| l.biases.len()));
        sizes
    }

    /// Activations of every layer, input first
    fn forward_all(&self, input: Vec<f64>) -> Vec<Vec<f64>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input);
        for layer in &self.layers {
            let next = layer.forward(activations.last().map(Vec::as_slice).unwrap_or(&[]));
            activations.push(next);
        }
        activations
    }

    /// One back-propagation pass for a single sample; returns squared error
    fn train_sample(&mut self, input: Vec<f64>, target: f64) -> f64 {
        let activations = self.forward_all(input);
        let output = activations.last().and_then(|o| o.first()).copied().unwrap_or(0.5);
        let error = target - output;

        // Deltas, output layer first
        let mut deltas: Vec<Vec<f64>> = vec![Vec::new(); self.layers.len()];
        let last = self.layers.len() - 1;
        deltas[last] = vec![error * output * (1.0 - output)];
        for l in (0..last).rev() {
            let outputs = &activations[l + 1];
            let next = &self.layers[l + 1];
            deltas[l] = outputs
                .iter()
                .enumerate()
                .map(|(j, out)| {
                    let downstream: f64 = next
                        .weights
                        .iter()
                        .zip(&deltas[l + 1])
                        .map(|(w, d)| w[j] * d)
                        .sum();
                    downstream * out * (1.0 - out)
                })
                .collect();
        }

        let (lr, momentum) = (self.learning_rate, self.momentum);
        for (l, layer) in self.layers.iter_mut().enumerate() {
            let inputs = &activations[l];
            for (j, delta) in deltas[l].iter().enumerate() {
                for (k, x) in inputs.iter().enumerate() {
                    let change = lr * delta * x + momentum * layer.weight_changes[j][k];
                    layer.weight_changes[j][k] = change;
                    layer.weights[j][k] += change;
                }
                let change = lr * delta + momentum * layer.bias_changes[j];
                layer.bias_changes[j] = change;
                layer.biases[j] += change;
            }
        }

        error * error
    }
}

impl Classifier for NeuralNetwork {
    const NAME: &'static str = "neural_net";

    fn from_config(config: &TrainingConfig) -> Self {
        Self::new(
            config.nn_hidden_layers.clone(),
            config.nn_iterations,
            config.nn_error_threshold,
            config.seed,
        )
        .with_learning(config.nn_learning_rate, config.nn_momentum)
    }

    fn fit(&mut self, rows: &[TrainingRow]) -> Result<()> {
        let dims = check_rows::<Self>(rows)?;
        self.scaler = Standardizer::fit(rows);
        let inputs: Vec<Vec<f64>> = rows.iter().map(|r| self.scaler.transform(&r.features)).collect();

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut sizes = vec![dims];
        sizes.extend(&self.hidden);
        sizes.push(1);
        self.layers = sizes.windows(2).map(|w| Layer::new(w[0], w[1], &mut rng)).collect();

        let mut stats = TrainingStats { iterations: 0, error: f64::INFINITY };
        while stats.iterations < self.iterations && stats.error > self.error_threshold {
            let mut sum = 0.0;
            for (input, row) in inputs.iter().zip(rows) {
                sum += self.train_sample(input.clone(), row.label);
            }
            stats.iterations += 1;
            stats.error = sum / rows.len() as f64;
            if !stats.error.is_finite() {
                return Err(Self::training_error("training error became non-finite"));
            }
        }
        self.last_stats = Some(stats);
        Ok(())
    }

    fn predict_proba(&self, features: &[f64]) -> Result<f64> {
        if self.layers.is_empty() {
            return Err(Self::training_error("predict before fit"));
        }
        if features.len() != self.scaler.dims() {
            return Err(Self::training_error(format!(
                "expected {} features, got {}",
                self.scaler.dims(),
                features.len()
            )));
        }
        self.forward_all(self.scaler.transform(features))
            .last()
            .and_then(|o| o.first())
            .copied()
            .ok_or_else(|| Self::training_error("network produced no output"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<TrainingRow> {
        (0..30)
            .map(|i| {
                let x = (i % 10) as f64;
                TrainingRow {
                    features: vec![x, 9.0 - x, 0.5],
                    label: if x >= 5.0 { 1.0 } else { 0.0 },
                }
            })
            .collect()
    }

    #[test]
    fn test_topology_matches_config() {
        let mut net = NeuralNetwork::from_config(&TrainingConfig::default());
        let mut wide = rows();
        for r in wide.iter_mut() {
            r.features.resize(10, 0.0);
        }
        net.fit(&wide).unwrap();
        assert_eq!(net.topology(), vec![10, 5, 3, 1]);
    }

    #[test]
    fn test_iteration_budget_respected() {
        let mut net = NeuralNetwork::new(vec![5, 3], 100, 0.01, 1);
        net.fit(&rows()).unwrap();
        let stats = net.last_stats().unwrap();
        assert!(stats.iterations <= 100);
        assert!(stats.iterations >= 1);
    }

    #[test]
    fn test_stops_early_at_threshold() {
        // Threshold above any achievable error stops after one pass
        let mut net = NeuralNetwork::new(vec![5, 3], 100, 1.0, 1);
        net.fit(&rows()).unwrap();
        assert_eq!(net.last_stats().unwrap().iterations, 1);
    }

    #[test]
    fn test_output_is_probability() {
        let mut net = NeuralNetwork::new(vec![5, 3], 100, 0.01, 3);
        net.fit(&rows()).unwrap();
        for x in 0..10 {
            let p = net.predict_proba(&[x as f64, 9.0 - x as f64, 0.5]).unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_seeded_training_is_deterministic() {
        let mut a = NeuralNetwork::new(vec![5, 3], 50, 0.01, 9);
        let mut b = NeuralNetwork::new(vec![5, 3], 50, 0.01, 9);
        a.fit(&rows()).unwrap();
        b.fit(&rows()).unwrap();
        let input = [7.0, 2.0, 0.5];
        assert_eq!(a.predict_proba(&input).unwrap(), b.predict_proba(&input).unwrap());
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let net = NeuralNetwork::new(vec![5, 3], 10, 0.01, 1);
        assert!(net.predict_proba(&[1.0]).is_err());
    }
}
