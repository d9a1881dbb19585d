//! Batch logistic regression
//!
//! Plain gradient descent on the log-loss over standardised features, with a
//! bias term. Fitted from scratch on every call by `RetrainingModel`.

use super::training::{check_rows, sigmoid, Classifier, Standardizer, TrainingRow};
use crate::config::TrainingConfig;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    steps: usize,
    learning_rate: f64,
    scaler: Standardizer,
    weights: Vec<f64>,
    bias: f64,
    fitted: bool,
}

impl LogisticRegression {
    pub fn new(steps: usize, learning_rate: f64) -> Self {
        Self {
            steps,
            learning_rate,
            scaler: Standardizer::default(),
            weights: Vec::new(),
            bias: 0.0,
            fitted: false,
        }
    }

    fn linear(&self, z: &[f64]) -> f64 {
        self.bias + self.weights.iter().zip(z).map(|(w, x)| w * x).sum::<f64>()
    }
}

impl Classifier for LogisticRegression {
    const NAME: &'static str = "logistic";

    fn from_config(config: &TrainingConfig) -> Self {
        Self::new(config.logistic_steps, config.logistic_learning_rate)
    }

    fn fit(&mut self, rows: &[TrainingRow]) -> Result<()> {
        let dims = check_rows::<Self>(rows)?;
        self.scaler = Standardizer::fit(rows);
        let inputs: Vec<Vec<f64>> = rows.iter().map(|r| self.scaler.transform(&r.features)).collect();

        self.weights = vec![0.0; dims];
        self.bias = 0.0;
        let n = rows.len() as f64;

        for _ in 0..self.steps {
            let mut grad_w = vec![0.0; dims];
            let mut grad_b = 0.0;

            for (z, row) in inputs.iter().zip(rows) {
                let error = sigmoid(self.linear(z)) - row.label;
                for (g, x) in grad_w.iter_mut().zip(z) {
                    *g += error * x;
                }
                grad_b += error;
            }

            for (w, g) in self.weights.iter_mut().zip(&grad_w) {
                *w -= self.learning_rate * g / n;
            }
            self.bias -= self.learning_rate * grad_b / n;
        }

        if !self.bias.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            return Err(Self::training_error("weights diverged"));
        }
        self.fitted = true;
        Ok(())
    }

    fn predict_proba(&self, features: &[f64]) -> Result<f64> {
        if !self.fitted {
            return Err(Self::training_error("predict before fit"));
        }
        if features.len() != self.scaler.dims() {
            return Err(Self::training_error(format!(
                "expected {} features, got {}",
                self.scaler.dims(),
                features.len()
            )));
        }
        Ok(sigmoid(self.linear(&self.scaler.transform(features))))
    }
}
