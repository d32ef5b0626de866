use numbers::Tensor;
use serde::{Deserialize, Serialize};

/// Loss and accuracy of one batch (or one evaluated set).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub loss: f32,
    pub accuracy: f32,
}

pub trait Metric: Sync + Send {
    fn name(&self) -> &'static str;

    /// Mean of the metric over the leading dimension.
    fn calc_metric(&self, expected: &Tensor, received: &Tensor) -> f32;
}

pub trait LossFunction: Metric {
    /// Gradient of the mean loss with respect to `received`.
    fn cost_derivative(&self, received: &Tensor, expected: &Tensor) -> Tensor;

    /// Gradient with respect to the logits when `received` is a softmax
    /// output, if this loss has a closed form for it.
    fn softmax_cost_derivative(&self, _received: &Tensor, _expected: &Tensor) -> Option<Tensor> {
        None
    }
}

const EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, Copy, Default)]
pub struct CategoricalCrossEntropy {}

impl Metric for CategoricalCrossEntropy {
    fn name(&self) -> &'static str {
        "loss"
    }

    fn calc_metric(&self, expected: &Tensor, received: &Tensor) -> f32 {
        let rows = expected.outer_dim().max(1);
        let total: f32 = expected
            .as_slice()
            .iter()
            .zip(received.as_slice().iter())
            .filter(|(y, _)| **y != 0.0)
            .map(|(y, p)| -y * p.clamp(EPSILON, 1.0 - EPSILON).ln())
            .sum();

        total / rows as f32
    }
}

impl LossFunction for CategoricalCrossEntropy {
    fn cost_derivative(&self, received: &Tensor, expected: &Tensor) -> Tensor {
        let rows = expected.outer_dim().max(1) as f32;
        let mut res = received.clone();
        res.as_mut_slice()
            .iter_mut()
            .zip(expected.as_slice().iter())
            .for_each(|(p, y)| *p = -y / (p.clamp(EPSILON, 1.0 - EPSILON) * rows));
        res
    }

    fn softmax_cost_derivative(&self, received: &Tensor, expected: &Tensor) -> Option<Tensor> {
        let rows = expected.outer_dim().max(1) as f32;
        let mut res = received.clone();
        res -= expected;
        res *= 1.0 / rows;
        Some(res)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CategoricalAccuracyMetric {}

impl Metric for CategoricalAccuracyMetric {
    fn name(&self) -> &'static str {
        "accuracy"
    }

    fn calc_metric(&self, expected: &Tensor, received: &Tensor) -> f32 {
        let expected = expected.argmax_rows();
        let received = received.argmax_rows();
        if expected.is_empty() {
            return 0.0;
        }

        let correct = expected
            .iter()
            .zip(received.iter())
            .filter(|(e, r)| e == r)
            .count();

        correct as f32 / expected.len() as f32
    }
}

#[cfg(test)]
mod test {
    use numbers::{Device, Tensor};

    use crate::metrics::{CategoricalAccuracyMetric, CategoricalCrossEntropy, LossFunction, Metric};

    #[test]
    fn test_accuracy() {
        let ctx = Device::cpu();
        let acc: Box<dyn Metric> = Box::new(CategoricalAccuracyMetric {});

        let expected = Tensor::from_vec(
            &[4, 2],
            vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0],
            &ctx,
        )
        .unwrap();
        let assert_acc = |received: Vec<f32>, accuracy: f32| {
            let received = Tensor::from_vec(&[4, 2], received, &ctx).unwrap();
            assert_eq!(acc.calc_metric(&expected, &received), accuracy);
        };

        assert_acc(vec![0.9, 0.1, 0.6, 0.4, 0.2, 0.8, 0.3, 0.7], 1.0);
        assert_acc(vec![0.9, 0.1, 0.4, 0.6, 0.8, 0.2, 0.3, 0.7], 0.5);
        assert_acc(vec![0.1, 0.9, 0.4, 0.6, 0.8, 0.2, 0.7, 0.3], 0.0);
    }

    #[test]
    fn test_cross_entropy() {
        let ctx = Device::cpu();
        let loss = CategoricalCrossEntropy {};

        let expected = Tensor::from_vec(&[2, 2], vec![1.0, 0.0, 0.0, 1.0], &ctx).unwrap();
        let received = Tensor::from_vec(&[2, 2], vec![0.5, 0.5, 0.25, 0.75], &ctx).unwrap();

        let value = loss.calc_metric(&expected, &received);
        let manual = -(0.5f32.ln() + 0.75f32.ln()) / 2.0;
        assert!((value - manual).abs() < 1e-6);

        // A confident wrong answer is clamped instead of producing infinity.
        let wrong = Tensor::from_vec(&[2, 2], vec![0.0, 1.0, 1.0, 0.0], &ctx).unwrap();
        assert!(loss.calc_metric(&expected, &wrong).is_finite());

        let delta = loss.softmax_cost_derivative(&received, &expected).unwrap();
        assert_eq!(delta.as_slice(), &[-0.25, 0.25, 0.125, -0.125]);
    }
}
