use numbers::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name", content = "config")]
pub enum Optimizer {
    Sgd {
        learning_rate: f32,
    },
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
}

impl Optimizer {
    pub fn sgd(learning_rate: f32) -> Self {
        Optimizer::Sgd { learning_rate }
    }

    pub fn adam(learning_rate: f32) -> Self {
        Optimizer::Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match self {
            Optimizer::Sgd { learning_rate } | Optimizer::Adam { learning_rate, .. } => {
                *learning_rate
            }
        }
    }
}

/// Optimizer together with its per-parameter moments. Recreated on every
/// compile, so a new learning rate always starts from fresh moments.
pub(crate) struct OptimizerState {
    optimizer: Optimizer,
    step: i32,
    moments: Vec<(Vec<f32>, Vec<f32>)>,
}

impl OptimizerState {
    pub fn new(optimizer: Optimizer) -> Self {
        Self {
            optimizer,
            step: 0,
            moments: vec![],
        }
    }

    pub fn optimizer(&self) -> Optimizer {
        self.optimizer
    }

    /// Advances the step counter; call once per batch before [`Self::apply`].
    pub fn begin_step(&mut self) {
        self.step = self.step.saturating_add(1);
    }

    /// Updates parameter number `index` in place with its gradient.
    pub fn apply(&mut self, index: usize, param: &mut Tensor, gradient: &Tensor) {
        match self.optimizer {
            Optimizer::Sgd { learning_rate } => {
                param
                    .as_mut_slice()
                    .iter_mut()
                    .zip(gradient.as_slice().iter())
                    .for_each(|(p, g)| *p -= learning_rate * g);
            }
            Optimizer::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => {
                if self.moments.len() <= index {
                    self.moments.resize_with(index + 1, || (vec![], vec![]));
                }
                let (m, v) = &mut self.moments[index];
                if m.len() != param.len() {
                    *m = vec![0.0; param.len()];
                    *v = vec![0.0; param.len()];
                }

                let correction1 = 1.0 - beta1.powi(self.step.max(1));
                let correction2 = 1.0 - beta2.powi(self.step.max(1));

                param
                    .as_mut_slice()
                    .iter_mut()
                    .zip(gradient.as_slice().iter())
                    .zip(m.iter_mut().zip(v.iter_mut()))
                    .for_each(|((p, g), (m, v))| {
                        *m = beta1 * *m + (1.0 - beta1) * g;
                        *v = beta2 * *v + (1.0 - beta2) * g * g;
                        let m_hat = *m / correction1;
                        let v_hat = *v / correction2;
                        *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
                    });
            }
        }
    }
}
