use numbers::Tensor;

use super::ActivationFn;

#[derive(Debug, Clone, Copy, Default)]
pub struct SoftmaxAF {}

impl ActivationFn for SoftmaxAF {
    fn activate_multiple(&self, lst: &mut Tensor) {
        lst.softmax_rows();
    }

    /// Row-wise Jacobian product: `g_i = y_i * (g_i - sum_j g_j * y_j)`.
    fn backpropagate(&self, activated: &Tensor, mut gradient: Tensor) -> Tensor {
        let stride = activated.sample_len().max(1);
        gradient
            .as_mut_slice()
            .chunks_mut(stride)
            .zip(activated.as_slice().chunks(stride))
            .for_each(|(g, y)| {
                let dot: f32 = g.iter().zip(y.iter()).map(|(g, y)| g * y).sum();
                g.iter_mut().zip(y.iter()).for_each(|(g, y)| *g = y * (*g - dot));
            });
        gradient
    }
}

#[cfg(test)]
mod test {
    use numbers::{Device, Tensor};

    use crate::af::{ActivationFn, SoftmaxAF};

    #[test]
    fn test_softmax_gradient_of_uniform_upstream_is_zero() {
        let ctx = Device::cpu();
        let af = SoftmaxAF {};

        let mut t = Tensor::from_vec(&[1, 3], vec![1.0, 2.0, 3.0], &ctx).unwrap();
        af.activate_multiple(&mut t);

        let back = af.backpropagate(&t, Tensor::filled(&[1, 3], 1.0, &ctx));
        assert!(back.as_slice().iter().all(|v| v.abs() < 1e-6));
    }
}
