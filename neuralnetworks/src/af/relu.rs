use numbers::Tensor;

use super::ActivationFn;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReLUAF {}

impl ActivationFn for ReLUAF {
    fn activate_multiple(&self, lst: &mut Tensor) {
        lst.apply(|v| v.max(0.0));
    }

    fn backpropagate(&self, activated: &Tensor, mut gradient: Tensor) -> Tensor {
        gradient
            .as_mut_slice()
            .iter_mut()
            .zip(activated.as_slice().iter())
            .for_each(|(g, a)| {
                if *a <= 0.0 {
                    *g = 0.0
                }
            });
        gradient
    }
}

#[cfg(test)]
mod test {
    use numbers::{Device, Tensor};

    use crate::af::{ActivationFn, ReLUAF};

    #[test]
    fn test_relu() {
        let ctx = Device::cpu();
        let af = ReLUAF {};

        let mut t = Tensor::from_vec(&[4], vec![-1.0, 0.0, 0.5, 2.0], &ctx).unwrap();
        af.activate_multiple(&mut t);
        assert_eq!(t.as_slice(), &[0.0, 0.0, 0.5, 2.0]);

        let grad = Tensor::filled(&[4], 3.0, &ctx);
        let back = af.backpropagate(&t, grad);
        assert_eq!(back.as_slice(), &[0.0, 0.0, 3.0, 3.0]);
    }
}
