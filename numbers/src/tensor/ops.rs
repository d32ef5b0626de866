use std::ops::{AddAssign, MulAssign, SubAssign};

use super::Tensor;
use crate::ShapeError;

impl<'a> AddAssign<&'a Tensor> for Tensor {
    fn add_assign(&mut self, rhs: &'a Tensor) {
        assert_eq!(self.shape, rhs.shape, "AddAssign on different shapes");
        self.contents
            .iter_mut()
            .zip(rhs.contents.iter())
            .for_each(|(v1, v2)| *v1 += v2);
    }
}

impl<'a> SubAssign<&'a Tensor> for Tensor {
    fn sub_assign(&mut self, rhs: &'a Tensor) {
        assert_eq!(self.shape, rhs.shape, "SubAssign on different shapes");
        self.contents
            .iter_mut()
            .zip(rhs.contents.iter())
            .for_each(|(v1, v2)| *v1 -= v2);
    }
}

impl MulAssign<f32> for Tensor {
    fn mul_assign(&mut self, rhs: f32) {
        self.contents.iter_mut().for_each(|v| *v *= rhs);
    }
}

impl Tensor {
    pub fn hadamard_prod(mut self, rhs: &Tensor) -> Self {
        assert_eq!(self.shape, rhs.shape, "hadamard_prod on different shapes");
        self.contents
            .iter_mut()
            .zip(rhs.contents.iter())
            .for_each(|(v1, v2)| *v1 *= v2);

        self
    }

    fn require_rank(&self, expected: usize) -> Result<(), ShapeError> {
        if self.rank() != expected {
            return Err(ShapeError::Rank {
                expected,
                received: self.rank(),
            });
        }
        Ok(())
    }

    /// `[n, k] x [k, m] -> [n, m]`
    pub fn matmul(&self, rhs: &Tensor) -> Result<Tensor, ShapeError> {
        self.require_rank(2)?;
        rhs.require_rank(2)?;
        let (n, k) = (self.shape[0], self.shape[1]);
        let (k2, m) = (rhs.shape[0], rhs.shape[1]);
        if k != k2 {
            return Err(ShapeError::Incompatible {
                lhs: self.shape.to_vec(),
                rhs: rhs.shape.to_vec(),
            });
        }

        let mut res = Tensor::zeros(&[n, m], &self.context);
        let out = res.as_mut_slice();
        for i in 0..n {
            let row = &self.contents[i * k..(i + 1) * k];
            let out_row = &mut out[i * m..(i + 1) * m];
            for (p, a) in row.iter().enumerate() {
                if *a == 0.0 {
                    continue;
                }
                let rhs_row = &rhs.contents[p * m..(p + 1) * m];
                out_row
                    .iter_mut()
                    .zip(rhs_row.iter())
                    .for_each(|(o, b)| *o += a * b);
            }
        }

        Ok(res)
    }

    pub fn transpose(&self) -> Result<Tensor, ShapeError> {
        self.require_rank(2)?;
        let (rows, cols) = (self.shape[0], self.shape[1]);
        let contents = (0..cols)
            .flat_map(|col| (0..rows).map(move |row| self.contents[row * cols + col]))
            .collect::<Vec<_>>();

        Tensor::from_vec(&[cols, rows], contents, &self.context)
    }

    /// Index of the largest value of every entry of the leading dimension.
    /// Ties resolve to the lowest index.
    pub fn argmax_rows(&self) -> Vec<usize> {
        let stride = self.sample_len().max(1);
        self.contents
            .chunks(stride)
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, v)| {
                        if *v > bv {
                            (i, *v)
                        } else {
                            (bi, bv)
                        }
                    })
                    .0
            })
            .collect()
    }

    /// Numerically stable softmax over the trailing values of each row.
    pub fn softmax_rows(&mut self) {
        let stride = self.sample_len().max(1);
        self.contents.chunks_mut(stride).for_each(|row| {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut total = 0.0;
            row.iter_mut().for_each(|v| {
                *v = (*v - max).exp();
                total += *v;
            });
            row.iter_mut().for_each(|v| *v /= total);
        });
    }

    pub fn sum(&self) -> f32 {
        self.contents.iter().sum()
    }

    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.contents.iter().fold(None, |acc, v| match acc {
            None => Some((*v, *v)),
            Some((lo, hi)) => Some((lo.min(*v), hi.max(*v))),
        })
    }
}

#[cfg(test)]
mod test {
    use crate::{Device, ShapeError, Tensor};

    #[test]
    fn test_matmul() {
        let ctx = Device::cpu();
        let a = Tensor::from_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &ctx).unwrap();
        let b = Tensor::from_vec(&[3, 2], vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0], &ctx).unwrap();

        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0]);

        assert!(matches!(
            a.matmul(&a),
            Err(ShapeError::Incompatible { .. })
        ));
    }

    #[test]
    fn test_transpose() {
        let ctx = Device::cpu();
        let a = Tensor::from_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &ctx).unwrap();
        let t = a.transpose().unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.as_slice(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_softmax_and_argmax() {
        let ctx = Device::cpu();
        let mut a = Tensor::from_vec(&[2, 3], vec![1.0, 3.0, 2.0, 0.0, 0.0, 0.0], &ctx).unwrap();
        a.softmax_rows();

        let first: f32 = a.as_slice()[0..3].iter().sum();
        assert!((first - 1.0).abs() < 1e-6);
        assert!((a.as_slice()[3] - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(a.argmax_rows(), vec![1, 0]);
    }

    #[test]
    fn test_assign_ops() {
        let ctx = Device::cpu();
        let mut a = Tensor::filled(&[2], 1.0, &ctx);
        let b = Tensor::filled(&[2], 0.5, &ctx);
        a += &b;
        a *= 2.0;
        a -= &b;
        assert_eq!(a.as_slice(), &[2.5, 2.5]);
        assert_eq!(a.hadamard_prod(&b).as_slice(), &[1.25, 1.25]);
        assert_eq!(b.min_max(), Some((0.5, 0.5)));
    }
}
