use numbers::{Device, Tensor};
use rand::distributions::Distribution;
use std::sync::Arc;

use super::{
    check_batch_shape, Conv2DConfig, ErrorBackpropagation, Layer, LayerKind, LayerOutput, Padding,
    TrainCache,
};
use crate::{profiling::evaluate, NetworkError};

/// 2D convolution over NHWC batches.
///
/// The kernel is stored as `[kernel_h, kernel_w, in_channels, filters]`,
/// the bias as `[filters]`.
pub struct Conv2DLayer {
    name: String,
    config: Conv2DConfig,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    kernel: Tensor,
    bias: Tensor,
}

struct Tap {
    kernel_offset: usize,
    input_offset: usize,
}

impl Conv2DLayer {
    pub fn with_weights(
        config: Conv2DConfig,
        input_shape: &[usize],
        kernel: Tensor,
        bias: Tensor,
    ) -> Result<Self, NetworkError> {
        let output_shape =
            LayerKind::Convolution(config.clone()).output_shape("conv2d", input_shape)?;
        let ctx = Arc::clone(kernel.context());
        let mut layer = Self {
            name: "unnamed".to_owned(),
            kernel: Tensor::zeros(&[0], &ctx),
            bias: Tensor::zeros(&[config.filters], &ctx),
            config,
            input_shape: input_shape.to_vec(),
            output_shape,
        };
        layer.kernel = Tensor::zeros(&layer.kernel_shape(), &ctx);
        layer.set_weights(vec![kernel, bias])?;

        Ok(layer)
    }

    /// He-normal kernel, zero bias.
    pub fn new_random(
        config: Conv2DConfig,
        input_shape: &[usize],
        rng: &mut dyn rand::RngCore,
        ctx: &Arc<Device>,
    ) -> Self {
        let channels = input_shape.last().copied().unwrap_or(1);
        let fan_in = (config.kernel_size[0] * config.kernel_size[1] * channels).max(1);
        let dist = rand_distr::Normal::new(0.0, (2.0 / fan_in as f32).sqrt())
            .expect("Should create distribution");

        let kernel_shape = [
            config.kernel_size[0],
            config.kernel_size[1],
            channels,
            config.filters,
        ];
        let output_shape = LayerKind::Convolution(config.clone())
            .output_shape("conv2d", input_shape)
            .unwrap_or_default();

        Self {
            name: "unnamed".to_owned(),
            kernel: Tensor::random(&kernel_shape, rng, |rng| dist.sample(rng), ctx),
            bias: Tensor::zeros(&[config.filters], ctx),
            config,
            input_shape: input_shape.to_vec(),
            output_shape,
        }
    }

    pub fn config(&self) -> &Conv2DConfig {
        &self.config
    }

    fn kernel_shape(&self) -> Vec<usize> {
        vec![
            self.config.kernel_size[0],
            self.config.kernel_size[1],
            self.input_shape[2],
            self.config.filters,
        ]
    }

    fn padding_offsets(&self) -> (usize, usize) {
        match self.config.padding {
            Padding::Valid => (0, 0),
            Padding::Same => {
                let pad = |out: usize, stride: usize, kernel: usize, size: usize| {
                    ((out - 1) * stride + kernel).saturating_sub(size) / 2
                };
                (
                    pad(
                        self.output_shape[0],
                        self.config.strides[0],
                        self.config.kernel_size[0],
                        self.input_shape[0],
                    ),
                    pad(
                        self.output_shape[1],
                        self.config.strides[1],
                        self.config.kernel_size[1],
                        self.input_shape[1],
                    ),
                )
            }
        }
    }

    /// Kernel positions that fall inside the input for output cell `(oy, ox)`
    /// of sample `s`, with the flat offsets of their first channel.
    fn taps(&self, s: usize, oy: usize, ox: usize) -> Vec<Tap> {
        let (h, w, c) = (self.input_shape[0], self.input_shape[1], self.input_shape[2]);
        let [kh, kw] = self.config.kernel_size;
        let [sh, sw] = self.config.strides;
        let (pt, pl) = self.padding_offsets();

        let mut taps = Vec::with_capacity(kh * kw);
        for ky in 0..kh {
            let Some(iy) = (oy * sh + ky).checked_sub(pt).filter(|iy| *iy < h) else {
                continue;
            };
            for kx in 0..kw {
                let Some(ix) = (ox * sw + kx).checked_sub(pl).filter(|ix| *ix < w) else {
                    continue;
                };
                taps.push(Tap {
                    kernel_offset: (ky * kw + kx) * c * self.config.filters,
                    input_offset: ((s * h + iy) * w + ix) * c,
                });
            }
        }
        taps
    }

    fn convolve(&self, input: &Tensor) -> Result<Tensor, NetworkError> {
        let n = check_batch_shape(&self.input_shape, input)?;
        let (oh, ow, f) = (self.output_shape[0], self.output_shape[1], self.output_shape[2]);
        let c = self.input_shape[2];

        let mut out = Tensor::zeros(&[n, oh, ow, f], input.context());
        let x = input.as_slice();
        let k = self.kernel.as_slice();
        let b = self.bias.as_slice();
        let o = out.as_mut_slice();

        for s in 0..n {
            for oy in 0..oh {
                for ox in 0..ow {
                    let base = ((s * oh + oy) * ow + ox) * f;
                    let acc = &mut o[base..base + f];
                    acc.copy_from_slice(b);

                    for tap in self.taps(s, oy, ox) {
                        for ch in 0..c {
                            let a = x[tap.input_offset + ch];
                            if a == 0.0 {
                                continue;
                            }
                            let k_base = tap.kernel_offset + ch * f;
                            acc.iter_mut()
                                .zip(k[k_base..k_base + f].iter())
                                .for_each(|(o, kv)| *o += a * kv);
                        }
                    }
                }
            }
        }

        self.config
            .activation
            .activation_fn()
            .activate_multiple(&mut out);
        Ok(out)
    }
}

impl Layer for Conv2DLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Convolution(self.config.clone())
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn execute_layer(&self, arr: &Tensor) -> Result<Tensor, NetworkError> {
        evaluate!(&self.name, "ExecuteLayer", self.convolve(arr))
    }

    fn pre_train(
        &self,
        input: &Tensor,
        _rng: &mut dyn rand::RngCore,
    ) -> Result<(Tensor, TrainCache), NetworkError> {
        Ok((self.execute_layer(input)?, TrainCache::None))
    }

    fn train(
        &self,
        input: &Tensor,
        received: (Tensor, TrainCache),
        expected: LayerOutput,
    ) -> Result<ErrorBackpropagation, NetworkError> {
        let n = check_batch_shape(&self.input_shape, input)?;
        let (oh, ow, f) = (self.output_shape[0], self.output_shape[1], self.output_shape[2]);
        let c = self.input_shape[2];

        let delta = expected.into_delta(self.config.activation, &received.0);
        drop(received);

        evaluate!(&self.name, "Backpropagate", {
            let mut d_kernel = Tensor::zeros(self.kernel.shape(), input.context());
            let mut d_bias = Tensor::zeros(self.bias.shape(), input.context());
            let mut d_input = Tensor::zeros(input.shape(), input.context());

            let x = input.as_slice();
            let k = self.kernel.as_slice();
            let d = delta.as_slice();
            let dk = d_kernel.as_mut_slice();
            let dx = d_input.as_mut_slice();

            for s in 0..n {
                for oy in 0..oh {
                    for ox in 0..ow {
                        let base = ((s * oh + oy) * ow + ox) * f;
                        let g = &d[base..base + f];
                        if g.iter().all(|v| *v == 0.0) {
                            continue;
                        }
                        d_bias
                            .as_mut_slice()
                            .iter_mut()
                            .zip(g.iter())
                            .for_each(|(b, g)| *b += g);

                        for tap in self.taps(s, oy, ox) {
                            for ch in 0..c {
                                let a = x[tap.input_offset + ch];
                                let k_base = tap.kernel_offset + ch * f;
                                let mut back = 0.0;
                                for (i, gv) in g.iter().enumerate() {
                                    dk[k_base + i] += a * gv;
                                    back += k[k_base + i] * gv;
                                }
                                dx[tap.input_offset + ch] += back;
                            }
                        }
                    }
                }
            }

            Ok(ErrorBackpropagation {
                error: d_input,
                gradients: vec![d_kernel, d_bias],
            })
        })
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.kernel, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.kernel, &mut self.bias]
    }
}
