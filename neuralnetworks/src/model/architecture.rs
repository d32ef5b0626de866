use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::{af::Activation, layers::LayerKind, NetworkError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub name: String,
    pub kind: LayerKind,
}

/// Everything needed to rebuild a model except its parameter values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArchitecture {
    /// Shape of one sample, `[height, width, channels]` for images.
    pub input_shape: Vec<usize>,
    pub layers: Vec<LayerDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub name: String,
    pub kind: String,
    pub output_shape: Vec<usize>,
    pub param_count: usize,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl ModelArchitecture {
    /// Names layers `<label>_<n>`, counting per label from 1.
    pub fn from_kinds(input_shape: &[usize], kinds: Vec<LayerKind>) -> Self {
        let mut layers: Vec<LayerDescriptor> = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let n = layers.iter().filter(|l| l.kind.label() == kind.label()).count() + 1;
            layers.push(LayerDescriptor {
                name: format!("{}_{}", kind.label(), n),
                kind,
            });
        }

        Self {
            input_shape: input_shape.to_vec(),
            layers,
        }
    }

    /// The default handwritten-digit CNN for `[28, 28, 1]` inputs.
    pub fn digit_classifier() -> Self {
        Self::from_kinds(
            &[28, 28, 1],
            vec![
                LayerKind::conv2d(8, 5, Activation::Relu),
                LayerKind::max_pool(2),
                LayerKind::conv2d(16, 5, Activation::Relu),
                LayerKind::max_pool(2),
                LayerKind::Flatten,
                LayerKind::dropout(0.25),
                LayerKind::dense(10, Activation::Softmax),
            ],
        )
    }

    /// Per-sample input shape of every layer, followed by the model output
    /// shape. Fails on the first layer whose configuration does not fit.
    pub fn shapes(&self) -> Result<Vec<Vec<usize>>, NetworkError> {
        let mut shapes = vec![self.input_shape.clone()];
        for layer in &self.layers {
            let next = layer.kind.output_shape(&layer.name, &shapes[shapes.len() - 1])?;
            shapes.push(next);
        }
        Ok(shapes)
    }

    pub fn output_shape(&self) -> Result<Vec<usize>, NetworkError> {
        Ok(self.shapes()?.pop().unwrap_or_default())
    }

    pub fn layer_summaries(&self) -> Result<Vec<LayerSummary>, NetworkError> {
        let shapes = self.shapes()?;
        Ok(self
            .layers
            .iter()
            .enumerate()
            .map(|(i, layer)| LayerSummary {
                name: layer.name.clone(),
                kind: layer.kind.label().to_owned(),
                output_shape: shapes[i + 1].clone(),
                param_count: layer.kind.param_count(&shapes[i]),
            })
            .collect())
    }

    /// Index of the last convolution layer, if any.
    pub fn last_conv_layer(&self) -> Option<usize> {
        self.layers.iter().rposition(|l| l.kind.is_convolution())
    }

    /// Identifies the architecture a weight blob was produced for.
    pub fn fingerprint(&self) -> Result<String, NetworkError> {
        let json = serde_json::to_string(self)
            .map_err(|e| NetworkError::Encoding(e.to_string()))?;
        let hash = json.bytes().fold(FNV_OFFSET, |hash, byte| {
            (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
        });
        Ok(format!("{:016x}", hash))
    }

    /// Text table with one row per layer and the total parameter count.
    pub fn summary(&self) -> Result<String, NetworkError> {
        let summaries = self.layer_summaries()?;
        let mut out = String::new();
        let rule = "-".repeat(64);

        // writing to a String cannot fail
        let _ = writeln!(out, "{:<24}{:<24}{:>16}", "Layer (type)", "Output shape", "Params");
        let _ = writeln!(out, "{}", rule);
        for s in &summaries {
            let _ = writeln!(
                out,
                "{:<24}{:<24}{:>16}",
                format!("{} ({})", s.name, s.kind),
                format!("{:?}", s.output_shape),
                s.param_count
            );
        }
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(
            out,
            "Total params: {}",
            summaries.iter().map(|s| s.param_count).sum::<usize>()
        );

        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_digit_classifier_layout() {
        let arch = ModelArchitecture::digit_classifier();
        let names: Vec<_> = arch.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "conv2d_1",
                "max_pooling2d_1",
                "conv2d_2",
                "max_pooling2d_2",
                "flatten_1",
                "dropout_1",
                "dense_1"
            ]
        );
        assert_eq!(arch.output_shape().unwrap(), vec![10]);
        assert_eq!(arch.last_conv_layer(), Some(2));

        let summaries = arch.layer_summaries().unwrap();
        assert_eq!(summaries[2].output_shape, vec![8, 8, 16]);
        assert_eq!(summaries[2].param_count, 5 * 5 * 8 * 16 + 16);
        assert_eq!(summaries[4].output_shape, vec![256]);
        assert_eq!(summaries[6].param_count, 2570);
    }

    #[test]
    fn test_fingerprint_changes_with_architecture() {
        let a = ModelArchitecture::digit_classifier();
        let mut b = a.clone();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        b.layers.pop();
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 16);
    }

    #[test]
    fn test_summary_lists_every_layer() {
        let summary = ModelArchitecture::digit_classifier().summary().unwrap();
        assert!(summary.contains("conv2d_1 (conv2d)"));
        assert!(summary.contains("dense_1 (dense)"));
        assert!(summary.contains(&format!("Total params: {}", 208 + 3216 + 2570)));
    }

    #[test]
    fn test_json_round_trip() {
        let arch = ModelArchitecture::digit_classifier();
        let json = serde_json::to_string(&arch).unwrap();
        let back: ModelArchitecture = serde_json::from_str(&json).unwrap();
        assert_eq!(arch, back);
    }
}
