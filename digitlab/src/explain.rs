//! Visual explanations of a prediction: the class-activation heatmap and
//! per-layer views of activations and filters.

use numbers::Tensor;
use serde::{Deserialize, Serialize};

use neuralnetworks::{layers::LayerKind, Model};

use crate::{
    dataset::{IMAGE_LEN, IMAGE_SIZE},
    LabError, Sample,
};

const HEAT_WEIGHT: f32 = 0.6;
const IMAGE_WEIGHT: f32 = 0.4;

/// Heatmap at the resolution of the last convolutional layer plus the 28×28
/// overlay ready for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CamResult {
    /// Row-major `map_height × map_width` values in `[0, 1]`.
    pub heatmap: Vec<f32>,
    pub map_height: usize,
    pub map_width: usize,
    /// Row-major 28×28 RGB pixels.
    pub overlay: Vec<[u8; 3]>,
}

/// Normalized activation maps of one layer, one per filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMaps {
    pub layer_name: String,
    pub height: usize,
    pub width: usize,
    pub maps: Vec<Vec<f32>>,
}

/// Kernels of a convolution averaged over input channels, one per filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterImages {
    pub layer_name: String,
    pub kernel_height: usize,
    pub kernel_width: usize,
    pub filters: Vec<Vec<f32>>,
}

fn sample_tensor(model: &Model, sample: &Sample) -> Result<Tensor, LabError> {
    let mut shape = vec![1];
    shape.extend_from_slice(model.input_shape());
    if shape.iter().product::<usize>() != IMAGE_LEN {
        return Err(LabError::InvalidConfig(format!(
            "the model reads inputs of shape {:?}, not 28x28 images",
            model.input_shape()
        )));
    }
    Ok(Tensor::from_slice(&shape, sample.pixels(), model.context())?)
}

/// Min-max normalization to `[0, 1]`. A constant input maps to zeros.
pub fn normalize(values: &[f32]) -> Vec<f32> {
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let range = if max > min { max - min } else { 1.0 };
    values.iter().map(|v| (v - min) / range).collect()
}

/// Nearest-neighbour upscale of an `h × w` map to `size × size`.
pub fn upscale_nearest(map: &[f32], h: usize, w: usize, size: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(size * size);
    for y in 0..size {
        let sy = (y * h / size).min(h - 1);
        for x in 0..size {
            let sx = (x * w / size).min(w - 1);
            out.push(map[sy * w + sx]);
        }
    }
    out
}

fn channel(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Black to red over `[0, 1/3]`, to yellow over `[1/3, 2/3]`, to white over
/// `[2/3, 1]`.
pub fn hot_colormap(value: f32) -> [u8; 3] {
    [
        channel(value * 3.0),
        channel((value - 1.0 / 3.0) * 3.0),
        channel((value - 2.0 / 3.0) * 3.0),
    ]
}

/// `0.6 * heat + 0.4 * gray` per channel, `gray` in `[0, 1]`.
pub fn blend(heat: [u8; 3], gray: f32) -> [u8; 3] {
    let base = gray.clamp(0.0, 1.0) * 255.0;
    heat.map(|c| {
        (HEAT_WEIGHT * c as f32 + IMAGE_WEIGHT * base)
            .round()
            .clamp(0.0, 255.0) as u8
    })
}

/// Class-activation map for `sample`, computed from the summed activations
/// of the last convolutional layer.
pub fn compute_cam(
    model: &Model,
    sample: &Sample,
    predicted_class: usize,
) -> Result<CamResult, LabError> {
    let classes = model.architecture().output_shape()?.iter().product::<usize>();
    if predicted_class >= classes {
        return Err(LabError::InvalidConfig(format!(
            "class {} is out of range for {} outputs",
            predicted_class, classes
        )));
    }
    let layer = model
        .last_conv_layer()
        .ok_or(LabError::NoConvolutionalLayer)?;

    let (map_height, map_width, importance) = {
        let input = sample_tensor(model, sample)?;
        let activations = model.layer_output(layer, &input)?;
        let [_, h, w, f] = activations.shape() else {
            return Err(LabError::InvalidConfig(format!(
                "layer {} produced shape {:?}",
                layer,
                activations.shape()
            )));
        };
        let (h, w, f) = (*h, *w, *f);
        let importance: Vec<f32> = activations
            .as_slice()
            .chunks(f)
            .map(|cell| cell.iter().sum::<f32>().max(0.0))
            .collect();
        (h, w, importance)
    };

    let heatmap = normalize(&importance);
    let overlay = upscale_nearest(&heatmap, map_height, map_width, IMAGE_SIZE)
        .into_iter()
        .zip(sample.pixels())
        .map(|(v, gray)| blend(hot_colormap(v), *gray))
        .collect();
    trace!(
        "[compute_cam] Explained class {} from layer {} ({}x{})",
        predicted_class,
        layer,
        map_height,
        map_width
    );

    Ok(CamResult {
        heatmap,
        map_height,
        map_width,
        overlay,
    })
}

/// Activation maps of a convolution or pooling layer for `sample`.
pub fn feature_maps(model: &Model, sample: &Sample, layer: usize) -> Result<FeatureMaps, LabError> {
    let layer_name = spatial_layer(model, layer)?;

    let input = sample_tensor(model, sample)?;
    let activations = model.layer_output(layer, &input)?;
    let (height, width, filters) = match activations.shape() {
        [_, h, w, f] => (*h, *w, *f),
        shape => {
            return Err(LabError::InvalidConfig(format!(
                "layer '{}' produced shape {:?}",
                layer_name, shape
            )))
        }
    };

    let values = activations.as_slice();
    let maps = (0..filters)
        .map(|f| {
            let map: Vec<f32> = values.iter().skip(f).step_by(filters).copied().collect();
            normalize(&map)
        })
        .collect();

    Ok(FeatureMaps {
        layer_name,
        height,
        width,
        maps,
    })
}

fn spatial_layer(model: &Model, layer: usize) -> Result<String, LabError> {
    let descriptor = model.architecture().layers.get(layer).ok_or_else(|| {
        LabError::InvalidConfig(format!("the model has no layer {}", layer))
    })?;
    match descriptor.kind {
        LayerKind::Convolution(_) | LayerKind::Pooling(_) => Ok(descriptor.name.clone()),
        LayerKind::Flatten | LayerKind::Dense(_) | LayerKind::Dropout(_) => {
            Err(LabError::InvalidConfig(format!(
                "layer '{}' has no spatial activations",
                descriptor.name
            )))
        }
    }
}

/// Learned kernels of convolution `layer`, averaged over input channels
/// and normalized per filter.
pub fn conv_filters(model: &Model, layer: usize) -> Result<FilterImages, LabError> {
    let descriptor = model.architecture().layers.get(layer).ok_or_else(|| {
        LabError::InvalidConfig(format!("the model has no layer {}", layer))
    })?;
    if !descriptor.kind.is_convolution() {
        return Err(LabError::InvalidConfig(format!(
            "layer '{}' is not a convolution",
            descriptor.name
        )));
    }

    let weights = model.layer_weights(layer)?;
    let kernel = weights.first().ok_or_else(|| {
        LabError::ResourceUnavailable(format!("layer '{}' has no kernel", descriptor.name))
    })?;
    let [kh, kw, channels, filters] = kernel.shape() else {
        return Err(LabError::CorruptModel(format!(
            "kernel of '{}' has shape {:?}",
            descriptor.name,
            kernel.shape()
        )));
    };
    let (kh, kw, channels, filters) = (*kh, *kw, *channels, *filters);

    let filter_images = (0..filters)
        .map(|f| {
            let image: Vec<f32> = (0..kh * kw)
                .map(|cell| {
                    (0..channels)
                        .map(|c| kernel.as_slice()[(cell * channels + c) * filters + f])
                        .sum::<f32>()
                        / channels as f32
                })
                .collect();
            normalize(&image)
        })
        .collect();

    Ok(FilterImages {
        layer_name: descriptor.name.clone(),
        kernel_height: kh,
        kernel_width: kw,
        filters: filter_images,
    })
}
