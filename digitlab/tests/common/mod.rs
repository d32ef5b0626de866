use std::sync::Arc;

use digitlab::{
    dataset::{synthetic_dataset, SyntheticDataSource},
    neuralnetworks::{af::Activation, layers::LayerKind, ModelArchitecture},
    numbers::Device,
    LabConfig, TrainingController,
};

/// conv(3×3, 4) → pool(2) → flatten → dense(10, softmax).
pub fn small_architecture() -> ModelArchitecture {
    ModelArchitecture::from_kinds(
        &[28, 28, 1],
        vec![
            LayerKind::conv2d(4, 3, Activation::Relu),
            LayerKind::max_pool(2),
            LayerKind::Flatten,
            LayerKind::dense(10, Activation::Softmax),
        ],
    )
}

pub fn config() -> LabConfig {
    LabConfig {
        seed: Some(1956581677289523570),
        pause_poll_ms: 5,
        num_threads: 4,
        ..Default::default()
    }
}

/// Controller with a small model and `num_train` / `num_test` synthetic
/// samples loaded.
pub fn ready_controller(ctx: &Arc<Device>, num_train: usize, num_test: usize) -> TrainingController {
    let controller = TrainingController::new(
        config(),
        Box::new(SyntheticDataSource::new(num_train, num_test, 2)),
        ctx,
    )
    .unwrap();
    controller.new_model_from(small_architecture()).unwrap();
    controller
        .load_dataset(synthetic_dataset(num_train, num_test, 2, ctx).unwrap())
        .unwrap();
    controller
}
