mod common;

use common::{config, ready_controller, small_architecture};
use digitlab::{
    dataset::{synthetic_dataset, SyntheticDataSource},
    neuralnetworks::{af::Activation, layers::LayerKind, ModelArchitecture, TrainStatus},
    numbers::Device,
    LabConfig, LabError, Sample, TrainOptions, TrainingController,
};

fn trained(ctx: &std::sync::Arc<Device>) -> TrainingController {
    let controller = ready_controller(ctx, 64, 16);
    controller
        .start(
            TrainOptions {
                epochs: 1,
                batch_size: 16,
                learning_rate: 0.01,
            },
            None,
            &|_: &TrainStatus| {},
        )
        .unwrap();
    controller
}

#[test]
fn test_reloading_predicts_identically() {
    let ctx = Device::cpu();
    let dir = tempfile::tempdir().unwrap();
    let controller = trained(&ctx);
    let dataset = synthetic_dataset(1, 3, 8, &ctx).unwrap();
    let samples: Vec<Sample> = (0..3).map(|i| dataset.test_sample(i).unwrap().0).collect();

    let expected: Vec<_> = samples
        .iter()
        .map(|s| controller.predict(s).unwrap())
        .collect();
    let files = controller.export_model(dir.path(), "digits").unwrap();

    for _ in 0..2 {
        let other = TrainingController::new(
            config(),
            Box::new(SyntheticDataSource::new(8, 2, 1)),
            &ctx,
        )
        .unwrap();
        other.load_model(&files[0], &files[1..]).unwrap();
        assert_eq!(other.trained_epochs(), 0);
        for (sample, prediction) in samples.iter().zip(expected.iter()) {
            assert_eq!(&other.predict(sample).unwrap(), prediction);
        }
    }
}

#[test]
fn test_mismatched_pair_is_corrupt() {
    let ctx = Device::cpu();
    let dir = tempfile::tempdir().unwrap();
    let controller = trained(&ctx);
    let small = controller.export_model(dir.path(), "small").unwrap();

    controller
        .new_model_from(ModelArchitecture::from_kinds(
            &[28, 28, 1],
            vec![
                LayerKind::conv2d(2, 5, Activation::Relu),
                LayerKind::max_pool(2),
                LayerKind::Flatten,
                LayerKind::dense(10, Activation::Softmax),
            ],
        ))
        .unwrap();
    let other = controller.export_model(dir.path(), "other").unwrap();
    let active = controller.model().unwrap();

    let res = controller.load_model(&small[0], &other[1..]);
    assert!(matches!(res, Err(LabError::CorruptModel(_))));

    std::fs::write(&small[1], b"\x00\x01 not weights").unwrap();
    let res = controller.load_model(&small[0], &[]);
    assert!(matches!(res, Err(LabError::CorruptModel(_))));

    std::fs::write(&small[0], "{ \"architecture\": 3 }").unwrap();
    let res = controller.load_model(&small[0], &other[1..]);
    assert!(matches!(res, Err(LabError::CorruptModel(_))));

    // failed loads keep the active model
    assert!(std::sync::Arc::ptr_eq(&active, &controller.model().unwrap()));
    assert!(!active.is_disposed());
}

#[test]
fn test_load_pretrained_reads_model_json() {
    let ctx = Device::cpu();
    let dir = tempfile::tempdir().unwrap();
    let source = trained(&ctx);
    source.export_model(dir.path(), "model").unwrap();
    let sample = Sample::new(vec![0.3; 784]).unwrap();

    let controller = TrainingController::new(
        LabConfig {
            pretrained_dir: dir.path().to_owned(),
            ..config()
        },
        Box::new(SyntheticDataSource::new(8, 2, 1)),
        &ctx,
    )
    .unwrap();
    controller.load_pretrained().unwrap();
    assert_eq!(
        controller.predict(&sample).unwrap(),
        source.predict(&sample).unwrap()
    );

    let empty = tempfile::tempdir().unwrap();
    let missing = TrainingController::new(
        LabConfig {
            pretrained_dir: empty.path().to_owned(),
            ..config()
        },
        Box::new(SyntheticDataSource::new(8, 2, 1)),
        &ctx,
    )
    .unwrap();
    assert!(matches!(
        missing.load_pretrained(),
        Err(LabError::IOFailure(_))
    ));
}

#[test]
fn test_predictions_release_their_tensors() {
    let ctx = Device::cpu();
    let controller = ready_controller(&ctx, 16, 4);
    let sample = Sample::new(vec![0.6; 784]).unwrap();
    let baseline = ctx.live_tensors();

    for _ in 0..20 {
        controller.predict(&sample).unwrap();
        let (_, cam) = controller.predict_and_explain(&sample).unwrap();
        assert!(cam.is_some());
    }
    assert_eq!(ctx.live_tensors(), baseline);

    // replacing the model releases the old parameters
    controller.new_model_from(small_architecture()).unwrap();
    assert_eq!(ctx.live_tensors(), baseline);
}
