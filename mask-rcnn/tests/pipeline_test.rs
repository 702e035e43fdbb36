mod common;

use anyhow::Result;
use approx::assert_abs_diff_eq;
use common::{image, init_logger, load_config, networks, single_box_truth, MockOptions};
use mask_rcnn::{
    bbox::{prelude::*, XYXY},
    image::GroundTruth,
    matcher::MatchLabel,
    observer::{Checkpoint, Observer},
    pipeline::{MaskRcnn, MaskRcnnInit, Mode},
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

fn pipeline(mode: Mode, box_logits: Vec<f32>, pool_calls: Arc<AtomicUsize>) -> Result<MaskRcnn> {
    init_logger();
    let config = load_config("single-level.json5")?;
    let networks = networks(
        &config,
        MockOptions {
            grid: Some([5, 5]),
            box_logits,
            mask_logit: 0.0,
            pool_calls,
        },
    );
    MaskRcnnInit {
        config,
        networks,
        observer: None,
    }
    .build(mode)
}

#[test]
fn single_box_forces_one_positive_anchor() -> Result<()> {
    let config = load_config("single-level.json5")?;
    let generator = config.anchor.anchor_generator_init().build()?;
    let rpn = config.rpn.rpn_init().build()?;
    let truth = single_box_truth(false);

    // 5x5 positions at stride 16 cover the 64x64 image
    let anchors = generator.generate_level(0, [5, 5])?;
    assert_eq!(anchors.len(), 5 * 5 * 3);

    let matches = rpn.assign_anchors(&anchors, &truth);
    let positives: Vec<_> = matches.positives().collect();
    assert_eq!(positives.len(), 1);

    let (index, gt_index) = positives[0];
    assert_eq!(gt_index, 0);
    assert_eq!(anchors[index].xyxy(), [16.0, 16.0, 48.0, 48.0]);

    // the positive is forced, its overlap is below the nominal threshold
    let iou = anchors[index].iou_with(&truth.boxes()[0], 1e-6);
    assert!(iou < 0.7);
    assert_abs_diff_eq!(iou, 0.64, epsilon = 1e-5);
    assert_eq!(
        matches
            .labels()
            .iter()
            .filter(|label| matches!(label, MatchLabel::Positive(_)))
            .count(),
        1
    );

    let targets = rpn.regression_targets(&anchors, &truth, &matches);
    assert_eq!(targets.len(), 1);
    let (_, delta) = targets[0];
    let decoded = rpn.coder().decode(&anchors[index], delta);
    decoded
        .xyxy()
        .iter()
        .zip([10.0, 10.0, 50.0, 50.0])
        .for_each(|(&lhs, rhs)| assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-4));
    Ok(())
}

#[test]
fn train_graph_reports_all_losses() -> Result<()> {
    let graph = pipeline(Mode::Train, vec![0.0; 3], Arc::default())?.into_train()?;
    let images = vec![image(64, 64)];
    let targets = vec![single_box_truth(true)];
    let output = graph.forward(&images, &targets, Some(7))?;

    // constant zero logits give ln 2 per objectness and mask term
    assert_abs_diff_eq!(output.rpn_cls_loss, 2f64.ln(), epsilon = 1e-9);
    assert!(output.rpn_box_loss.is_finite() && output.rpn_box_loss >= 0.0);
    assert_abs_diff_eq!(output.cls_loss.unwrap(), 3f64.ln(), epsilon = 1e-6);
    assert!(output.box_loss.unwrap().is_finite());
    assert_abs_diff_eq!(output.mask_loss.unwrap(), 2f64.ln(), epsilon = 1e-9);
    assert!(output.total().is_finite());
    Ok(())
}

#[test]
fn train_graph_is_reproducible_for_a_seed() -> Result<()> {
    let graph = pipeline(Mode::Train, vec![0.0, 1.0, -1.0], Arc::default())?.into_train()?;
    let images = vec![image(64, 64), image(64, 64)];
    let targets = vec![single_box_truth(true), single_box_truth(false)];
    let lhs = graph.forward(&images, &targets, Some(3))?;
    let rhs = graph.forward(&images, &targets, Some(3))?;
    assert_eq!(lhs, rhs);
    Ok(())
}

#[test]
fn train_graph_accepts_empty_ground_truth() -> Result<()> {
    let graph = pipeline(Mode::Train, vec![0.0; 3], Arc::default())?.into_train()?;
    let images = vec![image(64, 64)];
    let targets = vec![GroundTruth::empty()];
    let output = graph.forward(&images, &targets, None)?;

    assert_eq!(output.rpn_box_loss, 0.0);
    assert_eq!(output.box_loss, Some(0.0));
    assert_eq!(output.mask_loss, Some(0.0));
    assert!(output.rpn_cls_loss > 0.0);
    Ok(())
}

#[test]
fn rpn_only_mode_skips_the_heads() -> Result<()> {
    let pool_calls = Arc::new(AtomicUsize::new(0));
    let rpn_only = pipeline(Mode::RpnOnly, vec![0.0; 3], pool_calls.clone())?;
    assert_eq!(rpn_only.mode(), Mode::RpnOnly);

    let graph = rpn_only.into_train()?;
    let output = graph.forward(&[image(64, 64)], &[single_box_truth(true)], Some(0))?;

    assert_eq!(pool_calls.load(Ordering::SeqCst), 0);
    assert!(output.cls_loss.is_none());
    assert!(output.box_loss.is_none());
    assert!(output.mask_loss.is_none());
    assert!(output.rpn_cls_loss > 0.0);
    Ok(())
}

#[test]
fn train_graph_rejects_mismatched_batch() -> Result<()> {
    let graph = pipeline(Mode::Train, vec![0.0; 3], Arc::default())?.into_train()?;
    let images = vec![image(64, 64)];
    let targets = vec![single_box_truth(false), single_box_truth(false)];
    assert!(graph.forward(&images, &targets, None).is_err());

    // labels beyond the configured classes
    let truth = GroundTruth::new(vec![XYXY::from_xyxy([0.0, 0.0, 8.0, 8.0])], vec![3], None)?;
    assert!(graph.forward(&images, &[truth], None).is_err());
    Ok(())
}

#[test]
fn eval_graph_without_survivors_returns_empty_detections() -> Result<()> {
    let graph = pipeline(Mode::Eval, vec![20.0, 0.0, 0.0], Arc::default())?.into_eval()?;
    let detections = graph.forward(&[image(64, 64), image(64, 64)])?;
    assert_eq!(detections.len(), 2);
    assert!(detections.iter().all(|dets| dets.is_empty()));
    Ok(())
}

#[test]
fn eval_graph_detects_with_masks() -> Result<()> {
    let graph = pipeline(Mode::Eval, vec![0.0, 5.0, 0.0], Arc::default())?.into_eval()?;
    let detections = graph.forward(&[image(64, 64)])?;
    let detections = &detections[0];

    assert!(!detections.is_empty());
    assert!(detections.len() <= 10);
    detections.iter().for_each(|det| {
        assert_eq!(det.class, 1);
        assert!(det.rect.x2() <= 64.0 && det.rect.y2() <= 64.0);
        assert_eq!(det.mask.as_ref().map(|mask| mask.dim()), Some((64, 64)));
    });
    assert!(detections
        .windows(2)
        .all(|pair| pair[0].score >= pair[1].score));
    Ok(())
}

#[test]
fn modes_are_fixed_at_construction() -> Result<()> {
    let eval = pipeline(Mode::Eval, vec![0.0; 3], Arc::default())?;
    assert!(eval.into_train().is_err());
    let train = pipeline(Mode::Train, vec![0.0; 3], Arc::default())?;
    assert!(train.into_eval().is_err());
    Ok(())
}

#[derive(Default)]
struct CheckpointRecorder {
    names: Mutex<Vec<(usize, &'static str)>>,
}

impl Observer for CheckpointRecorder {
    fn observe(&self, image_index: usize, checkpoint: Checkpoint<'_>) {
        self.names
            .lock()
            .unwrap()
            .push((image_index, checkpoint.name()));
    }
}

fn recorded_checkpoints(mode: Mode) -> Result<Vec<&'static str>> {
    init_logger();
    let config = load_config("single-level.json5")?;
    let networks = networks(
        &config,
        MockOptions {
            grid: None,
            box_logits: vec![0.0; 3],
            mask_logit: 0.0,
            pool_calls: Arc::default(),
        },
    );
    let recorder = Arc::new(CheckpointRecorder::default());
    let graph = MaskRcnnInit {
        config,
        networks,
        observer: Some(recorder.clone()),
    }
    .build(mode)?
    .into_train()?;

    graph.forward(&[image(64, 64)], &[single_box_truth(true)], None)?;

    let names = recorder
        .names
        .lock()
        .unwrap()
        .iter()
        .map(|&(_, name)| name)
        .collect();
    Ok(names)
}

#[test]
fn observer_sees_every_training_checkpoint() -> Result<()> {
    assert_eq!(
        recorded_checkpoints(Mode::Train)?,
        vec![
            "anchors",
            "rpn_loss",
            "proposals",
            "box_samples",
            "mask_loss"
        ]
    );
    Ok(())
}

#[test]
fn rpn_only_mode_selects_no_proposals() -> Result<()> {
    assert_eq!(
        recorded_checkpoints(Mode::RpnOnly)?,
        vec!["anchors", "rpn_loss"]
    );
    Ok(())
}
