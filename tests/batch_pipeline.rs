//! End-to-end batch runs through the fused pipeline.

use ivecd::archive::{self, FeatureReader, MemoryFeatureReader, MemoryVectorWriter, shared};
use ivecd::config::Config;
use ivecd::model::{DiagGmm, FullGmm, IvectorModel, MockExtractor, MockFullGmm, MockSelector};
use ivecd::pipeline::{BatchPipeline, Models, Utterance};
use ndarray::Array2;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

fn identity(dim: usize) -> Vec<Vec<f64>> {
    (0..dim)
        .map(|r| (0..dim).map(|c| if r == c { 1.0 } else { 0.0 }).collect())
        .collect()
}

/// Small real models: 8 Gaussians in 2 dimensions, 3-dimensional i-vectors.
fn reference_models() -> Models {
    let num_gauss = 8;
    let means: Vec<Vec<f64>> = (0..num_gauss)
        .map(|i| vec![i as f64 * 0.5, -(i as f64) * 0.25])
        .collect();
    let weights = vec![1.0 / num_gauss as f64; num_gauss];

    let diag = DiagGmm::from_parts(weights.clone(), means.clone(), vec![vec![1.0, 1.0]; num_gauss])
        .unwrap();
    let full = FullGmm::from_parts(weights, means.clone(), vec![identity(2); num_gauss]).unwrap();
    let m: Vec<Vec<Vec<f64>>> = means
        .iter()
        .map(|mean| vec![vec![mean[0], 0.3, 0.0], vec![mean[1], 0.0, 0.2]])
        .collect();
    let extractor = IvectorModel::from_parts(1.0, m, vec![identity(2); num_gauss], 2).unwrap();

    Models {
        diag: Arc::new(diag),
        full: Arc::new(full),
        extractor: Arc::new(extractor),
    }
}

fn mock_models() -> Models {
    Models {
        diag: Arc::new(MockSelector::new(16)),
        full: Arc::new(
            MockFullGmm::new(16, 2)
                .with_poison(9.0)
                .with_overweight(8.0),
        ),
        extractor: Arc::new(MockExtractor::new(16, 2, 3).with_prior_offset(100.0)),
    }
}

fn config(num_gselect: usize) -> Config {
    let mut config = Config::default();
    config.gselect.num_gselect = num_gselect;
    config.posterior.min_post = 0.0;
    config.pool.num_threads = 3;
    config.pool.queue_depth = 2;
    config
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-4, "{:?} != {:?}", actual, expected);
    }
}

fn ramp(frames: usize, offset: f32) -> Array2<f32> {
    Array2::from_shape_fn((frames, 2), |(t, d)| offset + t as f32 * 0.1 + d as f32)
}

#[test]
fn three_clean_utterances_are_all_written() {
    let pipeline = BatchPipeline::new(reference_models(), &config(5));
    let output = MemoryVectorWriter::new();
    let mut reader = MemoryFeatureReader::new(vec![
        Utterance::new("spk1-utt1", ramp(12, 0.0)),
        Utterance::new("spk1-utt2", ramp(7, 1.0)),
        Utterance::new("spk2-utt1", ramp(20, -0.5)),
    ]);

    let report = pipeline.run(&mut reader, shared(output.clone())).unwrap();

    assert!(report.success());
    assert_eq!(report.extract.num_done, 3);
    assert_eq!(report.num_err(), 0);
    assert_eq!(report.gselect.tot_frames, 39);
    assert!((report.extract.tot_t - 39.0).abs() < 1e-4);

    let mut keys: Vec<String> = output.entries().into_iter().map(|(k, _)| k).collect();
    keys.sort();
    assert_eq!(keys, vec!["spk1-utt1", "spk1-utt2", "spk2-utt1"]);
    for (_, vector) in output.entries() {
        assert_eq!(vector.len(), 3);
        assert!(vector.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn invalid_posterior_drops_only_that_utterance() {
    let pipeline = BatchPipeline::new(mock_models(), &config(5));
    let output = MemoryVectorWriter::new();
    // One frame of "b" gets responsibilities summing to 1.5.
    let mut overweight = ramp(6, 0.0);
    overweight[[3, 0]] = 8.0;
    let mut reader = MemoryFeatureReader::new(vec![
        Utterance::new("a", ramp(6, 0.0)),
        Utterance::new("b", overweight),
        Utterance::new("c", ramp(6, 0.0)),
        Utterance::new("d", ramp(6, 0.0)),
    ]);

    let report = pipeline.run(&mut reader, shared(output.clone())).unwrap();

    assert!(report.success());
    assert_eq!(report.extract.num_done, 3);
    assert_eq!(report.posterior.num_err, 1);
    assert_eq!(report.num_err(), 1);
    assert!(output.get("b").is_none());
    for key in ["a", "c", "d"] {
        assert_close(&output.get(key).unwrap(), &[6.0, 6.0, 12.0]);
    }
}

#[test]
fn nan_posterior_drops_only_that_utterance() {
    let pipeline = BatchPipeline::new(mock_models(), &config(5));
    let output = MemoryVectorWriter::new();
    let mut poisoned = ramp(6, 0.0);
    poisoned[[3, 0]] = 9.0;
    let mut reader = MemoryFeatureReader::new(vec![
        Utterance::new("a", ramp(6, 0.0)),
        Utterance::new("b", poisoned),
        Utterance::new("c", ramp(6, 0.0)),
    ]);

    let report = pipeline.run(&mut reader, shared(output.clone())).unwrap();

    assert_eq!(report.extract.num_done, 2);
    assert_eq!(report.num_err(), 1);
    assert!(output.get("b").is_none());
}

#[test]
fn max_count_halves_a_long_utterance() {
    let mut config = config(5);
    config.extract.max_count = 10.0;
    let pipeline = BatchPipeline::new(mock_models(), &config);
    let output = MemoryVectorWriter::new();
    let mut reader = MemoryFeatureReader::new(vec![Utterance::new("long", ramp(20, 0.0))]);

    let report = pipeline.run(&mut reader, shared(output.clone())).unwrap();

    assert!((report.extract.tot_t - 10.0).abs() < 1e-9);
    // The mock writes [N, N, 2N] for total posterior mass N.
    assert_close(&output.get("long").unwrap(), &[10.0, 10.0, 20.0]);
}

#[test]
fn prior_offset_is_removed_from_first_coordinate_only() {
    let models = Models {
        extractor: Arc::new(MockExtractor::new(16, 2, 4).with_prior_offset(37.5)),
        ..mock_models()
    };
    let pipeline = BatchPipeline::new(models, &config(3));
    let output = MemoryVectorWriter::new();
    let mut reader = MemoryFeatureReader::new(vec![Utterance::new("u", ramp(4, 0.0))]);

    pipeline.run(&mut reader, shared(output.clone())).unwrap();

    // Internal mean is [37.5 + 4, 4, 8, 12].
    assert_close(&output.get("u").unwrap(), &[4.0, 4.0, 8.0, 12.0]);
}

#[test]
fn failed_extraction_is_written_and_does_not_block_others() {
    let pipeline = BatchPipeline::new(mock_models(), &config(5));
    let output = MemoryVectorWriter::new();
    // Wrong feature dimension: selection and the mock posterior accept it,
    // statistics accumulation in the task rejects it.
    let mut reader = MemoryFeatureReader::new(vec![
        Utterance::new("ok1", ramp(5, 0.0)),
        Utterance::new("wide", Array2::zeros((5, 3))),
        Utterance::new("ok2", ramp(5, 0.0)),
    ]);

    let report = pipeline.run(&mut reader, shared(output.clone())).unwrap();

    assert_eq!(report.extract.num_done, 2);
    assert_eq!(report.extract.num_err, 1);
    // The failed task still writes its untouched prior mean.
    assert_close(&output.get("wide").unwrap(), &[0.0, 0.0, 0.0]);
    assert_eq!(output.entries().len(), 3);
    assert!(output.get("ok1").is_some());
    assert!(output.get("ok2").is_some());
}

#[test]
fn jsonl_archives_round_trip_through_the_pipeline() {
    let dir = TempDir::new().unwrap();
    let feats_path = dir.path().join("feats.jsonl");
    let out_path = dir.path().join("ivectors.jsonl");
    {
        let mut file = std::fs::File::create(&feats_path).unwrap();
        for (key, offset) in [("x", 0.0f32), ("y", 0.5), ("z", 1.5)] {
            let feats: Vec<Vec<f32>> = ramp(9, offset).outer_iter().map(|r| r.to_vec()).collect();
            let line = serde_json::json!({ "key": key, "feats": feats });
            writeln!(file, "{}", line).unwrap();
        }
    }

    let pipeline = BatchPipeline::new(reference_models(), &config(4));
    let mut reader = archive::open_reader(&format!("jsonl:{}", feats_path.display())).unwrap();
    let writer = archive::open_writer(&format!("jsonl:{}", out_path.display())).unwrap();
    let report = pipeline.run(reader.as_mut(), writer).unwrap();
    assert_eq!(report.extract.num_done, 3);

    let written = std::fs::read_to_string(&out_path).unwrap();
    let mut keys: Vec<String> = written
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["vector"].as_array().unwrap().len(), 3);
            value["key"].as_str().unwrap().to_string()
        })
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["x", "y", "z"]);

    // A second request appends to the same archive.
    let mut reader: Box<dyn FeatureReader> =
        archive::open_reader(&feats_path.display().to_string()).unwrap();
    let writer = archive::open_writer(&out_path.display().to_string()).unwrap();
    pipeline.run(reader.as_mut(), writer).unwrap();
    assert_eq!(std::fs::read_to_string(&out_path).unwrap().lines().count(), 6);
}
