//! Dataset split loading from the declarative sample manifest.
//!
//! Each split directory carries a `dataset.json` listing, per sample, a
//! ground-truth value, one or more relative input paths (or an inline
//! numeric vector), and optional parameter fields. Per-sample failures
//! are logged and the sample skipped; only an unreadable manifest fails
//! the split as a whole.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use kritai_common::{
    AnswerValueType, GradeError, GradeResult, GroundTruth, ImageBuffer, InputDataType,
    InputPayload, ParamValue, ParameterType, SampleParams,
};
use themis::Task;

/// One materialized sample of a split
#[derive(Debug, Clone)]
pub struct Sample {
    /// Relative input path(s), empty for inline vectors without paths
    pub filenames: Vec<String>,
    pub input: InputPayload,
    pub params: SampleParams,
    pub truth: GroundTruth,
}

/// An ordered, immutable split
#[derive(Debug, Clone)]
pub struct SplitData {
    pub samples: Vec<Sample>,
}

#[derive(Deserialize)]
struct Manifest {
    #[serde(default)]
    parameter_type: Vec<String>,
    #[serde(default)]
    data: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    #[serde(default)]
    gt: Option<Value>,
    #[serde(default)]
    path: Option<PathField>,
    #[serde(default)]
    vector: Option<Value>,
    #[serde(default)]
    parameter: Option<Vec<Value>>,
    #[serde(default)]
    train: Option<Vec<Vec<f32>>>,
    #[serde(default, rename = "train-gt")]
    train_gt: Option<Vec<i64>>,
    #[serde(default)]
    goal: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PathField {
    One(String),
    Many(Vec<String>),
}

/// Read a split's manifest and materialize every sample.
pub fn read_split(task: &Task, manifest_path: &Path) -> GradeResult<SplitData> {
    let raw = fs::read_to_string(manifest_path).map_err(|e| {
        GradeError::Dataset(format!("cannot read {}: {e}", manifest_path.display()))
    })?;
    let manifest: Manifest = serde_json::from_str(&raw).map_err(|e| {
        GradeError::Dataset(format!("cannot parse {}: {e}", manifest_path.display()))
    })?;

    let parameter_types = parse_parameter_types(&manifest.parameter_type)?;
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let mut samples = Vec::with_capacity(manifest.data.len());
    for (index, entry) in manifest.data.iter().enumerate() {
        match materialize(task, base_dir, entry, &parameter_types) {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                tracing::warn!(
                    "skipping sample {index} of {}: {e}",
                    manifest_path.display()
                );
            }
        }
    }

    Ok(SplitData { samples })
}

fn parse_parameter_types(names: &[String]) -> GradeResult<Vec<ParameterType>> {
    names
        .iter()
        .map(|name| match name.as_str() {
            "real" => Ok(ParameterType::Real),
            "integer" => Ok(ParameterType::Integer),
            other => Err(GradeError::Dataset(format!(
                "unknown parameter_type '{other}'"
            ))),
        })
        .collect()
}

fn materialize(
    task: &Task,
    base_dir: &Path,
    entry: &Entry,
    parameter_types: &[ParameterType],
) -> GradeResult<Sample> {
    let truth = read_truth(task, base_dir, entry)?;
    let (filenames, input) = read_input(task, base_dir, entry)?;
    let params = read_params(task, entry, parameter_types)?;
    Ok(Sample {
        filenames,
        input,
        params,
        truth,
    })
}

fn read_truth(task: &Task, base_dir: &Path, entry: &Entry) -> GradeResult<GroundTruth> {
    let gt = entry
        .gt
        .as_ref()
        .ok_or_else(|| GradeError::Dataset("missing 'gt' field".into()))?;
    match task.answer_value_type {
        AnswerValueType::Integer => gt
            .as_i64()
            .or_else(|| gt.as_f64().map(|v| v as i64))
            .map(GroundTruth::Integer)
            .ok_or_else(|| GradeError::Dataset("'gt' is not an integer".into())),
        AnswerValueType::Real => gt
            .as_f64()
            .map(GroundTruth::Real)
            .ok_or_else(|| GradeError::Dataset("'gt' is not a number".into())),
        AnswerValueType::Image1ch | AnswerValueType::Image3ch => {
            let path = gt
                .as_str()
                .ok_or_else(|| GradeError::Dataset("'gt' is not an image path".into()))?;
            let channels = if task.answer_value_type == AnswerValueType::Image1ch {
                1
            } else {
                3
            };
            Ok(GroundTruth::Image(load_image(
                &base_dir.join(path),
                channels,
            )?))
        }
        AnswerValueType::ActiveLearning => {
            let labels: Vec<i64> = serde_json::from_value(gt.clone())
                .map_err(|_| GradeError::Dataset("'gt' is not a label list".into()))?;
            Ok(GroundTruth::Labels(labels))
        }
    }
}

fn read_input(
    task: &Task,
    base_dir: &Path,
    entry: &Entry,
) -> GradeResult<(Vec<String>, InputPayload)> {
    match task.input_data_type {
        InputDataType::Vector => {
            let vector = entry
                .vector
                .as_ref()
                .ok_or_else(|| GradeError::Dataset("missing 'vector' field".into()))?;
            let input = parse_vector(vector)?;
            let filenames = match &entry.path {
                Some(PathField::One(p)) => vec![p.clone()],
                Some(PathField::Many(ps)) => ps.clone(),
                None => Vec::new(),
            };
            Ok((filenames, input))
        }
        InputDataType::Image1ch | InputDataType::Image3ch => {
            let channels = if task.input_data_type == InputDataType::Image1ch {
                1
            } else {
                3
            };
            if task.multi_input_data {
                let paths = match &entry.path {
                    Some(PathField::Many(ps)) => ps.clone(),
                    Some(PathField::One(p)) => vec![p.clone()],
                    None => return Err(GradeError::Dataset("missing 'path' field".into())),
                };
                let mut images = Vec::with_capacity(paths.len());
                for path in &paths {
                    images.push(load_image(&base_dir.join(path), channels)?);
                }
                Ok((paths, InputPayload::ImageBundle(images)))
            } else {
                let path = match &entry.path {
                    Some(PathField::One(p)) => p.clone(),
                    _ => return Err(GradeError::Dataset("missing 'path' field".into())),
                };
                let image = load_image(&base_dir.join(&path), channels)?;
                Ok((vec![path], InputPayload::Image(image)))
            }
        }
    }
}

fn parse_vector(value: &Value) -> GradeResult<InputPayload> {
    // A flat numeric list is one vector; a list of lists is a row set
    // (the active-learning pool form).
    if let Ok(flat) = serde_json::from_value::<Vec<f32>>(value.clone()) {
        return Ok(InputPayload::Vector(flat));
    }
    if let Ok(rows) = serde_json::from_value::<Vec<Vec<f32>>>(value.clone()) {
        return Ok(InputPayload::VectorSet(rows));
    }
    Err(GradeError::Dataset("'vector' is not numeric".into()))
}

fn read_params(
    task: &Task,
    entry: &Entry,
    parameter_types: &[ParameterType],
) -> GradeResult<SampleParams> {
    if task.answer_value_type == AnswerValueType::ActiveLearning {
        let pool = entry
            .train
            .clone()
            .ok_or_else(|| GradeError::Dataset("missing 'train' field".into()))?;
        let labels = entry
            .train_gt
            .clone()
            .ok_or_else(|| GradeError::Dataset("missing 'train-gt' field".into()))?;
        let goal = entry
            .goal
            .ok_or_else(|| GradeError::Dataset("missing 'goal' field".into()))?;
        if pool.len() != labels.len() {
            return Err(GradeError::Dataset(
                "'train' and 'train-gt' lengths differ".into(),
            ));
        }
        return Ok(SampleParams::ActiveLearning { pool, labels, goal });
    }

    let mut values = Vec::with_capacity(parameter_types.len());
    if !parameter_types.is_empty() {
        if let Some(raw) = &entry.parameter {
            for (index, ty) in parameter_types.iter().enumerate() {
                let cell = raw.get(index).ok_or_else(|| {
                    GradeError::Dataset(format!("missing parameter {index}"))
                })?;
                let value = match ty {
                    ParameterType::Real => cell
                        .as_f64()
                        .map(ParamValue::Real)
                        .ok_or_else(|| GradeError::Dataset(format!("parameter {index} is not real"))),
                    ParameterType::Integer => cell
                        .as_i64()
                        .or_else(|| cell.as_f64().map(|v| v as i64))
                        .map(ParamValue::Integer)
                        .ok_or_else(|| {
                            GradeError::Dataset(format!("parameter {index} is not an integer"))
                        }),
                }?;
                values.push(value);
            }
        }
    }
    Ok(SampleParams::Plain(values))
}

fn load_image(path: &Path, channels: u32) -> GradeResult<ImageBuffer> {
    let decoded = image::open(path)
        .map_err(|e| GradeError::Dataset(format!("cannot read image {}: {e}", path.display())))?;
    let buffer = match channels {
        1 => {
            let gray = decoded.to_luma8();
            ImageBuffer::new(gray.width(), gray.height(), 1, gray.into_raw())
        }
        _ => {
            let rgb = decoded.to_rgb8();
            ImageBuffer::new(rgb.width(), rgb.height(), 3, rgb.into_raw())
        }
    };
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::NaiveDate;
    use kritai_common::{Metric, TaskType};

    fn vector_task(answer: AnswerValueType) -> Task {
        Task {
            id: "task-v".into(),
            name: "Vectors".into(),
            explanation: String::new(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            answer_value_type: answer,
            metric: Metric::Accuracy,
            input_data_type: InputDataType::Vector,
            multi_input_data: false,
            task_type: TaskType::Quest,
            goal: 0.9,
            timelimit_per_data: 1.0,
            suspend: false,
        }
    }

    fn write_manifest(dir: &Path, doc: serde_json::Value) -> std::path::PathBuf {
        let path = dir.join("dataset.json");
        fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
        path
    }

    #[test]
    fn reads_vector_samples_with_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(
            dir.path(),
            serde_json::json!({
                "parameter_type": ["real", "integer"],
                "data": [
                    {"gt": 1, "vector": [0.5, 1.5, 2.5], "parameter": [0.1, 7]},
                    {"gt": 0, "vector": [1.0, 2.0, 3.0], "parameter": [0.2, 8]}
                ]
            }),
        );

        let split = read_split(&vector_task(AnswerValueType::Integer), &manifest).unwrap();
        assert_eq!(split.samples.len(), 2);
        assert_eq!(split.samples[0].truth, GroundTruth::Integer(1));
        assert_eq!(
            split.samples[0].input,
            InputPayload::Vector(vec![0.5, 1.5, 2.5])
        );
        assert_eq!(
            split.samples[0].params,
            SampleParams::Plain(vec![ParamValue::Real(0.1), ParamValue::Integer(7)])
        );
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(
            dir.path(),
            serde_json::json!({
                "data": [
                    {"gt": 1, "vector": [1.0]},
                    {"gt": "not-a-number", "vector": [2.0]},
                    {"gt": 3, "vector": "oops"},
                    {"gt": 2, "vector": [3.0]}
                ]
            }),
        );

        let split = read_split(&vector_task(AnswerValueType::Integer), &manifest).unwrap();
        assert_eq!(split.samples.len(), 2);
        assert_eq!(split.samples[1].truth, GroundTruth::Integer(2));
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_split(
            &vector_task(AnswerValueType::Integer),
            &dir.path().join("dataset.json"),
        )
        .unwrap_err();
        assert!(matches!(err, GradeError::Dataset(_)));
    }

    #[test]
    fn active_learning_entry_carries_training_payload() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(
            dir.path(),
            serde_json::json!({
                "data": [{
                    "gt": [0, 1, 0, 1],
                    "vector": [[0.0, 0.0], [5.0, 5.0], [0.1, 0.1], [5.1, 5.1]],
                    "train": [[0.0, 0.1], [5.0, 5.1]],
                    "train-gt": [0, 1],
                    "goal": 0.8
                }]
            }),
        );

        let split = read_split(&vector_task(AnswerValueType::ActiveLearning), &manifest).unwrap();
        assert_eq!(split.samples.len(), 1);
        let sample = &split.samples[0];
        assert_eq!(sample.truth, GroundTruth::Labels(vec![0, 1, 0, 1]));
        assert!(matches!(sample.input, InputPayload::VectorSet(ref rows) if rows.len() == 4));
        match &sample.params {
            SampleParams::ActiveLearning { pool, labels, goal } => {
                assert_eq!(pool.len(), 2);
                assert_eq!(labels, &vec![0, 1]);
                assert_eq!(*goal, 0.8);
            }
            other => panic!("expected active-learning params, got {other:?}"),
        }
    }

    #[test]
    fn image_bundle_shares_one_ground_truth() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.png"] {
            let img = image::RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3]));
            img.save(dir.path().join(name)).unwrap();
        }
        let manifest = write_manifest(
            dir.path(),
            serde_json::json!({
                "data": [{"gt": 1, "path": ["a.png", "b.png"]}]
            }),
        );

        let mut task = vector_task(AnswerValueType::Integer);
        task.input_data_type = InputDataType::Image3ch;
        task.multi_input_data = true;

        let split = read_split(&task, &manifest).unwrap();
        assert_eq!(split.samples.len(), 1);
        match &split.samples[0].input {
            InputPayload::ImageBundle(images) => {
                assert_eq!(images.len(), 2);
                assert_eq!(images[0].dims(), (2, 2, 3));
            }
            other => panic!("expected bundle, got {other:?}"),
        }
        assert_eq!(split.samples[0].filenames, vec!["a.png", "b.png"]);
    }
}
