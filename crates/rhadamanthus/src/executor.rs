//! Per-sample deadline-enforced execution of a bound scoring routine.
//!
//! One worker serves a whole split; the deadline for each sample is
//! `timelimit_per_data × max(1, input units)`, with the first sample of
//! a split inflated by a fixed unit allowance to absorb one-time worker
//! startup cost. The deadline is exclusive: a result that arrives at or
//! after it counts as a timeout and aborts the whole evaluation.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use tokio::time::timeout;

use kritai_common::{AnswerValue, AnswerValueType, GradeError, GradeResult, ImageBuffer};

use crate::dataset::Sample;
use crate::routine::ScoringRoutine;

/// Extra deadline units granted to the first sample of a split
pub const FIRST_SAMPLE_EXTRA_UNITS: usize = 20;

/// Drives one split through one worker.
pub struct SplitRunner {
    routine: Box<dyn ScoringRoutine>,
    timelimit_per_unit: f64,
}

impl SplitRunner {
    pub fn new(routine: Box<dyn ScoringRoutine>, timelimit_per_unit: f64) -> Self {
        Self {
            routine,
            timelimit_per_unit,
        }
    }

    /// Run every sample in order, returning the coerced answers and the
    /// summed per-sample wall-clock time in seconds.
    pub async fn run(
        &mut self,
        samples: &[Sample],
        answer_type: AnswerValueType,
    ) -> GradeResult<(Vec<AnswerValue>, f64)> {
        let mut answers = Vec::with_capacity(samples.len());
        let mut total_secs = 0.0;

        for (index, sample) in samples.iter().enumerate() {
            let mut units = sample.input.unit_count().max(1);
            if index == 0 {
                units += FIRST_SAMPLE_EXTRA_UNITS;
            }
            let deadline = Duration::from_secs_f64(self.timelimit_per_unit * units as f64);

            let started = Instant::now();
            let raw = match timeout(
                deadline,
                self.routine.invoke(&sample.input, &sample.params),
            )
            .await
            {
                Err(_) => {
                    return Err(GradeError::Timeout(format!(
                        "sample {index} exceeded {:.1} s",
                        deadline.as_secs_f64()
                    )))
                }
                Ok(result) => result?,
            };
            let elapsed = started.elapsed();
            total_secs += elapsed.as_secs_f64();

            // A late delivery is a timeout, not a success.
            if elapsed >= deadline {
                return Err(GradeError::Timeout(format!(
                    "sample {index} finished after its {:.1} s deadline",
                    deadline.as_secs_f64()
                )));
            }

            answers.push(coerce_answer(raw, answer_type)?);
        }

        Ok((answers, total_secs))
    }

    /// Tear down the worker. Called on every exit path.
    pub async fn shutdown(mut self) {
        self.routine.shutdown().await;
    }
}

/// Coerce a raw worker value to the task's declared answer type.
pub fn coerce_answer(raw: Value, answer_type: AnswerValueType) -> GradeResult<AnswerValue> {
    match answer_type {
        AnswerValueType::Integer => raw
            .as_i64()
            .or_else(|| raw.as_f64().map(|v| v as i64))
            .map(AnswerValue::Integer)
            .ok_or_else(|| GradeError::Shape("answer is not an integer".into())),
        AnswerValueType::Real => raw
            .as_f64()
            .map(AnswerValue::Real)
            .ok_or_else(|| GradeError::Shape("answer is not a number".into())),
        AnswerValueType::Image1ch | AnswerValueType::Image3ch => {
            let expected_channels = if answer_type == AnswerValueType::Image1ch {
                1
            } else {
                3
            };
            decode_image(&raw, expected_channels).map(AnswerValue::Image)
        }
        AnswerValueType::ActiveLearning => {
            let order: Vec<usize> = serde_json::from_value(raw)
                .map_err(|_| GradeError::Shape("answer is not an index list".into()))?;
            Ok(AnswerValue::Order(order))
        }
    }
}

fn decode_image(raw: &Value, expected_channels: u32) -> GradeResult<ImageBuffer> {
    let width = raw
        .get("width")
        .and_then(Value::as_u64)
        .ok_or_else(|| GradeError::Shape("image answer missing width".into()))? as u32;
    let height = raw
        .get("height")
        .and_then(Value::as_u64)
        .ok_or_else(|| GradeError::Shape("image answer missing height".into()))? as u32;
    let channels = raw
        .get("channels")
        .and_then(Value::as_u64)
        .ok_or_else(|| GradeError::Shape("image answer missing channels".into()))? as u32;
    if channels != expected_channels {
        return Err(GradeError::Shape(format!(
            "image answer has {channels} channels, expected {expected_channels}"
        )));
    }
    let data = raw
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| GradeError::Shape("image answer missing data".into()))?;
    let bytes = BASE64
        .decode(data)
        .map_err(|e| GradeError::Shape(format!("image answer data is not base64: {e}")))?;
    if bytes.len() != (width * height * channels) as usize {
        return Err(GradeError::Shape(format!(
            "image answer data length {} does not match {width}x{height}x{channels}",
            bytes.len()
        )));
    }
    Ok(ImageBuffer::new(width, height, channels, bytes))
}

/// Image answers must match the ground truth dimensions exactly.
pub fn check_image_dims(truth: &ImageBuffer, answer: &ImageBuffer) -> GradeResult<()> {
    if truth.dims() != answer.dims() {
        return Err(GradeError::Shape(format!(
            "answer image is {:?}, ground truth is {:?}",
            answer.dims(),
            truth.dims()
        )));
    }
    Ok(())
}
