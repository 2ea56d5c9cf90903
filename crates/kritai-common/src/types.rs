//! Common types used across Kritai services.

use serde::{Deserialize, Serialize};

/// Sentinel written to the ledger (and parsed back) for a metric value
/// that is invalid or was never computed.
pub const INVALID_SCORE: f64 = -1.0;

/// Dataset partition of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    /// All splits in ledger column order
    pub const ALL: [Split; 3] = [Split::Train, Split::Valid, Split::Test];

    /// Lower-case name used in directory layout and ledger columns
    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Metric used to score a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Exact-match accuracy, larger is better
    Accuracy,
    /// Mean absolute error, smaller is better
    Mae,
    /// Active-learning registration rate, smaller is better
    RegistrationRate,
}

impl Metric {
    /// Parse the configuration string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Accuracy" => Some(Metric::Accuracy),
            "MAE" => Some(Metric::Mae),
            "RegistrationRate" => Some(Metric::RegistrationRate),
            _ => None,
        }
    }

    /// True when a larger raw value is the better one
    pub fn larger_is_better(&self) -> bool {
        matches!(self, Metric::Accuracy)
    }
}

/// Declared type of the value a scoring routine must return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerValueType {
    Integer,
    Real,
    /// Single-channel image matching the ground-truth dimensions
    Image1ch,
    /// Three-channel image matching the ground-truth dimensions
    Image3ch,
    /// Label-acquisition order over the split's pool
    ActiveLearning,
}

impl AnswerValueType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "integer" => Some(AnswerValueType::Integer),
            "real" => Some(AnswerValueType::Real),
            "image-1ch" => Some(AnswerValueType::Image1ch),
            "image-3ch" => Some(AnswerValueType::Image3ch),
            "active-learning" => Some(AnswerValueType::ActiveLearning),
            _ => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, AnswerValueType::Image1ch | AnswerValueType::Image3ch)
    }
}

/// Declared shape of a task's input samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputDataType {
    /// Numeric vector (or rows of vectors)
    Vector,
    /// Grayscale image
    Image1ch,
    /// Color image
    Image3ch,
}

impl InputDataType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vector" => Some(InputDataType::Vector),
            "image-1ch" => Some(InputDataType::Image1ch),
            "image-3ch" => Some(InputDataType::Image3ch),
            _ => None,
        }
    }
}

/// Scheduling kind of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Always open, no test split revealed
    Quest,
    /// Bounded window; test results concealed until the end date
    Contest,
}

impl TaskType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quest" => Some(TaskType::Quest),
            "contest" => Some(TaskType::Contest),
            _ => None,
        }
    }
}

/// Declared type of a free-form sample parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Integer,
    Real,
}

/// A free-form scalar parameter passed alongside a sample's input
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Integer(i64),
    Real(f64),
}

/// Owned raw image: row-major, `channels` interleaved bytes per pixel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub data: Vec<u8>,
}

impl ImageBuffer {
    pub fn new(width: u32, height: u32, channels: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height * channels) as usize);
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    /// (width, height, channels)
    pub fn dims(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.channels)
    }

    /// Mean absolute per-byte difference against another image of the
    /// same dimensions. `None` when dimensions differ.
    pub fn mean_abs_diff(&self, other: &ImageBuffer) -> Option<f64> {
        if self.dims() != other.dims() || self.data.is_empty() {
            return None;
        }
        let total: u64 = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (i64::from(*a) - i64::from(*b)).unsigned_abs())
            .sum();
        Some(total as f64 / self.data.len() as f64)
    }
}

/// Input payload of one sample
#[derive(Debug, Clone, PartialEq)]
pub enum InputPayload {
    /// Flat numeric vector
    Vector(Vec<f32>),
    /// Rows of numeric vectors (active-learning pool)
    VectorSet(Vec<Vec<f32>>),
    /// One image
    Image(ImageBuffer),
    /// A bundle of images sharing one ground truth
    ImageBundle(Vec<ImageBuffer>),
}

impl InputPayload {
    /// Elementary input units in the sample, used to scale the
    /// per-sample deadline: vector length, row count, image height, or
    /// bundle size.
    pub fn unit_count(&self) -> usize {
        match self {
            InputPayload::Vector(v) => v.len(),
            InputPayload::VectorSet(rows) => rows.len(),
            InputPayload::Image(img) => img.height as usize,
            InputPayload::ImageBundle(imgs) => imgs.len(),
        }
    }
}

/// Ground-truth value of one sample
#[derive(Debug, Clone, PartialEq)]
pub enum GroundTruth {
    Integer(i64),
    Real(f64),
    Image(ImageBuffer),
    /// Per-element labels of an active-learning pool
    Labels(Vec<i64>),
}

/// Value returned by a scoring routine, already coerced to the task's
/// declared answer type
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerValue {
    Integer(i64),
    Real(f64),
    Image(ImageBuffer),
    /// Label-acquisition order over the pool indices
    Order(Vec<usize>),
}

impl GroundTruth {
    /// Exact-match check used by the Accuracy metric
    pub fn matches(&self, answer: &AnswerValue) -> bool {
        match (self, answer) {
            (GroundTruth::Integer(a), AnswerValue::Integer(b)) => a == b,
            (GroundTruth::Real(a), AnswerValue::Real(b)) => a == b,
            (GroundTruth::Image(a), AnswerValue::Image(b)) => a == b,
            _ => false,
        }
    }
}

/// Auxiliary arguments forwarded to the scoring routine with a sample
#[derive(Debug, Clone, PartialEq)]
pub enum SampleParams {
    /// Free-form scalar parameters from the manifest
    Plain(Vec<ParamValue>),
    /// Active-learning payload: initial labeled pool, its labels, and
    /// the split's precision/recall floor
    ActiveLearning {
        pool: Vec<Vec<f32>>,
        labels: Vec<i64>,
        goal: f64,
    },
}

impl SampleParams {
    pub fn empty() -> Self {
        SampleParams::Plain(Vec::new())
    }
}

/// Aggregated score of one split
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitSummary {
    Accuracy { matched: u32, mismatched: u32 },
    Mae { total: f64, count: u32 },
    RegistrationRate { total: f64, count: u32 },
}

impl SplitSummary {
    /// Scalar value of the split, `None` when no sample was scoreable
    /// (rendered as `-` in the ledger, never coerced to zero).
    pub fn value(&self) -> Option<f64> {
        match *self {
            SplitSummary::Accuracy { matched, mismatched } => {
                let total = matched + mismatched;
                (total > 0).then(|| f64::from(matched) / f64::from(total))
            }
            SplitSummary::Mae { total, count } | SplitSummary::RegistrationRate { total, count } => {
                (count > 0).then(|| total / f64::from(count))
            }
        }
    }
}

/// Per-split summaries of one evaluated submission
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionScores {
    pub train: Option<SplitSummary>,
    pub valid: Option<SplitSummary>,
    pub test: Option<SplitSummary>,
}

impl SubmissionScores {
    pub fn get(&self, split: Split) -> Option<&SplitSummary> {
        match split {
            Split::Train => self.train.as_ref(),
            Split::Valid => self.valid.as_ref(),
            Split::Test => self.test.as_ref(),
        }
    }

    pub fn set(&mut self, split: Split, summary: SplitSummary) {
        match split {
            Split::Train => self.train = Some(summary),
            Split::Valid => self.valid = Some(summary),
            Split::Test => self.test = Some(summary),
        }
    }
}
