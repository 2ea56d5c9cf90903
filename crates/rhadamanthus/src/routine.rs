//! The pluggable scoring-routine seam.
//!
//! A submission exposes one entry point with a fixed signature: it
//! receives a sample's input (plus, for active-learning tasks, the
//! auxiliary training payload) and returns a value of the task's
//! declared answer type. The contract here is the calling convention,
//! not the mechanism: the production binding talks newline-delimited
//! JSON to one long-lived interpreter process per split, while tests
//! register in-process doubles in the [`RoutineRegistry`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use kritai_common::{GradeError, GradeResult, ImageBuffer, InputPayload, ParamValue, SampleParams};

/// Identity of a claimed submission, used to resolve its binding
#[derive(Debug, Clone)]
pub struct SubmissionKey {
    pub participant: String,
    pub task_id: String,
    /// Claimed module file in the task's execution area
    pub module_path: PathBuf,
}

impl SubmissionKey {
    pub fn identity(&self) -> String {
        format!("{}/{}", self.task_id, self.participant)
    }
}

/// One bound scoring routine: a scoped worker, acquired per split and
/// torn down on completion, timeout, or crash. Never reused across
/// tasks or participants.
#[async_trait]
pub trait ScoringRoutine: Send {
    /// Invoke the entry point once for one sample. The returned raw
    /// JSON value is coerced to the declared answer type by the
    /// executor.
    async fn invoke(&mut self, input: &InputPayload, params: &SampleParams)
        -> GradeResult<Value>;

    /// Tear the worker down. Must be safe to call after a failure.
    async fn shutdown(&mut self);
}

/// Factory producing one fresh worker per split
pub trait RoutineBinding: Send + Sync {
    fn bind(&self, submission: &SubmissionKey) -> GradeResult<Box<dyn ScoringRoutine>>;
}

/// Registry resolving a submission to its binding. Production uses the
/// default child-process binding; tests register overrides keyed by
/// submission identity.
pub struct RoutineRegistry {
    default_binding: Arc<dyn RoutineBinding>,
    overrides: HashMap<String, Arc<dyn RoutineBinding>>,
}

impl RoutineRegistry {
    pub fn new(default_binding: Arc<dyn RoutineBinding>) -> Self {
        Self {
            default_binding,
            overrides: HashMap::new(),
        }
    }

    pub fn register(&mut self, identity: impl Into<String>, binding: Arc<dyn RoutineBinding>) {
        self.overrides.insert(identity.into(), binding);
    }

    pub fn resolve(&self, submission: &SubmissionKey) -> Arc<dyn RoutineBinding> {
        self.overrides
            .get(&submission.identity())
            .cloned()
            .unwrap_or_else(|| self.default_binding.clone())
    }
}

/// Default binding: spawn the configured interpreter command with the
/// claimed module path appended, e.g. `python3 harness.py <module>`.
pub struct ChildProcessBinding {
    program: String,
    args: Vec<String>,
}

impl ChildProcessBinding {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl RoutineBinding for ChildProcessBinding {
    fn bind(&self, submission: &SubmissionKey) -> GradeResult<Box<dyn ScoringRoutine>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&submission.module_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GradeError::Load(format!("cannot start worker: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GradeError::Load("worker has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GradeError::Load("worker has no stdout".into()))?;

        Ok(Box::new(ChildProcessRoutine {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        }))
    }
}

/// Worker response: either an answer value or a typed error
#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    answer: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    kind: Option<String>,
    message: String,
}

/// One long-lived worker process speaking one JSON request/response
/// line per sample.
pub struct ChildProcessRoutine {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

#[async_trait]
impl ScoringRoutine for ChildProcessRoutine {
    async fn invoke(
        &mut self,
        input: &InputPayload,
        params: &SampleParams,
    ) -> GradeResult<Value> {
        let request = json!({
            "input": wire_input(input),
            "args": wire_params(params),
        });
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| GradeError::Crash(format!("worker stdin closed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| GradeError::Crash(format!("worker stdin closed: {e}")))?;

        let mut response = String::new();
        let read = self
            .stdout
            .read_line(&mut response)
            .await
            .map_err(|e| GradeError::Crash(format!("worker stdout failed: {e}")))?;
        if read == 0 {
            return Err(GradeError::Crash("worker process exited".into()));
        }

        let parsed: WireResponse = serde_json::from_str(&response)
            .map_err(|e| GradeError::Crash(format!("unreadable worker response: {e}")))?;
        if let Some(error) = parsed.error {
            return Err(match error.kind.as_deref() {
                Some("load") => GradeError::Load(error.message),
                _ => GradeError::Crash(error.message),
            });
        }
        parsed
            .answer
            .ok_or_else(|| GradeError::Crash("worker response has no answer".into()))
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("worker already gone: {e}");
        }
        let _ = self.child.wait().await;
    }
}

fn wire_image(image: &ImageBuffer) -> Value {
    json!({
        "width": image.width,
        "height": image.height,
        "channels": image.channels,
        "data": BASE64.encode(&image.data),
    })
}

fn wire_input(input: &InputPayload) -> Value {
    match input {
        InputPayload::Vector(v) => json!(v),
        InputPayload::VectorSet(rows) => json!(rows),
        InputPayload::Image(image) => wire_image(image),
        InputPayload::ImageBundle(images) => {
            Value::Array(images.iter().map(wire_image).collect())
        }
    }
}

fn wire_params(params: &SampleParams) -> Value {
    match params {
        SampleParams::Plain(values) => Value::Array(
            values
                .iter()
                .map(|value| match value {
                    ParamValue::Integer(i) => json!(i),
                    ParamValue::Real(r) => json!(r),
                })
                .collect(),
        ),
        SampleParams::ActiveLearning { pool, labels, goal } => json!({
            "train": pool,
            "train_gt": labels,
            "goal": goal,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_override_then_default() {
        struct Nope;
        impl RoutineBinding for Nope {
            fn bind(&self, _: &SubmissionKey) -> GradeResult<Box<dyn ScoringRoutine>> {
                Err(GradeError::Load("unbound".into()))
            }
        }

        let mut registry = RoutineRegistry::new(Arc::new(Nope));
        let key = SubmissionKey {
            participant: "alice".into(),
            task_id: "task-a".into(),
            module_path: PathBuf::from("m.py"),
        };
        registry.register(key.identity(), Arc::new(Nope));
        assert!(registry.resolve(&key).bind(&key).is_err());
    }

    #[test]
    fn wire_forms_are_stable() {
        let image = ImageBuffer::new(1, 1, 3, vec![1, 2, 3]);
        let encoded = wire_input(&InputPayload::Image(image));
        assert_eq!(encoded["width"], 1);
        assert_eq!(encoded["channels"], 3);
        assert_eq!(encoded["data"], BASE64.encode([1u8, 2, 3]));

        let params = wire_params(&SampleParams::ActiveLearning {
            pool: vec![vec![0.0, 1.0]],
            labels: vec![0],
            goal: 0.9,
        });
        assert_eq!(params["goal"], 0.9);
        assert_eq!(params["train_gt"], json!([0]));
    }
}
