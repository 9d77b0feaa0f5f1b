//! Pipeline backend that drives an external worker process.
//!
//! The worker keeps the model resident and speaks line-delimited JSON-RPC 2.0
//! on its stdio: `load` once after spawning, then `generate` per song. Its
//! stderr is inherited so pipeline logs land next to ours; stdout is reserved
//! for replies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::error::{DaemonError, Result};
use crate::types::ResourceConfig;

use super::backend::{GenerationBackend, GenerationResource, Invocation};

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct WorkerResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<WorkerError>,
}

#[derive(Debug, Deserialize)]
struct WorkerError {
    code: Option<i64>,
    message: String,
}

/// Why a worker call did not produce a result.
#[derive(Debug)]
enum CallError {
    /// The worker answered with a JSON-RPC error.
    Remote(String),
    /// The pipe broke or the worker exited.
    Transport(String),
}

/// Spawns one worker process per pipeline construction.
#[derive(Debug, Clone)]
pub struct WorkerBackend {
    command: Vec<String>,
}

impl WorkerBackend {
    /// Creates a backend that starts `command` (program followed by arguments).
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }
}

impl GenerationBackend for WorkerBackend {
    type Resource = WorkerPipeline;

    fn construct(&self, config: &ResourceConfig) -> Result<WorkerPipeline> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| DaemonError::model_load_failed("worker command is empty"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                DaemonError::model_load_failed(format!("cannot start worker '{}': {}", program, e))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (stdin, stdout) = match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DaemonError::model_load_failed("cannot capture worker stdio"));
            }
        };

        let mut pipeline = WorkerPipeline {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        };

        let params = serde_json::to_value(config)
            .map_err(|e| DaemonError::model_load_failed(format!("cannot encode config: {}", e)))?;

        tracing::info!(pid = pipeline.child.id(), program = %program, "worker started, loading pipeline");

        // On failure `pipeline` drops here, which reaps the child.
        match pipeline.call("load", params) {
            Ok(_) => Ok(pipeline),
            Err(CallError::Remote(message)) | Err(CallError::Transport(message)) => {
                Err(DaemonError::model_load_failed(message))
            }
        }
    }
}

/// A running worker with a loaded pipeline.
#[derive(Debug)]
pub struct WorkerPipeline {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl WorkerPipeline {
    /// Process id of the worker.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    fn call(&mut self, method: &str, params: Value) -> std::result::Result<Value, CallError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = WorkerRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| CallError::Transport(format!("cannot encode request: {}", e)))?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .and_then(|_| self.stdin.flush())
            .map_err(|e| CallError::Transport(format!("cannot write to worker: {}", e)))?;

        let mut reply = String::new();
        let read = self
            .stdout
            .read_line(&mut reply)
            .map_err(|e| CallError::Transport(format!("cannot read from worker: {}", e)))?;
        if read == 0 {
            let status = self
                .child
                .try_wait()
                .ok()
                .flatten()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "still running".to_string());
            return Err(CallError::Transport(format!(
                "worker closed its output ({})",
                status
            )));
        }

        let response: WorkerResponse = serde_json::from_str(reply.trim()).map_err(|e| {
            CallError::Transport(format!("malformed worker reply: {} (raw: {})", e, reply.trim()))
        })?;

        if response.id.is_some_and(|reply_id| reply_id != id) {
            return Err(CallError::Transport(format!(
                "worker replied to request {:?}, expected {}",
                response.id, id
            )));
        }

        if let Some(error) = response.error {
            let message = match error.code {
                Some(code) => format!("{} (worker code {})", error.message, code),
                None => error.message,
            };
            return Err(CallError::Remote(message));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }
}

impl GenerationResource for WorkerPipeline {
    fn generate(&mut self, invocation: &Invocation<'_>) -> Result<()> {
        let params = serde_json::json!({
            "lyrics": invocation.lyrics.to_string_lossy(),
            "tags": invocation.tags.to_string_lossy(),
            "save_path": invocation.save_path.to_string_lossy(),
            "max_audio_length_ms": invocation.params.max_audio_length_ms,
            "topk": invocation.params.topk,
            "temperature": invocation.params.temperature,
            "cfg_scale": invocation.params.cfg_scale,
        });

        match self.call("generate", params) {
            Ok(_) => Ok(()),
            Err(CallError::Remote(message)) => Err(DaemonError::inference_failed(message)),
            Err(CallError::Transport(message)) => Err(DaemonError::worker_failed(message)),
        }
    }
}

impl Drop for WorkerPipeline {
    fn drop(&mut self) {
        tracing::debug!(pid = self.child.id(), "stopping worker");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{Device, Precision};
    use crate::error::{ErrorCategory, ErrorCode};
    use crate::types::GenerationParams;

    fn sh(script: &str) -> WorkerBackend {
        WorkerBackend::new(vec!["sh".into(), "-c".into(), script.into()])
    }

    fn cpu_config() -> ResourceConfig {
        ResourceConfig::new(
            "/models/ckpt",
            "3B",
            Device::Cpu,
            Device::Cpu,
            Precision::Fp32,
            Precision::Fp32,
            true,
        )
        .unwrap()
    }

    fn invoke(pipeline: &mut WorkerPipeline, dir: &std::path::Path) -> Result<()> {
        let lyrics = dir.join("lyrics.txt");
        let tags = dir.join("tags.txt");
        let save_path = dir.join("out.mp3");
        pipeline.generate(&Invocation {
            lyrics: &lyrics,
            tags: &tags,
            save_path: &save_path,
            params: GenerationParams {
                max_audio_length_ms: 10_000,
                topk: 50,
                temperature: 1.0,
                cfg_scale: 1.5,
            },
        })
    }

    const LOAD_OK: &str = r#"read line; echo '{"jsonrpc":"2.0","id":1,"result":{"status":"loaded"}}'"#;

    #[test]
    fn missing_program_is_a_construction_error() {
        let backend = WorkerBackend::new(vec!["/nonexistent/heartmula-worker".into()]);
        let err = backend.construct(&cpu_config()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Construction);
        assert!(err.message.contains("cannot start worker"));
    }

    #[test]
    fn empty_command_is_a_construction_error() {
        let err = WorkerBackend::new(Vec::new())
            .construct(&cpu_config())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelLoadFailed);
    }

    #[test]
    fn load_request_carries_configuration() {
        let backend = sh(r#"read line
case "$line" in
  *'"method":"load"'*'"lazy_load":true'*) echo '{"jsonrpc":"2.0","id":1,"result":null}' ;;
  *) echo '{"jsonrpc":"2.0","id":1,"error":{"code":-1,"message":"bad load"}}' ;;
esac
sleep 5"#);
        let pipeline = backend.construct(&cpu_config()).unwrap();
        assert!(pipeline.pid() > 0);
    }

    #[test]
    fn load_error_reply_fails_construction() {
        let backend = sh(
            r#"read line; echo '{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"checkpoint not found"}}'"#,
        );
        let err = backend.construct(&cpu_config()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelLoadFailed);
        assert!(err.message.contains("checkpoint not found"));
    }

    #[test]
    fn worker_exit_during_load_fails_construction() {
        let err = sh("exit 3").construct(&cpu_config()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelLoadFailed);
    }

    #[test]
    fn oom_reply_maps_to_out_of_memory() {
        let backend = sh(&format!(
            r#"{LOAD_OK}; read line; echo '{{"jsonrpc":"2.0","id":2,"error":{{"code":-32000,"message":"CUDA out of memory. Tried to allocate 2.00 GiB"}}}}'"#
        ));
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = backend.construct(&cpu_config()).unwrap();

        let err = invoke(&mut pipeline, dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::OutOfMemory);
        assert_eq!(err.category(), ErrorCategory::Invocation);
    }

    #[test]
    fn generate_sends_every_parameter_and_leaves_the_file() {
        let script = r#"read line
for key in lyrics tags save_path max_audio_length_ms topk temperature cfg_scale; do
  case "$line" in
    *"\"$key\":"*) ;;
    *) echo "{\"jsonrpc\":\"2.0\",\"id\":2,\"error\":{\"code\":-32602,\"message\":\"missing $key\"}}"; exit 0 ;;
  esac
done
case "$line" in
  *'"method":"generate"'*'"topk":50'*) ;;
  *) echo '{"jsonrpc":"2.0","id":2,"error":{"code":-32602,"message":"bad params"}}'; exit 0 ;;
esac
path=$(printf '%s\n' "$line" | sed 's/.*"save_path":"\([^"]*\)".*/\1/')
printf audio > "$path"
echo '{"jsonrpc":"2.0","id":2,"result":{}}'"#;
        let backend = sh(&[LOAD_OK, script].join("\n"));
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = backend.construct(&cpu_config()).unwrap();

        invoke(&mut pipeline, dir.path()).unwrap();
        assert_eq!(std::fs::read(dir.path().join("out.mp3")).unwrap(), b"audio");
    }

    #[test]
    fn error_reply_to_generate_is_an_inference_error() {
        let backend = sh(&format!(
            r#"{LOAD_OK}; read line; echo '{{"jsonrpc":"2.0","id":2,"error":{{"code":-32000,"message":"tokenizer missing"}}}}'"#
        ));
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = backend.construct(&cpu_config()).unwrap();

        let err = invoke(&mut pipeline, dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InferenceFailed);
        assert!(err.message.contains("tokenizer missing"));
    }

    #[test]
    fn worker_exit_during_generate_is_a_worker_error() {
        let backend = sh(LOAD_OK);
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = backend.construct(&cpu_config()).unwrap();

        let err = invoke(&mut pipeline, dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::WorkerFailed);
    }
}
