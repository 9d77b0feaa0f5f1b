//! Request handler: one generation request in, one [`Outcome`] out.
//!
//! A request moves through
//! `Validating → (Rejected | Staging) → Invoking → (Persisting → Succeeded) | Failed`.
//! Every error on the way becomes a failure report; nothing here retries and
//! nothing here aborts the process.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::cache::ResourceCache;
use crate::error::{DaemonError, ErrorCode, Result};
use crate::models::{GenerationBackend, GenerationResource, GpuProbe, Invocation, SystemGpuProbe};
use crate::types::{
    normalize_save_name, normalize_text, GenerationParams, GenerationRequest, Outcome,
    ResourceConfig, SuccessReport,
};

use super::staging::{StagingArea, LYRICS_FILE, TAGS_FILE};

/// Turns generation requests into outcomes using a cached pipeline.
pub struct RequestHandler<B: GenerationBackend, P: GpuProbe = SystemGpuProbe> {
    cache: ResourceCache<B>,
    probe: P,
    output_dir: PathBuf,
}

/// What a successful run hands back for the report.
struct Completed {
    path: PathBuf,
    config: ResourceConfig,
    params: GenerationParams,
}

impl<B: GenerationBackend, P: GpuProbe> RequestHandler<B, P> {
    /// Creates a handler with an empty cache around `backend`.
    pub fn new(backend: B, probe: P, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache: ResourceCache::new(backend),
            probe,
            output_dir: output_dir.into(),
        }
    }

    /// Handles one request end to end.
    pub fn handle(&mut self, request: &GenerationRequest) -> Outcome {
        let started = Instant::now();

        match self.run(request) {
            Ok(done) => {
                let elapsed = started.elapsed();
                tracing::info!(
                    path = %done.path.display(),
                    elapsed_sec = elapsed.as_secs_f32(),
                    "generation succeeded"
                );
                Outcome::Succeeded {
                    path: done.path.clone(),
                    report: SuccessReport::new(done.path, elapsed, done.config, done.params),
                }
            }
            Err(error) => {
                tracing::warn!(
                    code = %error.code,
                    category = %error.category(),
                    message = %error.message,
                    "generation failed"
                );
                Outcome::failure(&error, started.elapsed())
            }
        }
    }

    fn run(&mut self, request: &GenerationRequest) -> Result<Completed> {
        // Validating: nothing below runs for a rejected request
        let config = request.resource.resolve()?;
        if config.requires_cuda() && !self.probe.cuda_available() {
            return Err(DaemonError::cuda_unavailable(format!(
                "mula={}, codec={}",
                config.mula_device(),
                config.codec_device()
            )));
        }
        let params = request.params()?;
        let save_name = normalize_save_name(request.save_name.as_deref());

        // Staging
        let staging = StagingArea::new()?;
        let lyrics = staging.write(LYRICS_FILE, &normalize_text(&request.lyrics))?;
        let tags = staging.write(TAGS_FILE, &normalize_text(&request.tags))?;
        let staged_output = staging.file(&save_name);

        // Invoking
        let resource = self.cache.acquire(&config)?;
        let invocation = Invocation {
            lyrics: &lyrics,
            tags: &tags,
            save_path: &staged_output,
            params,
        };
        if let Err(error) = resource.generate(&invocation) {
            // A pipeline that lost its transport cannot serve the next request
            if error.code == ErrorCode::WorkerFailed {
                tracing::warn!("evicting pipeline after worker failure");
                self.cache.unload();
            }
            return Err(error);
        }
        if !staged_output.is_file() {
            return Err(DaemonError::inference_failed(format!(
                "pipeline wrote no file at {}",
                staged_output.display()
            )));
        }

        // Persisting: copy out before the staging area goes away
        let path = persist_output(&staged_output, &self.output_dir, &save_name)?;
        if let Err(error) = staging.close() {
            tracing::warn!(%error, "staging directory not fully removed");
        }

        Ok(Completed {
            path,
            config,
            params,
        })
    }

    pub fn cache(&self) -> &ResourceCache<B> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ResourceCache<B> {
        &mut self.cache
    }

    /// Directory generated files are copied into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// Copies `source` into `output_dir` as `name`, creating the directory if
/// needed. An existing file of the same name is overwritten.
fn persist_output(source: &Path, output_dir: &Path, name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir).map_err(|e| {
        DaemonError::persist_failed(
            format!("cannot create output directory {}", output_dir.display()),
            e,
        )
    })?;

    let destination = output_dir.join(name);
    std::fs::copy(source, &destination).map_err(|e| {
        DaemonError::persist_failed(format!("cannot copy output to {}", destination.display()), e)
    })?;
    Ok(destination)
}

/// A [`RequestHandler`] behind a mutex, for hosts that serve requests from
/// several threads.
///
/// The lock is held for the whole request, so acquisition, invocation and
/// persistence of one request finish before the next request starts.
pub struct SharedHandler<B: GenerationBackend, P: GpuProbe = SystemGpuProbe> {
    inner: Arc<Mutex<RequestHandler<B, P>>>,
}

impl<B: GenerationBackend, P: GpuProbe> SharedHandler<B, P> {
    pub fn new(handler: RequestHandler<B, P>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(handler)),
        }
    }

    /// Handles one request while holding the lock.
    pub fn handle(&self, request: &GenerationRequest) -> Outcome {
        self.with(|handler| handler.handle(request))
    }

    /// Runs `f` with exclusive access to the handler.
    pub fn with<R>(&self, f: impl FnOnce(&mut RequestHandler<B, P>) -> R) -> R {
        // A panic inside a previous request leaves the handler usable: the
        // cache slot is only ever assigned whole.
        let mut handler = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *handler)
    }
}

impl<B: GenerationBackend, P: GpuProbe> Clone for SharedHandler<B, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::models::backend::testing::{StubBackend, STUB_AUDIO};
    use crate::models::StaticProbe;
    use crate::types::{LooseNumber, ResourceSettings, OUTPUT_EXTENSION, REMEDIATION_CHECKLIST};
    use tempfile::TempDir;

    fn cpu_request(save_name: &str) -> GenerationRequest {
        GenerationRequest {
            lyrics: "[Verse]\nhello\n".to_string(),
            tags: "piano".to_string(),
            save_name: Some(save_name.to_string()),
            max_audio_length_ms: LooseNumber::Int(20_000),
            topk: LooseNumber::Int(50),
            temperature: LooseNumber::Float(1.0),
            cfg_scale: LooseNumber::Float(1.5),
            resource: ResourceSettings {
                mula_device: "cpu".to_string(),
                codec_device: "cpu".to_string(),
                ..ResourceSettings::default()
            },
        }
    }

    fn cuda_request() -> GenerationRequest {
        let mut request = cpu_request("a");
        request.resource.mula_device = "cuda".to_string();
        request
    }

    fn make_handler(
        backend: &StubBackend,
        cuda: bool,
    ) -> (RequestHandler<StubBackend, StaticProbe>, TempDir) {
        let out = tempfile::tempdir().unwrap();
        let output_dir = out.path().join("ui_outputs");
        (RequestHandler::new(backend.clone(), StaticProbe(cuda), output_dir), out)
    }

    #[test]
    fn end_to_end_success() {
        let backend = StubBackend::default();
        let (mut handler, _out) = make_handler(&backend, false);

        let outcome = handler.handle(&cpu_request("a"));

        let path = outcome.path().expect("success outcome").to_path_buf();
        assert!(path.ends_with("a.mp3"));
        assert_eq!(path.parent(), Some(handler.output_dir()));
        assert_eq!(std::fs::read(&path).unwrap(), STUB_AUDIO);

        let report = outcome.success().unwrap();
        assert_eq!(report.params.max_audio_length_ms, 20_000);
        assert_eq!(report.params.topk, 50);
        assert_eq!(report.params.temperature, 1.0);
        assert_eq!(report.params.cfg_scale, 1.5);
        assert!(outcome.log().contains("- max_audio_length_ms: 20000"));
    }

    #[test]
    fn staged_inputs_are_normalized() {
        let backend = StubBackend::default();
        let (mut handler, _out) = make_handler(&backend, false);
        let mut request = cpu_request("a");
        request.lyrics = "[Verse]\nhello   \n\n".to_string();
        request.tags = "piano,ballad \t".to_string();

        assert!(handler.handle(&request).is_success());

        let seen = backend.last_invocation().unwrap();
        assert_eq!(seen.lyrics, "[Verse]\nhello\n");
        assert_eq!(seen.tags, "piano,ballad\n");
        assert_eq!(seen.lyrics_path.parent(), seen.save_path.parent());
        assert_eq!(seen.tags_path.parent(), seen.save_path.parent());
        assert!(seen.tags_path.ends_with(TAGS_FILE));
        assert_eq!(seen.params, request.params().unwrap());
    }

    #[test]
    fn cuda_without_gpu_is_rejected_before_construction() {
        let backend = StubBackend::default();
        let (mut handler, _out) = make_handler(&backend, false);

        let outcome = handler.handle(&cuda_request());

        assert!(outcome.path().is_none());
        let report = outcome.failure_report().unwrap();
        assert_eq!(report.category, ErrorCategory::Capability);
        assert_eq!(report.code, ErrorCode::CudaUnavailable);
        assert_eq!(backend.constructions(), 0);
        assert!(backend.last_invocation().is_none());
    }

    #[test]
    fn cuda_with_gpu_proceeds() {
        let backend = StubBackend::default();
        let (mut handler, _out) = make_handler(&backend, true);

        assert!(handler.handle(&cuda_request()).is_success());
        assert_eq!(backend.constructions(), 1);
    }

    #[test]
    fn staging_removed_after_success() {
        let backend = StubBackend::default();
        let (mut handler, _out) = make_handler(&backend, false);

        assert!(handler.handle(&cpu_request("a")).is_success());

        let staged = backend.last_invocation().unwrap().lyrics_path;
        assert!(!staged.parent().unwrap().exists());
    }

    #[test]
    fn staging_removed_after_failure() {
        let backend = StubBackend::default();
        backend.fail_generation(Some("decoder exploded"));
        let (mut handler, _out) = make_handler(&backend, false);

        let outcome = handler.handle(&cpu_request("a"));
        assert!(!outcome.is_success());

        let staged = backend.last_invocation().unwrap().lyrics_path;
        assert!(!staged.parent().unwrap().exists());
    }

    #[test]
    fn extension_is_added_exactly_once() {
        let backend = StubBackend::default();
        let (mut handler, _out) = make_handler(&backend, false);

        for name in ["song", "song.mp3"] {
            let outcome = handler.handle(&cpu_request(name));
            let file_name = outcome
                .path()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap();
            assert_eq!(file_name, "song.mp3");
            assert_eq!(file_name.matches(OUTPUT_EXTENSION).count(), 1);
        }
    }

    #[test]
    fn missing_save_name_uses_default() {
        let backend = StubBackend::default();
        let (mut handler, _out) = make_handler(&backend, false);
        let mut request = cpu_request("ignored");
        request.save_name = None;

        let outcome = handler.handle(&request);
        assert!(outcome.path().unwrap().ends_with(crate::config::DEFAULT_SAVE_NAME));
    }

    #[test]
    fn non_numeric_temperature_is_rejected_without_invocation() {
        let backend = StubBackend::default();
        let (mut handler, _out) = make_handler(&backend, false);
        let mut request = cpu_request("a");
        request.temperature = LooseNumber::from("abc");

        let outcome = handler.handle(&request);

        let report = outcome.failure_report().unwrap();
        assert_eq!(report.category, ErrorCategory::Validation);
        assert!(report.message.contains("abc"));
        assert!(outcome.log().contains("abc"));
        assert_eq!(backend.invocations(), 0);
        assert_eq!(backend.constructions(), 0);
    }

    #[test]
    fn construction_failure_is_reported() {
        let backend = StubBackend::default();
        backend.fail_construction(true);
        let (mut handler, _out) = make_handler(&backend, false);

        let outcome = handler.handle(&cpu_request("a"));

        let report = outcome.failure_report().unwrap();
        assert_eq!(report.category, ErrorCategory::Construction);
        assert_eq!(report.remediation, REMEDIATION_CHECKLIST);
        assert!(outcome.path().is_none());
    }

    #[test]
    fn oom_failure_is_distinguished() {
        let backend = StubBackend::default();
        backend.fail_generation(Some("CUDA out of memory. Tried to allocate 3.00 GiB"));
        let (mut handler, out) = make_handler(&backend, false);

        let outcome = handler.handle(&cpu_request("a"));

        let report = outcome.failure_report().unwrap();
        assert_eq!(report.code, ErrorCode::OutOfMemory);
        assert_eq!(report.category, ErrorCategory::Invocation);
        assert!(!out.path().join("ui_outputs").join("a.mp3").exists());
    }

    #[test]
    fn missing_pipeline_output_is_an_invocation_failure() {
        let backend = StubBackend::default();
        backend.skip_output(true);
        let (mut handler, _out) = make_handler(&backend, false);

        let report = handler.handle(&cpu_request("a")).failure_report().cloned().unwrap();
        assert_eq!(report.code, ErrorCode::InferenceFailed);
    }

    #[test]
    fn worker_failure_evicts_pipeline() {
        let backend = StubBackend::default();
        let (mut handler, _out) = make_handler(&backend, false);

        assert!(handler.handle(&cpu_request("a")).is_success());
        backend.lose_worker(true);
        let report = handler.handle(&cpu_request("b")).failure_report().cloned().unwrap();
        assert_eq!(report.code, ErrorCode::WorkerFailed);
        assert!(!handler.cache().is_loaded());

        backend.lose_worker(false);
        assert!(handler.handle(&cpu_request("c")).is_success());
        assert_eq!(backend.constructions(), 2);
    }

    #[test]
    fn inference_failure_keeps_pipeline() {
        let backend = StubBackend::default();
        backend.fail_generation(Some("bad lyrics"));
        let (mut handler, _out) = make_handler(&backend, false);

        assert!(!handler.handle(&cpu_request("a")).is_success());
        assert!(handler.cache().is_loaded());

        backend.fail_generation(None);
        assert!(handler.handle(&cpu_request("a")).is_success());
        assert_eq!(backend.constructions(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn worker_exiting_after_load_is_rebuilt_each_request() {
        use crate::models::WorkerBackend;

        // Answers `load`, then exits before replying to `generate`
        let script = r#"read line; echo '{"jsonrpc":"2.0","id":1,"result":null}'"#;
        let backend = WorkerBackend::new(vec!["sh".into(), "-c".into(), script.into()]);
        let out = tempfile::tempdir().unwrap();
        let mut handler = RequestHandler::new(backend, StaticProbe(false), out.path());

        for attempt in 1..=3 {
            let report = handler.handle(&cpu_request("a")).failure_report().cloned().unwrap();
            assert_eq!(report.code, ErrorCode::WorkerFailed);
            assert!(!handler.cache().is_loaded());
            assert_eq!(handler.cache().constructions(), attempt);
        }
    }

    #[test]
    fn unwritable_output_dir_is_an_io_failure() {
        let backend = StubBackend::default();
        let out = tempfile::tempdir().unwrap();
        let blocker = out.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let mut handler = RequestHandler::new(backend.clone(), StaticProbe(false), blocker.clone());

        let report = handler.handle(&cpu_request("a")).failure_report().cloned().unwrap();
        assert_eq!(report.category, ErrorCategory::Io);
        assert_eq!(report.code, ErrorCode::PersistFailed);
    }

    #[test]
    fn repeated_requests_reuse_pipeline() {
        let backend = StubBackend::default();
        let (mut handler, _out) = make_handler(&backend, false);

        assert!(handler.handle(&cpu_request("a")).is_success());
        assert!(handler.handle(&cpu_request("b")).is_success());
        assert_eq!(backend.constructions(), 1);

        let mut changed = cpu_request("c");
        changed.resource.lazy_load = false;
        assert!(handler.handle(&changed).is_success());
        assert_eq!(backend.constructions(), 2);
        assert_eq!(handler.cache().current_config().map(|c| c.lazy_load()), Some(false));
    }

    #[test]
    fn same_name_overwrites_previous_output() {
        let backend = StubBackend::default();
        let (mut handler, _out) = make_handler(&backend, false);

        let first = handler.handle(&cpu_request("a")).path().unwrap().to_path_buf();
        std::fs::write(&first, b"stale").unwrap();
        let second = handler.handle(&cpu_request("a")).path().unwrap().to_path_buf();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second).unwrap(), STUB_AUDIO);
    }

    #[test]
    fn shared_handler_serializes_requests() {
        let backend = StubBackend::default();
        let (handler, _out) = make_handler(&backend, false);
        let shared = SharedHandler::new(handler);

        let threads: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || shared.handle(&cpu_request(&format!("song-{}", i))))
            })
            .collect();

        for thread in threads {
            assert!(thread.join().unwrap().is_success());
        }
        assert_eq!(backend.constructions(), 1);
        assert_eq!(backend.invocations(), 4);
        assert_eq!(shared.with(|h| h.cache().constructions()), 1);
    }
}
