use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use unicode_normalization::UnicodeNormalization;

use crate::artifact::{ArtifactHandle, ArtifactStore};
use crate::console::LogKind;
use crate::error::{ConvertError, ConvertResult};
use crate::events::EventBridge;
use crate::ffmpeg_args::build_args;
use crate::formats::{format_label, mime_type, Category};
use crate::source::SourceFile;

/// Sandboxed transcoding runtime with a private, name-addressed filesystem.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Bind the progress and log streams. Called before `load`.
    fn attach(&self, events: EventBridge);

    /// One-time initialisation. A failed load may be retried.
    async fn load(&self) -> Result<()>;

    async fn write_file(&self, name: &str, data: Bytes) -> Result<()>;

    async fn exec(&self, args: &[String]) -> Result<()>;

    async fn read_file(&self, name: &str) -> Result<Bytes>;

    async fn delete_file(&self, name: &str) -> Result<()>;
}

/// Lifecycle of the shared engine session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Unloaded,
    Loading,
    Ready,
}

/// Result of a successful transcode
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub handle: ArtifactHandle,
    pub size: usize,
}

/// Normalise a filename for the engine's virtual filesystem: strip
/// diacritics, then replace anything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.nfd()
        .filter(|c| !('\u{0300}'..='\u{036f}').contains(c))
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sanitised name for staging. A leading `-` would be read as an option by
/// the engine's argument parser, so such names get a `_` prefix.
fn staged_name(name: &str) -> String {
    let safe = sanitize_filename(name);
    if safe.starts_with('-') {
        format!("_{}", safe)
    } else {
        safe
    }
}

/// Transcoding engine capability wrapper owning its one shared session.
///
/// The session is a single stateful resource: it loads once, and only one
/// write/exec/read/cleanup cycle may run against it at a time. Callers are
/// serialised on `exec_lock`; do not turn this into parallel dispatch.
pub struct EngineAdapter {
    engine: Arc<dyn TranscodeEngine>,
    session: OnceCell<()>,
    loading: AtomicBool,
    exec_lock: Mutex<()>,
    artifacts: ArtifactStore,
    events: EventBridge,
}

impl EngineAdapter {
    pub fn new(engine: Arc<dyn TranscodeEngine>, artifacts: ArtifactStore, events: EventBridge) -> Self {
        engine.attach(events.clone());
        Self {
            engine,
            session: OnceCell::new(),
            loading: AtomicBool::new(false),
            exec_lock: Mutex::new(()),
            artifacts,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.session.initialized() {
            SessionState::Ready
        } else if self.loading.load(Ordering::Acquire) {
            SessionState::Loading
        } else {
            SessionState::Unloaded
        }
    }

    /// Load the engine once. Concurrent callers wait on the attempt already in
    /// flight; after a failure the next caller starts a fresh attempt.
    pub async fn ensure_loaded(&self) -> ConvertResult<()> {
        self.session
            .get_or_try_init(|| async {
                self.loading.store(true, Ordering::Release);
                self.events
                    .notice(LogKind::Info, "Initialising transcoding engine...")
                    .await;

                let outcome = self.engine.load().await;
                self.loading.store(false, Ordering::Release);

                match outcome {
                    Ok(()) => {
                        info!("🎬 Transcoding engine ready");
                        self.events
                            .notice(LogKind::Success, "Transcoding engine loaded")
                            .await;
                        Ok(())
                    }
                    Err(e) => {
                        let reason = format!("{:#}", e);
                        self.events
                            .notice(LogKind::Error, format!("Engine failed to load: {}", reason))
                            .await;
                        Err(ConvertError::EngineLoad(reason))
                    }
                }
            })
            .await
            .map(|_| ())
    }

    /// Convert one file through the engine.
    ///
    /// `output_base` is the unsanitised base name of the produced file. The
    /// staged input and output are removed afterwards whatever the outcome.
    pub async fn transcode(
        &self,
        file: &SourceFile,
        output_base: &str,
        format: &str,
        category: Category,
    ) -> ConvertResult<TranscodeOutput> {
        self.ensure_loaded().await?;

        let _session = self.exec_lock.lock().await;

        let safe_input = staged_name(&file.name);
        let mut safe_output = staged_name(&format!("{}.{}", output_base, format));
        if safe_output == safe_input {
            // Same-container conversions would otherwise overwrite their own input
            safe_output = format!("out_{}", safe_output);
        }

        self.engine
            .write_file(&safe_input, file.bytes.clone())
            .await
            .map_err(|e| ConvertError::Transcode(format!("could not stage input: {:#}", e)))?;
        self.events
            .notice(
                LogKind::Info,
                format!("File staged in memory ({:.2} MB)", file.size() as f64 / 1024.0 / 1024.0),
            )
            .await;

        let args = build_args(&safe_input, &safe_output, format, category);
        self.events
            .notice(LogKind::Info, format!("Command: ffmpeg {}", args.join(" ")))
            .await;

        let result = self.run(&args, &safe_output).await;

        self.cleanup(&safe_input).await;
        self.cleanup(&safe_output).await;

        let data = result?;
        let size = data.len();
        debug!("{} produced {} bytes", format_label(format), size);
        let handle = self.artifacts.create(data, mime_type(format));
        Ok(TranscodeOutput { handle, size })
    }

    async fn run(&self, args: &[String], output: &str) -> ConvertResult<Bytes> {
        self.engine
            .exec(args)
            .await
            .map_err(|e| ConvertError::Transcode(format!("{:#}", e)))?;
        self.engine
            .read_file(output)
            .await
            .map_err(|e| ConvertError::Transcode(format!("no output produced: {:#}", e)))
    }

    /// Best-effort removal; failures are logged and swallowed
    async fn cleanup(&self, name: &str) {
        if let Err(e) = self.engine.delete_file(name).await {
            let err = ConvertError::VirtualFsCleanup {
                name: name.to_string(),
                reason: format!("{:#}", e),
            };
            warn!("{}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ConversionEvent;
    use parking_lot::Mutex as SyncMutex;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// In-memory engine that records its calls
    #[derive(Default)]
    struct FakeEngine {
        files: SyncMutex<HashMap<String, Bytes>>,
        calls: SyncMutex<Vec<String>>,
        loads: AtomicUsize,
        fail_loads: AtomicUsize,
        fail_exec: AtomicBool,
        fail_delete: AtomicBool,
    }

    #[async_trait]
    impl TranscodeEngine for FakeEngine {
        fn attach(&self, _events: EventBridge) {}

        async fn load(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_loads.load(Ordering::SeqCst) > 0 {
                self.fail_loads.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("core asset unreachable");
            }
            Ok(())
        }

        async fn write_file(&self, name: &str, data: Bytes) -> Result<()> {
            self.calls.lock().push(format!("write {}", name));
            self.files.lock().insert(name.to_string(), data);
            Ok(())
        }

        async fn exec(&self, args: &[String]) -> Result<()> {
            self.calls.lock().push(format!("exec {}", args.join(" ")));
            if self.fail_exec.load(Ordering::SeqCst) {
                anyhow::bail!("Conversion failed: invalid data found when processing input");
            }
            let output = args.last().cloned().unwrap_or_default();
            self.files.lock().insert(output, Bytes::from_static(b"converted"));
            Ok(())
        }

        async fn read_file(&self, name: &str) -> Result<Bytes> {
            self.calls.lock().push(format!("read {}", name));
            self.files
                .lock()
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("{} not found", name))
        }

        async fn delete_file(&self, name: &str) -> Result<()> {
            self.calls.lock().push(format!("delete {}", name));
            if self.fail_delete.load(Ordering::SeqCst) {
                anyhow::bail!("permission denied");
            }
            self.files.lock().remove(name);
            Ok(())
        }
    }

    fn adapter(engine: Arc<FakeEngine>) -> (EngineAdapter, ArtifactStore, tokio::sync::mpsc::Receiver<ConversionEvent>) {
        let (bridge, rx) = EventBridge::channel(64);
        let store = ArtifactStore::new();
        (EngineAdapter::new(engine, store.clone(), bridge), store, rx)
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("scan_contrat_signé.png"), "scan_contrat_signe.png");
        assert_eq!(sanitize_filename("Vacances été 2024 (1).mov"), "Vacances_ete_2024__1_.mov");
        assert_eq!(sanitize_filename("ok-name_1.mp4"), "ok-name_1.mp4");
        assert_eq!(sanitize_filename("../etc/passwd"), ".._etc_passwd");
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_attempt() {
        let engine = Arc::new(FakeEngine::default());
        let (adapter, _store, _rx) = adapter(Arc::clone(&engine));
        assert_eq!(adapter.state(), SessionState::Unloaded);

        let (a, b, c) = tokio::join!(adapter.ensure_loaded(), adapter.ensure_loaded(), adapter.ensure_loaded());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(engine.loads.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.state(), SessionState::Ready);

        adapter.ensure_loaded().await.unwrap();
        assert_eq!(engine.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_can_be_retried() {
        let engine = Arc::new(FakeEngine::default());
        engine.fail_loads.store(1, Ordering::SeqCst);
        let (adapter, _store, _rx) = adapter(Arc::clone(&engine));

        let err = adapter.ensure_loaded().await.unwrap_err();
        assert!(matches!(err, ConvertError::EngineLoad(ref m) if m.contains("unreachable")));
        assert_eq!(adapter.state(), SessionState::Unloaded);

        adapter.ensure_loaded().await.unwrap();
        assert_eq!(adapter.state(), SessionState::Ready);
        assert_eq!(engine.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transcode_cycle() {
        let engine = Arc::new(FakeEngine::default());
        let (adapter, store, _rx) = adapter(Arc::clone(&engine));
        let file = SourceFile::new("Interview final.wav", None, vec![0u8; 16]);

        let out = adapter.transcode(&file, "Interview final", "mp3", Category::Audio).await.unwrap();
        assert_eq!(out.size, 9);
        let artifact = store.resolve(&out.handle).unwrap();
        assert_eq!(artifact.mime, "audio/mpeg");

        let calls = engine.calls.lock().clone();
        assert_eq!(
            calls,
            [
                "write Interview_final.wav",
                "exec -i Interview_final.wav -c:a libmp3lame -q:a 4 Interview_final.mp3",
                "read Interview_final.mp3",
                "delete Interview_final.wav",
                "delete Interview_final.mp3",
            ]
        );
        assert!(engine.files.lock().is_empty());
    }

    #[tokio::test]
    async fn test_leading_dash_is_not_passed_as_an_option() {
        let engine = Arc::new(FakeEngine::default());
        let (adapter, _store, _rx) = adapter(Arc::clone(&engine));
        let file = SourceFile::new("-intro.mov", None, vec![1u8]);

        adapter.transcode(&file, "-intro", "mp4", Category::Video).await.unwrap();
        let calls = engine.calls.lock().clone();
        assert_eq!(calls[0], "write _-intro.mov");
        assert!(calls[1].starts_with("exec -i _-intro.mov "), "{}", calls[1]);
        assert!(calls[1].ends_with(" _-intro.mp4"), "{}", calls[1]);
        assert_eq!(calls[2], "read _-intro.mp4");
    }

    #[tokio::test]
    async fn test_same_name_output_does_not_clobber_input() {
        let engine = Arc::new(FakeEngine::default());
        let (adapter, _store, _rx) = adapter(Arc::clone(&engine));
        let file = SourceFile::new("clip.mp4", None, vec![1u8]);

        adapter.transcode(&file, "clip", "mp4", Category::Video).await.unwrap();
        let calls = engine.calls.lock().clone();
        assert!(calls[1].ends_with(" out_clip.mp4"), "{}", calls[1]);
    }

    #[tokio::test]
    async fn test_exec_failure_still_cleans_up() {
        let engine = Arc::new(FakeEngine::default());
        engine.fail_exec.store(true, Ordering::SeqCst);
        let (adapter, store, _rx) = adapter(Arc::clone(&engine));
        let file = SourceFile::new("a.mov", None, vec![1u8]);

        let err = adapter.transcode(&file, "a", "webm", Category::Video).await.unwrap_err();
        assert!(matches!(err, ConvertError::Transcode(ref m) if m.contains("invalid data")));
        assert_eq!(store.live(), 0);

        let calls = engine.calls.lock().clone();
        assert_eq!(calls.iter().filter(|c| c.starts_with("delete")).count(), 2);
        assert!(!calls.iter().any(|c| c.starts_with("read")));
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_swallowed() {
        let engine = Arc::new(FakeEngine::default());
        engine.fail_delete.store(true, Ordering::SeqCst);
        let (adapter, store, _rx) = adapter(Arc::clone(&engine));
        let file = SourceFile::new("a.ogg", None, vec![1u8]);

        let out = adapter.transcode(&file, "a", "flac", Category::Audio).await.unwrap();
        assert!(store.resolve(&out.handle).is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Sanitised names only ever contain the engine-safe charset
        #[test]
        fn test_sanitized_charset(name in ".{0,48}") {
            let safe = sanitize_filename(&name);
            prop_assert!(safe.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
            prop_assert_eq!(sanitize_filename(&safe), safe.clone());
        }
    }
}
