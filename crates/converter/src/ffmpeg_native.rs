use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::ConverterConfig;
use crate::engine::TranscodeEngine;
use crate::events::EventBridge;

/// Stderr lines kept for the failure message
const ERROR_TAIL_LINES: usize = 12;

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    /// Check this version against a minimum major release
    pub fn meets_requirement(&self, min_major: u32) -> bool {
        self.major >= min_major
    }

    /// Parse version from FFmpeg version string
    /// Example: "ffmpeg version 6.1.1" -> FFmpegVersion { major: 6, minor: 1, patch: 1 }
    pub fn parse(version_str: &str) -> Result<Self> {
        // The token after "version", e.g. "6.1.1-3ubuntu5" or "n7.0"
        let tokens: Vec<&str> = version_str.split_whitespace().collect();
        let candidate = match tokens.iter().position(|t| *t == "version") {
            Some(i) => tokens.get(i + 1).copied(),
            None => tokens.first().copied(),
        };
        let version_part = candidate
            .map(|t| t.trim_start_matches('n'))
            .filter(|t| t.starts_with(|c: char| c.is_ascii_digit()))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        let numeric: String = version_part
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let parts: Vec<&str> = numeric.split('.').filter(|p| !p.is_empty()).collect();

        if parts.is_empty() {
            return Err(anyhow!("Invalid version format: {}", version_str));
        }

        let major = parts[0].parse::<u32>()
            .with_context(|| format!("Failed to parse major version from: {}", parts[0]))?;
        let minor = match parts.get(1) {
            Some(p) => p.parse::<u32>()
                .with_context(|| format!("Failed to parse minor version from: {}", p))?,
            None => 0,
        };
        let patch = match parts.get(2) {
            Some(p) => p.parse::<u32>()
                .with_context(|| format!("Failed to parse patch version from: {}", p))?,
            None => 0,
        };

        Ok(FFmpegVersion { major, minor, patch })
    }
}

/// Transcoding engine backed by a local ffmpeg binary.
///
/// A private temporary directory stands in for the engine's virtual
/// filesystem; it exists from a successful `load` until the engine is dropped.
pub struct FfmpegProcessEngine {
    ffmpeg_bin: PathBuf,
    min_major: u32,
    work_dir: Option<PathBuf>,
    root: Mutex<Option<Arc<TempDir>>>,
    version: Mutex<Option<FFmpegVersion>>,
    events: Mutex<Option<EventBridge>>,
}

impl FfmpegProcessEngine {
    pub fn new(config: &ConverterConfig) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            min_major: config.min_ffmpeg_major,
            work_dir: config.work_dir.clone(),
            root: Mutex::new(None),
            version: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    /// Version detected by the last successful load
    pub fn version(&self) -> Option<FFmpegVersion> {
        self.version.lock().clone()
    }

    fn bridge(&self) -> Option<EventBridge> {
        self.events.lock().clone()
    }

    fn root(&self) -> Result<Arc<TempDir>> {
        self.root
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("Engine is not loaded"))
    }

    /// Resolve a virtual filename inside the private directory
    fn vfs_path(&self, name: &str) -> Result<PathBuf> {
        validate_vfs_name(name)?;
        Ok(self.root()?.path().join(name))
    }

    /// Detect FFmpeg version
    async fn detect_version(ffmpeg_bin: &Path) -> Result<FFmpegVersion> {
        let output = Command::new(ffmpeg_bin)
            .arg("-version")
            .output()
            .await
            .with_context(|| format!(
                "Failed to execute FFmpeg at: {}. Ensure FFmpeg is installed and accessible.",
                ffmpeg_bin.display()
            ))?;

        if !output.status.success() {
            bail!("FFmpeg -version exited with {}", output.status.code().unwrap_or(-1));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout.lines().next().unwrap_or("");
        FFmpegVersion::parse(first_line)
    }
}

/// Virtual files are flat: no separators, no relative components
fn validate_vfs_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        bail!("Invalid virtual filename: {:?}", name);
    }
    Ok(())
}

#[async_trait]
impl TranscodeEngine for FfmpegProcessEngine {
    fn attach(&self, events: EventBridge) {
        *self.events.lock() = Some(events);
    }

    async fn load(&self) -> Result<()> {
        let version = Self::detect_version(&self.ffmpeg_bin).await?;

        if !version.meets_requirement(self.min_major) {
            bail!(
                "FFmpeg version {}.{}.{} does not meet requirement (>= {}.0)",
                version.major, version.minor, version.patch, self.min_major
            );
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("swk-vfs-");
        let dir = match &self.work_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .context("Failed to create engine work directory")?;

        info!("🎬 FFmpeg {}.{}.{} at {} (work dir {})",
              version.major, version.minor, version.patch,
              self.ffmpeg_bin.display(), dir.path().display());
        if let Some(bridge) = self.bridge() {
            bridge
                .engine_log(&format!("ffmpeg version {}.{}.{}", version.major, version.minor, version.patch))
                .await;
        }

        *self.version.lock() = Some(version);
        *self.root.lock() = Some(Arc::new(dir));
        Ok(())
    }

    async fn write_file(&self, name: &str, data: Bytes) -> Result<()> {
        let path = self.vfs_path(name)?;
        tokio::fs::write(&path, &data)
            .await
            .with_context(|| format!("Failed to write {}", name))
    }

    async fn exec(&self, args: &[String]) -> Result<()> {
        let root = self.root()?;
        let bridge = self.bridge();

        debug!("Executing FFmpeg: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        let mut child = Command::new(&self.ffmpeg_bin)
            .arg("-hide_banner")
            .arg("-nostdin")
            .arg("-y")
            .args(args)
            .current_dir(root.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!(
                "Failed to spawn FFmpeg process at: {}",
                self.ffmpeg_bin.display()
            ))?;

        let stderr = child.stderr.take()
            .ok_or_else(|| anyhow!("Failed to capture FFmpeg stderr"))?;

        // Progress and log lines stream out while the process runs
        let reader = tokio::spawn(async move {
            let mut tracker = ProgressTracker::default();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(ERROR_TAIL_LINES + 1);
            let mut stream = stderr;
            let mut chunk = [0u8; 4096];
            let mut pending: Vec<u8> = Vec::new();

            loop {
                let n = match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                for &byte in &chunk[..n] {
                    // Status lines are terminated by '\r', regular lines by '\n'
                    if byte == b'\n' || byte == b'\r' {
                        if !pending.is_empty() {
                            let line = String::from_utf8_lossy(&pending).into_owned();
                            pending.clear();
                            handle_line(&line, &mut tracker, &mut tail, bridge.as_ref()).await;
                        }
                    } else {
                        pending.push(byte);
                    }
                }
            }
            if !pending.is_empty() {
                let line = String::from_utf8_lossy(&pending).into_owned();
                handle_line(&line, &mut tracker, &mut tail, bridge.as_ref()).await;
            }
            tail
        });

        let status = child.wait().await.context("Failed to wait for FFmpeg process")?;
        let tail = reader.await.context("Failed to read FFmpeg stderr")?;

        if !status.success() {
            let detail = tail
                .iter()
                .rev()
                .find(|l| !l.contains("time="))
                .cloned()
                .unwrap_or_else(|| "no diagnostic output".to_string());
            debug!("FFmpeg stderr tail:\n{}", Vec::from(tail).join("\n"));
            bail!("FFmpeg exited with code {}: {}", status.code().unwrap_or(-1), detail);
        }

        Ok(())
    }

    async fn read_file(&self, name: &str) -> Result<Bytes> {
        let path = self.vfs_path(name)?;
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", name))?;
        Ok(Bytes::from(data))
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.vfs_path(name)?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to delete {}", name))
    }
}

async fn handle_line(line: &str, tracker: &mut ProgressTracker, tail: &mut VecDeque<String>, bridge: Option<&EventBridge>) {
    let ratio = tracker.observe(line);
    push_tail(tail, line);

    if let Some(bridge) = bridge {
        bridge.engine_log(line).await;
        if let Some(ratio) = ratio {
            bridge.progress(ratio).await;
        }
    }
}

/// Keep the last `ERROR_TAIL_LINES` lines
fn push_tail(tail: &mut VecDeque<String>, line: &str) {
    tail.push_back(line.to_string());
    while tail.len() > ERROR_TAIL_LINES {
        tail.pop_front();
    }
}

/// Derives a completion ratio from ffmpeg's `Duration:` header and `time=` status fields
#[derive(Debug, Default)]
struct ProgressTracker {
    duration_secs: Option<f64>,
}

impl ProgressTracker {
    fn observe(&mut self, line: &str) -> Option<f64> {
        if self.duration_secs.is_none() {
            if let Some(rest) = line.trim_start().strip_prefix("Duration:") {
                let stamp = rest.trim_start().split(',').next().unwrap_or("");
                self.duration_secs = parse_timestamp(stamp).filter(|d| *d > 0.0);
                return None;
            }
        }

        let duration = self.duration_secs?;
        let pos = line.find("time=")?;
        let stamp = line[pos + 5..].split_whitespace().next()?;
        let elapsed = parse_timestamp(stamp)?;
        Some(elapsed / duration)
    }
}

/// Parse `HH:MM:SS.ss` into seconds. Negative stamps (`-00:00:00.03`,
/// printed before the first frame) are rejected.
fn parse_timestamp(stamp: &str) -> Option<f64> {
    let stamp = stamp.trim();
    if stamp.starts_with('-') {
        return None;
    }
    let mut parts = stamp.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours.is_sign_negative() || minutes.is_sign_negative() || seconds.is_sign_negative() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
