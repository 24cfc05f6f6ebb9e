//! Queue orchestrator: the ordered list of queued files, their conversion
//! state machine and the lifecycle of the artifacts they produce.
//!
//! Items move `pending -> converting -> done | error`, and `error` items may
//! be converted again. Every mutating operation takes `&mut self`, so at most
//! one item is ever `converting`. `convert_all` dispatches strictly in queue
//! order and waits for each item to finish: the transcoding engine is a single
//! shared session and cannot serve two executions at once.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::artifact::{ArtifactHandle, ArtifactStore};
use crate::config::ConverterConfig;
use crate::console::{Console, LogEntry};
use crate::download::DownloadSink;
use crate::engine::{EngineAdapter, SessionState, TranscodeEngine};
use crate::error::{ConvertError, ConvertResult};
use crate::events::{ConversionEvent, EventBridge};
use crate::ffmpeg_native::FfmpegProcessEngine;
use crate::formats::{default_format, detect_category, format_file_size, format_label, formats_for, mime_type, Category};
use crate::raster::{ImageRaster, RasterAdapter, RasterBackend};
use crate::source::{base_name_of, SourceFile};

/// Identifier assigned at enqueue time, never reused within a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Pending,
    Converting,
    Done,
    Error,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemState::Pending => "pending",
            ItemState::Converting => "converting",
            ItemState::Done => "done",
            ItemState::Error => "error",
        };
        f.write_str(s)
    }
}

/// One queued file
#[derive(Debug, Clone)]
pub struct QueueItem {
    id: ItemId,
    source: SourceFile,
    display_name: String,
    /// Base name chosen by an explicit rename; outputs are named after it
    renamed_base: Option<String>,
    size_label: String,
    category: Category,
    available_formats: &'static [&'static str],
    selected_format: Option<&'static str>,
    state: ItemState,
    progress: u8,
    artifact: Option<ArtifactHandle>,
    output_name: Option<String>,
    error: Option<String>,
}

impl QueueItem {
    fn new(id: ItemId, source: SourceFile) -> Self {
        let category = detect_category(&source);
        Self {
            id,
            display_name: source.name.clone(),
            renamed_base: None,
            size_label: format_file_size(source.size()),
            category,
            available_formats: formats_for(category),
            selected_format: default_format(category),
            state: ItemState::Pending,
            progress: 0,
            artifact: None,
            output_name: None,
            error: None,
            source,
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn size_label(&self) -> &str {
        &self.size_label
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn available_formats(&self) -> &'static [&'static str] {
        self.available_formats
    }

    pub fn selected_format(&self) -> Option<&'static str> {
        self.selected_format
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn artifact(&self) -> Option<&ArtifactHandle> {
        self.artifact.as_ref()
    }

    pub fn output_name(&self) -> Option<&str> {
        self.output_name.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Pending or failed items of a known category
    pub fn is_convertible(&self) -> bool {
        self.category != Category::Unknown && matches!(self.state, ItemState::Pending | ItemState::Error)
    }

    /// Base of produced files: the renamed base if any, else the display name without its extension
    fn output_base(&self) -> &str {
        self.renamed_base
            .as_deref()
            .unwrap_or_else(|| base_name_of(&self.display_name))
    }

    fn output_name_for(&self, format: &str) -> String {
        format!("{}.{}", self.output_base(), format)
    }

    fn start(&mut self) {
        self.state = ItemState::Converting;
        self.progress = 0;
        self.error = None;
    }

    fn complete(&mut self, handle: ArtifactHandle, output_name: String) {
        self.state = ItemState::Done;
        self.progress = 100;
        self.artifact = Some(handle);
        self.output_name = Some(output_name);
    }

    fn fail(&mut self, error: String) {
        self.state = ItemState::Error;
        self.progress = 0;
        self.output_name = None;
        self.error = Some(error);
    }
}

/// Items per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub converting: usize,
    pub done: usize,
    pub error: usize,
    /// Items whose category could not be detected, whatever their state
    pub unknown: usize,
}

/// Outcome of one `convert_all` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub converted: usize,
    pub failed: usize,
}

/// What a finished conversion hands back before it is attached to its item
struct Converted {
    handle: ArtifactHandle,
    size: usize,
}

pub struct Queue {
    items: Vec<QueueItem>,
    next_id: u64,
    /// Item whose progress events are being applied
    active: Option<ItemId>,
    console: Console,
    artifacts: ArtifactStore,
    engine: Arc<EngineAdapter>,
    raster: RasterAdapter,
    bridge: EventBridge,
    events: mpsc::Receiver<ConversionEvent>,
    download_stagger: Duration,
}

impl Queue {
    pub fn new(engine: Arc<dyn TranscodeEngine>, raster: Arc<dyn RasterBackend>, config: &ConverterConfig) -> Self {
        let artifacts = ArtifactStore::new();
        let (bridge, events) = EventBridge::channel(config.event_capacity);
        Self {
            items: Vec::new(),
            next_id: 0,
            active: None,
            console: Console::new(),
            engine: Arc::new(EngineAdapter::new(engine, artifacts.clone(), bridge.clone())),
            raster: RasterAdapter::new(raster, artifacts.clone()),
            artifacts,
            bridge,
            events,
            download_stagger: Duration::from_millis(config.download_stagger_ms),
        }
    }

    /// Queue backed by the local ffmpeg binary and the `image` crate
    pub fn native(config: &ConverterConfig) -> Self {
        Self::new(Arc::new(FfmpegProcessEngine::new(config)), Arc::new(ImageRaster), config)
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn get(&self, id: ItemId) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    fn get_mut(&mut self, id: ItemId) -> ConvertResult<&mut QueueItem> {
        self.items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(ConvertError::ItemNotFound(id))
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for item in &self.items {
            match item.state {
                ItemState::Pending => counts.pending += 1,
                ItemState::Converting => counts.converting += 1,
                ItemState::Done => counts.done += 1,
                ItemState::Error => counts.error += 1,
            }
            if item.category == Category::Unknown {
                counts.unknown += 1;
            }
        }
        counts
    }

    pub fn is_busy(&self) -> bool {
        self.items.iter().any(|item| item.state == ItemState::Converting)
    }

    pub fn engine_state(&self) -> SessionState {
        self.engine.state()
    }

    pub fn console(&self) -> &[LogEntry] {
        self.console.entries()
    }

    pub fn clear_console(&mut self) {
        self.console.clear();
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Append files in order, each classified and given its default format
    pub fn enqueue(&mut self, files: impl IntoIterator<Item = SourceFile>) -> Vec<ItemId> {
        let mut ids = Vec::new();
        for file in files {
            self.next_id += 1;
            let item = QueueItem::new(ItemId(self.next_id), file);

            match item.category {
                Category::Unknown => self.console.warning(
                    ConvertError::DetectionUnknown { name: item.display_name.clone() }.to_string(),
                ),
                category => self.console.info(format!(
                    "Added {} ({}, {})",
                    item.display_name, category, item.size_label
                )),
            }

            ids.push(item.id);
            self.items.push(item);
        }
        ids
    }

    /// Pick the target format. Returns `Ok(false)` while the item is
    /// converting or done; unknown formats leave the selection unchanged.
    pub fn set_format(&mut self, id: ItemId, format: &str) -> ConvertResult<bool> {
        let item = self.get_mut(id)?;
        if matches!(item.state, ItemState::Converting | ItemState::Done) {
            return Ok(false);
        }

        let chosen = item
            .available_formats
            .iter()
            .copied()
            .find(|f| *f == format)
            .ok_or_else(|| ConvertError::UnsupportedFormat {
                format: format.to_string(),
                category: item.category,
            })?;

        item.selected_format = Some(chosen);
        Ok(true)
    }

    /// Rename an item, keeping its original extension for display. The
    /// output name is recomputed from the current format.
    pub fn rename(&mut self, id: ItemId, new_base: &str) -> ConvertResult<()> {
        let new_base = new_base.trim();
        if new_base.is_empty() || new_base.contains(['/', '\\']) {
            return Err(ConvertError::InvalidName(new_base.to_string()));
        }

        let item = self.get_mut(id)?;
        let original = item.source.name.as_str();
        item.display_name = match original.rfind('.') {
            Some(pos) if pos > 0 => format!("{}{}", new_base, &original[pos..]),
            _ => new_base.to_string(),
        };
        item.renamed_base = Some(new_base.to_string());
        let output_name = item.selected_format.map(|f| item.output_name_for(f));
        item.output_name = output_name;
        Ok(())
    }

    /// Drop an item, releasing its artifact first
    pub fn remove(&mut self, id: ItemId) -> ConvertResult<QueueItem> {
        let index = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or(ConvertError::ItemNotFound(id))?;
        if self.items[index].state == ItemState::Converting {
            return Err(ConvertError::InvalidTransition { id, state: ItemState::Converting });
        }

        let mut item = self.items.remove(index);
        self.release(&mut item);
        Ok(item)
    }

    /// Release every artifact, then empty the queue
    pub fn clear_all(&mut self) {
        let mut items = std::mem::take(&mut self.items);
        for item in &mut items {
            self.release(item);
        }
        debug!("Cleared {} queued item(s)", items.len());
    }

    /// Put a finished or failed item back to `pending`, releasing its artifact
    pub fn requeue(&mut self, id: ItemId) -> ConvertResult<()> {
        let item = self.get_mut(id)?;
        if !matches!(item.state, ItemState::Done | ItemState::Error) {
            return Err(ConvertError::InvalidTransition { id, state: item.state });
        }

        let handle = item.artifact.take();
        item.state = ItemState::Pending;
        item.progress = 0;
        item.output_name = None;
        item.error = None;

        if let Some(handle) = handle {
            self.artifacts.revoke(&handle);
        }
        Ok(())
    }

    fn release(&self, item: &mut QueueItem) {
        if let Some(handle) = item.artifact.take() {
            self.artifacts.revoke(&handle);
        }
    }

    /// Load the transcoding engine ahead of the first conversion
    pub async fn load_engine(&mut self) -> ConvertResult<()> {
        let engine = Arc::clone(&self.engine);
        self.drive(async move { engine.ensure_loaded().await }).await
    }

    /// Convert one item and return the state it ends in.
    ///
    /// A no-op for an item that is already converting. Done items must be
    /// requeued first. Conversion failures land in the item's `error` state
    /// and are not returned as `Err`.
    pub async fn convert_one(&mut self, id: ItemId) -> ConvertResult<ItemState> {
        let item = self.get_mut(id)?;
        match item.state {
            ItemState::Converting => return Ok(ItemState::Converting),
            ItemState::Done => return Err(ConvertError::InvalidTransition { id, state: ItemState::Done }),
            ItemState::Pending | ItemState::Error => {}
        }
        let format = match (item.category, item.selected_format) {
            (Category::Unknown, _) | (_, None) => {
                return Err(ConvertError::DetectionUnknown { name: item.display_name.clone() });
            }
            (_, Some(format)) => format,
        };

        let stale = item.artifact.take();
        item.start();
        let category = item.category;
        let file = item.source.clone();
        let display_name = item.display_name.clone();
        let output_base = item.output_base().to_string();

        if let Some(handle) = stale {
            self.artifacts.revoke(&handle);
        }

        self.console.info(format!("Converting {} → {}", display_name, format_label(format)));
        if category.uses_engine() {
            self.console.info("Using transcoding engine");
        } else {
            self.console.info("Using native image encoder");
        }

        let job = dispatch(
            Arc::clone(&self.engine),
            self.raster.clone(),
            self.bridge.clone(),
            file,
            output_base,
            format,
            category,
        );
        self.active = Some(id);
        let outcome = self.drive(job).await;
        self.active = None;

        let item = self.get_mut(id)?;
        match outcome {
            Ok(converted) => {
                let output_name = item.output_name_for(format);
                item.complete(converted.handle, output_name.clone());
                info!("✅ {} converted ({} bytes)", display_name, converted.size);
                self.console.success(format!("Conversion complete: {}", output_name));
                Ok(ItemState::Done)
            }
            Err(e) => {
                let message = e.to_string();
                item.fail(message.clone());
                self.console.error(format!("{}: {}", display_name, message));
                Ok(ItemState::Error)
            }
        }
    }

    /// Convert every pending or failed item, one after another in queue order.
    /// A failure moves on to the next item.
    pub async fn convert_all(&mut self) -> BatchSummary {
        let ids: Vec<ItemId> = self
            .items
            .iter()
            .filter(|item| item.is_convertible())
            .map(|item| item.id)
            .collect();

        let mut summary = BatchSummary::default();
        if ids.is_empty() {
            debug!("Nothing to convert");
            return summary;
        }

        info!("🚀 Converting {} item(s)", ids.len());
        for id in ids {
            match self.convert_one(id).await {
                Ok(ItemState::Done) => summary.converted += 1,
                Ok(ItemState::Error) => summary.failed += 1,
                Ok(_) => {}
                // Removed or otherwise changed since the batch was collected
                Err(e) => warn!("Skipping item {}: {}", id, e),
            }
        }

        info!("Batch finished: {} converted, {} failed", summary.converted, summary.failed);
        summary
    }

    /// Hand every live artifact to `sink`, pausing between deliveries.
    /// Returns how many were delivered.
    pub async fn download_all(&mut self, sink: &dyn DownloadSink) -> usize {
        let ready: Vec<(ArtifactHandle, String)> = self
            .items
            .iter()
            .filter(|item| item.state == ItemState::Done)
            .filter_map(|item| Some((item.artifact.clone()?, item.output_name.clone()?)))
            .collect();

        let mut delivered = 0;
        for (index, (handle, name)) in ready.iter().enumerate() {
            if index > 0 && !self.download_stagger.is_zero() {
                tokio::time::sleep(self.download_stagger).await;
            }

            let Some(artifact) = self.artifacts.resolve(handle) else {
                warn!("Artifact for {} was already released", name);
                continue;
            };
            match sink.deliver(handle, &artifact, name).await {
                Ok(()) => delivered += 1,
                Err(e) => self.console.error(format!("Download of {} failed: {:#}", name, e)),
            }
        }
        delivered
    }

    /// Await `fut` while applying progress and log events as they arrive
    async fn drive<T>(&mut self, fut: impl Future<Output = T>) -> T {
        tokio::pin!(fut);
        let out = loop {
            tokio::select! {
                biased;
                out = &mut fut => break out,
                Some(event) = self.events.recv() => self.apply(event),
            }
        };

        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
        }
        out
    }

    fn apply(&mut self, event: ConversionEvent) {
        match event {
            ConversionEvent::Progress(pct) => {
                if let Some(id) = self.active {
                    if let Some(item) = self.items.iter_mut().find(|item| item.id == id) {
                        if item.state == ItemState::Converting {
                            item.progress = pct;
                        }
                    }
                }
            }
            ConversionEvent::Log(kind, message) => self.console.push(kind, message),
        }
    }
}

/// Run one conversion on the backend its category calls for. Owns
/// everything it needs, so the queue stays free to apply events meanwhile.
async fn dispatch(
    engine: Arc<EngineAdapter>,
    raster: RasterAdapter,
    bridge: EventBridge,
    file: SourceFile,
    output_base: String,
    format: &'static str,
    category: Category,
) -> ConvertResult<Converted> {
    if category.uses_engine() {
        let out = engine.transcode(&file, &output_base, format, category).await?;
        return Ok(Converted { handle: out.handle, size: out.size });
    }

    let out = raster
        .convert_image(&file, format, move |pct| bridge.blocking_percent(pct))
        .await?;
    if out.mime != mime_type(format) {
        debug!("{} exported as {}", format_label(format), out.mime);
    }
    Ok(Converted { handle: out.handle, size: out.size })
}
