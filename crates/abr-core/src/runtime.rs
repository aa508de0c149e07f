//! Engine runtime
//!
//! I/O runs on worker threads; state mutation does not. A request to apply
//! a state goes to the prefetch worker, which fetches the state text, the
//! VisAssets and the key data it references, and parks the result in a
//! single "latest wins" slot. The host loop drains that slot with
//! [`Runtime::poll`] and applies it to the engine under the engine lock.
//!
//! ```text
//! notifier socket ──┐
//!                   ├─> request channel ─> prefetch worker ─> UpdateSlot ─> poll() ─> Engine
//! RuntimeHandle ────┘
//! ```

use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use abr_io::{CancellationToken, RawDataset};
use serde_json::Value;
use uuid::Uuid;

use crate::data_manager::{fetch_raw_dataset, SharedLoader};
use crate::engine::Engine;
use crate::error::{AbrResult, StateError};
use crate::input::InputGenre;
use crate::render::RenderReport;
use crate::state::{ApplyOutcome, StateDocument, StateLoader};
use crate::visasset::VisAssetManager;

/// Notifier message asking engines to re-fetch the state
pub const STATE_TARGET: &str = "state";

/// How the worker should obtain a state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateRequest {
    /// State JSON text
    Text(String),
    /// Locator for the runtime's state loader
    Locator(String),
}

/// A fetched state with its key data already loaded
#[derive(Debug, Clone)]
pub struct PreparedUpdate {
    pub text: String,
    pub key_data: Vec<(String, Arc<RawDataset>)>,
}

/// Single-slot queue where a newer update replaces an unapplied one
#[derive(Debug, Default)]
pub struct UpdateSlot {
    pending: Mutex<Option<PreparedUpdate>>,
    ready: Condvar,
}

impl UpdateSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<PreparedUpdate>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Park an update, returning true when it replaced an unapplied one
    pub fn put(&self, update: PreparedUpdate) -> bool {
        let replaced = self.lock().replace(update).is_some();
        if replaced {
            tracing::debug!("Dropped superseded state update");
        }
        self.ready.notify_all();
        replaced
    }

    pub fn take(&self) -> Option<PreparedUpdate> {
        self.lock().take()
    }

    /// Wait up to `timeout` for an update
    pub fn wait(&self, timeout: Duration) -> Option<PreparedUpdate> {
        let guard = self.lock();
        let (mut guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |pending| pending.is_none())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.take()
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }
}

/// Cloneable handle for submitting state requests from any thread
#[derive(Clone)]
pub struct RuntimeHandle {
    requests: Sender<StateRequest>,
    cancel: CancellationToken,
}

impl RuntimeHandle {
    pub fn submit(&self, request: StateRequest) -> bool {
        self.requests.send(request).is_ok()
    }

    /// Ask workers and listeners to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Resources the prefetch worker needs, captured without the engine lock
struct Prefetcher {
    state_loader: Option<Arc<dyn StateLoader>>,
    loaders: Vec<SharedLoader>,
    visassets: Arc<VisAssetManager>,
    schema_version: String,
    engine: Arc<Mutex<Engine>>,
}

impl Prefetcher {
    fn state_text(&self, request: StateRequest) -> AbrResult<String> {
        match request {
            StateRequest::Text(text) => Ok(text),
            StateRequest::Locator(locator) => {
                let loader = self
                    .state_loader
                    .as_ref()
                    .ok_or_else(|| StateError::load(&locator, "no state loader configured"))?;
                Ok(loader.get_state(&locator)?)
            }
        }
    }

    fn prepare(&self, request: StateRequest, cancel: &CancellationToken) -> AbrResult<PreparedUpdate> {
        let text = self.state_text(request)?;
        // Invalid states are rejected again, with logging, when applied
        let state = match StateDocument::parse(&text, &self.schema_version) {
            Ok(state) => state,
            Err(_) => return Ok(PreparedUpdate { text, key_data: Vec::new() }),
        };
        let document = &state.document;

        let mut key_data_paths = BTreeSet::new();
        let mut visasset_ids = BTreeSet::new();
        for impression in document.impressions.values() {
            for raw in impression.input_values.values() {
                match raw.input_genre {
                    InputGenre::KeyData => {
                        key_data_paths.insert(raw.input_value.clone());
                    }
                    InputGenre::VisAsset => {
                        if let Some(uuid) = raw.uuid() {
                            visasset_ids.insert(uuid);
                        }
                    }
                    _ => {}
                }
            }
        }
        for gradient in document.vis_asset_gradients.values() {
            visasset_ids.extend(gradient.vis_assets.iter().copied());
        }

        for uuid in visasset_ids {
            if cancel.is_cancelled() {
                break;
            }
            if !document.local_vis_assets.contains_key(&uuid) && !self.visassets.is_cached(&uuid) {
                self.fetch_visasset(uuid);
            }
        }

        let resident: BTreeSet<String> = {
            let engine = lock_engine(&self.engine);
            key_data_paths
                .iter()
                .filter(|p| engine.data().is_resident(p))
                .cloned()
                .collect()
        };
        let mut key_data = Vec::new();
        for path in key_data_paths.difference(&resident) {
            if cancel.is_cancelled() {
                break;
            }
            match fetch_raw_dataset(&self.loaders, path) {
                Ok(raw) => key_data.push((path.clone(), Arc::new(raw))),
                Err(e) => tracing::warn!("Could not prefetch {}: {}", path, e),
            }
        }
        Ok(PreparedUpdate { text, key_data })
    }

    fn fetch_visasset(&self, uuid: Uuid) {
        if self.visassets.load(uuid, false).is_none() {
            tracing::warn!("Could not prefetch VisAsset {}", uuid);
        }
    }
}

fn lock_engine(engine: &Mutex<Engine>) -> MutexGuard<'_, Engine> {
    engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn prefetch_loop(prefetcher: Prefetcher, requests: Receiver<StateRequest>, slot: Arc<UpdateSlot>, cancel: CancellationToken) {
    tracing::debug!("Prefetch worker started");
    while !cancel.is_cancelled() {
        let mut request = match requests.recv_timeout(Duration::from_millis(100)) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        // Only the newest queued request matters
        while let Ok(newer) = requests.try_recv() {
            request = newer;
        }
        match prefetcher.prepare(request, &cancel) {
            Ok(update) if !cancel.is_cancelled() => {
                slot.put(update);
            }
            Ok(_) => break,
            Err(e) => tracing::error!("State fetch failed: {}", e),
        }
    }
    tracing::debug!("Prefetch worker stopped");
}

/// Host-side driver: owns the engine lock and the prefetch worker
pub struct Runtime {
    engine: Arc<Mutex<Engine>>,
    slot: Arc<UpdateSlot>,
    handle: RuntimeHandle,
    worker: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Start the prefetch worker for an engine
    ///
    /// `state_loader` resolves [`StateRequest::Locator`] requests.
    pub fn start(engine: Engine, state_loader: Option<Arc<dyn StateLoader>>) -> Self {
        let prefetcher_parts = (
            engine.data().loaders().to_vec(),
            Arc::clone(engine.visassets()),
            engine.config().schema_version.clone(),
        );
        let engine = Arc::new(Mutex::new(engine));
        let slot = Arc::new(UpdateSlot::new());
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel();

        let prefetcher = Prefetcher {
            state_loader,
            loaders: prefetcher_parts.0,
            visassets: prefetcher_parts.1,
            schema_version: prefetcher_parts.2,
            engine: Arc::clone(&engine),
        };
        let worker_slot = Arc::clone(&slot);
        let worker_cancel = cancel.clone();
        let worker = std::thread::Builder::new()
            .name("abr-prefetch".to_string())
            .spawn(move || prefetch_loop(prefetcher, rx, worker_slot, worker_cancel));
        let worker = match worker {
            Ok(worker) => Some(worker),
            Err(e) => {
                tracing::error!("Could not start prefetch worker: {}", e);
                None
            }
        };

        Self {
            engine,
            slot,
            handle: RuntimeHandle { requests: tx, cancel },
            worker,
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// The engine behind its coarse lock
    pub fn engine(&self) -> &Arc<Mutex<Engine>> {
        &self.engine
    }

    pub fn submit(&self, request: StateRequest) -> bool {
        self.handle.submit(request)
    }

    pub fn has_pending(&self) -> bool {
        self.slot.is_pending()
    }

    /// Apply the pending update, if any, without blocking on I/O
    ///
    /// Renders afterwards when `render_on_apply` is set; the report is
    /// `None` otherwise.
    pub fn poll(&self) -> Option<AbrResult<(ApplyOutcome, Option<RenderReport>)>> {
        self.slot.take().map(|update| self.apply(update))
    }

    /// Block up to `timeout` for an update and apply it
    pub fn wait_and_apply(&self, timeout: Duration) -> Option<AbrResult<(ApplyOutcome, Option<RenderReport>)>> {
        self.slot.wait(timeout).map(|update| self.apply(update))
    }

    fn apply(&self, update: PreparedUpdate) -> AbrResult<(ApplyOutcome, Option<RenderReport>)> {
        let mut engine = lock_engine(&self.engine);
        for (path, raw) in update.key_data {
            if !engine.data().is_resident(&path) {
                if let Err(e) = engine.import_raw_dataset(&path, raw) {
                    tracing::warn!("Could not import {}: {}", path, e);
                }
            }
        }
        let outcome = engine.apply_state(&update.text)?;
        let report = engine.config().render_on_apply.then(|| engine.render());
        Ok((outcome, report))
    }

    /// Run a render pass now
    pub fn render(&self) -> RenderReport {
        lock_engine(&self.engine).render()
    }

    /// Stop the worker and hand back the engine lock
    pub fn shutdown(mut self) -> Arc<Mutex<Engine>> {
        self.handle.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Prefetch worker panicked");
            }
        }
        Arc::clone(&self.engine)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

/// Listen for notifier messages and request a fetch of `locator` on each
/// `{"target": "state"}` line
///
/// Runs until the connection closes or the handle is cancelled.
pub fn spawn_notifier_listener(
    stream: TcpStream,
    handle: RuntimeHandle,
    locator: String,
) -> std::io::Result<JoinHandle<()>> {
    stream.set_read_timeout(Some(Duration::from_millis(250)))?;
    std::thread::Builder::new()
        .name("abr-notifier".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            while !handle.is_cancelled() {
                match reader.read_line(&mut line) {
                    Ok(0) => {
                        tracing::info!("Notifier connection closed");
                        break;
                    }
                    Ok(_) => {
                        if is_state_notification(&line) && !handle.submit(StateRequest::Locator(locator.clone())) {
                            break;
                        }
                        line.clear();
                    }
                    Err(e)
                        if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) =>
                    {
                        // Partial lines stay buffered until the rest arrives
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Notifier read failed: {}", e);
                        break;
                    }
                }
            }
        })
}

/// Whether a notifier line asks for a state re-fetch
pub fn is_state_notification(line: &str) -> bool {
    match serde_json::from_str::<Value>(line.trim()) {
        Ok(message) => message.get("target").and_then(Value::as_str) == Some(STATE_TARGET),
        Err(e) => {
            if !line.trim().is_empty() {
                tracing::warn!("Ignoring malformed notifier message: {}", e);
            }
            false
        }
    }
}

/// Queue of outbound messages written by a dedicated thread
///
/// Messages are `{"target": <target>, ...payload}` lines.
#[derive(Clone)]
pub struct OutboundSender {
    tx: Sender<String>,
}

impl OutboundSender {
    /// Spawn the writer thread for any line sink
    pub fn spawn<W: Write + Send + 'static>(mut sink: W) -> std::io::Result<(Self, JoinHandle<()>)> {
        let (tx, rx) = mpsc::channel::<String>();
        let writer = std::thread::Builder::new()
            .name("abr-outbound".to_string())
            .spawn(move || {
                for line in rx {
                    if let Err(e) = sink.write_all(line.as_bytes()).and_then(|_| sink.flush()) {
                        tracing::warn!("Outbound write failed: {}", e);
                        break;
                    }
                }
            })?;
        Ok((Self { tx }, writer))
    }

    /// Queue a message; returns false once the writer has stopped
    pub fn send(&self, target: &str, payload: Value) -> bool {
        let mut message = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        message.insert("target".to_string(), Value::String(target.to_string()));
        let mut line = Value::Object(message).to_string();
        line.push('\n');
        self.tx.send(line).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::data_manager::DataManager;
    use crate::render::HeadlessHost;
    use crate::state::ResourceStateLoader;

    fn engine(media: &tempfile::TempDir) -> Engine {
        Engine::with_parts(
            EngineConfig::with_media_root(media.path()),
            DataManager::default(),
            Arc::new(VisAssetManager::new()),
            Box::new(HeadlessHost::new()),
        )
    }

    fn update(text: &str) -> PreparedUpdate {
        PreparedUpdate {
            text: text.to_string(),
            key_data: Vec::new(),
        }
    }

    #[test]
    fn test_slot_latest_wins() {
        let slot = UpdateSlot::new();
        assert!(!slot.put(update("a")));
        assert!(slot.put(update("b")));
        assert_eq!(slot.take().map(|u| u.text), Some("b".to_string()));
        assert!(slot.take().is_none());
        assert!(slot.wait(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_state_notification() {
        assert!(is_state_notification("{\"target\":\"state\"}\n"));
        assert!(!is_state_notification("{\"target\":\"thumbnail\"}"));
        assert!(!is_state_notification("garbage"));
    }

    #[test]
    fn test_runtime_applies_submitted_state() {
        let resources = Arc::new(ResourceStateLoader::new());
        resources.insert("demo", r#"{"version": "0.2.0", "name": "demo"}"#);
        let media = tempfile::tempdir().unwrap();
        let runtime = Runtime::start(engine(&media), Some(resources as Arc<dyn StateLoader>));
        assert!(runtime.submit(StateRequest::Locator("demo".to_string())));
        let (outcome, report) = runtime.wait_and_apply(Duration::from_secs(5)).unwrap().unwrap();
        assert!(outcome.processed.is_empty());
        assert!(report.is_some());
        let engine = runtime.shutdown();
        let engine = lock_engine(&engine);
        assert_eq!(
            engine.current_state().and_then(|s| s.get("name")).and_then(Value::as_str),
            Some("demo")
        );
    }

    #[test]
    fn test_outbound_sender_writes_lines() {
        let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let (sender, writer) = OutboundSender::spawn(Shared(Arc::clone(&buffer))).unwrap();
        assert!(sender.send("thumbnail", serde_json::json!({"data": "abc"})));
        drop(sender);
        writer.join().unwrap();
        let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let message: Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(message["target"], "thumbnail");
        assert_eq!(message["data"], "abc");
    }
}
