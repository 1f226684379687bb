//! Download controller
//!
//! A single task owns the [`DownloadSession`] and is the only writer of it.
//! Commands from the UI, transfer events from the transport and reachability
//! changes from the network monitor all arrive as messages; observers read
//! consistent [`SessionSnapshot`]s from a watch channel.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::error::DownloadError;
use super::session::{DownloadSession, Phase, SessionSnapshot};
use super::throttle::ProgressThrottler;
use super::transport::{
    run_transfer, TransferEvent, TransferFailure, TransferMessage, TransferRequest, TransferSink,
    Transport,
};
use crate::storage::ModelStore;
use crate::system::{DiskSpace, PathStatus};
use crate::types::TransferConfig;

/// Collaborators the controller is built from
pub struct ManagerDeps {
    pub store: ModelStore,
    pub transport: Arc<dyn Transport>,
    pub disk: Arc<dyn DiskSpace>,
    pub network: watch::Receiver<PathStatus>,
    pub config: TransferConfig,
    /// Selection remembered from a previous run; re-checked against disk
    pub initial_selection: Option<String>,
}

enum Command {
    Start {
        model_id: String,
        reply: oneshot::Sender<Result<(), DownloadError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Select {
        model_id: String,
        reply: oneshot::Sender<Result<(), DownloadError>>,
    },
    Delete {
        model_id: String,
        reply: oneshot::Sender<Result<(), DownloadError>>,
    },
    Refresh {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Handle to the download controller
///
/// Cheap to clone; every clone talks to the same controller task.
#[derive(Clone)]
pub struct DownloadManager {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl DownloadManager {
    /// Start the controller task on the current tokio runtime.
    pub fn spawn(deps: ManagerDeps) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut controller = Controller::new(deps, events_tx);
        controller.reconcile();
        let (publisher, snapshots) = watch::channel(controller.session.snapshot());
        controller.publisher = Some(publisher);

        tokio::spawn(controller.run(commands_rx, events_rx));

        Self {
            commands: commands_tx,
            snapshots,
        }
    }

    /// Begin downloading `model_id`, replacing any transfer in flight.
    ///
    /// Returns once the attempt has started; completion is observed through
    /// [`DownloadManager::subscribe`].
    pub async fn start_download(&self, model_id: &str) -> Result<(), DownloadError> {
        let model_id = model_id.to_string();
        self.request(|reply| Command::Start { model_id, reply })
            .await?
    }

    /// Abort the active transfer without surfacing an error.
    pub async fn stop_download(&self) -> Result<(), DownloadError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Make a downloaded model the active one.
    pub async fn select_model(&self, model_id: &str) -> Result<(), DownloadError> {
        let model_id = model_id.to_string();
        self.request(|reply| Command::Select { model_id, reply })
            .await?
    }

    /// Delete a model's file and re-resolve the selection if needed.
    pub async fn delete_model(&self, model_id: &str) -> Result<(), DownloadError> {
        let model_id = model_id.to_string();
        self.request(|reply| Command::Delete { model_id, reply })
            .await?
    }

    /// Re-read the models directory and return the reconciled state.
    pub async fn refresh_status(&self) -> Result<SessionSnapshot, DownloadError> {
        self.request(|reply| Command::Refresh { reply }).await
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, DownloadError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| DownloadError::ManagerClosed)?;
        response.await.map_err(|_| DownloadError::ManagerClosed)
    }
}

struct Attempt {
    generation: u64,
    model_id: String,
    cancel: CancellationToken,
}

struct Controller {
    store: ModelStore,
    transport: Arc<dyn Transport>,
    disk: Arc<dyn DiskSpace>,
    network: watch::Receiver<PathStatus>,
    /// Last status handled from the monitor
    path_status: PathStatus,
    throttler: ProgressThrottler,
    session: DownloadSession,
    attempt: Option<Attempt>,
    generation: u64,
    events: mpsc::UnboundedSender<TransferMessage>,
    publisher: Option<watch::Sender<SessionSnapshot>>,
}

impl Controller {
    fn new(deps: ManagerDeps, events: mpsc::UnboundedSender<TransferMessage>) -> Self {
        let path_status = *deps.network.borrow();
        Self {
            store: deps.store,
            transport: deps.transport,
            disk: deps.disk,
            path_status,
            network: deps.network,
            throttler: ProgressThrottler::new(deps.config.progress_interval),
            session: DownloadSession::new(deps.initial_selection),
            attempt: None,
            generation: 0,
            events,
            publisher: None,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransferMessage>,
    ) {
        let mut network = self.network.clone();
        let mut network_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(message) = events.recv() => self.handle_transfer(message).await,
                changed = network.changed(), if network_open => {
                    if changed.is_err() {
                        tracing::debug!("Network monitor gone; no further path updates");
                        network_open = false;
                        continue;
                    }
                    let status = *network.borrow_and_update();
                    self.handle_path_status(status);
                }
            }
        }

        if let Some(attempt) = self.attempt.take() {
            attempt.cancel.cancel();
        }
        tracing::debug!("Download controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { model_id, reply } => {
                let _ = reply.send(self.start_download(&model_id));
            }
            Command::Stop { reply } => {
                self.stop_download();
                let _ = reply.send(());
            }
            Command::Select { model_id, reply } => {
                let _ = reply.send(self.select_model(&model_id));
            }
            Command::Delete { model_id, reply } => {
                let _ = reply.send(self.delete_model(&model_id).await);
            }
            Command::Refresh { reply } => {
                self.reconcile();
                self.publish();
                let _ = reply.send(self.session.snapshot());
            }
        }
    }

    fn start_download(&mut self, model_id: &str) -> Result<(), DownloadError> {
        if *self.network.borrow() == PathStatus::Unsatisfied {
            tracing::warn!("Not starting {}: no usable network path", model_id);
            self.session.last_error = Some(DownloadError::NetworkUnavailable);
            self.publish();
            return Err(DownloadError::NetworkUnavailable);
        }

        let url = self.store.descriptor(model_id)?.source_url()?;
        let generation = self.generation + 1;
        let staging_path = self.store.staging_path(model_id, generation)?;
        self.store.ensure_directory()?;

        if let Some(previous) = self.attempt.take() {
            tracing::info!(
                "Abandoning download of {} (attempt {})",
                previous.model_id,
                previous.generation
            );
            previous.cancel.cancel();
        }

        self.generation = generation;
        self.session.begin(model_id, generation);
        self.throttler.reset();

        let cancel = CancellationToken::new();
        self.attempt = Some(Attempt {
            generation,
            model_id: model_id.to_string(),
            cancel: cancel.clone(),
        });

        tracing::info!("Starting download of {} (attempt {})", model_id, generation);
        tokio::spawn(run_transfer(
            Arc::clone(&self.transport),
            TransferRequest {
                model_id: model_id.to_string(),
                url,
                staging_path,
            },
            TransferSink::new(generation, self.events.clone()),
            cancel,
        ));

        self.publish();
        Ok(())
    }

    fn stop_download(&mut self) {
        let Some(attempt) = self.attempt.take() else {
            tracing::debug!("Stop requested with no download in flight");
            return;
        };
        tracing::info!("Download of {} stopped by user", attempt.model_id);
        attempt.cancel.cancel();
        self.session.abandon();
        self.publish();
    }

    fn select_model(&mut self, model_id: &str) -> Result<(), DownloadError> {
        self.store.descriptor(model_id)?;
        if !self.store.is_downloaded(model_id) {
            return Err(DownloadError::NotDownloaded(model_id.to_string()));
        }
        tracing::info!("Selected model {}", model_id);
        self.session.selected_model_id = Some(model_id.to_string());
        self.settle_phase();
        self.publish();
        Ok(())
    }

    async fn delete_model(&mut self, model_id: &str) -> Result<(), DownloadError> {
        self.store.descriptor(model_id)?;

        let store = self.store.clone();
        let id = model_id.to_string();
        tokio::task::spawn_blocking(move || store.remove(&id))
            .await
            .map_err(|e| DownloadError::PlacementError(e.to_string()))??;

        if self.session.selected_model_id.as_deref() == Some(model_id) {
            self.session.selected_model_id = None;
        }
        self.reconcile();
        self.publish();
        Ok(())
    }

    async fn handle_transfer(&mut self, message: TransferMessage) {
        let current = self
            .attempt
            .as_ref()
            .filter(|attempt| attempt.generation == message.generation)
            .map(|attempt| attempt.model_id.clone());

        let Some(model_id) = current else {
            tracing::debug!(
                "Dropping stale transfer event from attempt {}",
                message.generation
            );
            if let TransferEvent::Completed(path) = message.event {
                discard(path).await;
            }
            return;
        };

        match message.event {
            TransferEvent::Progress {
                bytes_written,
                bytes_expected,
            } => self.on_progress(bytes_written, bytes_expected),
            TransferEvent::Completed(path) => self.on_completed(model_id, path).await,
            TransferEvent::Failed(failure) => self.on_failed(failure),
        }
    }

    fn on_progress(&mut self, bytes_written: u64, bytes_expected: u64) {
        if !self.session.preflight_checked {
            self.session.preflight_checked = true;
            if let Err(error) = self.preflight(bytes_expected) {
                self.fail_attempt(error);
                return;
            }
        }

        if let Some(sample) = self.throttler.offer(bytes_written, bytes_expected) {
            tracing::debug!(
                "Progress {:.1}% ({}/{} bytes)",
                sample.fraction * 100.0,
                sample.bytes_written,
                sample.bytes_expected
            );
            self.session.apply(sample);
            self.publish();
        }
    }

    /// Free-space check against the announced size, once per attempt.
    fn preflight(&self, required: u64) -> Result<(), DownloadError> {
        if required == 0 {
            return Ok(());
        }
        match self.disk.available_bytes(self.store.root()) {
            Some(available) if available < required => {
                Err(DownloadError::InsufficientDiskSpace {
                    required,
                    available,
                })
            }
            Some(_) => Ok(()),
            None => {
                tracing::warn!(
                    "Could not determine free space under {:?}; skipping check",
                    self.store.root()
                );
                Ok(())
            }
        }
    }

    async fn on_completed(&mut self, model_id: String, path: PathBuf) {
        self.session.phase = Phase::Installing;
        self.publish();

        let store = self.store.clone();
        let temp = path.clone();
        let installed = tokio::task::spawn_blocking(move || {
            store
                .install(&temp, &model_id)
                .map(|target| std::fs::metadata(target).map(|meta| meta.len()).ok())
        })
        .await
        .unwrap_or_else(|e| Err(DownloadError::PlacementError(e.to_string())));

        match installed {
            Ok(installed_size) => {
                self.attempt = None;
                self.session.complete(installed_size);
                self.publish();
            }
            Err(error) => {
                discard(path).await;
                self.fail_attempt(error);
            }
        }
    }

    fn on_failed(&mut self, failure: TransferFailure) {
        self.fail_attempt(DownloadError::from(failure));
    }

    fn fail_attempt(&mut self, error: DownloadError) {
        if let Some(attempt) = self.attempt.take() {
            tracing::warn!("Download of {} failed: {}", attempt.model_id, error);
            attempt.cancel.cancel();
        }
        self.session.fail(error);
        self.publish();
    }

    fn handle_path_status(&mut self, status: PathStatus) {
        let previous = std::mem::replace(&mut self.path_status, status);
        match status {
            PathStatus::Unsatisfied => {
                self.session.preflight_checked = false;
                if self.attempt.is_some() {
                    self.fail_attempt(DownloadError::ConnectionLost);
                } else {
                    // offline since launch: there was no connection to lose
                    self.session.last_error = Some(if previous == PathStatus::Unknown {
                        DownloadError::NetworkUnavailable
                    } else {
                        DownloadError::ConnectionLost
                    });
                    self.publish();
                }
            }
            PathStatus::Satisfied => {
                tracing::debug!("Network path restored; downloads resume only on request");
            }
            PathStatus::Unknown => {}
        }
    }

    /// Re-resolve the selection against the files on disk.
    fn reconcile(&mut self) {
        let selected_present = self
            .session
            .selected_model_id
            .as_deref()
            .is_some_and(|id| self.store.is_downloaded(id));

        if !selected_present {
            let fallback = self
                .store
                .list_downloaded()
                .first()
                .map(|model| model.id.clone());
            if fallback != self.session.selected_model_id {
                tracing::info!(
                    "Selection changed from {:?} to {:?}",
                    self.session.selected_model_id,
                    fallback
                );
            }
            self.session.selected_model_id = fallback;
        }
        self.settle_phase();
    }

    /// Idle/Ready bookkeeping while nothing is in flight. Failed sticks until
    /// the next attempt.
    fn settle_phase(&mut self) {
        if self.attempt.is_some()
            || self.session.phase.is_transferring()
            || self.session.phase == Phase::Failed
        {
            return;
        }
        self.session.phase = if self.session.selected_model_id.is_some() {
            Phase::Ready
        } else {
            Phase::Idle
        };
    }

    fn publish(&self) {
        if let Some(publisher) = &self.publisher {
            publisher.send_replace(self.session.snapshot());
        }
    }
}

async fn discard(path: PathBuf) {
    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove staging file {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModelCatalog, ModelDescriptor};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    enum Script {
        Complete { body: Vec<u8>, announced: u64 },
        Vanish,
        Status(u16),
        Error(String),
        Hang { expected: u64 },
        Trickle { steps: Vec<u64>, expected: u64 },
        StaleThenHang { stale: (u64, u64), expected: u64 },
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
        last_sink: Mutex<Option<TransferSink>>,
        calls: AtomicUsize,
        abandoned: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn fetch(
            &self,
            request: &TransferRequest,
            sink: &TransferSink,
        ) -> Result<PathBuf, TransferFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let previous = self.last_sink.lock().unwrap().replace(sink.clone());
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Status(500));

            match script {
                Script::Complete { body, announced } => {
                    sink.progress(0, announced);
                    std::fs::create_dir_all(request.staging_path.parent().unwrap()).unwrap();
                    std::fs::write(&request.staging_path, &body).unwrap();
                    for written in 1..=body.len() as u64 {
                        sink.progress(written, announced);
                    }
                    Ok(request.staging_path.clone())
                }
                Script::Vanish => {
                    sink.progress(0, 4);
                    Ok(request.staging_path.clone())
                }
                Script::Status(code) => Err(TransferFailure::Status(code)),
                Script::Error(description) => {
                    sink.progress(0, 10);
                    Err(TransferFailure::Network(description))
                }
                Script::Hang { expected } => {
                    let _guard = DropCounter(Arc::clone(&self.abandoned));
                    sink.progress(0, expected);
                    std::future::pending().await
                }
                Script::Trickle { steps, expected } => {
                    let _guard = DropCounter(Arc::clone(&self.abandoned));
                    for written in steps {
                        sink.progress(written, expected);
                    }
                    std::future::pending().await
                }
                Script::StaleThenHang { stale, expected } => {
                    let _guard = DropCounter(Arc::clone(&self.abandoned));
                    if let Some(previous) = previous {
                        previous.progress(stale.0, stale.1);
                    }
                    sink.progress(0, expected);
                    std::future::pending().await
                }
            }
        }
    }

    struct FixedDisk {
        available: Option<u64>,
        calls: Arc<AtomicUsize>,
    }

    impl DiskSpace for FixedDisk {
        fn available_bytes(&self, _path: &Path) -> Option<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.available
        }
    }

    fn descriptor(id: &str, url: &str) -> ModelDescriptor {
        ModelDescriptor {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: String::new(),
            filename: format!("{}-q4", id),
            source_url: url.to_string(),
            size_label: "1 KB".to_string(),
            template: "chatml".to_string(),
        }
    }

    fn catalog() -> Arc<ModelCatalog> {
        Arc::new(ModelCatalog::new(vec![
            descriptor("alpha", "https://models.example.com/alpha.gguf"),
            descriptor("beta", "https://models.example.com/beta.gguf"),
            descriptor("broken", "not a url"),
        ]))
    }

    struct Harness {
        dir: TempDir,
        store: ModelStore,
        transport: Arc<ScriptedTransport>,
        network: watch::Sender<PathStatus>,
        disk_calls: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(scripts: Vec<Script>) -> Self {
            let dir = TempDir::new().unwrap();
            let store = ModelStore::new(dir.path().join("models"), catalog());
            let transport = Arc::new(ScriptedTransport {
                scripts: Mutex::new(scripts.into()),
                ..Default::default()
            });
            let (network, _) = watch::channel(PathStatus::Satisfied);
            Self {
                dir,
                store,
                transport,
                network,
                disk_calls: Arc::default(),
            }
        }

        fn preinstall(&self, model_id: &str) {
            let temp = self.dir.path().join(format!("{}.tmp", model_id));
            std::fs::write(&temp, b"weights").unwrap();
            self.store.install(&temp, model_id).unwrap();
        }

        fn spawn(&self, available: Option<u64>, selection: Option<&str>) -> DownloadManager {
            self.spawn_with(available, selection, Duration::ZERO)
        }

        fn spawn_with(
            &self,
            available: Option<u64>,
            selection: Option<&str>,
            progress_interval: Duration,
        ) -> DownloadManager {
            DownloadManager::spawn(ManagerDeps {
                store: self.store.clone(),
                transport: self.transport.clone(),
                disk: Arc::new(FixedDisk {
                    available,
                    calls: Arc::clone(&self.disk_calls),
                }),
                network: self.network.subscribe(),
                config: TransferConfig {
                    progress_interval,
                    ..TransferConfig::default()
                },
                initial_selection: selection.map(str::to_string),
            })
        }

        fn disk_checks(&self) -> usize {
            self.disk_calls.load(Ordering::SeqCst)
        }

        fn calls(&self) -> usize {
            self.transport.calls.load(Ordering::SeqCst)
        }

        async fn wait_abandoned(&self, count: usize) {
            let abandoned = Arc::clone(&self.transport.abandoned);
            timeout(Duration::from_secs(5), async move {
                while abandoned.load(Ordering::SeqCst) < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("transfer was not cancelled");
        }
    }

    async fn wait_until(
        manager: &DownloadManager,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = manager.subscribe();
        let snapshot = timeout(Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for state")
            .expect("controller stopped")
            .clone();
        snapshot
    }

    #[tokio::test]
    async fn test_download_installs_and_selects() {
        let harness = Harness::new(vec![Script::Complete {
            body: b"weights".to_vec(),
            announced: 7,
        }]);
        let manager = harness.spawn(Some(1 << 40), None);
        assert_eq!(manager.snapshot().phase, Phase::Idle);

        manager.start_download("alpha").await.unwrap();
        let snap = wait_until(&manager, |s| s.phase == Phase::Ready).await;

        assert_eq!(snap.selected_model_id.as_deref(), Some("alpha"));
        assert!(snap.active_model_id.is_none());
        assert_eq!(snap.progress, 1.0);
        assert_eq!(snap.bytes_written, 7);
        assert_eq!(snap.bytes_expected, 7);
        assert!(snap.last_error.is_none());
        assert!(harness.store.is_downloaded("alpha"));
        assert_eq!(
            std::fs::read(harness.store.path_for("alpha").unwrap()).unwrap(),
            b"weights"
        );
    }

    #[tokio::test]
    async fn test_start_rejected_without_network() {
        let harness = Harness::new(vec![]);
        harness.network.send_replace(PathStatus::Unsatisfied);
        let manager = harness.spawn(Some(1 << 40), None);

        let result = manager.start_download("alpha").await;
        assert_eq!(result, Err(DownloadError::NetworkUnavailable));
        assert_eq!(harness.calls(), 0);

        let snap = manager.snapshot();
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.active_model_id.is_none());
        assert_eq!(snap.last_error.as_deref(), Some("No network connection"));
    }

    #[tokio::test]
    async fn test_bad_models_rejected() {
        let harness = Harness::new(vec![]);
        let manager = harness.spawn(Some(1 << 40), None);

        assert!(matches!(
            manager.start_download("broken").await,
            Err(DownloadError::InvalidModel(_))
        ));
        assert!(matches!(
            manager.start_download("gamma").await,
            Err(DownloadError::UnknownModel(_))
        ));
        assert_eq!(harness.calls(), 0);
        assert_eq!(manager.snapshot().phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_insufficient_disk_space_fails_before_progress() {
        let harness = Harness::new(vec![Script::Hang {
            expected: 4_210_000_000,
        }]);
        let manager = harness.spawn(Some(1_000_000), None);

        manager.start_download("alpha").await.unwrap();
        let snap = wait_until(&manager, |s| s.phase == Phase::Failed).await;

        let message = snap.last_error.unwrap();
        assert!(message.starts_with("Not enough free space"), "{message}");
        assert!(message.contains("3.92 GB required"), "{message}");
        assert_eq!(snap.bytes_written, 0);
        assert_eq!(snap.bytes_expected, 0);
        assert!(snap.active_model_id.is_none());
        assert!(!snap.preflight_checked);
        harness.wait_abandoned(1).await;
    }

    #[tokio::test]
    async fn test_free_space_checked_once_per_attempt() {
        let harness = Harness::new(vec![
            Script::Trickle {
                steps: vec![0, 10, 20, 30],
                expected: 100,
            },
            Script::Complete {
                body: b"weights".to_vec(),
                announced: 7,
            },
        ]);
        let manager = harness.spawn(Some(1 << 40), None);

        manager.start_download("alpha").await.unwrap();
        wait_until(&manager, |s| s.bytes_written == 30).await;
        assert_eq!(harness.disk_checks(), 1);

        harness.network.send_replace(PathStatus::Unsatisfied);
        let snap = wait_until(&manager, |s| s.phase == Phase::Failed).await;
        assert_eq!(snap.last_error.as_deref(), Some("Connection lost"));

        // the retry validates free space again, still only once
        harness.network.send_replace(PathStatus::Satisfied);
        manager.start_download("alpha").await.unwrap();
        let snap = wait_until(&manager, |s| s.phase == Phase::Ready).await;
        assert_eq!(snap.generation, 2);
        assert_eq!(harness.disk_checks(), 2);
    }

    #[tokio::test]
    async fn test_unknown_total_reports_installed_size() {
        let harness = Harness::new(vec![Script::Complete {
            body: b"weights".to_vec(),
            announced: 0,
        }]);
        // only the first sample gets through the throttle
        let manager = harness.spawn_with(Some(1 << 40), None, Duration::from_secs(3600));

        manager.start_download("alpha").await.unwrap();
        let snap = wait_until(&manager, |s| s.phase == Phase::Ready).await;
        assert_eq!(snap.bytes_written, 7);
        assert_eq!(snap.bytes_expected, 7);
        assert_eq!(snap.progress, 1.0);
    }

    #[tokio::test]
    async fn test_unknown_free_space_does_not_block() {
        let harness = Harness::new(vec![Script::Complete {
            body: b"abc".to_vec(),
            announced: 3,
        }]);
        let manager = harness.spawn(None, None);

        manager.start_download("beta").await.unwrap();
        let snap = wait_until(&manager, |s| s.phase == Phase::Ready).await;
        assert_eq!(snap.selected_model_id.as_deref(), Some("beta"));
    }

    #[tokio::test]
    async fn test_server_status_surfaces() {
        let harness = Harness::new(vec![Script::Status(404)]);
        let manager = harness.spawn(Some(1 << 40), None);

        manager.start_download("alpha").await.unwrap();
        let snap = wait_until(&manager, |s| s.phase == Phase::Failed).await;
        assert_eq!(snap.last_error.as_deref(), Some("Server returned status 404"));
        assert!(snap.active_model_id.is_none());
        assert!(!harness.store.is_downloaded("alpha"));
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let harness = Harness::new(vec![Script::Error("connection reset".into())]);
        let manager = harness.spawn(Some(1 << 40), None);

        manager.start_download("alpha").await.unwrap();
        let snap = wait_until(&manager, |s| s.phase == Phase::Failed).await;
        assert_eq!(
            snap.last_error.as_deref(),
            Some("Download failed: connection reset")
        );
    }

    #[tokio::test]
    async fn test_install_failure_is_not_downloaded() {
        let harness = Harness::new(vec![Script::Vanish]);
        let manager = harness.spawn(Some(1 << 40), None);

        manager.start_download("alpha").await.unwrap();
        let snap = wait_until(&manager, |s| s.phase == Phase::Failed).await;
        assert!(snap
            .last_error
            .as_deref()
            .is_some_and(|m| m.starts_with("Failed to save file:")));
        assert!(snap.selected_model_id.is_none());
        assert!(!harness.store.is_downloaded("alpha"));
    }

    #[tokio::test]
    async fn test_failed_attempt_then_retry() {
        let harness = Harness::new(vec![
            Script::Status(503),
            Script::Complete {
                body: b"ok".to_vec(),
                announced: 2,
            },
        ]);
        let manager = harness.spawn(Some(1 << 40), None);

        manager.start_download("alpha").await.unwrap();
        wait_until(&manager, |s| s.phase == Phase::Failed).await;

        manager.start_download("alpha").await.unwrap();
        let snap = wait_until(&manager, |s| s.phase == Phase::Ready).await;
        assert!(snap.last_error.is_none());
        assert_eq!(snap.generation, 2);
    }

    #[tokio::test]
    async fn test_stop_download_suppresses_error() {
        let harness = Harness::new(vec![Script::Hang { expected: 100 }]);
        let manager = harness.spawn(Some(1 << 40), None);

        manager.start_download("alpha").await.unwrap();
        wait_until(&manager, |s| s.bytes_expected == 100).await;

        manager.stop_download().await.unwrap();
        let snap = manager.snapshot();
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.active_model_id.is_none());
        assert!(snap.last_error.is_none());
        harness.wait_abandoned(1).await;

        // nothing from the cancelled attempt changes the state afterwards
        let snap = manager.refresh_status().await.unwrap();
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.last_error.is_none());
    }

    #[tokio::test]
    async fn test_new_start_drops_stale_events() {
        let harness = Harness::new(vec![
            Script::Hang { expected: 100 },
            Script::StaleThenHang {
                stale: (90, 100),
                expected: 50,
            },
        ]);
        let manager = harness.spawn(Some(1 << 40), None);

        manager.start_download("alpha").await.unwrap();
        wait_until(&manager, |s| s.bytes_expected == 100).await;

        manager.start_download("beta").await.unwrap();
        let snap = wait_until(&manager, |s| s.bytes_expected == 50).await;

        assert_eq!(snap.generation, 2);
        assert_eq!(snap.active_model_id.as_deref(), Some("beta"));
        assert_eq!(snap.bytes_written, 0);
        assert_eq!(snap.phase, Phase::Downloading);
        harness.wait_abandoned(1).await;
    }

    #[tokio::test]
    async fn test_network_loss_fails_active_transfer() {
        let harness = Harness::new(vec![Script::Hang { expected: 100 }]);
        let manager = harness.spawn(Some(1 << 40), None);

        manager.start_download("alpha").await.unwrap();
        let snap = wait_until(&manager, |s| s.bytes_expected == 100).await;
        assert!(snap.preflight_checked);

        harness.network.send_replace(PathStatus::Unsatisfied);
        let snap = wait_until(&manager, |s| s.phase == Phase::Failed).await;
        assert_eq!(snap.last_error.as_deref(), Some("Connection lost"));
        assert!(!snap.preflight_checked);
        assert!(snap.active_model_id.is_none());
        harness.wait_abandoned(1).await;

        // no automatic resume
        harness.network.send_replace(PathStatus::Satisfied);
        let snap = manager.refresh_status().await.unwrap();
        assert_eq!(snap.phase, Phase::Failed);
        assert_eq!(harness.calls(), 1);
    }

    #[tokio::test]
    async fn test_network_loss_while_idle_publishes_error() {
        let harness = Harness::new(vec![]);
        harness.preinstall("alpha");
        let manager = harness.spawn(Some(1 << 40), None);

        harness.network.send_replace(PathStatus::Unsatisfied);
        let snap = wait_until(&manager, |s| s.last_error.is_some()).await;
        assert_eq!(snap.last_error.as_deref(), Some("Connection lost"));
        assert_eq!(snap.phase, Phase::Ready);
    }

    #[tokio::test]
    async fn test_offline_at_launch_reports_no_network() {
        let harness = Harness::new(vec![]);
        harness.network.send_replace(PathStatus::Unknown);
        let manager = harness.spawn(Some(1 << 40), None);

        harness.network.send_replace(PathStatus::Unsatisfied);
        let snap = wait_until(&manager, |s| s.last_error.is_some()).await;
        assert_eq!(snap.last_error.as_deref(), Some("No network connection"));
        assert_eq!(snap.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_delete_selected_reselects_other() {
        let harness = Harness::new(vec![]);
        harness.preinstall("alpha");
        harness.preinstall("beta");
        let manager = harness.spawn(Some(1 << 40), Some("alpha"));

        let snap = manager.snapshot();
        assert_eq!(snap.phase, Phase::Ready);
        assert_eq!(snap.selected_model_id.as_deref(), Some("alpha"));

        manager.delete_model("alpha").await.unwrap();
        let snap = manager.snapshot();
        assert_eq!(snap.selected_model_id.as_deref(), Some("beta"));
        assert_eq!(snap.phase, Phase::Ready);
        assert!(!harness.store.is_downloaded("alpha"));

        manager.delete_model("beta").await.unwrap();
        let snap = manager.snapshot();
        assert!(snap.selected_model_id.is_none());
        assert_eq!(snap.phase, Phase::Idle);
        assert!(!snap.has_model_ready());
    }

    #[tokio::test]
    async fn test_delete_missing_model_is_noop() {
        let harness = Harness::new(vec![]);
        let manager = harness.spawn(Some(1 << 40), None);
        manager.delete_model("beta").await.unwrap();
        assert!(matches!(
            manager.delete_model("gamma").await,
            Err(DownloadError::UnknownModel(_))
        ));
    }

    #[tokio::test]
    async fn test_select_model() {
        let harness = Harness::new(vec![]);
        harness.preinstall("alpha");
        let manager = harness.spawn(Some(1 << 40), None);

        assert_eq!(
            manager.select_model("beta").await,
            Err(DownloadError::NotDownloaded("beta".into()))
        );

        harness.preinstall("beta");
        manager.select_model("beta").await.unwrap();
        assert_eq!(manager.snapshot().selected_model_id.as_deref(), Some("beta"));
    }

    #[tokio::test]
    async fn test_initial_selection_reconciled_with_disk() {
        let harness = Harness::new(vec![]);
        harness.preinstall("beta");
        let manager = harness.spawn(Some(1 << 40), Some("alpha"));

        let snap = manager.snapshot();
        assert_eq!(snap.selected_model_id.as_deref(), Some("beta"));
        assert_eq!(snap.phase, Phase::Ready);
    }

    #[tokio::test]
    async fn test_refresh_after_external_delete() {
        let harness = Harness::new(vec![]);
        harness.preinstall("alpha");
        let manager = harness.spawn(Some(1 << 40), Some("alpha"));
        assert_eq!(manager.snapshot().phase, Phase::Ready);

        std::fs::remove_file(harness.store.path_for("alpha").unwrap()).unwrap();
        let snap = manager.refresh_status().await.unwrap();
        assert!(snap.selected_model_id.is_none());
        assert_eq!(snap.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_download_while_ready_keeps_previous_selection() {
        let harness = Harness::new(vec![Script::Hang { expected: 10 }]);
        harness.preinstall("alpha");
        let manager = harness.spawn(Some(1 << 40), None);

        manager.start_download("beta").await.unwrap();
        let snap = wait_until(&manager, |s| s.bytes_expected == 10).await;
        assert_eq!(snap.phase, Phase::Downloading);
        assert_eq!(snap.selected_model_id.as_deref(), Some("alpha"));
        assert_eq!(snap.active_model_id.as_deref(), Some("beta"));
    }
}
