use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spx_bridge::WorkerBridge;
use spx_cache::{CacheManager, EngineHashes, Fetcher};
use spx_storage::KvStore;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::{
    merge_zips, Engine, EngineFactory, EngineKind, ExitSignal, ExitWaiter, HostConfig, HostError,
};

pub type Result<T> = std::result::Result<T, HostError>;

/// Receives load progress in `[0, 1]`.
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

/// What the controller is currently showing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostStatus {
    pub editor_running: bool,
    pub game_running: bool,
    /// Last progress reported.
    pub progress: f32,
}

/// Collaborators handed to [`HostController::spawn`].
pub struct HostDeps {
    pub store: Arc<dyn KvStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub engines: Arc<dyn EngineFactory>,
    /// Known-good hashes of the engine assets.
    pub engine_hashes: EngineHashes,
    pub on_progress: Option<ProgressFn>,
}

#[derive(Debug)]
enum Op {
    StartProject,
    UpdateProject(Vec<u8>),
    StopProject,
    RunGame,
    StopGame,
}

struct Queued {
    op: Op,
    done: oneshot::Sender<Result<()>>,
}

/// Pending stop/run requests, counted at submission and released when the operation runs.
#[derive(Debug, Default)]
struct Requests {
    stop_game: AtomicUsize,
    run_game: AtomicUsize,
}

/// Serializes editor and game lifecycle operations onto one task.
///
/// Each operation is submitted when the method is called and its future resolves once the
/// operation has run. A failed operation does not block the ones queued behind it.
pub struct HostController {
    ops: Option<mpsc::UnboundedSender<Queued>>,
    requests: Arc<Requests>,
    status: watch::Receiver<HostStatus>,
    bridge: WorkerBridge,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for HostController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostController")
            .field("status", &*self.status.borrow())
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

impl HostController {
    pub fn spawn(config: HostConfig, deps: HostDeps) -> Self {
        let bridge = WorkerBridge::new(config.bridge_config());
        let cache = CacheManager::new(
            deps.store,
            deps.fetcher,
            config.cache_layout(),
            config.asset_options(),
        );
        let (status_tx, status) = watch::channel(HostStatus::default());
        let requests = Arc::new(Requests::default());
        let (ops, rx) = mpsc::unbounded_channel();

        let actor = Actor {
            config,
            cache,
            engines: deps.engines,
            engine_hashes: deps.engine_hashes,
            on_progress: deps.on_progress,
            bridge: bridge.clone(),
            requests: requests.clone(),
            status: status_tx,
            wasm: None,
            engine_res: None,
            project_data: None,
            merged: false,
            editor: None,
            game: None,
        };
        let task = tokio::spawn(actor.run(rx));

        Self {
            ops: Some(ops),
            requests,
            status,
            bridge,
            task: Some(task),
        }
    }

    fn submit(&self, op: Op) -> impl Future<Output = Result<()>> + Send + 'static {
        let (done, rx) = oneshot::channel();
        let sent = match &self.ops {
            Some(ops) => ops.send(Queued { op, done }).is_ok(),
            None => false,
        };
        async move {
            if !sent {
                return Err(HostError::Closed);
            }
            rx.await.unwrap_or(Err(HostError::Closed))
        }
    }

    /// Installs (if needed) and launches the editor. In runtime mode only warms the engine cache.
    pub fn start_project(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        self.submit(Op::StartProject)
    }

    /// Replaces the project data used by the next game run.
    pub fn update_project(&self, data: Vec<u8>) -> impl Future<Output = Result<()>> + Send + 'static {
        self.submit(Op::UpdateProject(data))
    }

    /// Stops any running game and asks the editor to quit.
    pub fn stop_project(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        self.submit(Op::StopProject)
    }

    /// Starts the game unless one is running or a stop is pending.
    pub fn run_game(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        self.requests.run_game.fetch_add(1, Ordering::SeqCst);
        self.submit(Op::RunGame)
    }

    /// Quits the running game and waits for it to exit.
    pub fn stop_game(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        self.requests.stop_game.fetch_add(1, Ordering::SeqCst);
        self.submit(Op::StopGame)
    }

    /// `stop_game` calls submitted but not yet run.
    pub fn pending_stops(&self) -> usize {
        self.requests.stop_game.load(Ordering::SeqCst)
    }

    /// `run_game` calls submitted but not yet run.
    pub fn pending_runs(&self) -> usize {
        self.requests.run_game.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> watch::Receiver<HostStatus> {
        self.status.clone()
    }

    pub fn bridge(&self) -> &WorkerBridge {
        &self.bridge
    }

    /// Runs everything already queued, then destroys the bridge.
    pub async fn shutdown(mut self) {
        self.ops.take();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.bridge.destroy();
    }
}

impl Drop for HostController {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.bridge.destroy();
        }
    }
}

struct Running {
    engine: Box<dyn Engine>,
    exit: ExitWaiter,
    workers: Vec<usize>,
}

struct Actor {
    config: HostConfig,
    cache: CacheManager,
    engines: Arc<dyn EngineFactory>,
    engine_hashes: EngineHashes,
    on_progress: Option<ProgressFn>,
    bridge: WorkerBridge,
    requests: Arc<Requests>,
    status: watch::Sender<HostStatus>,
    wasm: Option<Arc<[u8]>>,
    /// `engineres.zip` as fetched by the last editor start.
    engine_res: Option<Vec<u8>>,
    project_data: Option<Vec<u8>>,
    /// Whether `project_data` already carries the engine resources.
    merged: bool,
    editor: Option<Running>,
    game: Option<Running>,
}

impl Actor {
    async fn run(mut self, mut ops: mpsc::UnboundedReceiver<Queued>) {
        while let Some(Queued { op, done }) = ops.recv().await {
            let name = match &op {
                Op::StartProject => "start_project",
                Op::UpdateProject(_) => "update_project",
                Op::StopProject => "stop_project",
                Op::RunGame => "run_game",
                Op::StopGame => "stop_game",
            };
            tracing::debug!(op = name, "running");
            let result = match op {
                Op::StartProject => self.start_project().await,
                Op::UpdateProject(data) => {
                    tracing::debug!(bytes = data.len(), "project data updated");
                    self.project_data = Some(data);
                    self.merged = false;
                    self.merge_project_data();
                    Ok(())
                }
                Op::StopProject => self.stop_project().await,
                Op::RunGame => {
                    self.requests.run_game.fetch_sub(1, Ordering::SeqCst);
                    self.run_game().await
                }
                Op::StopGame => {
                    self.requests.stop_game.fetch_sub(1, Ordering::SeqCst);
                    self.stop_game().await
                }
            };
            if let Err(err) = &result {
                tracing::error!(op = name, "{err}");
            }
            let _ = done.send(result);
        }
        tracing::debug!("host controller queue closed");
    }

    fn progress(&self, value: f32) {
        self.status.send_modify(|status| status.progress = value);
        if let Some(on_progress) = &self.on_progress {
            on_progress(value);
        }
    }

    fn publish(&self) {
        let editor_running = self.editor.is_some();
        let game_running = self.game.is_some();
        self.status.send_modify(|status| {
            status.editor_running = editor_running;
            status.game_running = game_running;
        });
    }

    fn create(&self, kind: EngineKind) -> Result<(Box<dyn Engine>, ExitWaiter)> {
        let (signal, waiter) = ExitSignal::new();
        let engine = self.engines.create(kind, self.wasm.clone(), signal)?;
        Ok((engine, waiter))
    }

    async fn load_engine(&mut self) -> Result<()> {
        let wasm = self.cache.check_engine_cache(&self.engine_hashes).await?;
        tracing::debug!(bytes = wasm.len(), "engine binary loaded");
        self.wasm = Some(wasm.into());
        Ok(())
    }

    async fn start_project(&mut self) -> Result<()> {
        if self.editor.is_some() {
            tracing::warn!("project already loaded");
            return Ok(());
        }
        if self.config.runtime_mode {
            return self.load_engine().await;
        }

        let engine_res = self.cache.fetch_asset(&self.config.engine_res_asset).await?;
        self.progress(0.1);
        self.cache.clear_persistence(&self.config.temp_zip_path).await?;
        let cached = self.cache.check_and_update(&engine_res, true).await?;
        self.load_engine().await?;

        if !cached {
            if let Err(err) = self.install(&engine_res).await {
                // The stored hash must not vouch for a half-finished install.
                if let Err(reset) = self.cache.update_project_hash("").await {
                    tracing::warn!("failed to reset project hash: {reset}");
                }
                return Err(err);
            }
        }
        self.run_editor(engine_res).await
    }

    async fn install(&self, engine_res: &[u8]) -> Result<()> {
        tracing::info!(project = %self.config.project_name, "installing project");
        let (installer, mut exit) = self.create(EngineKind::Editor)?;
        installer.init().await?;
        installer.copy_to_fs(&self.config.temp_zip_path, engine_res)?;
        if let Err(err) = installer.start(&self.config.install_args()).await {
            installer.request_quit();
            return Err(err.into());
        }
        let code = exit.wait().await;
        tracing::debug!(?code, "install pass finished");
        Ok(())
    }

    async fn run_editor(&mut self, engine_res: Vec<u8>) -> Result<()> {
        let (editor, exit) = self.create(EngineKind::Editor)?;
        self.progress(0.2);
        editor.init().await?;
        self.progress(0.4);
        let started = async {
            editor.start(&self.config.editor_args()).await?;
            editor.wait_fs_sync().await
        };
        if let Err(err) = started.await {
            editor.request_quit();
            return Err(err.into());
        }
        self.progress(0.9);
        self.engine_res = Some(engine_res);
        self.merge_project_data();
        self.progress(1.0);
        let mut running = Running {
            engine: editor,
            exit,
            workers: Vec::new(),
        };
        let committed = match self.attach_workers(&mut running) {
            Ok(()) => self.cache.commit_project_hash().await.map_err(HostError::from),
            Err(err) => Err(err),
        };
        if let Err(err) = committed {
            running.engine.request_quit();
            self.release_workers(&running.workers);
            return Err(err);
        }

        tracing::info!(path = %self.config.install_path(), "editor running");
        self.editor = Some(running);
        self.publish();
        Ok(())
    }

    async fn stop_project(&mut self) -> Result<()> {
        if !self.config.runtime_mode && self.editor.is_none() {
            return Ok(());
        }
        self.stop_game().await?;
        self.progress(1.0);
        if let Some(editor) = self.editor.take() {
            editor.engine.request_quit();
            self.release_workers(&editor.workers);
            tracing::info!("editor quit requested");
        }
        self.publish();
        Ok(())
    }

    async fn run_game(&mut self) -> Result<()> {
        if self.requests.stop_game.load(Ordering::SeqCst) > 0 {
            tracing::debug!("stop pending, not starting game");
            return Ok(());
        }
        if let Some(game) = self.game.take_if(|game| game.exit.code().is_some()) {
            tracing::info!(code = ?game.exit.code(), "previous game exited on its own");
            self.release_workers(&game.workers);
            self.publish();
        }
        if self.game.is_some() {
            tracing::debug!("game already running");
            return Ok(());
        }
        let project_data = self
            .project_data
            .clone()
            .ok_or(HostError::MissingProjectData)?;

        self.progress(0.5);
        let (game, exit) = self.create(EngineKind::Game)?;
        game.init().await?;
        self.progress(0.7);

        let mut running = Running {
            engine: game,
            exit,
            workers: Vec::new(),
        };
        match self.launch_game(&mut running, project_data).await {
            Ok(true) => {
                self.progress(1.0);
                tracing::info!(workers = running.workers.len(), "game running");
                self.game = Some(running);
                self.publish();
                Ok(())
            }
            Ok(false) => {
                tracing::debug!("stop submitted while starting, quitting game");
                self.quit(running).await;
                Ok(())
            }
            Err(err) => {
                running.engine.request_quit();
                self.release_workers(&running.workers);
                Err(err)
            }
        }
    }

    /// Starts an initialized game and hands it the project data. Returns `false` when a stop
    /// arrived during the broadcast delay.
    async fn launch_game(&self, running: &mut Running, project_data: Vec<u8>) -> Result<bool> {
        let pack = if self.config.runtime_mode {
            Some(self.cache.fetch_asset(&self.config.pack_name).await?)
        } else {
            None
        };
        running
            .engine
            .unpack_game_data(
                &self.config.temp_game_path,
                &self.config.project_data_name,
                &project_data,
                &self.config.pack_name,
                pack.as_deref(),
            )
            .await?;
        running.engine.start(&self.config.game_args()).await?;
        self.attach_workers(running)?;

        tokio::time::sleep(self.config.broadcast_delay()).await;
        if self.requests.stop_game.load(Ordering::SeqCst) > 0 {
            return Ok(false);
        }

        // Workers spawned during the delay.
        self.attach_workers(running)?;
        let report = self.bridge.send_project_data(&running.workers, project_data)?;
        tracing::debug!(
            success = report.success,
            failure = report.failure,
            total = report.total,
            "project data broadcast"
        );
        Ok(true)
    }

    async fn stop_game(&mut self) -> Result<()> {
        let Some(game) = self.game.take() else {
            return Ok(());
        };
        self.progress(1.0);
        self.quit(game).await;
        self.publish();
        Ok(())
    }

    async fn quit(&self, mut running: Running) {
        running.engine.request_quit();
        match running.exit.wait_for(self.config.quit_timeout()).await {
            Some(code) => tracing::info!(?code, "game exited"),
            None => tracing::warn!("game did not exit in time, dropping it"),
        }
        self.release_workers(&running.workers);
    }

    /// Folds the engine resources into the project data once per update.
    ///
    /// Data that is not a zip archive is used as it is.
    fn merge_project_data(&mut self) {
        if self.merged {
            return;
        }
        let (Some(data), Some(engine_res)) = (&self.project_data, &self.engine_res) else {
            return;
        };
        match merge_zips(data, engine_res) {
            Ok(merged) => {
                tracing::debug!(bytes = merged.len(), "merged engine resources into project data");
                self.project_data = Some(merged);
                self.merged = true;
            }
            Err(err) => tracing::warn!("project data left unmerged: {err}"),
        }
    }

    fn attach_workers(&self, running: &mut Running) -> Result<()> {
        for worker in running.engine.worker_ports() {
            let index = self.bridge.attach_channel(worker.port, worker.events)?;
            running.workers.push(index);
            if worker.running {
                self.bridge.set_running(index, true)?;
            }
        }
        Ok(())
    }

    fn release_workers(&self, workers: &[usize]) {
        for index in workers {
            self.bridge.detach(*index);
        }
    }
}
