#![cfg(not(target_arch = "wasm32"))]

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use spx_bridge::ChannelPort;
use spx_cache::{content_hash, CacheError, EngineHashes, FetchError, Fetcher};
use spx_host::{
    Engine, EngineError, EngineFactory, EngineKind, EngineWorker, ExitSignal, HostConfig,
    HostController, HostDeps, HostError,
};
use spx_storage::{KvStore, MemoryStore};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

const ENGINE_RES: &[u8] = b"engine resources";
const WASM: &[u8] = b"\0asm engine";
const PACK: &[u8] = b"pack bytes";

struct StaticFetcher(HashMap<String, Vec<u8>>);

#[async_trait::async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.0.get(url).cloned().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

/// Shared view of everything the fake engines did.
#[derive(Default)]
struct Script {
    log: Mutex<Vec<String>>,
    fail_start: Mutex<Option<EngineKind>>,
    ignore_quit: AtomicBool,
    /// What the host posted to each game worker.
    inboxes: Mutex<Vec<UnboundedReceiver<Value>>>,
    editor_inboxes: Mutex<Vec<UnboundedReceiver<Value>>>,
    /// Engine calls take time, so interleaved operations would overlap.
    slow: AtomicBool,
    active: AtomicUsize,
    overlapped: AtomicBool,
    wasm_seen: Mutex<Vec<Option<Vec<u8>>>>,
    exits: Mutex<Vec<ExitSignal>>,
}

impl Script {
    fn record(&self, line: String) {
        self.log.lock().unwrap().push(line);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    fn count(&self, prefix: &str) -> usize {
        self.log().iter().filter(|line| line.starts_with(prefix)).count()
    }

    fn take_inbox(&self) -> UnboundedReceiver<Value> {
        self.inboxes.lock().unwrap().remove(0)
    }

    async fn work(&self) {
        if !self.slow.load(Ordering::SeqCst) {
            return;
        }
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeEngine {
    kind: EngineKind,
    script: Arc<Script>,
    exit: ExitSignal,
    workers: Mutex<Vec<EngineWorker>>,
    // Keeps the workers' event channels open.
    outboxes: Mutex<Vec<UnboundedSender<Value>>>,
}

#[async_trait::async_trait]
impl Engine for FakeEngine {
    async fn init(&self) -> Result<(), EngineError> {
        self.script.record(format!("init {:?}", self.kind));
        self.script.work().await;
        Ok(())
    }

    async fn start(&self, args: &[String]) -> Result<(), EngineError> {
        self.script
            .record(format!("start {:?} {}", self.kind, args.join(" ")));
        self.script.work().await;
        if *self.script.fail_start.lock().unwrap() == Some(self.kind) {
            return Err(EngineError::Start("boom".to_string()));
        }
        if args.iter().any(|arg| arg == "--project-manager") {
            // The install pass quits on its own.
            self.exit.exit(0);
        } else {
            let (port, inbox) = ChannelPort::pair();
            let (outbox, events) = mpsc::unbounded_channel();
            match self.kind {
                EngineKind::Game => self.script.inboxes.lock().unwrap().push(inbox),
                EngineKind::Editor => self.script.editor_inboxes.lock().unwrap().push(inbox),
            }
            self.outboxes.lock().unwrap().push(outbox);
            self.workers.lock().unwrap().push(EngineWorker {
                port: Arc::new(port),
                events,
                running: true,
            });
        }
        Ok(())
    }

    fn request_quit(&self) {
        self.script.record(format!("quit {:?}", self.kind));
        if !self.script.ignore_quit.load(Ordering::SeqCst) {
            self.exit.exit(0);
        }
    }

    fn copy_to_fs(&self, path: &str, data: &[u8]) -> Result<(), EngineError> {
        self.script.record(format!("copy {path} {}", data.len()));
        Ok(())
    }

    async fn unpack_game_data(
        &self,
        dir: &str,
        project_data_name: &str,
        project_data: &[u8],
        pack_name: &str,
        pack_data: Option<&[u8]>,
    ) -> Result<(), EngineError> {
        self.script.record(format!(
            "unpack {dir}/{project_data_name}={} {pack_name}={:?}",
            project_data.len(),
            pack_data.map(<[u8]>::len)
        ));
        self.script.work().await;
        Ok(())
    }

    async fn wait_fs_sync(&self) -> Result<(), EngineError> {
        self.script.record("sync".to_string());
        self.script.work().await;
        Ok(())
    }

    fn worker_ports(&self) -> Vec<EngineWorker> {
        std::mem::take(&mut *self.workers.lock().unwrap())
    }
}

struct FakeFactory(Arc<Script>);

impl EngineFactory for FakeFactory {
    fn create(
        &self,
        kind: EngineKind,
        wasm: Option<Arc<[u8]>>,
        exit: ExitSignal,
    ) -> Result<Box<dyn Engine>, EngineError> {
        self.0
            .wasm_seen
            .lock()
            .unwrap()
            .push(wasm.map(|bytes| bytes.to_vec()));
        self.0.exits.lock().unwrap().push(exit.clone());
        Ok(Box::new(FakeEngine {
            kind,
            script: self.0.clone(),
            exit,
            workers: Mutex::new(Vec::new()),
            outboxes: Mutex::new(Vec::new()),
        }))
    }
}

struct Harness {
    controller: HostController,
    script: Arc<Script>,
    store: Arc<MemoryStore>,
    progress: Arc<Mutex<Vec<f32>>>,
}

fn config(runtime_mode: bool) -> HostConfig {
    let mut config = HostConfig {
        runtime_mode,
        use_asset_cache: true,
        ..HostConfig::default()
    };
    for asset in ["engineres.zip", "godot.editor.wasm", "godot.editor.pck"] {
        config
            .asset_urls
            .insert(asset.to_string(), format!("https://cdn.test/{asset}"));
    }
    config
}

fn harness(config: HostConfig) -> Harness {
    harness_with(config, ENGINE_RES.to_vec())
}

fn harness_with(config: HostConfig, engine_res: Vec<u8>) -> Harness {
    let script = Arc::new(Script::default());
    let store = Arc::new(MemoryStore::new());
    let progress = Arc::new(Mutex::new(Vec::new()));

    let mut bodies = HashMap::new();
    bodies.insert("https://cdn.test/engineres.zip".to_string(), engine_res);
    bodies.insert("https://cdn.test/godot.editor.wasm".to_string(), WASM.to_vec());
    bodies.insert("https://cdn.test/godot.editor.pck".to_string(), PACK.to_vec());

    let mut engine_hashes = EngineHashes::new();
    engine_hashes.insert_data("godot.editor.wasm", WASM);

    let sink = progress.clone();
    let controller = HostController::spawn(
        config,
        HostDeps {
            store: store.clone(),
            fetcher: Arc::new(StaticFetcher(bodies)),
            engines: Arc::new(FakeFactory(script.clone())),
            engine_hashes,
            on_progress: Some(Arc::new(move |value: f32| sink.lock().unwrap().push(value))),
        },
    );
    Harness {
        controller,
        script,
        store,
        progress,
    }
}

async fn stored_project_hash(store: &MemoryStore) -> Option<String> {
    store
        .get_string("/home/web_user", "/home/web_user/.spx_cache_hash/Game")
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn first_start_installs_then_runs_editor() {
    let h = harness(config(false));
    h.controller.start_project().await.unwrap();

    assert_eq!(
        h.script.log(),
        [
            "init Editor",
            "copy /tmp/preload.zip 16",
            "start Editor --project-manager --single-window --install_project_name Game",
            "init Editor",
            "start Editor --path /home/web_user/Game --single-window --editor",
            "sync",
        ]
    );
    assert_eq!(*h.progress.lock().unwrap(), [0.1f32, 0.2, 0.4, 0.9, 1.0]);
    assert_eq!(
        stored_project_hash(&h.store).await,
        Some(content_hash(ENGINE_RES))
    );
    // Both instances received the cached engine binary.
    assert!(h
        .script
        .wasm_seen
        .lock()
        .unwrap()
        .iter()
        .all(|wasm| wasm.as_deref() == Some(WASM)));

    let status = *h.controller.status().borrow();
    assert!(status.editor_running);
    assert!(!status.game_running);
    assert_eq!(status.progress, 1.0);
}

#[tokio::test(start_paused = true)]
async fn unchanged_resources_skip_the_install_pass() {
    let h = harness(config(false));
    h.controller.start_project().await.unwrap();
    h.controller.stop_project().await.unwrap();
    assert_eq!(h.script.count("quit Editor"), 1);
    assert!(!h.controller.status().borrow().editor_running);

    h.script.clear();
    h.controller.start_project().await.unwrap();
    assert_eq!(
        h.script.log(),
        [
            "init Editor",
            "start Editor --path /home/web_user/Game --single-window --editor",
            "sync",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn starting_a_loaded_project_again_does_nothing() {
    let h = harness(config(false));
    h.controller.start_project().await.unwrap();
    h.script.clear();
    h.controller.start_project().await.unwrap();
    assert!(h.script.log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_install_resets_hash_and_keeps_queue_usable() {
    let h = harness(config(false));
    *h.script.fail_start.lock().unwrap() = Some(EngineKind::Editor);

    let err = h.controller.start_project().await.unwrap_err();
    assert!(
        matches!(err, HostError::Engine(EngineError::Start(_))),
        "{err:?}"
    );
    assert_eq!(stored_project_hash(&h.store).await, Some(String::new()));
    assert!(!h.controller.status().borrow().editor_running);

    *h.script.fail_start.lock().unwrap() = None;
    h.script.clear();
    h.controller.start_project().await.unwrap();
    assert_eq!(h.script.count("start Editor --project-manager"), 1);
    assert!(h.controller.status().borrow().editor_running);
}

#[tokio::test(start_paused = true)]
async fn editor_start_failure_is_not_retained() {
    let h = harness(config(false));
    // Install once so the next start goes straight to the editor.
    h.controller.start_project().await.unwrap();
    h.controller.stop_project().await.unwrap();

    *h.script.fail_start.lock().unwrap() = Some(EngineKind::Editor);
    h.script.clear();
    assert!(h.controller.start_project().await.is_err());
    assert_eq!(h.script.count("quit Editor"), 1);
    assert!(!h.controller.status().borrow().editor_running);
    // A failed editor start does not invalidate a finished install.
    assert_eq!(
        stored_project_hash(&h.store).await,
        Some(content_hash(ENGINE_RES))
    );
}

#[tokio::test(start_paused = true)]
async fn run_game_broadcasts_project_data_to_running_workers() {
    let h = harness(config(false));
    h.controller.update_project(vec![7, 8, 9]).await.unwrap();
    h.controller.run_game().await.unwrap();

    assert_eq!(
        h.script.log(),
        [
            "init Game",
            "unpack /home/spx_game_cache/project.data=3 godot.editor.pck=None",
            "start Game --path /home/web_user/Game --editor-pid 0 res://main.tscn",
        ]
    );
    let mut inbox = h.script.take_inbox();
    let message = inbox.recv().await.unwrap();
    assert_eq!(message["cmd"], "projectDataUpdate");
    assert_eq!(message["_targetWorkerIndex"], 0);

    let workers = h.controller.bridge().workers();
    assert_eq!(workers.len(), 1);
    assert!(workers[0].running);
    assert!(h.controller.status().borrow().game_running);
    assert_eq!(*h.progress.lock().unwrap(), [0.5f32, 0.7, 1.0]);
}

#[tokio::test(start_paused = true)]
async fn project_data_waits_for_broadcast_delay() {
    let h = harness(config(false));
    h.controller.update_project(vec![1]).await.unwrap();
    let run = h.controller.run_game();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let mut inbox = h.script.take_inbox();
    assert!(inbox.try_recv().is_err());

    run.await.unwrap();
    assert_eq!(inbox.recv().await.unwrap()["cmd"], "projectDataUpdate");
}

#[tokio::test(start_paused = true)]
async fn run_game_without_project_data_fails_without_blocking_queue() {
    let h = harness(config(false));
    assert!(matches!(
        h.controller.run_game().await,
        Err(HostError::MissingProjectData)
    ));
    assert_eq!(h.controller.pending_runs(), 0);

    h.controller.update_project(vec![1, 2]).await.unwrap();
    h.controller.run_game().await.unwrap();
    assert!(h.controller.status().borrow().game_running);
}

#[tokio::test(start_paused = true)]
async fn second_run_is_ignored_while_game_runs() {
    let h = harness(config(false));
    h.controller.update_project(vec![1]).await.unwrap();
    h.controller.run_game().await.unwrap();
    h.controller.run_game().await.unwrap();
    assert_eq!(h.script.count("start Game"), 1);
    assert_eq!(h.controller.bridge().workers().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn game_that_exited_on_its_own_can_be_run_again() {
    let h = harness(config(false));
    h.controller.update_project(vec![1]).await.unwrap();
    h.controller.run_game().await.unwrap();

    let exit = h.script.exits.lock().unwrap().last().cloned().unwrap();
    exit.exit(1);
    h.controller.run_game().await.unwrap();

    assert_eq!(h.script.count("start Game"), 2);
    assert_eq!(h.script.count("quit Game"), 0);
    let workers = h.controller.bridge().workers();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].index, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_game_quits_and_detaches_workers() {
    let h = harness(config(false));
    h.controller.update_project(vec![1]).await.unwrap();
    h.controller.run_game().await.unwrap();
    h.controller.stop_game().await.unwrap();

    assert_eq!(h.script.count("quit Game"), 1);
    assert!(h.controller.bridge().workers().is_empty());
    assert!(!h.controller.status().borrow().game_running);

    // Nothing left to stop.
    h.controller.stop_game().await.unwrap();
    assert_eq!(h.script.count("quit Game"), 1);
    assert_eq!(h.controller.pending_stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_right_after_run_keeps_game_from_starting() {
    let h = harness(config(false));
    h.controller.update_project(vec![1]).await.unwrap();

    let run = h.controller.run_game();
    let stop = h.controller.stop_game();
    assert_eq!(h.controller.pending_stops(), 1);
    run.await.unwrap();
    stop.await.unwrap();

    assert_eq!(h.script.count("start Game"), 0);
    assert!(!h.controller.status().borrow().game_running);
    assert_eq!(h.controller.pending_stops(), 0);
    assert_eq!(h.controller.pending_runs(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_during_run_quits_fresh_game() {
    let h = harness(config(false));
    h.controller.update_project(vec![1]).await.unwrap();

    let run = h.controller.run_game();
    // The run is now waiting out the broadcast delay.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.script.count("start Game"), 1);
    let stop = h.controller.stop_game();

    run.await.unwrap();
    stop.await.unwrap();
    assert_eq!(h.script.count("quit Game"), 1);
    assert!(!h.controller.status().borrow().game_running);
    assert!(h.controller.bridge().workers().is_empty());
    let mut inbox = h.script.take_inbox();
    assert!(inbox.try_recv().is_err(), "project data was never sent");
}

#[tokio::test(start_paused = true)]
async fn unresponsive_game_is_dropped_after_quit_timeout() {
    let h = harness(HostConfig {
        quit_timeout_ms: 2_000,
        ..config(false)
    });
    h.script.ignore_quit.store(true, Ordering::SeqCst);
    h.controller.update_project(vec![1]).await.unwrap();
    h.controller.run_game().await.unwrap();

    let started = tokio::time::Instant::now();
    h.controller.stop_game().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(!h.controller.status().borrow().game_running);
    assert!(h.controller.bridge().workers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn runtime_mode_plays_the_pack() {
    let h = harness(config(true));
    h.controller.start_project().await.unwrap();
    assert!(h.script.log().is_empty(), "runtime mode starts no editor");
    assert!(!h.controller.status().borrow().editor_running);

    h.controller.update_project(vec![4, 5]).await.unwrap();
    h.controller.run_game().await.unwrap();
    assert_eq!(
        h.script.log(),
        [
            "init Game",
            "unpack /home/spx_game_cache/project.data=2 godot.editor.pck=Some(10)",
            "start Game --main-pack /home/spx_game_cache/godot.editor.pck --main-project-data /home/spx_game_cache/project.data",
        ]
    );
    assert_eq!(
        h.script.wasm_seen.lock().unwrap().last().cloned().flatten().as_deref(),
        Some(WASM)
    );

    // Runtime mode has no editor but still stops the game.
    h.controller.stop_project().await.unwrap();
    assert_eq!(h.script.count("quit Game"), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_project_stops_game_then_editor() {
    let h = harness(config(false));
    h.controller.start_project().await.unwrap();
    h.controller.update_project(vec![1]).await.unwrap();
    h.controller.run_game().await.unwrap();
    h.script.clear();

    h.controller.stop_project().await.unwrap();
    assert_eq!(h.script.log(), ["quit Game", "quit Editor"]);
    let status = *h.controller.status().borrow();
    assert!(!status.editor_running);
    assert!(!status.game_running);
}

#[tokio::test(start_paused = true)]
async fn stop_project_without_editor_does_nothing() {
    let h = harness(config(false));
    h.controller.stop_project().await.unwrap();
    assert!(h.script.log().is_empty());
    assert!(h.progress.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_engine_asset_url_surfaces_cache_error() {
    let mut config = config(false);
    config.asset_urls.remove("engineres.zip");
    let h = harness(config);
    let err = h.controller.start_project().await.unwrap_err();
    assert!(
        matches!(err, HostError::Cache(CacheError::UnknownAsset(ref asset)) if asset == "engineres.zip"),
        "{err:?}"
    );
    assert!(h.script.log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_runs_queued_operations_then_destroys_bridge() {
    let h = harness(config(false));
    let update = h.controller.update_project(vec![1]);
    let run = h.controller.run_game();
    let bridge = h.controller.bridge().clone();

    h.controller.shutdown().await;
    update.await.unwrap();
    run.await.unwrap();
    assert_eq!(h.script.count("start Game"), 1);
    assert!(bridge.is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn dropping_controller_abandons_queued_operations() {
    let h = harness(config(false));
    let update = h.controller.update_project(vec![1]);
    let bridge = h.controller.bridge().clone();
    drop(h.controller);

    assert!(matches!(update.await, Err(HostError::Closed)));
    assert!(bridge.is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn project_data_goes_to_game_workers_only() {
    let h = harness(config(false));
    h.controller.start_project().await.unwrap();
    h.controller.update_project(vec![7]).await.unwrap();
    h.controller.run_game().await.unwrap();

    let workers = h.controller.bridge().workers();
    assert_eq!(workers.len(), 2);
    assert!(workers.iter().all(|worker| worker.running));

    let mut game = h.script.take_inbox();
    let message = game.recv().await.unwrap();
    assert_eq!(message["cmd"], "projectDataUpdate");
    assert_eq!(message["_targetWorkerIndex"], 1);
    let mut editor = h.script.editor_inboxes.lock().unwrap().remove(0);
    assert!(editor.try_recv().is_err(), "editor workers keep their own data");
}

#[tokio::test(start_paused = true)]
async fn failed_game_start_quits_engine() {
    let h = harness(config(false));
    *h.script.fail_start.lock().unwrap() = Some(EngineKind::Game);
    h.controller.update_project(vec![1]).await.unwrap();

    let err = h.controller.run_game().await.unwrap_err();
    assert!(
        matches!(err, HostError::Engine(EngineError::Start(_))),
        "{err:?}"
    );
    assert_eq!(h.script.count("quit Game"), 1);
    assert!(h.controller.bridge().workers().is_empty());
    assert!(!h.controller.status().borrow().game_running);
}

#[tokio::test(start_paused = true)]
async fn missing_pack_quits_runtime_game() {
    let mut config = config(true);
    config.asset_urls.remove("godot.editor.pck");
    let h = harness(config);
    h.controller.update_project(vec![1]).await.unwrap();

    let err = h.controller.run_game().await.unwrap_err();
    assert!(
        matches!(err, HostError::Cache(CacheError::UnknownAsset(ref asset)) if asset == "godot.editor.pck"),
        "{err:?}"
    );
    assert_eq!(h.script.log(), ["init Game", "quit Game"]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_never_interleave_operations() {
    let h = harness(config(false));
    h.script.slow.store(true, Ordering::SeqCst);
    h.controller.update_project(vec![1]).await.unwrap();

    let controller = Arc::new(h.controller);
    let mut callers = Vec::new();
    for caller in 0..4 {
        let controller = controller.clone();
        callers.push(tokio::spawn(async move {
            for round in 0..3 {
                if (caller + round) % 2 == 0 {
                    controller.start_project().await?;
                    controller.run_game().await?;
                    controller.stop_game().await?;
                } else {
                    let run = controller.run_game();
                    let stop = controller.stop_game();
                    run.await?;
                    stop.await?;
                }
                tokio::task::yield_now().await;
            }
            // Every caller ends by asking for a running game.
            controller.run_game().await
        }));
    }
    for caller in callers {
        caller.await.unwrap().unwrap();
    }

    assert!(!h.script.overlapped.load(Ordering::SeqCst));
    assert_eq!(controller.pending_runs(), 0);
    assert_eq!(controller.pending_stops(), 0);
    let status = *controller.status().borrow();
    assert!(status.editor_running);
    assert!(status.game_running);
    // Exactly one game left running and bound to the bridge.
    let started = h.script.count("start Game");
    assert_eq!(h.script.count("quit Game"), started - 1);
    assert_eq!(
        controller
            .bridge()
            .workers()
            .iter()
            .filter(|worker| worker.index > 0)
            .count(),
        1
    );
}

fn zip_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn zip_files(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut data = String::new();
            file.read_to_string(&mut data).unwrap();
            (file.name().to_string(), data)
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn editor_start_merges_engine_resources_into_project_data() {
    let engine_res = zip_archive(&[("engine/boot.res", "boot")]);
    let h = harness_with(config(false), engine_res);
    h.controller
        .update_project(zip_archive(&[("main.tscn", "scene")]))
        .await
        .unwrap();
    h.controller.start_project().await.unwrap();
    h.controller.run_game().await.unwrap();

    let message = h.script.take_inbox().recv().await.unwrap();
    let data: Vec<u8> = serde_json::from_value(message["data"].clone()).unwrap();
    let expected = [
        ("main.tscn".to_string(), "scene".to_string()),
        ("engine/boot.res".to_string(), "boot".to_string()),
    ];
    assert_eq!(zip_files(&data), expected);

    // Later updates are merged too, once each.
    h.controller.stop_game().await.unwrap();
    h.controller
        .update_project(zip_archive(&[("main.tscn", "edited")]))
        .await
        .unwrap();
    h.controller.run_game().await.unwrap();
    let message = h.script.take_inbox().recv().await.unwrap();
    let data: Vec<u8> = serde_json::from_value(message["data"].clone()).unwrap();
    assert_eq!(
        zip_files(&data),
        [
            ("main.tscn".to_string(), "edited".to_string()),
            ("engine/boot.res".to_string(), "boot".to_string()),
        ]
    );
}
