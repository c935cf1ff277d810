//! End-to-end tests: store layers in, rendered file and restart calls out.

use async_trait::async_trait;
use capture_config_agent::core::{ApplyCoordinator, LayerScope, ReconcileOutcome};
use capture_config_agent::error::Result;
use capture_config_agent::notify::ChangeWatcher;
use capture_config_agent::render::Renderer;
use capture_config_agent::store::{CoordinationStore, LayerPaths, MemoryStore};
use capture_config_agent::supervisor::{
    CommandOutput, ProcessAction, ProcessManager, RestartOrchestrator, RestartPlan,
};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

#[derive(Default)]
struct RecordingManager {
    calls: Mutex<Vec<String>>,
}

impl RecordingManager {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessManager for RecordingManager {
    async fn control(&self, action: ProcessAction, target: &str) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(format!("{} {}", action, target));
        Ok(CommandOutput::ok(format!("{}: {}ed", target, action)))
    }

    async fn status(&self, target: &str) -> Result<CommandOutput> {
        Ok(CommandOutput::ok(format!("{} RUNNING", target)))
    }

    async fn ping(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "recording"
    }
}

struct Agent {
    _dir: TempDir,
    output: PathBuf,
    paths: LayerPaths,
    manager: Arc<RecordingManager>,
    coordinator: Arc<ApplyCoordinator>,
}

fn agent(store: Arc<dyn CoordinationStore>) -> Agent {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("etc/yaf/yaf.init");
    let paths = LayerPaths::new("/xnta/yaf-config", "edge", "probe-1");
    let manager = Arc::new(RecordingManager::default());
    let coordinator = Arc::new(ApplyCoordinator::new(
        store,
        paths.clone(),
        Arc::new(Renderer::new(&output, "edge", "probe-1")),
        RestartOrchestrator::new(manager.clone(), RestartPlan::immediate("yaf", "pipeline")),
    ));
    Agent {
        _dir: dir,
        output,
        paths,
        manager,
        coordinator,
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_layers_render_into_file() {
    let store = MemoryStore::new();
    let a = agent(Arc::new(store.clone()));

    store
        .set(
            &a.paths.path(LayerScope::Global),
            br#"{"capture":{"interface":"eth1","idle_timeout":120},"filter":{"ip_whitelist":["10.0.0.0/8"]}}"#,
        )
        .await
        .unwrap();
    store
        .set(
            &a.paths.path(LayerScope::Cluster),
            br#"{"capture":{"enable_dpi":true},"output":{"fields":["x"]}}"#,
        )
        .await
        .unwrap();
    store
        .set(
            &a.paths.path(LayerScope::Node),
            br#"{"capture":{"interface":""},"output":{"fields":["a","b"]},"status_report":{"uuid":"probe-1"}}"#,
        )
        .await
        .unwrap();

    let outcome = a.coordinator.reconcile().await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied { restarted: true });

    let text = fs::read_to_string(&a.output).unwrap();
    assert!(text.contains(r#"inf  = "eth1""#));
    assert!(text.contains("idle_timeout   = 120"));
    assert!(text.contains("dpi        = true"));
    assert!(text.contains(r#"filter = "(ip and not port 22) and (net 10.0.0.0/8)""#));
    assert!(text.contains("    \"a\",\n    \"b\",\n  },"));
    assert!(!text.contains("\"x\""));
    assert!(text.contains(r#"uuid = "probe-1""#));

    assert_eq!(
        a.manager.calls(),
        vec!["stop pipeline", "restart yaf", "start pipeline"]
    );
}

#[tokio::test]
async fn test_second_reconcile_without_change_is_noop() {
    let store = MemoryStore::new();
    let a = agent(Arc::new(store.clone()));
    store
        .set(&a.paths.path(LayerScope::Node), br#"{"capture":{"max_payload":512}}"#)
        .await
        .unwrap();

    assert_ok!(a.coordinator.reconcile().await);
    let modified = fs::metadata(&a.output).unwrap().modified().unwrap();
    let outcome = a.coordinator.reconcile().await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Unchanged);
    assert_eq!(fs::metadata(&a.output).unwrap().modified().unwrap(), modified);
    assert_eq!(a.manager.calls().len(), 3);
}

#[tokio::test]
async fn test_no_layers_renders_defaults() {
    let a = agent(Arc::new(MemoryStore::new()));
    assert_ok!(a.coordinator.reconcile().await);

    let text = fs::read_to_string(&a.output).unwrap();
    assert!(text.contains(r#"inf  = "eth0""#));
    assert!(text.contains(r#"port     = "18000","#));
    assert!(text.contains("maxpayload = 1024"));
    assert!(text.contains("\"silkAppLabel\","));
}

#[tokio::test]
async fn test_watcher_applies_published_change() {
    let store = MemoryStore::new();
    let a = agent(Arc::new(store.clone()));
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

    let handle = ChangeWatcher::new(Arc::clone(&a.coordinator))
        .with_idle_timeout(Duration::from_secs(30))
        .spawn(async move {
            let _ = stopped.await;
        });

    let output = a.output.clone();
    wait_until(|| output.exists()).await;
    wait_until(|| store.live_watches() == 3).await;

    store
        .set(&a.paths.path(LayerScope::Cluster), br#"{"capture":{"interface":"bond0"}}"#)
        .await
        .unwrap();
    wait_until(|| {
        fs::read_to_string(&output)
            .map(|text| text.contains(r#"inf  = "bond0""#))
            .unwrap_or(false)
    })
    .await;
    wait_until(|| a.manager.calls().len() == 6).await;

    stop.send(()).unwrap();
    handle.await.unwrap();
}

#[cfg(feature = "fs-store")]
#[tokio::test]
async fn test_directory_store_end_to_end() {
    use capture_config_agent::store::FsStore;

    let store_dir = TempDir::new().unwrap();
    fs::create_dir_all(store_dir.path().join("xnta/yaf-config/cluster/edge/nodes/probe-1"))
        .unwrap();
    let store = Arc::new(FsStore::open(store_dir.path()).unwrap());
    let a = agent(store.clone());
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

    // A short idle interval covers any event the platform watcher coalesces.
    let handle = ChangeWatcher::new(Arc::clone(&a.coordinator))
        .with_idle_timeout(Duration::from_secs(1))
        .spawn(async move {
            let _ = stopped.await;
        });

    let output = a.output.clone();
    wait_until(|| output.exists()).await;
    // Let the watcher arm before publishing.
    tokio::time::sleep(Duration::from_millis(200)).await;

    store
        .set(&a.paths.path(LayerScope::Node), br#"{"filter":{"dst_ports":[53,443]}}"#)
        .await
        .unwrap();

    wait_until(|| {
        fs::read_to_string(&output)
            .map(|text| text.contains("(dst port 53 or dst port 443)"))
            .unwrap_or(false)
    })
    .await;

    stop.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_store_leaves_file_alone() {
    let store = MemoryStore::new();
    let a = agent(Arc::new(store.clone()));
    assert_ok!(a.coordinator.reconcile().await);
    let before = fs::read_to_string(&a.output).unwrap();

    store.disconnect();
    assert_err!(a.coordinator.reconcile().await);
    assert_eq!(fs::read_to_string(&a.output).unwrap(), before);
    assert_eq!(a.manager.calls().len(), 3);
}
