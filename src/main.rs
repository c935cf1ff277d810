//! capture-config-agent: keeps the packet capture process configured from
//! the coordination store.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use capture_config_agent::core::{
    AgentSettings, ApplyCoordinator, CaptureConfig, LayerScope, LayerState, StoreKind,
};
use capture_config_agent::error::{AgentError, Result};
use capture_config_agent::notify::{ChangeWatcher, shutdown_signal};
use capture_config_agent::render::Renderer;
use capture_config_agent::store::{CoordinationStore, LayerPaths, MemoryStore};
use capture_config_agent::supervisor::{
    ProcessManager, RestartOrchestrator, RestartPlan, SupervisorCtl,
};

/// Watches layered capture configuration in the coordination store, renders
/// the capture process configuration and restarts the capture processes.
#[derive(Parser, Debug)]
#[command(name = "capture-config-agent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Agent settings file (TOML, YAML or JSON)
    #[arg(
        short,
        long,
        env = "AGENT_CONFIG",
        default_value = "/etc/capture-config-agent/agent.toml"
    )]
    config: PathBuf,

    /// Cluster this node belongs to
    #[arg(long)]
    cluster: Option<String>,

    /// Node identity within the cluster
    #[arg(long)]
    node_id: Option<String>,

    /// Path of the rendered capture configuration
    #[arg(long)]
    output: Option<PathBuf>,

    /// Coordination store backend (fs or memory)
    #[arg(long)]
    store: Option<String>,

    /// Root directory of the fs store
    #[arg(long)]
    store_root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the store and apply changes until interrupted (default)
    Run,

    /// Resolve the layers once and render the configuration without restarting
    Render {
        /// Print to stdout instead of writing the output file
        #[arg(long)]
        stdout: bool,
    },

    /// Show layer state, the resolved configuration and process status
    Status,

    /// Publish a JSON layer file to the store
    Publish {
        /// Layer scope: global, cluster or node
        scope: LayerScope,
        /// JSON file holding the layer
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let settings = load_settings(&cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(settings).await,
        Commands::Render { stdout } => render_once(settings, stdout).await,
        Commands::Status => status(settings).await,
        Commands::Publish { scope, file } => publish(settings, scope, file).await,
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose {
        "capture_config_agent=debug"
    } else {
        "capture_config_agent=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_settings(cli: &Cli) -> Result<AgentSettings> {
    let mut loader = AgentSettings::builder()
        .with_file(&cli.config)
        .with_env_overrides("AGENT", "__");

    let overrides = [
        ("cluster", cli.cluster.clone()),
        ("node_id", cli.node_id.clone()),
        ("output_path", cli.output.as_ref().map(|p| p.display().to_string())),
        ("store.kind", cli.store.clone()),
        ("store.root", cli.store_root.as_ref().map(|p| p.display().to_string())),
    ];
    for (key, value) in overrides {
        if let Some(value) = value {
            loader = loader.with_override(key, value);
        }
    }

    let settings = loader.load()?;
    info!(
        config = %cli.config.display(),
        cluster = %settings.cluster,
        node_id = %settings.node_id,
        store = ?settings.store.kind,
        output = %settings.output_path.display(),
        "Settings loaded"
    );
    Ok(settings)
}

fn open_store(settings: &AgentSettings) -> Result<Arc<dyn CoordinationStore>> {
    match settings.store.kind {
        #[cfg(feature = "fs-store")]
        StoreKind::Fs => Ok(Arc::new(capture_config_agent::store::FsStore::open(
            &settings.store.root,
        )?)),
        #[cfg(not(feature = "fs-store"))]
        StoreKind::Fs => Err(AgentError::SettingsError(
            "the fs store backend needs the `fs-store` feature".to_string(),
        )),
        StoreKind::Memory => {
            warn!("Using the in-memory store; layers published by others are not visible");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn process_manager(settings: &AgentSettings) -> Arc<SupervisorCtl> {
    Arc::new(SupervisorCtl::new(
        &settings.restart.supervisorctl,
        settings.restart.supervisor_config.clone(),
    ))
}

fn build_coordinator(
    settings: &AgentSettings,
    store: Arc<dyn CoordinationStore>,
    manager: Arc<dyn ProcessManager>,
) -> ApplyCoordinator {
    let paths = LayerPaths::new(&settings.store.base_path, &settings.cluster, &settings.node_id);
    let renderer = Arc::new(Renderer::new(
        &settings.output_path,
        &settings.cluster,
        &settings.node_id,
    ));
    let restarter = RestartOrchestrator::new(manager, RestartPlan::from(&settings.restart));

    #[allow(unused_mut)]
    let mut coordinator = ApplyCoordinator::new(store, paths, renderer, restarter);

    #[cfg(feature = "metrics")]
    {
        let meter = opentelemetry::global::meter("capture-config-agent");
        coordinator =
            coordinator.with_metrics(capture_config_agent::metrics::ReconcileMetrics::new(meter));
    }

    coordinator
}

async fn run(settings: AgentSettings) -> Result<()> {
    // Handlers go in before the startup pass so a signal during it is queued.
    let shutdown = shutdown_signal()?;
    let store = open_store(&settings)?;
    let manager = process_manager(&settings);

    if !manager.ping().await {
        warn!(
            program = %settings.restart.supervisorctl,
            "Process manager is not answering; restarts will fail until it is"
        );
    }

    let coordinator = Arc::new(build_coordinator(&settings, store, manager));
    ChangeWatcher::new(coordinator)
        .with_idle_timeout(settings.idle_timeout())
        .run(shutdown)
        .await;

    info!("capture-config-agent stopped");
    Ok(())
}

async fn render_once(settings: AgentSettings, stdout: bool) -> Result<()> {
    let store = open_store(&settings)?;
    let paths = LayerPaths::new(&settings.store.base_path, &settings.cluster, &settings.node_id);
    let renderer = Renderer::new(&settings.output_path, &settings.cluster, &settings.node_id);
    // The restart plan is never run here.
    let coordinator = ApplyCoordinator::new(
        store,
        paths,
        Arc::new(renderer.clone()),
        RestartOrchestrator::new(
            process_manager(&settings),
            RestartPlan::from(&settings.restart),
        ),
    );

    let resolution = coordinator.resolve().await?;
    if stdout {
        print!("{}", renderer.render_now(&resolution.config));
    } else {
        use capture_config_agent::render::ConfigWriter;
        renderer.write(&resolution.config)?;
        println!("Rendered {}", renderer.path().display());
    }
    Ok(())
}

async fn status(settings: AgentSettings) -> Result<()> {
    let store = open_store(&settings)?;
    let manager = process_manager(&settings);
    let coordinator = build_coordinator(&settings, store, manager.clone());

    println!("Store: {}", coordinator.store().name());
    println!("Cluster: {}  Node: {}", settings.cluster, settings.node_id);
    println!();

    let resolution = coordinator.resolve().await?;
    for (scope, path, state) in &resolution.layers {
        let state = match state {
            LayerState::Missing => "absent".to_string(),
            LayerState::Malformed { reason } => format!("malformed ({})", reason),
            LayerState::Present(_) => "present".to_string(),
        };
        println!("  {:<8} {:<60} {}", scope, path, state);
    }
    println!();
    println!("Resolved configuration:");
    println!("{}", serde_json::to_string_pretty(&resolution.config)?);
    println!();

    for target in [&settings.restart.upstream, &settings.restart.dependent] {
        match manager.status(target).await {
            Ok(output) => println!("{}", output.output),
            Err(e) => println!("{}: {}", target, e),
        }
    }
    Ok(())
}

async fn publish(settings: AgentSettings, scope: LayerScope, file: PathBuf) -> Result<()> {
    let data = tokio::fs::read(&file).await?;
    // Refuse to publish what the agents would ignore as malformed.
    CaptureConfig::from_layer_bytes(&data).map_err(|e| AgentError::MalformedLayer {
        path: file.display().to_string(),
        reason: e.to_string(),
    })?;

    let store = open_store(&settings)?;
    let paths = LayerPaths::new(&settings.store.base_path, &settings.cluster, &settings.node_id);
    let path = paths.path(scope);
    store.set(&path, &data).await?;

    info!(%scope, %path, bytes = data.len(), "Layer published");
    println!("Published {} layer to {}", scope, path);
    Ok(())
}
