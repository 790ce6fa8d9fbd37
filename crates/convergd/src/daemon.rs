//! Daemon assembly: config, store, simulated cluster, controller, API.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::sync::watch;
use tracing::{error, info};

use converge_api::{ApiState, build_router};
use converge_controller::Controller;
use converge_core::{ControllerSettings, ConvergeConfig, parse_duration};
use converge_state::{ReadinessMode, SimBackend, StateStore, WorkloadSpec, validate_spec};

/// Controller settings and workload specs from a config file, checked.
pub fn load_plan(config: &ConvergeConfig) -> anyhow::Result<(ControllerSettings, Vec<WorkloadSpec>)> {
    let settings = config.controller.settings()?;

    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(config.workload.len());
    for workload in &config.workload {
        if !seen.insert(workload.name.as_str()) {
            bail!("workload {} is defined more than once", workload.name);
        }
        let spec = WorkloadSpec::try_from(workload)
            .with_context(|| format!("workload {}", workload.name))?;
        validate_spec(&spec).with_context(|| format!("workload {}", workload.name))?;
        specs.push(spec);
    }
    Ok((settings, specs))
}

/// Simulated cluster seeded from the `[workload.simulate]` tables.
///
/// Workloads without one run exactly at their target utilization. The
/// readiness delay is cluster-wide, so the longest configured one wins.
pub fn build_sim(config: &ConvergeConfig) -> anyhow::Result<SimBackend> {
    let sim = SimBackend::new();
    let mut ready_delay = None;
    for workload in &config.workload {
        match &workload.simulate {
            Some(simulate) => {
                sim.set_utilization(&workload.name, simulate.utilization);
                if let Some(delay) = &simulate.ready_delay {
                    let secs = parse_duration(delay)
                        .with_context(|| format!("workload {} ready_delay", workload.name))?
                        .as_secs();
                    ready_delay = ready_delay.max(Some(secs));
                }
            }
            None => {
                sim.set_utilization(&workload.name, workload.target_utilization_percent as f64);
            }
        }
    }
    if let Some(secs) = ready_delay {
        sim.set_readiness(ReadinessMode::After(secs));
    }
    Ok(sim)
}

/// Store every configured spec. Re-applying an unchanged spec keeps its
/// revision, so restarts do not trigger rollouts.
pub fn seed_store(store: &StateStore, specs: &[WorkloadSpec]) -> anyhow::Result<()> {
    for spec in specs {
        let stored = store
            .apply_spec(spec)
            .with_context(|| format!("storing workload {}", spec.name))?;
        info!(workload = %stored.name, revision = stored.revision, "workload loaded from config");
    }
    Ok(())
}

/// `convergd validate`.
pub fn validate(config_path: &Path) -> anyhow::Result<()> {
    let config = ConvergeConfig::from_file(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let (settings, specs) = load_plan(&config)?;
    build_sim(&config)?;

    println!(
        "{}: ok (tick {:?}, {} workload(s))",
        config_path.display(),
        settings.tick_interval,
        specs.len()
    );
    for spec in &specs {
        println!(
            "  {}: {}..{} replicas, target {}%, image {}",
            spec.name,
            spec.min_replicas,
            spec.max_replicas,
            spec.target_utilization_percent,
            spec.template.image
        );
    }
    Ok(())
}

/// `convergd init`.
pub fn scaffold(name: &str, image: &str) -> anyhow::Result<String> {
    Ok(ConvergeConfig::scaffold(name, image).to_toml_string()?)
}

/// `convergd run`: serve until Ctrl-C.
pub async fn run(config_path: &Path, data_dir: &Path, port: Option<u16>) -> anyhow::Result<()> {
    info!("Converge daemon starting");

    let config = ConvergeConfig::from_file(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let (settings, specs) = load_plan(&config)?;

    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("converge.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    seed_store(&store, &specs)?;

    let sim = build_sim(&config)?;
    let backend = Arc::new(sim);
    info!(workloads = specs.len(), "simulated cluster ready");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Control loops ──────────────────────────────────────────

    let controller = Controller::new(store.clone(), Arc::clone(&backend), backend, settings);
    let handle = controller.handle();
    let controller_task = tokio::spawn(controller.run(shutdown_rx));

    // ── API server ─────────────────────────────────────────────

    let router = build_router(ApiState {
        store,
        controller: handle,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(settings.api_port)));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Err(e) = controller_task.await {
        error!(error = %e, "controller task failed");
    }
    info!("Converge daemon stopped");
    Ok(())
}
