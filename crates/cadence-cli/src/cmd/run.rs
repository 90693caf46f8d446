use crate::output::{print_fields, print_json, print_table};
use crate::sim::SimWorld;
use anyhow::Context;
use cadence_core::config::has_errors;
use cadence_core::vision::PixelOracle;
use cadence_core::{Collaborators, ConfigWatcher, Engine, EngineConfig, StopOutcome, WarnLevel};
use clap::Args;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Stop after this many seconds (0 = run until Ctrl-C)
    #[arg(long, default_value = "10")]
    pub duration_secs: u64,

    /// Hot-reload the config file when it changes
    #[arg(long)]
    pub watch: bool,

    /// Start paused
    #[arg(long)]
    pub paused: bool,

    /// Probability that a simulated input is ignored (0.0 - 1.0)
    #[arg(long, default_value = "0.0")]
    pub failure_rate: f64,

    /// Per-poll probability that simulated engagement toggles (0.0 - 1.0)
    #[arg(long, default_value = "0.1")]
    pub engage_chance: f64,

    /// Seed for the simulated backends (default: random)
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn run(config_path: &Path, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let config = EngineConfig::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let warnings = config.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Warning => warn!(message = %w.message, "config warning"),
            WarnLevel::Error => eprintln!("[error] {}", w.message),
        }
    }
    if has_errors(&warnings) {
        anyhow::bail!("config validation found errors");
    }

    let world = Arc::new(SimWorld::new(
        &config,
        args.failure_rate,
        args.engage_chance,
        args.seed,
    ));
    let oracle = Arc::new(PixelOracle::new(config.settings.brightness_threshold));
    let collab = Collaborators::new(world.clone(), world.clone(), oracle)
        .with_engagement(world.clone());
    let config_path = config_path.to_path_buf();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let engine = Engine::new(config, collab).context("failed to build engine")?;
        match engine.preload_templates() {
            Ok(0) => {}
            Ok(count) => info!(count, "templates preloaded"),
            Err(e) => warn!(error = %e, "template preload failed"),
        }
        engine.start().context("failed to start engine")?;
        if args.paused {
            engine.pause();
        }
        let watcher = args
            .watch
            .then(|| ConfigWatcher::spawn(config_path.clone(), engine.clone()));

        let limit = async {
            match args.duration_secs {
                0 => std::future::pending::<()>().await,
                secs => tokio::time::sleep(Duration::from_secs(secs)).await,
            }
        };
        tokio::select! {
            _ = limit => {}
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for Ctrl-C")?;
                info!("interrupted");
            }
        }

        if let Some(watcher) = watcher {
            watcher.stop().await;
        }
        let outcome = engine.stop().await;

        report(&engine, &world, outcome, json)
    })
}

fn report(engine: &Engine, world: &SimWorld, outcome: StopOutcome, json: bool) -> anyhow::Result<()> {
    let status = engine.status();
    let perf = engine.perf_report();
    let attempts = world.attempts();

    if json {
        let value = serde_json::json!({
            "stop": format!("{outcome:?}").to_lowercase(),
            "status": status,
            "performance": perf,
            "attempts": attempts,
        });
        return print_json(&value);
    }

    print_fields(&[
        ("stop", format!("{outcome:?}").to_lowercase()),
        ("cycles", status.execution_count.to_string()),
        ("success rate", format!("{:.1}%", status.success_rate)),
        ("avg latency", format!("{:.1}ms", status.avg_latency_secs * 1_000.0)),
        ("final delay", format!("{}ms", status.current_delay_ms)),
        ("heightened", status.heightened.to_string()),
        ("last action", status.last_action.unwrap_or_else(|| "-".into())),
    ]);
    println!();
    println!("{perf}");

    if !attempts.is_empty() {
        println!();
        let rows = attempts
            .into_iter()
            .map(|(code, n)| vec![code, n.ok.to_string(), n.failed.to_string()])
            .collect();
        print_table(&["CODE", "SENT", "IGNORED"], rows);
    }
    Ok(())
}
