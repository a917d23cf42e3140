use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{ArgAction, Parser};
use log::LevelFilter;
use tokio::sync::mpsc;

use pinned_panel::config::loader;
use pinned_panel::{
    ControllerEvent, JsonPreferenceStore, LogCollector, PanelController, PanelKind, Preference,
    PreferenceStore, SimulatedHost, SimulatedHostOptions,
};

/// Keeps the host's sidebar on a pinned panel, driving a simulated host.
#[derive(Parser, Debug)]
#[command(name = "pinned_panel", version, about)]
struct Args {
    /// Controller config file (default: controller.toml in the config dir)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Preference storage file (default: storage.json in the data dir)
    #[arg(long)]
    store: Option<PathBuf>,
    /// Pin this panel, by label (e.g. "Queue", "Friend Activity")
    #[arg(long)]
    panel: Option<PanelKind>,
    /// Dwell time in seconds before a deviation is restored
    #[arg(long)]
    dwell: Option<u64>,
    /// Also append log lines to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Log at debug level
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let logger = LogCollector::install(level, args.log_file.clone()).map_err(|e| anyhow!(e))?;
    log::info!("pinned_panel {} starting", pinned_panel::VERSION);

    let config_path = match args.config {
        Some(path) => path,
        None => loader::get_controller_config_path()?,
    };
    let config = loader::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let store: Arc<dyn PreferenceStore> = match args.store {
        Some(path) => Arc::new(JsonPreferenceStore::new(path)),
        None => Arc::new(JsonPreferenceStore::open_default()?),
    };

    // Demo host: closing a panel reveals Now Playing, which then lingers.
    let host = SimulatedHost::new(SimulatedHostOptions {
        render_delays: vec![
            Duration::from_millis(40),
            Duration::from_millis(90),
            Duration::from_millis(70),
        ],
        reveal_now_playing_on_close: true,
        now_playing_persists: true,
        ..SimulatedHostOptions::default()
    });
    host.open_now(PanelKind::NowPlaying);

    let (event_tx, mut event_rx) = mpsc::channel::<ControllerEvent>(256);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log::debug!("event: {:?}", event);
        }
    });

    let controller = Arc::new(
        PanelController::new(Arc::new(host.clone()), store, config).with_events(event_tx),
    );
    controller.start().await?;

    if let Some(panel) = args.panel {
        let current = controller.preference();
        let prefs = Preference {
            enabled: true,
            desired_panel: Some(panel),
            dwell_seconds: args.dwell.unwrap_or(current.dwell_seconds),
        };
        let report = controller.apply_preference_and_reconcile(prefs).await?;
        if let Some(report) = report {
            log::info!("Preference applied: {} -> {:?}", report.outcome, report.final_state);
        }
    }

    let prefs = controller.preference();
    if prefs.active_target().is_none() {
        log::info!("Auto-restore is disabled; pass --panel <label> to enable it");
    } else {
        tokio::time::sleep(Duration::from_secs(3)).await;
        log::info!("Simulating the user opening Friend Activity");
        host.user_toggle(PanelKind::FriendActivity);
        tokio::time::sleep(prefs.dwell() + Duration::from_secs(2)).await;
    }

    log::info!(
        "Final panel: {}",
        controller
            .observe()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    log::info!("Synthetic activations: {:?}", host.activations());

    controller.shutdown();
    logger.wait_for_empty().map_err(|e| anyhow!(e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_panel_label_and_dwell_parse() {
        let args = Args::try_parse_from(["pinned_panel", "--panel", "Friend Activity", "--dwell", "45", "-v"]).unwrap();
        assert_eq!(args.panel, Some(PanelKind::FriendActivity));
        assert_eq!(args.dwell, Some(45));
        assert!(args.verbose);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_unknown_panel_is_rejected() {
        assert!(Args::try_parse_from(["pinned_panel", "--panel", "Lyrics"]).is_err());
        assert!(Args::try_parse_from(["pinned_panel", "--dwell", "soon"]).is_err());
    }
}
