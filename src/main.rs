use std::sync::Arc;

use anyhow::Context;
use tokio::io::BufReader;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{error, info, warn};

use pvz_autopilot::boundary::ChannelBoundary;
use pvz_autopilot::config::AutopilotConfig;
use pvz_autopilot::db::{MemoryStorage, SqliteStorage, Storage};
use pvz_autopilot::dqn::DQNAgent;
use pvz_autopilot::episode::EpisodeTracker;
use pvz_autopilot::knowledge::KnowledgeAdvisor;
use pvz_autopilot::player::AutoPlayer;
use pvz_autopilot::reward::RewardModel;
use pvz_autopilot::{bridge, event_loop, log};

fn open_storage(path: Option<&str>) -> Arc<dyn Storage> {
    let Some(path) = path else {
        info!("no storage path configured, state will not survive restart");
        return Arc::new(MemoryStorage::new());
    };
    match SqliteStorage::open(path) {
        Ok(db) => {
            info!(path, "storage opened");
            Arc::new(db)
        }
        Err(e) => {
            warn!(path, error = %e, "storage unavailable, falling back to memory");
            Arc::new(MemoryStorage::new())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cfg = AutopilotConfig::load().context("loading configuration")?;
    log::init(&cfg.log).context("initializing logging")?;

    let storage = open_storage(cfg.storage.path.as_deref());

    let mut agent = DQNAgent::new(cfg.agent.clone());
    if agent.load(storage.as_ref()) {
        info!(epsilon = agent.epsilon(), "resumed saved model");
    }
    let tracker = EpisodeTracker::new(cfg.player.episodes.clone(), Some(storage.clone()));

    let (cmd_tx, cmd_rx) = unbounded_channel();
    let (ev_tx, ev_rx) = unbounded_channel();
    let (ctl_tx, ctl_rx) = unbounded_channel();

    let rewards = RewardModel::new(cfg.rewards.clone());
    let player = AutoPlayer::new(cfg.player.clone(), agent, rewards, tracker, Some(storage.clone()))
        .with_boundary(Box::new(ChannelBoundary::new(cmd_tx)))
        .with_advisor(Box::new(KnowledgeAdvisor::default()));

    let writer = tokio::spawn(bridge::write_commands(tokio::io::stdout(), cmd_rx));
    let reader = tokio::spawn(bridge::read_input(BufReader::new(tokio::io::stdin()), ev_tx, ctl_tx));

    info!("autopilot ready, waiting for aiStart");
    let player = event_loop::run(player, ev_rx, ctl_rx).await;

    if let Err(e) = player.agent().save(storage.as_ref()) {
        error!(error = %e, "final model save failed");
    }
    let stats = player.tracker().statistics();
    info!(games = stats.stats.games_played, win_rate = stats.win_rate, "shutting down");

    // Dropping the player closes the command channel and lets the writer drain.
    drop(player);
    writer.await.context("command writer panicked")?.context("writing commands")?;
    if let Ok(Err(e)) = reader.await {
        warn!(error = %e, "input reader stopped with an error");
    }
    Ok(())
}
