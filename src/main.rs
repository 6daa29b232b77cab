use gdl90_monitor::{Channel, Monitor, MonitorConfig, TrackerState};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn live_set(state: &TrackerState) -> Vec<Channel> {
    state.live_channels().collect()
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let (monitor, mut status) = Monitor::start(MonitorConfig::default()).await?;
    info!(
        "Monitoring GDL-90 on {}, commands to {}",
        monitor.listen_addr(),
        monitor.command_target()
    );

    let mut updates = monitor.subscribe();
    let mut last_live = Vec::new();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Ctrl+C received, stopping");
                break;
            }
            Some(event) = status.recv() => {
                if event.is_configuration() {
                    warn!("{}", event);
                } else {
                    error!("{}", event);
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *updates.borrow_and_update();
                let live = live_set(&state);
                if live != last_live {
                    info!("{}", serde_json::to_string(&state)?);
                    last_live = live;
                } else {
                    debug!(total = state.total_received(), "update");
                }
            }
        }
    }

    let stats = monitor.receive_stats();
    info!(
        "Received {} datagrams ({} classified, {} dropped)",
        stats.datagrams, stats.classified, stats.unclassified
    );
    monitor.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    run().await
}
