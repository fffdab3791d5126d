use std::io;
use std::sync::Arc;

use clap::Parser;
use craftlink_bridge_agent::ResponsesAgent;
use craftlink_bridge_config::{
    load_bridge_config_with, load_model_config_with, BridgeConfig, BridgeOverrides,
    ModelOverrides,
};
use craftlink_bridge_core::{Agent, BridgeRuntime, CoreConfig, EchoAgent, StatusReporter};
use craftlink_bridge_link::LinkServer;
use craftlink_bridge_protocol::StatusEvent;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "craftlink", about = "Bridges Minecraft chat to an AI agent over WebSocket")]
struct Args {
    /// Address to bind (overrides CRAFTLINK_HOST)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides CRAFTLINK_PORT)
    #[arg(long, short)]
    port: Option<u16>,
    /// Only messages containing this word reach the agent
    #[arg(long)]
    wake_word: Option<String>,
    /// Regex a sender name must match
    #[arg(long)]
    player_pattern: Option<String>,
    #[arg(long)]
    cooldown_secs: Option<u64>,
    #[arg(long)]
    request_timeout_ms: Option<u64>,
    #[arg(long)]
    max_frame_bytes: Option<usize>,
    /// Fail pending command batches as soon as the peer disconnects
    #[arg(long)]
    fail_pending_on_disconnect: bool,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Print status events to stdout as JSON lines
    #[arg(long)]
    events_json: bool,
}

impl Args {
    fn bridge_overrides(&self) -> BridgeOverrides {
        BridgeOverrides {
            host: self.host.clone(),
            port: self.port,
            wake_word: self.wake_word.clone(),
            player_pattern: self.player_pattern.clone(),
            cooldown_secs: self.cooldown_secs,
            request_timeout_ms: self.request_timeout_ms,
            max_frame_bytes: self.max_frame_bytes,
            fail_pending_on_disconnect: self.fail_pending_on_disconnect.then_some(true),
        }
    }

    fn model_overrides(&self) -> ModelOverrides {
        ModelOverrides {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            env_key: None,
        }
    }
}

#[derive(Serialize)]
struct StampedEvent<'a> {
    at: String,
    #[serde(flatten)]
    event: &'a StatusEvent,
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let config = load_bridge_config_with(args.bridge_overrides())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;

    let agent: Arc<dyn Agent> = match load_model_config_with(args.model_overrides()) {
        Ok(model_config) => {
            info!(model = %model_config.model, base_url = %model_config.base_url, "using responses agent");
            Arc::new(ResponsesAgent::new(model_config))
        }
        Err(err) => {
            warn!(%err, "fallback to echo agent");
            Arc::new(EchoAgent)
        }
    };

    let (status, events_task) = if args.events_json {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        (
            StatusReporter::new(status_tx),
            Some(tokio::spawn(print_events(status_rx))),
        )
    } else {
        (StatusReporter::disabled(), None)
    };

    let runtime = BridgeRuntime::new(core_config(&config), agent, status)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    let server = LinkServer::bind(&config.bind_address(), Arc::new(runtime))
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::AddrNotAvailable, err.to_string()))?;

    server
        .run_until(shutdown_signal())
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;

    if let Some(events_task) = events_task {
        events_task
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))??;
    }
    Ok(())
}

async fn shutdown_signal() -> String {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "interrupted".to_string(),
        Err(err) => {
            warn!(%err, "cannot listen for ctrl-c; shutting down");
            format!("signal handler failed: {err}")
        }
    }
}

fn core_config(config: &BridgeConfig) -> CoreConfig {
    CoreConfig {
        request_timeout: config.request_timeout(),
        max_frame_bytes: config.max_frame_bytes,
        cooldown: config.cooldown(),
        wake_word: config.wake_word.clone(),
        player_pattern: config.player_pattern.clone(),
        fail_pending_on_disconnect: config.fail_pending_on_disconnect,
    }
}

async fn print_events(mut status_rx: mpsc::UnboundedReceiver<StatusEvent>) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = status_rx.recv().await {
        let at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        let line = serde_json::to_string(&StampedEvent { at, event: &event })
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;

        if matches!(event, StatusEvent::Stopped { .. }) {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_become_overrides() {
        let args = Args::parse_from([
            "craftlink",
            "--port",
            "19131",
            "--wake-word",
            "ai",
            "--fail-pending-on-disconnect",
        ]);
        let overrides = args.bridge_overrides();

        assert_eq!(overrides.port, Some(19131));
        assert_eq!(overrides.wake_word.as_deref(), Some("ai"));
        assert_eq!(overrides.fail_pending_on_disconnect, Some(true));
        assert_eq!(overrides.host, None);
    }

    #[test]
    fn absent_disconnect_flag_defers_to_environment() {
        let args = Args::parse_from(["craftlink"]);
        assert_eq!(args.bridge_overrides().fail_pending_on_disconnect, None);
    }

    #[test]
    fn core_config_carries_bridge_settings() {
        let config = BridgeConfig {
            cooldown_secs: 0,
            request_timeout_ms: 1500,
            wake_word: Some("ai".to_string()),
            ..BridgeConfig::default()
        };
        let core = core_config(&config);

        assert!(core.cooldown.is_zero());
        assert_eq!(core.request_timeout.as_millis(), 1500);
        assert_eq!(core.wake_word.as_deref(), Some("ai"));
        assert_eq!(core.max_frame_bytes, config.max_frame_bytes);
    }

    #[test]
    fn stamped_event_flattens_the_tag() {
        let event = StatusEvent::Stopped {
            reason: "bye".to_string(),
        };
        let value = serde_json::to_value(StampedEvent {
            at: "2024-01-01T00:00:00Z".to_string(),
            event: &event,
        })
        .expect("serialize event");

        assert_eq!(value["type"], "stopped");
        assert_eq!(value["reason"], "bye");
        assert_eq!(value["at"], "2024-01-01T00:00:00Z");
    }
}
