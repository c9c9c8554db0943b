//! ---
//! rl_section: "04-cli-frontend"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Command line client for the racelog telemetry service."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rl_common::CliConfig;
use rl_net::{connect, resolve_event, ClientOptions};
use rl_proto::event::v1::event_service_client::EventServiceClient;
use rl_proto::event::v1::GetEventRequest;
use rl_proto::provider::v1::{RecordingMode, RegisterEventRequest};
use rl_replay::{GrpcDataProvider, ReplayTask};

#[derive(Debug, Subcommand)]
pub enum EventCommand {
    #[command(about = "Replay a recorded event against the destination server")]
    Replay(ReplayArgs),
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Event id or key on the source server.
    event: String,
    /// Source server address (host:port).
    #[arg(long)]
    source_addr: String,
    /// Connect to the source without TLS (development only).
    #[arg(long)]
    source_insecure: bool,
    /// Recording speed (0 means: go as fast as possible).
    #[arg(long)]
    speed: Option<u32>,
    /// Replay this many seconds of event time at maximum speed.
    #[arg(long, value_name = "SECONDS")]
    fast_forward: Option<u64>,
    /// Fast forward records prior to the race session.
    #[arg(long)]
    ff_prerace: Option<bool>,
    /// Event key to register on the destination (generated when omitted).
    #[arg(long)]
    key: Option<String>,
    /// Ask the destination not to persist the replayed data.
    #[arg(long)]
    do_not_persist: bool,
    /// Abort the replay after this many seconds.
    #[arg(long, value_name = "SECONDS")]
    max_duration: Option<u64>,
}

pub async fn run(cmd: EventCommand, config: &CliConfig) -> Result<()> {
    match cmd {
        EventCommand::Replay(args) => replay_event(args, config).await,
    }
}

async fn replay_event(args: ReplayArgs, config: &CliConfig) -> Result<()> {
    info!(addr = %args.source_addr, "connect source server");
    let source = connect(
        &args.source_addr,
        ClientOptions::new().with_tls_enabled(!args.source_insecure),
    )
    .await
    .context("could not connect source server")?;

    if config.addr.is_empty() {
        return Err(anyhow!("no destination address configured (--addr)"));
    }
    info!(addr = %config.addr, "connect dest server");
    let mut dest_options = ClientOptions::new().with_tls_enabled(!config.insecure);
    if let Some(ca) = &config.tls.ca {
        dest_options = dest_options.with_ca(ca);
    }
    if let (Some(cert), Some(key)) = (&config.tls.cert, &config.tls.key) {
        dest_options = dest_options.with_client_cert(cert, key);
    }
    if let Some(domain) = &config.tls.domain {
        dest_options = dest_options.with_domain(domain.clone());
    }
    let dest = connect(&config.addr, dest_options)
        .await
        .context("could not connect dest server")?;

    let request = GetEventRequest {
        event_selector: Some(resolve_event(&args.event)),
    };
    let mut event_service = EventServiceClient::new(source.clone());
    let response = event_service
        .get_event(request)
        .await
        .with_context(|| format!("could not load event '{}'", args.event))?
        .into_inner();
    let event = response
        .event
        .ok_or_else(|| anyhow!("source returned no event for '{}'", args.event))?;
    let track = response.track;
    info!(event = %event.name, id = event.id, "event loaded");

    let recording_mode = if args.do_not_persist || config.replay.do_not_persist {
        RecordingMode::DoNotPersist
    } else {
        RecordingMode::Persist
    };
    let event_key = args.key.clone().unwrap_or_default();
    let register_event = event.clone();
    let provider = GrpcDataProvider::new(source, event.id, move |_| RegisterEventRequest {
        key: event_key.clone(),
        event: Some(register_event.clone()),
        track: track.clone(),
        recording_mode: recording_mode as i32,
    })
    .with_page_size(config.replay.page_size);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    if let Some(max_duration) = args.max_duration {
        spawn_deadline(cancel.clone(), Duration::from_secs(max_duration));
    }

    let mut task = ReplayTask::new(dest, provider)
        .with_speed(args.speed.unwrap_or(config.replay.speed))
        .with_fast_forward_pre_race(args.ff_prerace.unwrap_or(config.replay.ff_prerace))
        .with_cancellation(cancel);
    let fast_forward = args
        .fast_forward
        .map(Duration::from_secs)
        .or(config.replay.fast_forward);
    if let Some(fast_forward) = fast_forward {
        task = task.with_fast_forward(fast_forward);
    }
    if let Some(token) = &config.token {
        task = task.with_token(token.clone());
    }

    task.replay(event.id)
        .await
        .context("error replaying event")?;
    info!(event = %event.name, "replay finished");
    Ok(())
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received interrupt signal, stopping");
            cancel.cancel();
        }
    });
}

fn spawn_deadline(cancel: CancellationToken, max_duration: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(max_duration).await;
        debug!("maximum replay duration reached, stopping");
        cancel.cancel();
    });
}
