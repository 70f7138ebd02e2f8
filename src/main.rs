mod cli;

use anyhow::{Context, Result};
use camwatch::address::redact;
use camwatch::{
    Collaborator, Credentials, HttpCollaborator, LinkOpener, Notifier, PollEvent, PollScheduler,
    Session, TelemetrySnapshot, build_stream_address, config, suggest_port,
};
use clap::Parser;
use cli::{Cli, Command, CredentialArgs, WatchArgs};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut overrides = cli.global.overrides();
    if let Command::Watch(args) = &cli.command {
        overrides.telemetry_period_ms = args.telemetry_ms;
        overrides.frame_period_ms = args.frame_ms;
    }
    let settings = config::load_or_create(cli.global.config.as_deref())
        .context("failed loading settings")?
        .with_overrides(&overrides);
    settings.validate().context("invalid settings")?;

    let collaborator: Arc<dyn Collaborator> = Arc::new(
        HttpCollaborator::new(settings.server_url()?, settings.request_timeout())
            .context("failed creating server client")?,
    );
    let session = Arc::new(Session::new(
        Arc::clone(&collaborator),
        settings.request_timeout(),
    ));

    match cli.command {
        Command::Scan => {
            let devices = finish(&session, session.scan_network().await)?;
            println!("{:<16}  {:<6}  PORTS", "ADDRESS", "PROBE");
            for device in &devices {
                let ports = device
                    .open_ports
                    .iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                println!(
                    "{:<16}  {:<6}  {ports}",
                    device.address,
                    suggest_port(device)
                );
            }
        }
        Command::Probe(args) => {
            let credentials = credentials(&args.credentials);
            let port = match args.port {
                Some(port) => port,
                None => session.suggested_probe_port(&args.address).await,
            };
            let candidates = finish(
                &session,
                session
                    .probe_streams(&args.address, port, &credentials)
                    .await,
            )?;
            for (idx, candidate) in candidates.iter().enumerate() {
                println!("{idx:>3}  {}", candidate.label());
            }

            if let Some(index) = args.select {
                let resolved = finish(&session, session.select_candidate(index, &credentials))?;
                println!("{}", redact(&resolved));
            }
        }
        Command::Resolve(args) => {
            let resolved = build_stream_address(&args.address, &credentials(&args.credentials));
            if args.show_secret {
                println!("{resolved}");
            } else {
                println!("{}", redact(&resolved));
            }
        }
        Command::Test(args) => {
            finish(&session, session.test_stream(&args.address).await)?;
        }
        Command::Activate(args) => {
            finish(&session, session.activate_stream(&args.address).await)?;
            if let Some(current) = session.displayed_stream() {
                println!("current: {}", redact(&current));
            }
        }
        Command::Current => {
            session.refresh_displayed_stream().await;
            match session.displayed_stream() {
                Some(current) => println!("{}", redact(&current)),
                None => println!("No active stream."),
            }
        }
        Command::Watch(args) => {
            run_watch(&session, &args, &settings).await?;
        }
        Command::Alert(args) => {
            let notifier = Notifier::new(Arc::clone(&collaborator), settings.request_timeout());
            if args.deep_link {
                notifier
                    .dispatch_deep_link(args.channel, &StdoutOpener)
                    .await;
            } else {
                // Wait for the spawned send so the process does not exit under it.
                notifier
                    .dispatch_server(args.channel)
                    .await
                    .context("alert task failed")?;
                println!("{} alert requested", args.channel);
            }
        }
    }

    Ok(())
}

async fn run_watch(
    session: &Arc<Session>,
    args: &WatchArgs,
    settings: &config::Settings,
) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let scheduler = PollScheduler::start(Arc::clone(session), settings.periods(), Some(events_tx));

    let activated = session.activate_stream(&args.address).await;
    if let Err(err) = finish(session, activated) {
        scheduler.teardown(session);
        return Err(err);
    }
    if let Some(current) = session.displayed_stream() {
        println!("current: {}", redact(&current));
    }

    let mut status_rx = session.subscribe();
    let mut last_snapshot: Option<TelemetrySnapshot> = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", *status_rx.borrow_and_update());
            }
            event = events_rx.recv() => match event {
                Some(PollEvent::Telemetry(snapshot)) => {
                    if last_snapshot.as_ref() != Some(&snapshot) {
                        println!("{snapshot}");
                        last_snapshot = Some(snapshot);
                    }
                }
                Some(PollEvent::Frame { token, frame }) => {
                    debug!(token, bytes = frame.len(), "frame received");
                    if let Some(path) = args.frame_out.as_ref()
                        && let Err(err) = tokio::fs::write(path, &frame).await
                    {
                        warn!(path = %path.display(), error = %err, "failed writing frame");
                    }
                }
                None => break,
            },
        }
    }

    scheduler.teardown(session);
    println!("Session closed.");
    Ok(())
}

/// Prints the status the operation settled on and carries it into any error.
fn finish<T>(session: &Session, result: camwatch::Result<T>) -> Result<T> {
    let value = result.with_context(|| session.status().to_string())?;
    println!("{}", session.status());
    Ok(value)
}

fn credentials(args: &CredentialArgs) -> Credentials {
    Credentials::new(args.user.clone(), args.password.clone())
}

struct StdoutOpener;

impl LinkOpener for StdoutOpener {
    fn open(&self, url: &str) -> std::io::Result<()> {
        println!("Open this link to send the alert:\n{url}");
        Ok(())
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camwatch=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
