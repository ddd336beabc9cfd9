use color_eyre::{eyre::eyre, Result};
use mqtt_toggle::config::AppConfig;
use mqtt_toggle::gate::{CommandGate, TriggerOutcome};
use mqtt_toggle::mqtt::rumqtt_transport::RumqttTransport;
use mqtt_toggle::mqtt::session::SessionHandle;
use mqtt_toggle::presenter::{PresenterView, StatusPresenter};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = setup_config().await?;
    info!(
        "Using broker {}:{} and topic '{}'",
        config.session.host, config.session.port, config.gate.topic
    );

    let (transport, link) = RumqttTransport::spawn(&config.session);
    let session = SessionHandle::spawn(link, &config.session);

    let presenter = Arc::new(StatusPresenter::new());
    session
        .set_listener(presenter.clone())
        .await
        .map_err(|e| eyre!("Failed to register presenter: {}", e))?;

    let gate = CommandGate::new(session.clone(), config.gate.clone());
    let _render_handle = tokio::spawn(render(presenter.subscribe(), gate.watch_visible()));

    start_gate(&gate).await;
    run_triggers(&gate, &presenter).await?;

    info!("Shutting down");
    session.close().await;
    transport.shutdown().await;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

async fn setup_config() -> Result<AppConfig> {
    let path = AppConfig::default_path();
    AppConfig::ensure_default(&path).await?;

    let mut config = AppConfig::load(&path).await?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

async fn start_gate(gate: &Arc<CommandGate>) {
    match gate.start().await {
        Ok(grant) if grant.is_downgraded() => warn!(
            "Subscribed to '{}' at {:?} (asked for {:?})",
            grant.topic, grant.granted, grant.requested
        ),
        Ok(grant) => info!("Subscribed to '{}' at {:?}", grant.topic, grant.granted),
        Err(e) => error!("Could not start: {} (type 'connect' to retry)", e),
    }
}

// Each stdin line stands in for a button press
async fn run_triggers(gate: &Arc<CommandGate>, presenter: &StatusPresenter) -> Result<()> {
    println!("Commands: <enter>/toggle, connect, status, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line.map_err(|e| eyre!("Failed to read stdin: {}", e))?,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "" | "toggle" => match gate.trigger().await {
                Ok(TriggerOutcome::Pending { id, desired }) => println!(
                    "Sent '{}' (packet {}), waiting for the broker",
                    gate.config().payload_for(desired),
                    id
                ),
                Ok(TriggerOutcome::Busy) => println!("Still waiting for the last command"),
                Ok(TriggerOutcome::NotReady(status)) => println!("Not ready ({})", status),
                Err(e) => error!("Trigger failed: {}", e),
            },
            "connect" => start_gate(gate).await,
            "status" => {
                let view = presenter.view();
                println!(
                    "{} | state: {} | received: {} | confirmed: {}",
                    view.text,
                    gate.config().payload_for(gate.visible_state().await),
                    view.messages_received,
                    view.deliveries_confirmed
                );
            }
            "quit" | "exit" => break,
            other => println!("Unknown command '{}'", other),
        }
    }
    Ok(())
}

async fn render(
    mut view_rx: watch::Receiver<PresenterView>,
    mut visible_rx: watch::Receiver<bool>,
) {
    let mut last_text = "";
    loop {
        tokio::select! {
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let text = view_rx.borrow_and_update().text;
                if text != last_text {
                    println!("[{}]", text);
                    last_text = text;
                }
            }
            changed = visible_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let on = *visible_rx.borrow_and_update();
                println!("[button {}]", if on { "ON" } else { "OFF" });
            }
        }
    }
}
