use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use panel_core::{load_settings, PanelController, PanelEvent, PanelView, PollOutcome};
use shared::{domain::IgnitionState, protocol::ControlRequest};
use tokio::{runtime::Handle, time};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::warn;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "panel", about = "Headless ignition control panel")]
struct Args {
    /// Device base URL; overrides panel.toml and PANEL_DEVICE_URL.
    #[arg(long, global = true)]
    device_url: Option<String>,
    /// Print views as JSON instead of one-line summaries.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and print the device status once.
    Status,
    /// Poll continuously and print every update.
    Watch {
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Turn the key. START is held for `--hold-ms` and then released.
    Turn {
        position: IgnitionState,
        #[arg(long, default_value_t = 2000)]
        hold_ms: u64,
    },
    /// Send one of the panel buttons.
    Action { action: Action },
    /// Play the built-in demo sequence without touching the device.
    Demo {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Action {
    EmergencyStop,
    Lights,
    Horn,
    ToggleSleep,
    SleepNow,
}

impl Action {
    fn wire_name(self) -> &'static str {
        match self {
            Self::EmergencyStop => "emergency_stop",
            Self::Lights => "lights",
            Self::Horn => "horn",
            Self::ToggleSleep => "toggle_sleep_mode",
            Self::SleepNow => "sleep_now",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(url) = args.device_url {
        settings.device_url = url;
    }
    let controller = PanelController::connect(settings, Handle::current())?;

    match args.command {
        Command::Status => {
            if let PollOutcome::Failed { error, .. } = controller.poll_now().await {
                bail!("device status unavailable: {error}");
            }
            print_view(&controller.view(), args.json)?;
        }
        Command::Watch { seconds } => {
            controller.start();
            watch(&controller, seconds.map(Duration::from_secs), args.json).await?;
            controller.stop();
        }
        Command::Turn { position, hold_ms } => {
            turn(&controller, position, Duration::from_millis(hold_ms)).await?;
            print_view(&controller.view(), args.json)?;
        }
        Command::Action { action } => {
            let mut events = controller.subscribe();
            controller.press(action.wire_name())?;
            await_settled(&mut events).await?;
            print_view(&controller.view(), args.json)?;
        }
        Command::Demo { seconds } => {
            controller.start_demo();
            let mut ticker = time::interval(Duration::from_secs(1));
            for _ in 0..=seconds {
                ticker.tick().await;
                print_view(&controller.view(), args.json)?;
            }
            controller.stop_demo();
            controller.stop();
        }
    }
    Ok(())
}

async fn turn(
    controller: &Arc<PanelController>,
    position: IgnitionState,
    hold: Duration,
) -> Result<()> {
    if position == IgnitionState::Start {
        controller.dispatch(ControlRequest::KeyStartHold { held: true });
        time::sleep(hold).await;
        let mut events = controller.subscribe();
        controller.dispatch(ControlRequest::KeyStartHold { held: false });
        return await_settled(&mut events).await;
    }

    let mut events = controller.subscribe();
    controller.request_key_position(position.key_position().get())?;
    await_settled(&mut events).await
}

/// Waits until the device has answered the last command and the follow-up
/// status has been applied.
async fn await_settled(events: &mut tokio::sync::broadcast::Receiver<PanelEvent>) -> Result<()> {
    let settled = time::timeout(SETTLE_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(PanelEvent::StatusApplied) => return Ok(()),
                Ok(PanelEvent::CommandFailed { message, .. }) => bail!(message),
                Ok(PanelEvent::ConnectionLost(error)) => bail!("device unreachable: {error}"),
                Ok(_) => {}
                Err(err) => bail!("event stream closed: {err}"),
            }
        }
    })
    .await;
    match settled {
        Ok(result) => result,
        Err(_) => bail!("no status from device within {SETTLE_TIMEOUT:?}"),
    }
}

async fn watch(controller: &PanelController, limit: Option<Duration>, json: bool) -> Result<()> {
    let mut stream = BroadcastStream::new(controller.subscribe());
    let deadline = async {
        match limit {
            Some(limit) => time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            event = stream.next() => match event {
                Some(Ok(PanelEvent::StatusApplied)) => print_view(&controller.view(), json)?,
                Some(Ok(PanelEvent::ConnectionLost(error))) => warn!(%error, "lost device connection"),
                Some(Ok(PanelEvent::ConnectionRestored)) => println!("connection restored"),
                Some(Ok(_)) => {}
                Some(Err(lagged)) => warn!(%lagged, "watch output fell behind"),
                None => break,
            },
        }
    }
    Ok(())
}

fn print_view(view: &PanelView, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(view)?);
        return Ok(());
    }

    let gauges = view
        .gauges
        .iter()
        .map(|gauge| format!("{} {:.1}{}", gauge.name, gauge.value, gauge.unit))
        .collect::<Vec<_>>()
        .join("  ");
    let mut flags = Vec::new();
    if view.lights.engine {
        flags.push("ENGINE");
    }
    if view.lights.oil {
        flags.push("OIL");
    }
    if view.lights.temperature {
        flags.push("TEMP");
    }
    if view.lights.battery {
        flags.push("BATT");
    }
    if view.lights.glow {
        flags.push("GLOW");
    }
    if view.lights.ready {
        flags.push("READY");
    }
    if view.lights_on {
        flags.push("LIGHTS");
    }

    println!(
        "[{:<5}] {} | {} | {}  countdown {}{}{}",
        view.key_state.label(),
        view.headline,
        view.detail,
        gauges,
        view.countdown,
        if flags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", flags.join(" "))
        },
        if view.demo_active { "  (demo)" } else { "" },
    );
    if let Some(alert) = &view.alert {
        println!("  ! {alert}");
    }
    Ok(())
}
