use anyhow::{anyhow, Context, Result};
use clap::Parser;
use panel_core::{load_settings, PanelController};
use tracing::info;

mod ui;

use ui::PanelApp;

#[derive(Parser, Debug)]
#[command(name = "panel_gui", about = "Ignition control panel")]
struct Args {
    /// Device base URL; overrides panel.toml and PANEL_DEVICE_URL.
    #[arg(long)]
    device_url: Option<String>,
    /// Start in demo mode.
    #[arg(long)]
    demo: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(url) = args.device_url {
        settings.device_url = url;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build panel runtime")?;
    let controller = PanelController::connect(settings, runtime.handle().clone())?;
    controller.start();
    if args.demo && !controller.is_demo_active() {
        controller.start_demo();
    }
    info!(device_url = %controller.settings().device_url, "panel window opening");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Ignition Panel")
            .with_inner_size([980.0, 640.0])
            .with_min_inner_size([760.0, 520.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Ignition Panel",
        options,
        Box::new(move |_cc| Ok(Box::new(PanelApp::new(controller, runtime)))),
    )
    .map_err(|err| anyhow!("panel window failed: {err}"))
}
