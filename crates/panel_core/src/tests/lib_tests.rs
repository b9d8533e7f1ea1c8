use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use serde_json::{json, Value};
use shared::{
    domain::IgnitionState,
    error::ControlError,
    protocol::{ControlRequest, ControlResponse, DeviceStatus, OperationalState},
};
use tokio::{net::TcpListener, runtime::Handle, sync::broadcast, time};

use super::*;
use crate::error::TransportError;

const PIVOT: Point = Point::new(100.0, 100.0);
const RADIUS: f64 = 60.0;

fn at(degrees: f64) -> Point {
    PIVOT.offset_at(degrees, RADIUS)
}

type ScriptedStatus = (Duration, Result<DeviceStatus, TransportError>);

/// In-memory device: records every command and replays queued status
/// results. With the queue empty it answers with `idle` (or fails when unset).
#[derive(Default)]
struct ScriptedTransport {
    commands: Mutex<Vec<ControlRequest>>,
    statuses: Mutex<VecDeque<ScriptedStatus>>,
    idle: Mutex<Option<DeviceStatus>>,
    reject_with: Mutex<Option<String>>,
    first_send_delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
}

impl ScriptedTransport {
    fn answering(status: DeviceStatus) -> Arc<Self> {
        let transport = Self::default();
        *transport.idle.lock().unwrap() = Some(status);
        Arc::new(transport)
    }

    fn queue(&self, delay: Duration, result: Result<DeviceStatus, TransportError>) {
        self.statuses.lock().unwrap().push_back((delay, result));
    }

    fn commands(&self) -> Vec<ControlRequest> {
        self.commands.lock().unwrap().clone()
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceTransport for ScriptedTransport {
    async fn send_command(
        &self,
        request: &ControlRequest,
    ) -> Result<ControlResponse, TransportError> {
        let delay = self.first_send_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            time::sleep(delay).await;
        }
        self.commands.lock().unwrap().push(request.clone());
        match self.reject_with.lock().unwrap().clone() {
            Some(message) => Ok(ControlResponse::rejected(message)),
            None => Ok(ControlResponse::ok()),
        }
    }

    async fn fetch_status(&self) -> Result<DeviceStatus, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let scripted = self.statuses.lock().unwrap().pop_front();
        match scripted {
            Some((delay, result)) => {
                time::sleep(delay).await;
                result
            }
            None => self
                .idle
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| TransportError::Unreachable("no scripted status".into())),
        }
    }
}

fn status_with_key(state: IgnitionState) -> DeviceStatus {
    DeviceStatus {
        state: OperationalState::On,
        key_position: Some(state.key_position()),
        ..DeviceStatus::default()
    }
}

fn controller_for(transport: Arc<ScriptedTransport>) -> Arc<PanelController> {
    PanelController::new(PanelSettings::default(), transport, Handle::current())
}

/// Drags the key from where it is to `degrees` in small steps.
fn drag_to(controller: &Arc<PanelController>, from: f64, degrees: f64) {
    let steps = 30;
    for step in 1..=steps {
        let target = from + (degrees - from) * f64::from(step) / f64::from(steps);
        controller.pointer_move(at(target), PIVOT);
    }
}

async fn settle() {
    time::sleep(Duration::from_millis(1)).await;
}

/// Collects key changes as they happen; demo ticks would overflow a
/// receiver that is only read at the end.
fn record_key_changes(controller: &PanelController) -> Arc<Mutex<Vec<IgnitionState>>> {
    let mut rx = controller.subscribe();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PanelEvent::KeyChanged(transition)) => sink.lock().unwrap().push(transition.to),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    seen
}

fn drain(rx: &mut broadcast::Receiver<PanelEvent>) -> Vec<PanelEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn start_hold_sends_exactly_one_press_and_release() {
    let transport = ScriptedTransport::answering(status_with_key(IgnitionState::On));
    let controller = controller_for(Arc::clone(&transport));

    assert!(controller.pointer_down(at(-30.0), PIVOT));
    drag_to(&controller, -30.0, 90.0);
    for _ in 0..25 {
        controller.pointer_move(at(90.0), PIVOT);
    }
    settle().await;
    assert_eq!(controller.view().key_state, IgnitionState::Start);

    controller.pointer_up();
    time::sleep(Duration::from_millis(250)).await;
    assert_eq!(controller.view().key_state, IgnitionState::Start);
    time::sleep(Duration::from_millis(100)).await;

    let view = controller.view();
    assert_eq!(view.key_state, IgnitionState::On);
    assert_eq!(view.key_angle, 0.0);

    let holds: Vec<_> = transport
        .commands()
        .into_iter()
        .filter(|request| matches!(request, ControlRequest::KeyStartHold { .. }))
        .collect();
    assert_eq!(
        holds,
        vec![
            ControlRequest::KeyStartHold { held: true },
            ControlRequest::KeyStartHold { held: false },
        ]
    );
    assert_eq!(
        transport.commands()[..2],
        [
            ControlRequest::key_position(1).unwrap(),
            ControlRequest::key_position(2).unwrap(),
        ]
    );
    assert_eq!(controller.commands_sent(), 4);
}

#[tokio::test(start_paused = true)]
async fn commands_reach_device_in_issue_order_when_first_send_is_slow() {
    let transport = ScriptedTransport::answering(status_with_key(IgnitionState::Glow));
    *transport.first_send_delay.lock().unwrap() = Some(Duration::from_millis(100));
    let controller = controller_for(Arc::clone(&transport));

    assert!(controller.pointer_down(at(-30.0), PIVOT));
    drag_to(&controller, -30.0, 50.0);
    drag_to(&controller, 50.0, 90.0);
    drag_to(&controller, 90.0, 40.0);
    controller.pointer_up();
    assert_eq!(controller.view().key_state, IgnitionState::Glow);

    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        transport.commands(),
        vec![
            ControlRequest::key_position(1).unwrap(),
            ControlRequest::key_position(2).unwrap(),
            ControlRequest::KeyStartHold { held: true },
            ControlRequest::KeyStartHold { held: false },
            ControlRequest::key_position(2).unwrap(),
        ]
    );
    assert_eq!(controller.commands_sent(), 5);
}

#[tokio::test(start_paused = true)]
async fn stop_during_spring_back_releases_start_and_restart_unfreezes_key() {
    let transport = ScriptedTransport::answering(status_with_key(IgnitionState::Glow));
    let controller = controller_for(Arc::clone(&transport));

    assert!(controller.pointer_down(at(-30.0), PIVOT));
    drag_to(&controller, -30.0, 90.0);
    controller.pointer_up();
    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.view().key_state, IgnitionState::Start);

    controller.stop();
    let view = controller.view();
    assert_eq!(view.key_state, IgnitionState::On);
    assert_eq!(view.key_angle, 0.0);

    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        transport.commands(),
        vec![
            ControlRequest::key_position(1).unwrap(),
            ControlRequest::key_position(2).unwrap(),
            ControlRequest::KeyStartHold { held: true },
            ControlRequest::KeyStartHold { held: false },
        ]
    );
    assert_eq!(transport.fetches(), 0, "no refresh after stop");

    controller.start();
    time::sleep(Duration::from_millis(3_500)).await;
    assert!(transport.fetches() >= 3);
    assert_eq!(controller.view().key_state, IgnitionState::Glow);
    assert!(controller.pointer_down(at(45.0), PIVOT));
    controller.stop();
}

#[tokio::test(start_paused = true)]
async fn poll_during_drag_does_not_move_key() {
    let transport = ScriptedTransport::answering(status_with_key(IgnitionState::Glow));
    let controller = controller_for(Arc::clone(&transport));

    assert!(controller.pointer_down(at(-30.0), PIVOT));
    drag_to(&controller, -30.0, -20.0);
    let before = controller.view();

    let outcome = controller.poll_now().await;
    assert!(matches!(
        outcome,
        PollOutcome::Applied {
            transition: None,
            ..
        }
    ));
    let after = controller.view();
    assert_eq!(after.key_state, IgnitionState::Off);
    assert_eq!(after.key_angle, before.key_angle);
    assert_eq!(after.headline, "SYSTEM ON");

    controller.pointer_up();
    time::sleep(Duration::from_millis(250)).await;
    controller.poll_now().await;
    assert_eq!(controller.view().key_state, IgnitionState::Glow);
}

#[tokio::test(start_paused = true)]
async fn demo_plays_without_sending_commands() {
    let transport = ScriptedTransport::answering(status_with_key(IgnitionState::On));
    let controller = controller_for(Arc::clone(&transport));
    let key_changes = record_key_changes(&controller);

    controller.start_demo();
    assert!(controller.is_demo_active());
    assert!(!controller.pointer_down(at(-30.0), PIVOT));
    assert_eq!(controller.press("horn"), Ok(false));

    time::sleep(Duration::from_secs(105)).await;

    assert_eq!(controller.commands_sent(), 0);
    assert!(transport.commands().is_empty());
    assert_eq!(transport.fetches(), 0);

    let forced: Vec<_> = key_changes.lock().unwrap().iter().take(5).copied().collect();
    assert_eq!(
        forced,
        vec![
            IgnitionState::On,
            IgnitionState::Glow,
            IgnitionState::Start,
            IgnitionState::On,
            IgnitionState::Off,
        ]
    );

    controller.stop_demo();
    assert!(!controller.is_demo_active());
    settle().await;
    assert_eq!(transport.fetches(), 1);
    assert_eq!(controller.commands_sent(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_polls_keep_values_until_recovery() {
    let transport = Arc::new(ScriptedTransport::default());
    let mut healthy = status_with_key(IgnitionState::On);
    healthy.readings.oil_pressure = 41.0;
    transport.queue(Duration::ZERO, Ok(healthy.clone()));
    for _ in 0..2 {
        transport.queue(
            Duration::ZERO,
            Err(TransportError::Unreachable("timed out".into())),
        );
    }
    healthy.readings.oil_pressure = 52.0;
    transport.queue(Duration::ZERO, Ok(healthy));

    let controller = controller_for(Arc::clone(&transport));
    let mut events = controller.subscribe();

    controller.poll_now().await;
    controller.poll_now().await;
    controller.poll_now().await;

    let view = controller.view();
    assert!(view.connection_error);
    assert_eq!(view.headline, "CONNECTION ERROR");
    assert_eq!(view.gauge("oil_pressure").map(|g| g.value), Some(41.0));

    controller.poll_now().await;
    let view = controller.view();
    assert!(!view.connection_error);
    assert_eq!(view.gauge("oil_pressure").map(|g| g.value), Some(52.0));

    let events = drain(&mut events);
    let lost = events
        .iter()
        .filter(|event| matches!(event, PanelEvent::ConnectionLost(_)))
        .count();
    let restored = events
        .iter()
        .filter(|event| matches!(event, PanelEvent::ConnectionRestored))
        .count();
    assert_eq!((lost, restored), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn slow_response_is_discarded_after_newer_one() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.queue(
        Duration::from_millis(800),
        Err(TransportError::Unreachable("timed out".into())),
    );
    transport.queue(
        Duration::from_millis(10),
        Ok(status_with_key(IgnitionState::Glow)),
    );
    let controller = controller_for(Arc::clone(&transport));

    let (slow, fast) = tokio::join!(controller.poll_now(), async {
        settle().await;
        controller.poll_now().await
    });

    assert!(matches!(fast, PollOutcome::Applied { .. }));
    assert_eq!(slow, PollOutcome::Stale);
    let view = controller.view();
    assert!(!view.connection_error);
    assert_eq!(view.key_state, IgnitionState::Glow);
}

#[tokio::test(start_paused = true)]
async fn long_press_toggles_demo() {
    let transport = ScriptedTransport::answering(status_with_key(IgnitionState::Off));
    let controller = controller_for(Arc::clone(&transport));

    controller.demo_button_down();
    time::sleep(Duration::from_millis(2900)).await;
    assert!(!controller.is_demo_active());
    time::sleep(Duration::from_millis(200)).await;
    assert!(controller.is_demo_active());
    controller.demo_button_up();

    controller.demo_button_down();
    time::sleep(Duration::from_secs(1)).await;
    controller.demo_button_up();
    time::sleep(Duration::from_secs(5)).await;
    assert!(controller.is_demo_active());

    controller.demo_button_down();
    time::sleep(Duration::from_millis(3100)).await;
    assert!(!controller.is_demo_active());
}

#[tokio::test(start_paused = true)]
async fn invalid_key_position_is_rejected_locally() {
    let transport = ScriptedTransport::answering(status_with_key(IgnitionState::Off));
    let controller = controller_for(Arc::clone(&transport));

    assert_eq!(
        controller.request_key_position(4),
        Err(ControlError::InvalidKeyPosition(4))
    );
    assert!(matches!(
        controller.press("launch"),
        Err(ControlError::UnknownAction(_))
    ));
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(controller.commands_sent(), 0);
    assert_eq!(transport.fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn command_schedules_status_refresh() {
    let transport = ScriptedTransport::answering(status_with_key(IgnitionState::On));
    let controller = controller_for(Arc::clone(&transport));

    assert_eq!(controller.press("horn"), Ok(true));
    assert_eq!(controller.view().headline, "HORN ACTIVATED");
    time::sleep(Duration::from_millis(400)).await;
    assert_eq!(transport.commands(), vec![ControlRequest::Horn]);
    assert_eq!(transport.fetches(), 0);

    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.fetches(), 1);
    // the applied status replaces the optimistic headline
    assert_eq!(controller.view().headline, "SYSTEM ON");
}

#[tokio::test(start_paused = true)]
async fn rejected_command_shows_alert_without_rollback() {
    let transport = ScriptedTransport::answering(status_with_key(IgnitionState::Off));
    *transport.reject_with.lock().unwrap() = Some("Key is OFF".into());
    let controller = controller_for(Arc::clone(&transport));

    assert!(controller.pointer_down(at(-30.0), PIVOT));
    drag_to(&controller, -30.0, 0.0);
    controller.pointer_up();
    settle().await;

    let view = controller.view();
    assert_eq!(view.alert.as_deref(), Some("Command failed: Key is OFF"));
    assert_eq!(view.key_state, IgnitionState::On);

    time::sleep(Duration::from_millis(3100)).await;
    let view = controller.view();
    assert_eq!(view.alert, None);
    // the refresh poll is what brings the key back
    assert_eq!(view.key_state, IgnitionState::Off);
}

#[tokio::test(start_paused = true)]
async fn entering_demo_releases_held_start() {
    let transport = ScriptedTransport::answering(status_with_key(IgnitionState::On));
    let controller = controller_for(Arc::clone(&transport));

    assert!(controller.pointer_down(at(-30.0), PIVOT));
    drag_to(&controller, -30.0, 90.0);
    settle().await;
    assert!(controller.view().flags.start_held);

    controller.start_demo();
    time::sleep(Duration::from_secs(2)).await;

    let commands = transport.commands();
    assert_eq!(
        commands.last(),
        Some(&ControlRequest::KeyStartHold { held: false })
    );
    let sent = controller.commands_sent();
    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(controller.commands_sent(), sent);
    assert!(!controller.view().flags.dragging);
}

#[tokio::test(start_paused = true)]
async fn demo_query_on_device_url_starts_demo() {
    let transport = ScriptedTransport::answering(status_with_key(IgnitionState::On));
    let settings = PanelSettings {
        device_url: "http://192.168.4.1/?demo=1".into(),
        ..PanelSettings::default()
    };
    let controller = PanelController::new(settings, transport.clone(), Handle::current());

    controller.start();
    time::sleep(Duration::from_secs(3)).await;
    assert!(controller.is_demo_active());
    assert!(controller.view().demo_active);
    assert_eq!(transport.fetches(), 0);
    controller.stop();
}

#[tokio::test(start_paused = true)]
async fn polling_runs_on_fixed_interval_and_stops() {
    let transport = Arc::new(ScriptedTransport::default());
    let controller = controller_for(Arc::clone(&transport));

    controller.start();
    time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(transport.fetches(), 4);
    assert!(controller.view().connection_error);

    controller.stop();
    time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.fetches(), 4);
}

#[derive(Clone, Default)]
struct DeviceServerState {
    posted: Arc<Mutex<Vec<Value>>>,
}

async fn device_status() -> Json<Value> {
    Json(json!({
        "state": "GLOW_HEATING",
        "key_position": 2,
        "countdown": 14,
        "glow_active": true,
        "glow_plugs_on": true,
        "fuel_level": 61.5,
        "engine_temp": 22.0,
        "oil_pressure": 0.0,
        "battery_voltage": 11.9,
        "lights_on": false,
        "sleep_mode_enabled": true,
        "time_since_activity": 4,
        "time_until_sleep": 296
    }))
}

async fn device_control(
    State(state): State<DeviceServerState>,
    Json(body): Json<Value>,
) -> Json<ControlResponse> {
    let action = body["action"].as_str().unwrap_or_default().to_string();
    state.posted.lock().unwrap().push(body);
    if action == "lights" {
        Json(ControlResponse::rejected("Key must be ON"))
    } else {
        Json(ControlResponse::ok())
    }
}

async fn spawn_device_server() -> Result<(url::Url, DeviceServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = DeviceServerState::default();
    let app = Router::new()
        .route("/status", get(device_status))
        .route("/control", post(device_control))
        .route(
            "/broken/status",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((url::Url::parse(&format!("http://{addr}/?demo=0"))?, state))
}

#[tokio::test]
async fn http_transport_fetches_status() -> Result<()> {
    let (base, _) = spawn_device_server().await?;
    let transport = HttpDeviceTransport::new(&base)?;
    assert_eq!(transport.status_url().path(), "/status");
    assert_eq!(transport.status_url().query(), None);

    let status = transport.fetch_status().await?;
    assert_eq!(status.state, OperationalState::GlowHeating);
    assert_eq!(status.key_position, Some(IgnitionState::Glow.key_position()));
    assert_eq!(status.countdown, Some(14));
    assert_eq!(status.readings.fuel_level, 61.5);
    assert_eq!(status.time_until_sleep, Some(296));
    Ok(())
}

#[tokio::test]
async fn http_transport_posts_tagged_commands() -> Result<()> {
    let (base, state) = spawn_device_server().await?;
    let transport = HttpDeviceTransport::new(&base)?;

    let accepted = transport
        .send_command(&ControlRequest::KeyStartHold { held: true })
        .await?;
    assert!(accepted.success);
    let rejected = transport.send_command(&ControlRequest::Lights).await?;
    assert_eq!(rejected.message.as_deref(), Some("Key must be ON"));

    let posted = state.posted.lock().unwrap().clone();
    assert_eq!(
        posted,
        vec![
            json!({"action": "key_start_hold", "held": true}),
            json!({"action": "lights"}),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn http_transport_maps_failures() -> Result<()> {
    let (base, _) = spawn_device_server().await?;
    let broken = HttpDeviceTransport::new(&base.join("broken")?)?;
    assert!(matches!(
        broken.fetch_status().await,
        Err(TransportError::Status { status: 500 })
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let closed = url::Url::parse(&format!("http://{}/", listener.local_addr()?))?;
    drop(listener);
    let offline = HttpDeviceTransport::new(&closed)?;
    assert!(matches!(
        offline.send_command(&ControlRequest::Horn).await,
        Err(TransportError::Unreachable(_))
    ));
    Ok(())
}

#[tokio::test]
async fn controller_reconciles_against_http_device() -> Result<()> {
    let (base, _) = spawn_device_server().await?;
    let settings = PanelSettings {
        device_url: base.to_string(),
        ..PanelSettings::default()
    };
    let controller = PanelController::connect(settings, Handle::current())?;

    let outcome = controller.poll_now().await;
    assert!(matches!(outcome, PollOutcome::Applied { .. }));
    let view = controller.view();
    assert_eq!(view.key_state, IgnitionState::Glow);
    assert_eq!(view.countdown, "14s");
    assert!(view.lights.glow);
    Ok(())
}
