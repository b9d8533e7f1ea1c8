use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use anyhow::Context;
use chrono::Utc;
use shared::{
    error::ControlError,
    protocol::{ControlRequest, DeviceStatus},
};
use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc},
    time::Instant,
};
use tracing::{debug, info, warn};

pub mod angle;
pub mod config;
pub mod demo;
pub mod dispatcher;
pub mod display;
pub mod error;
pub mod key;
pub mod reconcile;
pub mod scheduler;
pub mod transport;

pub use angle::Point;
pub use config::{load_settings, normalize_device_url, PanelSettings};
pub use display::PanelView;
pub use reconcile::PollOutcome;
pub use transport::{DeviceTransport, HttpDeviceTransport};

use crate::{
    config::demo_requested,
    demo::DemoSequencer,
    dispatcher::{commands_for, feedback_text, CommandDispatcher, PendingFeedback, TransientAlert},
    display::DisplayState,
    error::TransportError,
    key::{KeyStateMachine, KeyTransition},
    reconcile::ReconciliationLoop,
    scheduler::{Scheduler, TaskHandle},
};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    KeyChanged(KeyTransition),
    CommandSent(ControlRequest),
    CommandFailed {
        request: ControlRequest,
        message: String,
    },
    StatusApplied,
    ConnectionLost(String),
    ConnectionRestored,
    FeedbackShown(String),
    DemoStarted,
    DemoStopped,
    DemoTick(u64),
}

struct PanelState {
    key: KeyStateMachine,
    display: DisplayState,
    polls: ReconciliationLoop,
    demo: DemoSequencer,
    demo_active: bool,
    stopped: bool,
}

#[derive(Default)]
struct PanelTasks {
    poll: Option<TaskHandle>,
    refresh: Option<TaskHandle>,
    settle: Option<TaskHandle>,
    spring_back: Option<TaskHandle>,
    demo_tick: Option<TaskHandle>,
    long_press: Option<TaskHandle>,
}

/// Application context shared by every adapter. Pointer and button handlers
/// are synchronous and may be called from any thread; network work and
/// timers run on the runtime handed to [`PanelController::new`].
///
/// Commands go through a single queue drained by one worker task, so the
/// device sees them in the order they were issued.
pub struct PanelController {
    settings: PanelSettings,
    transport: Arc<dyn DeviceTransport>,
    dispatcher: CommandDispatcher,
    scheduler: Scheduler,
    state: Mutex<PanelState>,
    tasks: Mutex<PanelTasks>,
    events: broadcast::Sender<PanelEvent>,
    outbox: mpsc::UnboundedSender<Vec<ControlRequest>>,
}

impl PanelController {
    pub fn new(
        settings: PanelSettings,
        transport: Arc<dyn DeviceTransport>,
        runtime: Handle,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (outbox, queue) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(runtime);
        Arc::new_cyclic(|weak| {
            scheduler.detach(Self::run_outbox(weak.clone(), queue));
            Self {
                settings,
                dispatcher: CommandDispatcher::new(Arc::clone(&transport)),
                transport,
                scheduler,
                state: Mutex::new(PanelState {
                    key: KeyStateMachine::new(),
                    display: DisplayState::default(),
                    polls: ReconciliationLoop::new(),
                    demo: DemoSequencer::new(),
                    demo_active: false,
                    stopped: false,
                }),
                tasks: Mutex::new(PanelTasks::default()),
                events,
                outbox,
            }
        })
    }

    /// Controller talking HTTP to `settings.device_url`.
    pub fn connect(settings: PanelSettings, runtime: Handle) -> anyhow::Result<Arc<Self>> {
        let url = normalize_device_url(&settings.device_url)?;
        let transport = HttpDeviceTransport::new(&url)
            .with_context(|| format!("failed to build endpoints from {url}"))?;
        Ok(Self::new(settings, Arc::new(transport), runtime))
    }

    pub fn settings(&self) -> &PanelSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.events.subscribe()
    }

    pub fn commands_sent(&self) -> u64 {
        self.dispatcher.commands_sent()
    }

    pub fn is_demo_active(&self) -> bool {
        self.lock_state().demo_active
    }

    pub fn view(&self) -> PanelView {
        let state = self.lock_state();
        PanelView::build(&state.key, &state.display, state.demo_active, Instant::now())
    }

    /// Starts polling, or demo playback when the device URL asks for it.
    pub fn start(self: &Arc<Self>) {
        let auto_demo = normalize_device_url(&self.settings.device_url)
            .map(|url| demo_requested(&url))
            .unwrap_or(false);
        info!(device_url = %self.settings.device_url, auto_demo, "panel starting");
        self.lock_state().stopped = false;
        if auto_demo {
            self.start_demo();
        } else {
            self.start_polling();
        }
    }

    /// Cancels every timer and lets go of the key. A held START is released
    /// on the device; queued and in-flight commands still go out but are not
    /// followed by a refresh.
    pub fn stop(&self) {
        *self.lock_tasks() = PanelTasks::default();
        let (released, demo_was_active) = {
            let mut state = self.lock_state();
            state.stopped = true;
            let released = state.key.release();
            let demo_was_active = std::mem::replace(&mut state.demo_active, false);
            state.demo.reset();
            (released, demo_was_active)
        };

        if let Some(transition) = released {
            self.emit(PanelEvent::KeyChanged(transition));
            if transition.hold == Some(false) {
                info!("releasing held START on stop");
                self.enqueue(vec![ControlRequest::KeyStartHold { held: false }]);
            }
        }
        if demo_was_active {
            self.emit(PanelEvent::DemoStopped);
        }
        info!("panel stopped");
    }

    pub fn pointer_down(&self, point: Point, pivot: Point) -> bool {
        let mut state = self.lock_state();
        if state.demo_active {
            return false;
        }
        state.key.begin_gesture(point, pivot)
    }

    pub fn pointer_move(self: &Arc<Self>, point: Point, pivot: Point) {
        let transition = {
            let mut state = self.lock_state();
            if state.demo_active {
                return;
            }
            state.key.continue_gesture(point, pivot)
        };
        if let Some(transition) = transition {
            self.on_transition(transition);
        }
    }

    pub fn pointer_up(self: &Arc<Self>) {
        let outcome = {
            let mut state = self.lock_state();
            if state.demo_active {
                return;
            }
            state.key.end_gesture()
        };
        let Some(outcome) = outcome else {
            return;
        };
        if let Some(transition) = outcome.transition {
            self.on_transition(transition);
        }

        let weak = Arc::downgrade(self);
        if outcome.spring_back {
            let handle = self.scheduler.after(
                "key-spring-back",
                self.settings.spring_back_delay(),
                move || {
                    if let Some(controller) = weak.upgrade() {
                        controller.finish_spring_back();
                    }
                },
            );
            self.lock_tasks().spring_back = Some(handle);
        } else {
            let handle = self
                .scheduler
                .after("key-settle", self.settings.snap_settle(), move || {
                    if let Some(controller) = weak.upgrade() {
                        controller.lock_state().key.finish_transition();
                    }
                });
            self.lock_tasks().settle = Some(handle);
        }
    }

    /// Sends one of the button actions by name.
    pub fn press(self: &Arc<Self>, action: &str) -> Result<bool, ControlError> {
        let request = ControlRequest::discrete(action)?;
        Ok(self.dispatch(request))
    }

    /// Asks the device to move its key. The local key follows on the next poll.
    pub fn request_key_position(self: &Arc<Self>, raw: u8) -> Result<bool, ControlError> {
        let request = ControlRequest::key_position(raw)?;
        Ok(self.dispatch(request))
    }

    /// Returns false when the command was suppressed by demo mode.
    pub fn dispatch(self: &Arc<Self>, request: ControlRequest) -> bool {
        self.issue(vec![request])
    }

    /// Fetches status once and merges it.
    pub async fn poll_now(&self) -> PollOutcome {
        let ticket = {
            let mut state = self.lock_state();
            if state.demo_active {
                return PollOutcome::Stale;
            }
            state.polls.issue()
        };
        debug!(seq = ticket, "polling device status");
        let result = self.transport.fetch_status().await;
        self.apply_poll(ticket, result)
    }

    pub fn start_demo(self: &Arc<Self>) {
        let release_hold = {
            let mut state = self.lock_state();
            if state.demo_active {
                return;
            }
            let held = state.key.flags().start_held;
            state.key.abort_gesture();
            state.polls.invalidate();
            state.demo.reset();
            state.demo_active = true;
            held
        };

        {
            let mut tasks = self.lock_tasks();
            tasks.poll = None;
            tasks.refresh = None;
            tasks.settle = None;
            tasks.spring_back = None;
        }
        if release_hold {
            info!("releasing held START before demo playback");
            self.enqueue(vec![ControlRequest::KeyStartHold { held: false }]);
        }

        let weak = Arc::downgrade(self);
        let handle = self
            .scheduler
            .every("demo-tick", self.settings.demo_tick(), move || {
                match weak.upgrade() {
                    Some(controller) => controller.demo_step(),
                    None => false,
                }
            });
        self.lock_tasks().demo_tick = Some(handle);

        info!("demo mode started");
        self.emit(PanelEvent::DemoStarted);
    }

    pub fn stop_demo(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            if !state.demo_active {
                return;
            }
            state.demo_active = false;
            state.demo.reset();
        }
        self.lock_tasks().demo_tick = None;

        info!("demo mode stopped");
        self.emit(PanelEvent::DemoStopped);
        self.start_polling();
    }

    /// Returns whether demo mode is active afterwards.
    pub fn toggle_demo(self: &Arc<Self>) -> bool {
        if self.is_demo_active() {
            self.stop_demo();
            false
        } else {
            self.start_demo();
            true
        }
    }

    /// Arms the long-press that toggles demo mode.
    pub fn demo_button_down(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = self.scheduler.after(
            "demo-long-press",
            self.settings.demo_long_press(),
            move || {
                if let Some(controller) = weak.upgrade() {
                    debug!("demo button long-press");
                    controller.toggle_demo();
                }
            },
        );
        self.lock_tasks().long_press = Some(handle);
    }

    pub fn demo_button_up(&self) {
        self.lock_tasks().long_press = None;
    }

    fn start_polling(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = self
            .scheduler
            .every("status-poll", self.settings.poll_interval(), move || {
                match weak.upgrade() {
                    Some(controller) => {
                        controller.spawn_poll();
                        true
                    }
                    None => false,
                }
            });
        self.lock_tasks().poll = Some(handle);
    }

    fn spawn_poll(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        self.scheduler.detach(async move {
            controller.poll_now().await;
        });
    }

    fn schedule_refresh(self: &Arc<Self>) {
        {
            let state = self.lock_state();
            if state.demo_active || state.stopped {
                return;
            }
        }
        let weak = Arc::downgrade(self);
        let handle = self.scheduler.after(
            "status-refresh",
            self.settings.refresh_after_command(),
            move || {
                if let Some(controller) = weak.upgrade() {
                    controller.spawn_poll();
                }
            },
        );
        self.lock_tasks().refresh = Some(handle);
    }

    fn apply_poll(&self, ticket: u64, result: Result<DeviceStatus, TransportError>) -> PollOutcome {
        let outcome = {
            let mut state = self.lock_state();
            if state.demo_active {
                return PollOutcome::Stale;
            }
            let PanelState {
                key,
                display,
                polls,
                ..
            } = &mut *state;
            polls.apply(ticket, result, key, display, Utc::now())
        };

        match &outcome {
            PollOutcome::Applied {
                transition,
                restored,
            } => {
                if *restored {
                    info!(seq = ticket, "device connection restored");
                    self.emit(PanelEvent::ConnectionRestored);
                }
                if let Some(transition) = transition {
                    debug!(seq = ticket, state = ?transition.to, "key follows device");
                    self.emit(PanelEvent::KeyChanged(*transition));
                }
                self.emit(PanelEvent::StatusApplied);
            }
            PollOutcome::Failed { first, error } => {
                if *first {
                    warn!(seq = ticket, %error, "device status unavailable");
                    self.emit(PanelEvent::ConnectionLost(error.clone()));
                } else {
                    debug!(seq = ticket, %error, "device still unreachable");
                }
            }
            PollOutcome::Stale => debug!(seq = ticket, "discarding stale status"),
        }
        outcome
    }

    fn finish_spring_back(self: &Arc<Self>) {
        let transition = {
            let mut state = self.lock_state();
            let transition = state.key.spring_back();
            state.key.finish_transition();
            transition
        };
        if let Some(transition) = transition {
            self.on_transition(transition);
        }
    }

    fn on_transition(self: &Arc<Self>, transition: KeyTransition) {
        debug!(
            from = ?transition.from,
            to = ?transition.to,
            cause = ?transition.cause,
            "key transition"
        );
        self.emit(PanelEvent::KeyChanged(transition));
        self.issue(commands_for(&transition));
    }

    fn issue(self: &Arc<Self>, requests: Vec<ControlRequest>) -> bool {
        let Some(last) = requests.last() else {
            return false;
        };
        let text = feedback_text(last);
        {
            let mut state = self.lock_state();
            if state.demo_active {
                debug!(action = last.action(), "demo active, command suppressed");
                return false;
            }
            state.display.feedback = Some(PendingFeedback::new(
                text,
                Instant::now(),
                self.settings.feedback_window(),
            ));
        }
        self.emit(PanelEvent::FeedbackShown(text.to_string()));
        self.enqueue(requests);
        true
    }

    fn enqueue(&self, requests: Vec<ControlRequest>) {
        if self.outbox.send(requests).is_err() {
            warn!("command queue closed, dropping commands");
        }
    }

    /// Worker owning the device's command channel. Ends once the controller
    /// is dropped.
    async fn run_outbox(
        controller: Weak<Self>,
        mut queue: mpsc::UnboundedReceiver<Vec<ControlRequest>>,
    ) {
        while let Some(batch) = queue.recv().await {
            let Some(controller) = controller.upgrade() else {
                break;
            };
            controller.deliver_batch(batch).await;
        }
        debug!("command queue closed");
    }

    async fn deliver_batch(self: &Arc<Self>, requests: Vec<ControlRequest>) {
        for request in requests {
            self.emit(PanelEvent::CommandSent(request.clone()));
            let outcome = self.dispatcher.deliver(request.clone()).await;
            if let Some(message) = outcome.alert_message() {
                self.lock_state().display.alert = Some(TransientAlert::new(
                    message.clone(),
                    Instant::now(),
                    self.settings.alert_window(),
                ));
                self.emit(PanelEvent::CommandFailed { request, message });
            }
        }
        self.schedule_refresh();
    }

    fn demo_step(self: &Arc<Self>) -> bool {
        let (tick, transition) = {
            let mut state = self.lock_state();
            if !state.demo_active {
                return false;
            }
            let PanelState {
                key, display, demo, ..
            } = &mut *state;
            let frame = demo.advance();
            let transition = frame.forced.and_then(|forced| key.force_state(forced));
            display.status = Some(frame.status);
            display.received_at = Some(Utc::now());
            display.connection_error = false;
            display.feedback = None;
            (frame.tick, transition)
        };
        if let Some(transition) = transition {
            debug!(tick, state = ?transition.to, "demo moves key");
            self.emit(PanelEvent::KeyChanged(transition));
        }
        self.emit(PanelEvent::DemoTick(tick));
        true
    }

    fn emit(&self, event: PanelEvent) {
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, PanelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, PanelTasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
