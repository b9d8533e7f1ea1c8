//! The rotary key: continuous angle, discrete ignition state and the
//! movement rules between them.
//!
//! The machine is synchronous and owns no timers. Operations that start a
//! timed phase (snap settle, START spring-back) report it to the caller,
//! which schedules the follow-up call.

use shared::domain::{IgnitionState, KEY_ANGLE_MIN, STATE_ORDER};

use crate::angle::{angle_of, normalize_degrees, to_signed, Point};

/// Lower bound of the ON range.
pub const ON_RANGE_START: f64 = -15.0;
/// Lower bound of the GLOW range.
pub const GLOW_RANGE_START: f64 = 22.5;
/// Lower bound of the START range.
pub const START_RANGE_START: f64 = 67.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteractionFlags {
    pub dragging: bool,
    pub transitioning: bool,
    pub start_held: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    Gesture,
    Snap,
    SpringBack,
    Remote,
    Forced,
}

impl TransitionCause {
    /// Whether the change came from the local user and must reach the device.
    pub fn is_local(self) -> bool {
        matches!(self, Self::Gesture | Self::Snap | Self::SpringBack)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    pub from: IgnitionState,
    pub to: IgnitionState,
    pub cause: TransitionCause,
    /// `Some(true)` when START became held, `Some(false)` when it was released.
    pub hold: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapOutcome {
    pub resolved: IgnitionState,
    pub transition: Option<KeyTransition>,
    pub spring_back: bool,
}

/// Maps an angle onto its half-open state range.
pub fn state_for(angle: f64) -> IgnitionState {
    if angle.is_nan() || angle < ON_RANGE_START {
        IgnitionState::Off
    } else if angle < GLOW_RANGE_START {
        IgnitionState::On
    } else if angle < START_RANGE_START {
        IgnitionState::Glow
    } else {
        IgnitionState::Start
    }
}

/// Furthest clockwise angle reachable from `state` in one gesture step.
pub fn forward_limit(state: IgnitionState) -> f64 {
    state.next().reference_angle()
}

/// Clamps a candidate angle: backwards motion is free down to OFF, forward
/// motion stops at the reference angle one state ahead.
pub fn constrain(target: f64, current: f64, state: IgnitionState) -> f64 {
    let max = if target < current {
        current
    } else {
        forward_limit(state)
    };
    target.max(KEY_ANGLE_MIN).min(max)
}

/// State with the closest reference angle; ties go to the earlier state.
pub fn nearest_state(angle: f64) -> IgnitionState {
    let mut closest = STATE_ORDER[0];
    let mut closest_distance = f64::INFINITY;
    for state in STATE_ORDER {
        let distance = (angle - state.reference_angle()).abs();
        if distance < closest_distance {
            closest = state;
            closest_distance = distance;
        }
    }
    closest
}

#[derive(Debug, Clone)]
pub struct KeyStateMachine {
    state: IgnitionState,
    angle: f64,
    flags: InteractionFlags,
    grab_offset: f64,
}

impl Default for KeyStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStateMachine {
    pub fn new() -> Self {
        Self {
            state: IgnitionState::Off,
            angle: IgnitionState::Off.reference_angle(),
            flags: InteractionFlags::default(),
            grab_offset: 0.0,
        }
    }

    pub fn state(&self) -> IgnitionState {
        self.state
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn flags(&self) -> InteractionFlags {
        self.flags
    }

    pub fn is_dragging(&self) -> bool {
        self.flags.dragging
    }

    /// Starts a drag. Returns false when a snap or spring-back owns the key.
    pub fn begin_gesture(&mut self, point: Point, pivot: Point) -> bool {
        if self.flags.transitioning {
            return false;
        }
        self.flags.dragging = true;
        self.grab_offset = angle_of(point, pivot) - self.angle;
        true
    }

    pub fn continue_gesture(&mut self, point: Point, pivot: Point) -> Option<KeyTransition> {
        if !self.flags.dragging || self.flags.transitioning {
            return None;
        }

        let target = to_signed(normalize_degrees(angle_of(point, pivot) - self.grab_offset));
        let constrained = constrain(target, self.angle, self.state);
        if constrained == self.angle {
            return None;
        }
        self.angle = constrained;

        let next = state_for(self.angle);
        if next == self.state {
            return None;
        }
        self.set_state(next, TransitionCause::Gesture)
    }

    /// Releases the key and snaps it to the nearest reference angle.
    pub fn end_gesture(&mut self) -> Option<SnapOutcome> {
        if !self.flags.dragging {
            return None;
        }
        self.flags.dragging = false;
        self.flags.transitioning = true;

        let resolved = nearest_state(self.angle);
        self.angle = resolved.reference_angle();
        let transition = if resolved != self.state {
            self.set_state(resolved, TransitionCause::Snap)
        } else {
            None
        };

        Some(SnapOutcome {
            resolved,
            transition,
            spring_back: resolved == IgnitionState::Start,
        })
    }

    /// Returns a released START to ON.
    pub fn spring_back(&mut self) -> Option<KeyTransition> {
        if self.state != IgnitionState::Start {
            return None;
        }
        self.angle = IgnitionState::On.reference_angle();
        self.set_state(IgnitionState::On, TransitionCause::SpringBack)
    }

    /// Ends the snap or spring-back window and accepts input again.
    pub fn finish_transition(&mut self) {
        self.flags.transitioning = false;
    }

    /// Drops an in-progress drag without snapping.
    pub fn abort_gesture(&mut self) {
        self.flags.dragging = false;
    }

    /// Lets go of the key entirely: drops any drag or timed phase, returns a
    /// START to ON and rests the angle on the current state.
    pub fn release(&mut self) -> Option<KeyTransition> {
        self.flags.dragging = false;
        let transition = self.spring_back();
        self.flags.transitioning = false;
        self.angle = self.state.reference_angle();
        transition
    }

    /// Sets state and angle outright. Refused while a drag is in progress.
    pub fn force_state(&mut self, state: IgnitionState) -> Option<KeyTransition> {
        if self.flags.dragging {
            return None;
        }
        self.flags.transitioning = false;
        self.angle = state.reference_angle();
        if state == self.state {
            return None;
        }
        self.set_state(state, TransitionCause::Forced)
    }

    /// Adopts the device's key position unless a local interaction owns the key.
    pub fn apply_remote(&mut self, state: IgnitionState) -> Option<KeyTransition> {
        if !self.accepts_remote() {
            return None;
        }
        self.angle = state.reference_angle();
        if state == self.state {
            return None;
        }
        self.set_state(state, TransitionCause::Remote)
    }

    pub fn accepts_remote(&self) -> bool {
        !self.flags.dragging && !self.flags.transitioning && !self.flags.start_held
    }

    fn set_state(&mut self, to: IgnitionState, cause: TransitionCause) -> Option<KeyTransition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;

        let mut hold = None;
        if from == IgnitionState::Start && self.flags.start_held {
            self.flags.start_held = false;
            hold = Some(false);
        }
        if to == IgnitionState::Start
            && matches!(cause, TransitionCause::Gesture | TransitionCause::Snap)
        {
            self.flags.start_held = true;
            hold = Some(true);
        }

        Some(KeyTransition {
            from,
            to,
            cause,
            hold,
        })
    }
}
