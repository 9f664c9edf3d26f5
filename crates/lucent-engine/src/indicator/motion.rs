//! Camera-motion driven ON/OFF state machine.
//!
//! ```text
//!            motion                     quiet window elapsed
//!   Off ───────────────> On ─────────────────────────────────> Off
//!                        │ ^
//!                        └─┘ motion (no transition, timer restarts)
//! ```
//!
//! Time is never read from a clock here: callers pass `now` into
//! [`MotionReactor::poll`], and motion events carry their own timestamp.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

/// Indicator visibility mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VisibilityMode {
    On,
    Off,
}

/// One camera movement.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MotionEvent {
    pub at: Instant,
}

/// Producer side of the camera-motion stream. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MotionSender {
    tx: Sender<MotionEvent>,
}

impl MotionSender {
    /// Reports motion now. Returns `false` once the stream is closed.
    pub fn notify(&self) -> bool {
        self.notify_at(Instant::now())
    }

    pub fn notify_at(&self, at: Instant) -> bool {
        self.tx.send(MotionEvent { at }).is_ok()
    }
}

/// Consumer side of the camera-motion stream.
#[derive(Debug)]
pub struct MotionReceiver {
    rx: Receiver<MotionEvent>,
}

/// Creates a motion stream. Dropping every sender closes it.
pub fn motion_channel() -> (MotionSender, MotionReceiver) {
    let (tx, rx) = unbounded();
    (MotionSender { tx }, MotionReceiver { rx })
}

/// Outcome of one [`MotionReactor::poll`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ReactorStep {
    /// Motion events drained during this poll.
    pub motion_events: usize,
    pub transition: Option<VisibilityMode>,
}

/// Debounces the motion stream into [`VisibilityMode`] transitions.
#[derive(Debug)]
pub struct MotionReactor {
    motion: MotionReceiver,
    quiet_window: Duration,
    mode: VisibilityMode,
    last_activity: Option<Instant>,
    /// Restart the quiet window at the next poll.
    activity_pending: bool,
    closed: bool,
}

impl MotionReactor {
    pub fn new(motion: MotionReceiver, quiet_window: Duration) -> Self {
        Self {
            motion,
            quiet_window,
            mode: VisibilityMode::Off,
            last_activity: None,
            activity_pending: false,
            closed: false,
        }
    }

    #[inline]
    pub fn mode(&self) -> VisibilityMode {
        self.mode
    }

    #[inline]
    pub fn quiet_window(&self) -> Duration {
        self.quiet_window
    }

    /// Forces `On` outside of the motion stream.
    ///
    /// The quiet window restarts at the next [`poll`](Self::poll). Returns
    /// whether the mode changed.
    pub fn force_on(&mut self) -> bool {
        self.activity_pending = true;
        self.last_activity = None;
        let changed = self.mode != VisibilityMode::On;
        self.mode = VisibilityMode::On;
        changed
    }

    /// Drains pending motion and advances the quiet-window timer to `now`.
    pub fn poll(&mut self, now: Instant) -> ReactorStep {
        let mut step = ReactorStep::default();

        loop {
            match self.motion.rx.try_recv() {
                Ok(event) => {
                    step.motion_events += 1;
                    self.last_activity = Some(match self.last_activity {
                        Some(t) => t.max(event.at),
                        None => event.at,
                    });
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.closed {
                        log::debug!("camera motion stream closed");
                        self.closed = true;
                    }
                    break;
                }
            }
        }

        if self.activity_pending {
            self.activity_pending = false;
            self.last_activity = Some(self.last_activity.map_or(now, |t| t.max(now)));
        }

        if step.motion_events > 0 {
            if self.mode == VisibilityMode::Off {
                self.mode = VisibilityMode::On;
                step.transition = Some(VisibilityMode::On);
            }
            return step;
        }

        if self.mode == VisibilityMode::On {
            let idle = self
                .last_activity
                .map_or(true, |t| now.saturating_duration_since(t) >= self.quiet_window);
            if idle {
                self.mode = VisibilityMode::Off;
                self.last_activity = None;
                step.transition = Some(VisibilityMode::Off);
            }
        }
        step
    }
}
