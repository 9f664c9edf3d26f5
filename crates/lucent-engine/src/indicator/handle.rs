use std::fmt;

use crossbeam_channel::Sender;
use glam::Vec3;

/// Stable indicator identity: slot index plus generation.
///
/// Compaction moves indicators between instance slots; the id never
/// changes. A recycled index gets a new generation, so an id of a removed
/// indicator never aliases a newer one.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct IndicatorId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl IndicatorId {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for IndicatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Delivered to an indicator's callback.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IndicatorEvent {
    On,
    Off {
        /// Whether the marker was the topmost thing at its pixel in the
        /// last frame rendered before switching off.
        lastly_visible: bool,
    },
}

/// Indicator callback.
pub type IndicatorCallback = Box<dyn FnMut(IndicatorEvent)>;

/// Requests raised by handles, applied by the registry on its next drain.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum SubscriberEvent {
    Moved { id: IndicatorId, position: Vec3 },
    Unsubscribed(IndicatorId),
}

/// Caller-side handle returned by
/// [`IndicatorRegistry::subscribe`](super::IndicatorRegistry::subscribe).
///
/// Dropping the handle leaves the indicator in place.
#[derive(Debug)]
pub struct IndicatorHandle {
    id: IndicatorId,
    events: Sender<SubscriberEvent>,
}

impl IndicatorHandle {
    pub(crate) fn new(id: IndicatorId, events: Sender<SubscriberEvent>) -> Self {
        Self { id, events }
    }

    #[inline]
    pub fn id(&self) -> IndicatorId {
        self.id
    }

    /// Moves the indicator to a new world position.
    ///
    /// Returns `false` when the registry has been disposed.
    pub fn move_to(&self, x: f32, y: f32, z: f32) -> bool {
        self.events
            .send(SubscriberEvent::Moved {
                id: self.id,
                position: Vec3::new(x, y, z),
            })
            .is_ok()
    }

    /// Removes the indicator. No callback is delivered after the registry
    /// drains this request.
    pub fn unsubscribe(self) {
        if self.events.send(SubscriberEvent::Unsubscribed(self.id)).is_err() {
            log::trace!("unsubscribe of {} after registry disposal", self.id);
        }
    }
}
