use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use glam::{Mat4, Vec3};

use crate::backend::RenderBackend;
use crate::camera::Camera;
use crate::error::{IndicatorError, IndicatorResult};
use crate::scene::{Geometry, Material, Mesh, Scene, SharedMesh};

use super::config::IndicatorConfig;
use super::handle::{
    IndicatorCallback, IndicatorEvent, IndicatorHandle, IndicatorId, SubscriberEvent,
};
use super::marker::marker_transform;
use super::motion::{MotionReactor, MotionReceiver, VisibilityMode};
use super::probe::VisibilityProber;

/// "Please render a frame." Coalesced: at most one is ever pending.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RenderRequest;

/// Channel the registry uses to ask the host for a frame.
pub fn render_channel() -> (Sender<RenderRequest>, Receiver<RenderRequest>) {
    bounded(1)
}

struct Indicator {
    id: IndicatorId,
    position: Vec3,
    size: f32,
    transform: Mat4,
    last_visible: bool,
    callback: IndicatorCallback,
}

#[derive(Debug, Copy, Clone)]
struct SlotEntry {
    generation: u32,
    /// Position in the dense list, i.e. the instance slot.
    dense: Option<usize>,
}

/// Camera-tracked screen-space markers drawn with one instanced mesh.
///
/// Indicators occupy instance slots `0..len()` in subscription order. Removal
/// shifts later indicators down one slot and rewrites their transforms at
/// once, so the instanced mesh is always consistent.
///
/// Everything runs on the caller's thread: handles only enqueue requests,
/// which are applied by [`process_events`](Self::process_events) or
/// [`tick`](Self::tick) before any callback is delivered.
pub struct IndicatorRegistry {
    config: IndicatorConfig,
    mesh: SharedMesh,
    indicators: Vec<Indicator>,
    slots: Vec<SlotEntry>,
    free: Vec<u32>,
    events_tx: Sender<SubscriberEvent>,
    events_rx: Receiver<SubscriberEvent>,
    reactor: MotionReactor,
    prober: VisibilityProber,
    render_request: Sender<RenderRequest>,
    hide_pending: bool,
}

impl IndicatorRegistry {
    /// Adds the (initially hidden) marker mesh to `scene`.
    pub fn new(
        scene: &mut Scene,
        config: IndicatorConfig,
        motion: MotionReceiver,
        render_request: Sender<RenderRequest>,
    ) -> Self {
        let geometry = Arc::new(Geometry::sphere(config.radius, config.segments));
        let material = Material::basic(config.color).with_depth_write(false);
        let mut mesh = Mesh::instanced(geometry, material, config.capacity);
        mesh.visible = false;

        let mesh: SharedMesh = Rc::new(RefCell::new(mesh));
        scene.add(mesh.clone());

        let (events_tx, events_rx) = unbounded();
        log::debug!("indicator registry created (capacity {})", config.capacity);

        Self {
            reactor: MotionReactor::new(motion, config.quiet_window),
            prober: VisibilityProber::new(config.color),
            config,
            mesh,
            indicators: Vec::new(),
            slots: Vec::new(),
            free: Vec::new(),
            events_tx,
            events_rx,
            render_request,
            hide_pending: false,
        }
    }

    #[inline]
    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// The instanced marker mesh shared with the scene.
    #[inline]
    pub fn mesh(&self) -> &SharedMesh {
        &self.mesh
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    #[inline]
    pub fn mode(&self) -> VisibilityMode {
        self.reactor.mode()
    }

    /// Current instance slot of `id`.
    pub fn slot(&self, id: IndicatorId) -> Option<usize> {
        self.slots
            .get(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.dense)
    }

    pub fn position(&self, id: IndicatorId) -> Option<Vec3> {
        self.slot(id).map(|s| self.indicators[s].position)
    }

    /// Registers a marker at `position` with on-screen `size`.
    ///
    /// Applies queued handle requests first. Forces the mode `On`; the new
    /// indicator receives [`IndicatorEvent::On`] before this returns (every
    /// indicator does if the mode changed).
    pub fn subscribe<F>(
        &mut self,
        camera: &dyn Camera,
        position: Vec3,
        size: f32,
        callback: F,
    ) -> IndicatorResult<IndicatorHandle>
    where
        F: FnMut(IndicatorEvent) + 'static,
    {
        // Pending unsubscribes free slots and must not see the `On` below.
        self.process_events(camera)?;
        if self.indicators.len() >= self.config.capacity {
            return Err(IndicatorError::CapacityExceeded {
                capacity: self.config.capacity,
            });
        }

        let id = self.allocate_id();
        let slot = self.indicators.len();
        let transform = marker_transform(camera, position, size, self.config.viewport_height);
        self.indicators.push(Indicator {
            id,
            position,
            size,
            transform,
            last_visible: false,
            callback: Box::new(callback),
        });
        self.slots[id.index as usize].dense = Some(slot);
        {
            let mut mesh = self.mesh.borrow_mut();
            mesh.set_instance(slot, transform);
            mesh.set_instance_count(self.indicators.len());
        }
        log::debug!("subscribed indicator {id} at slot {slot}");

        if self.reactor.force_on() {
            self.show();
            self.deliver(IndicatorEvent::On);
        } else if let Some(indicator) = self.indicators.last_mut() {
            (indicator.callback)(IndicatorEvent::On);
        }
        self.request_render();

        Ok(IndicatorHandle::new(id, self.events_tx.clone()))
    }

    /// Applies every queued move and unsubscribe. Returns how many were applied.
    pub fn process_events(&mut self, camera: &dyn Camera) -> IndicatorResult<usize> {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                SubscriberEvent::Moved { id, position } => self.apply_move(camera, id, position)?,
                SubscriberEvent::Unsubscribed(id) => self.remove(id)?,
            }
            applied += 1;
        }
        if applied > 0 {
            self.request_render();
        }
        Ok(applied)
    }

    /// Advances the registry to `now`.
    ///
    /// Order within a tick:
    /// 1. queued handle requests are applied;
    /// 2. camera motion refreshes every transform;
    /// 3. an `On` transition shows the markers and cancels a pending hide;
    ///    an `Off` transition probes every marker against the backend's
    ///    current target, reports `Off` and schedules the hide for the next
    ///    tick.
    ///
    /// The probe reads whatever target `backend` has bound, so the frame
    /// just presented must still be the bound target when the quiet window
    /// elapses. A failed read-back counts as not visible for that marker; the
    /// `Off` transition completes anyway and the first error is returned.
    ///
    /// Returns the transition taken, if any.
    pub fn tick<B: RenderBackend>(
        &mut self,
        now: Instant,
        backend: &mut B,
        camera: &dyn Camera,
    ) -> IndicatorResult<Option<VisibilityMode>> {
        let mut dirty = self.process_events(camera)? > 0;

        let step = self.reactor.poll(now);
        if step.motion_events > 0 {
            self.refresh_transforms(camera);
            dirty = true;
        }

        match step.transition {
            Some(VisibilityMode::On) => {
                log::debug!("indicators on");
                self.hide_pending = false;
                self.show();
                self.deliver(IndicatorEvent::On);
                dirty = true;
            }
            Some(VisibilityMode::Off) => {
                log::debug!("indicators off; probing {}", self.indicators.len());
                let probed = self.probe_all(backend, camera);
                for indicator in &mut self.indicators {
                    (indicator.callback)(IndicatorEvent::Off {
                        lastly_visible: indicator.last_visible,
                    });
                }
                self.hide_pending = true;
                probed?;
            }
            None if self.hide_pending => {
                self.hide_pending = false;
                self.mesh.borrow_mut().visible = false;
                dirty = true;
            }
            None => {}
        }

        if dirty {
            self.request_render();
        }
        Ok(step.transition)
    }

    /// Updates the viewport height used for marker scaling.
    pub fn set_viewport_height(&mut self, height: f32, camera: &dyn Camera) {
        self.config.viewport_height = height;
        self.refresh_transforms(camera);
        self.request_render();
    }

    /// Drops every indicator, closes the handle channel and detaches the mesh.
    pub fn dispose(self, scene: &mut Scene) {
        if !scene.remove_shared(&self.mesh) {
            log::warn!("indicator mesh was already detached from the scene");
        }
        log::debug!("indicator registry disposed ({} live)", self.indicators.len());
        self.request_render();
    }

    // ── private helpers ────────────────────────────────────────────────────

    fn allocate_id(&mut self) -> IndicatorId {
        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.slots[index as usize];
                entry.generation = entry.generation.wrapping_add(1);
                IndicatorId {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(SlotEntry {
                    generation: 0,
                    dense: None,
                });
                IndicatorId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn apply_move(&mut self, camera: &dyn Camera, id: IndicatorId, position: Vec3) -> IndicatorResult<()> {
        let slot = self.slot(id).ok_or(IndicatorError::UnknownIndicator(id))?;
        let height = self.config.viewport_height;
        let indicator = &mut self.indicators[slot];
        indicator.position = position;
        indicator.transform = marker_transform(camera, position, indicator.size, height);
        self.mesh.borrow_mut().set_instance(slot, indicator.transform);
        Ok(())
    }

    fn remove(&mut self, id: IndicatorId) -> IndicatorResult<()> {
        let slot = self.slot(id).ok_or(IndicatorError::UnknownIndicator(id))?;
        self.indicators.remove(slot);
        self.slots[id.index as usize].dense = None;
        self.free.push(id.index);

        let mut mesh = self.mesh.borrow_mut();
        for (i, survivor) in self.indicators.iter().enumerate().skip(slot) {
            self.slots[survivor.id.index as usize].dense = Some(i);
            mesh.set_instance(i, survivor.transform);
        }
        mesh.set_instance_count(self.indicators.len());
        log::debug!(
            "removed indicator {id} from slot {slot}; {} shifted",
            self.indicators.len() - slot
        );
        Ok(())
    }

    fn refresh_transforms(&mut self, camera: &dyn Camera) {
        let height = self.config.viewport_height;
        let mut mesh = self.mesh.borrow_mut();
        for (slot, indicator) in self.indicators.iter_mut().enumerate() {
            indicator.transform = marker_transform(camera, indicator.position, indicator.size, height);
            mesh.set_instance(slot, indicator.transform);
        }
    }

    /// Probes every marker. Failures leave that marker not visible; the
    /// first one is returned after all markers were handled.
    fn probe_all<B: RenderBackend>(&mut self, backend: &mut B, camera: &dyn Camera) -> IndicatorResult<()> {
        let mut first_error = None;
        for indicator in &mut self.indicators {
            indicator.last_visible = match self.prober.probe(backend, camera, indicator.position) {
                Ok(visible) => visible,
                Err(e) => {
                    log::warn!("visibility probe of indicator {} failed: {e}", indicator.id);
                    first_error.get_or_insert(e);
                    false
                }
            };
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn show(&mut self) {
        self.hide_pending = false;
        self.mesh.borrow_mut().visible = true;
    }

    fn deliver(&mut self, event: IndicatorEvent) {
        for indicator in &mut self.indicators {
            (indicator.callback)(event);
        }
    }

    fn request_render(&self) {
        match self.render_request.try_send(RenderRequest) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => log::trace!("render request dropped: no host"),
        }
    }
}

impl std::fmt::Debug for IndicatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorRegistry")
            .field("len", &self.indicators.len())
            .field("capacity", &self.config.capacity)
            .field("mode", &self.reactor.mode())
            .field("hide_pending", &self.hide_pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use super::*;
    use crate::backend::cpu::CpuBackend;
    use crate::backend::{Destination, TargetDesc};
    use crate::error::BackendError;
    use crate::camera::PerspectiveCamera;
    use crate::indicator::motion::{MotionSender, motion_channel};

    struct Fixture {
        scene: Scene,
        registry: IndicatorRegistry,
        motion: MotionSender,
        renders: Receiver<RenderRequest>,
        camera: PerspectiveCamera,
    }

    fn fixture(capacity: usize) -> Fixture {
        let mut scene = Scene::new();
        let (motion, motion_rx) = motion_channel();
        let (render_tx, renders) = render_channel();
        let config = IndicatorConfig::new(64.0).with_capacity(capacity);
        let registry = IndicatorRegistry::new(&mut scene, config, motion_rx, render_tx);
        Fixture {
            scene,
            registry,
            motion,
            renders,
            camera: PerspectiveCamera::default(),
        }
    }

    fn recorder() -> (Rc<RefCell<Vec<IndicatorEvent>>>, impl FnMut(IndicatorEvent) + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        (log, move |e| sink.borrow_mut().push(e))
    }

    // ── subscribe ─────────────────────────────────────────────────────────

    #[test]
    fn mesh_is_added_hidden() {
        let f = fixture(4);
        assert_eq!(f.scene.mesh_count(), 1);
        assert!(!f.registry.mesh().borrow().visible);
        assert_eq!(f.registry.mode(), VisibilityMode::Off);
    }

    #[test]
    fn subscribe_turns_on_and_fills_slots_in_order() {
        let mut f = fixture(4);
        let (log, cb) = recorder();
        let a = f.registry.subscribe(&f.camera, Vec3::ZERO, 8.0, cb).unwrap();
        let b = f.registry.subscribe(&f.camera, Vec3::X, 8.0, |_| {}).unwrap();

        assert_eq!(*log.borrow(), vec![IndicatorEvent::On]);
        assert_eq!(f.registry.slot(a.id()), Some(0));
        assert_eq!(f.registry.slot(b.id()), Some(1));
        assert_eq!(f.registry.mesh().borrow().instance_count(), 2);
        assert!(f.registry.mesh().borrow().visible);
        assert!(f.renders.try_recv().is_ok());
        assert!(f.renders.try_recv().is_err(), "requests coalesce");
    }

    #[test]
    fn capacity_is_enforced() {
        let mut f = fixture(1);
        let _a = f.registry.subscribe(&f.camera, Vec3::ZERO, 8.0, |_| {}).unwrap();
        let err = f.registry.subscribe(&f.camera, Vec3::ZERO, 8.0, |_| {}).unwrap_err();
        assert_eq!(err, IndicatorError::CapacityExceeded { capacity: 1 });
    }

    // ── events ────────────────────────────────────────────────────────────

    #[test]
    fn move_rewrites_the_transform() {
        let mut f = fixture(4);
        let a = f.registry.subscribe(&f.camera, Vec3::ZERO, 8.0, |_| {}).unwrap();
        assert!(a.move_to(1.0, 2.0, 0.0));
        assert_eq!(f.registry.process_events(&f.camera).unwrap(), 1);

        let expected = marker_transform(&f.camera, Vec3::new(1.0, 2.0, 0.0), 8.0, 64.0);
        assert_eq!(f.registry.mesh().borrow().instance(0), Some(expected));
        assert_eq!(f.registry.position(a.id()), Some(Vec3::new(1.0, 2.0, 0.0)));
    }

    #[test]
    fn removal_compacts_and_recycles_ids() {
        let mut f = fixture(4);
        let a = f.registry.subscribe(&f.camera, Vec3::ZERO, 8.0, |_| {}).unwrap();
        let b = f.registry.subscribe(&f.camera, Vec3::Y, 8.0, |_| {}).unwrap();
        let a_id = a.id();
        a.unsubscribe();
        f.registry.process_events(&f.camera).unwrap();

        assert_eq!(f.registry.len(), 1);
        assert_eq!(f.registry.slot(a_id), None);
        assert_eq!(f.registry.slot(b.id()), Some(0));
        let expected = marker_transform(&f.camera, Vec3::Y, 8.0, 64.0);
        assert_eq!(f.registry.mesh().borrow().instance(0), Some(expected));

        let c = f.registry.subscribe(&f.camera, Vec3::Z, 8.0, |_| {}).unwrap();
        assert_eq!(c.id().index(), a_id.index());
        assert_ne!(c.id(), a_id);
    }

    #[test]
    fn unsubscribed_indicators_get_no_callbacks() {
        let mut f = fixture(4);
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let a = f
            .registry
            .subscribe(&f.camera, Vec3::ZERO, 8.0, move |_| seen.set(seen.get() + 1))
            .unwrap();
        a.unsubscribe();

        let mut backend = CpuBackend::new(8, 8);
        let t0 = Instant::now();
        f.motion.notify_at(t0);
        f.registry.tick(t0, &mut backend, &f.camera).unwrap();
        f.registry
            .tick(t0 + Duration::from_secs(1), &mut backend, &f.camera)
            .unwrap();
        assert_eq!(calls.get(), 1);
    }

    // ── tick ──────────────────────────────────────────────────────────────

    #[test]
    fn hide_is_deferred_one_tick() {
        let mut f = fixture(4);
        let mut backend = CpuBackend::new(8, 8);
        let (log, cb) = recorder();
        let _a = f.registry.subscribe(&f.camera, Vec3::ZERO, 8.0, cb).unwrap();

        let t0 = Instant::now();
        assert_eq!(f.registry.tick(t0, &mut backend, &f.camera).unwrap(), None);
        let off = t0 + Duration::from_millis(300);
        assert_eq!(
            f.registry.tick(off, &mut backend, &f.camera).unwrap(),
            Some(VisibilityMode::Off)
        );
        assert!(f.registry.mesh().borrow().visible);
        assert!(matches!(log.borrow().last(), Some(IndicatorEvent::Off { .. })));

        f.registry
            .tick(off + Duration::from_millis(16), &mut backend, &f.camera)
            .unwrap();
        assert!(!f.registry.mesh().borrow().visible);
    }

    #[test]
    fn motion_cancels_a_pending_hide() {
        let mut f = fixture(4);
        let mut backend = CpuBackend::new(8, 8);
        let _a = f.registry.subscribe(&f.camera, Vec3::ZERO, 8.0, |_| {}).unwrap();

        let t0 = Instant::now();
        f.registry.tick(t0, &mut backend, &f.camera).unwrap();
        let off = t0 + Duration::from_millis(300);
        f.registry.tick(off, &mut backend, &f.camera).unwrap();

        let t2 = off + Duration::from_millis(10);
        f.motion.notify_at(t2);
        assert_eq!(
            f.registry.tick(t2, &mut backend, &f.camera).unwrap(),
            Some(VisibilityMode::On)
        );
        assert!(f.registry.mesh().borrow().visible);
    }

    #[test]
    fn failed_readback_still_completes_the_off_transition() {
        let mut f = fixture(4);
        let mut backend = CpuBackend::new(64, 64);
        let (log, cb) = recorder();
        let _a = f.registry.subscribe(&f.camera, Vec3::ZERO, 8.0, cb).unwrap();

        // The marker projects to (32, 32), outside the bound 4x4 target.
        let side = backend.create_target(TargetDesc {
            label: "side",
            width: 4,
            height: 4,
            depth: false,
        });
        backend.set_render_target(Destination::Target(side));

        let t0 = Instant::now();
        f.registry.tick(t0, &mut backend, &f.camera).unwrap();
        let off = t0 + Duration::from_millis(300);
        let err = f.registry.tick(off, &mut backend, &f.camera).unwrap_err();
        assert!(matches!(
            err,
            IndicatorError::Backend(BackendError::OutOfBounds { width: 4, height: 4, .. })
        ));
        assert_eq!(f.registry.mode(), VisibilityMode::Off);
        assert_eq!(
            *log.borrow(),
            vec![
                IndicatorEvent::On,
                IndicatorEvent::Off {
                    lastly_visible: false
                }
            ]
        );

        backend.set_render_target(Destination::Screen);
        assert_eq!(
            f.registry
                .tick(off + Duration::from_millis(16), &mut backend, &f.camera)
                .unwrap(),
            None
        );
        assert!(!f.registry.mesh().borrow().visible);
    }

    #[test]
    fn dispose_detaches_the_mesh() {
        let mut f = fixture(4);
        let a = f.registry.subscribe(&f.camera, Vec3::ZERO, 8.0, |_| {}).unwrap();
        f.registry.dispose(&mut f.scene);
        assert_eq!(f.scene.mesh_count(), 0);
        assert!(!a.move_to(0.0, 0.0, 0.0));
    }
}
