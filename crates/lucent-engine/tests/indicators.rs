use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use glam::Vec3;

use lucent_engine::backend::RenderBackend;
use lucent_engine::backend::cpu::CpuBackend;
use lucent_engine::indicator::{
    IndicatorConfig, IndicatorEvent, IndicatorRegistry, MotionSender, RenderRequest,
    VisibilityMode, marker_transform, motion_channel, render_channel,
};
use lucent_engine::logging::{LoggingConfig, init_logging};
use lucent_engine::peel::{DepthPeeling, PeelConfig, PeelTarget};
use lucent_engine::scene::{Geometry, Material, Mesh, Scene};
use lucent_engine::{PerspectiveCamera, Rgba};

const SIZE: u32 = 64;
const MARKER: Rgba = Rgba::opaque(1.0, 0.0, 1.0);

struct World {
    backend: CpuBackend,
    camera: PerspectiveCamera,
    scene: Scene,
    registry: IndicatorRegistry,
    motion: MotionSender,
    renders: Receiver<RenderRequest>,
}

impl World {
    fn new() -> Self {
        init_logging(LoggingConfig::for_tests());
        let mut scene = Scene::new();
        let (motion, motion_rx) = motion_channel();
        let (render_tx, renders) = render_channel();
        let config = IndicatorConfig::new(SIZE as f32).with_color(MARKER);
        let registry = IndicatorRegistry::new(&mut scene, config, motion_rx, render_tx);
        Self {
            backend: CpuBackend::new(SIZE, SIZE),
            camera: PerspectiveCamera::default(),
            scene,
            registry,
            motion,
            renders,
        }
    }

    fn render(&mut self) {
        self.backend.clear();
        self.backend.render_scene(&self.scene, &self.camera, None);
    }

    fn tick(&mut self, at: Instant) -> Option<VisibilityMode> {
        self.registry
            .tick(at, &mut self.backend, &self.camera)
            .unwrap()
    }
}

fn recorder() -> (Rc<RefCell<Vec<IndicatorEvent>>>, impl FnMut(IndicatorEvent) + 'static) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    (log, move |e| sink.borrow_mut().push(e))
}

const QUIET: Duration = Duration::from_millis(300);

#[test]
fn unoccluded_indicator_reports_visible_after_idle() {
    let mut w = World::new();
    let (log, cb) = recorder();
    let _h = w.registry.subscribe(&w.camera, Vec3::ZERO, 6.0, cb).unwrap();
    assert_eq!(*log.borrow(), vec![IndicatorEvent::On]);

    let t0 = Instant::now();
    w.render();
    assert_eq!(w.tick(t0), None);
    w.render();
    assert_eq!(w.tick(t0 + QUIET), Some(VisibilityMode::Off));

    assert_eq!(
        *log.borrow(),
        vec![
            IndicatorEvent::On,
            IndicatorEvent::Off {
                lastly_visible: true
            }
        ]
    );
}

#[test]
fn occluded_indicator_reports_hidden_after_idle() {
    let mut w = World::new();
    w.scene.add(Mesh::new(
        Arc::new(Geometry::quad(2.0, 2.0, 1.0)),
        Material::basic(Rgba::opaque(0.0, 0.0, 1.0)),
    ));
    let (log, cb) = recorder();
    let _h = w.registry.subscribe(&w.camera, Vec3::ZERO, 6.0, cb).unwrap();

    let t0 = Instant::now();
    w.tick(t0);
    w.render();
    w.tick(t0 + QUIET);

    assert_eq!(
        log.borrow().last(),
        Some(&IndicatorEvent::Off {
            lastly_visible: false
        })
    );
}

#[test]
fn peeled_frame_reports_visibility_like_a_plain_one() {
    let mut w = World::new();
    let (log, cb) = recorder();
    let _h = w.registry.subscribe(&w.camera, Vec3::ZERO, 6.0, cb).unwrap();

    let mut peeling = DepthPeeling::new(&mut w.backend, PeelConfig::new(SIZE, SIZE, 2)).unwrap();
    peeling.prepare(&mut w.scene);

    let t0 = Instant::now();
    w.tick(t0);
    peeling.render(&mut w.backend, &mut w.scene, &w.camera, PeelTarget::Screen);
    w.tick(t0 + QUIET);

    assert_eq!(
        log.borrow().last(),
        Some(&IndicatorEvent::Off {
            lastly_visible: true
        })
    );
}

#[test]
fn off_screen_indicator_is_never_visible() {
    let mut w = World::new();
    // Fill the framebuffer with the marker color.
    w.backend.set_clear_color(MARKER);
    w.backend.clear();

    let (log, cb) = recorder();
    let _h = w
        .registry
        .subscribe(&w.camera, Vec3::new(50.0, 0.0, 0.0), 6.0, cb)
        .unwrap();

    let t0 = Instant::now();
    w.tick(t0);
    w.backend.reset_stats();
    w.tick(t0 + QUIET);

    assert_eq!(w.backend.stats().readbacks, 0);
    assert_eq!(
        log.borrow().last(),
        Some(&IndicatorEvent::Off {
            lastly_visible: false
        })
    );
}

#[test]
fn moving_a_survivor_updates_its_compacted_slot() {
    let mut w = World::new();
    let first = w.registry.subscribe(&w.camera, Vec3::ZERO, 6.0, |_| {}).unwrap();
    let second = w.registry.subscribe(&w.camera, Vec3::X, 6.0, |_| {}).unwrap();
    assert_eq!(w.registry.slot(second.id()), Some(1));

    first.unsubscribe();
    assert!(second.move_to(0.0, 1.0, -1.0));
    let t0 = Instant::now();
    w.tick(t0);

    assert_eq!(w.registry.len(), 1);
    assert_eq!(w.registry.slot(second.id()), Some(0));
    let expected = marker_transform(&w.camera, Vec3::new(0.0, 1.0, -1.0), 6.0, SIZE as f32);
    let mesh = w.registry.mesh().borrow();
    assert_eq!(mesh.instance_count(), 1);
    assert_eq!(mesh.instance(0), Some(expected));
}

#[test]
fn camera_motion_keeps_indicators_on_and_requests_frames() {
    let mut w = World::new();
    let (log, cb) = recorder();
    let _h = w.registry.subscribe(&w.camera, Vec3::ZERO, 6.0, cb).unwrap();
    while w.renders.try_recv().is_ok() {}

    let t0 = Instant::now();
    for i in 0..5u32 {
        let at = t0 + Duration::from_millis(100) * i;
        w.camera.set_position(Vec3::new(0.0, 0.0, 5.0 + i as f32));
        w.motion.notify_at(at);
        assert_eq!(w.tick(at), None);
        assert!(w.renders.try_recv().is_ok(), "tick {i}");
    }
    assert_eq!(w.registry.mode(), VisibilityMode::On);
    assert_eq!(*log.borrow(), vec![IndicatorEvent::On]);

    // Transforms follow the camera: the marker is now 9 units away.
    let expected = marker_transform(&w.camera, Vec3::ZERO, 6.0, SIZE as f32);
    assert_eq!(w.registry.mesh().borrow().instance(0), Some(expected));
}
