//! Worker behavior contracts, driven through a mock backend so they run
//! without a GL context.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use resona_core::EngineError;
use resona_tracer::{
    LiveSettings, Settings, TraceBackend, TracerEvent, WaveTracer,
};

struct MockBackend {
    resolution: (i32, i32),
    fail_on_pass: Option<u32>,
    recompiles: Arc<AtomicU32>,
    released: Arc<AtomicBool>,
}

impl TraceBackend for MockBackend {
    fn recreate(&mut self, settings: &Settings) -> Result<(), EngineError> {
        self.resolution = settings.resolution;
        Ok(())
    }

    fn recompile(&mut self, _settings: &Settings) -> Result<(), EngineError> {
        self.recompiles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn render_pass(
        &mut self,
        _live: &LiveSettings,
        pass: u32,
        out: &mut Vec<f32>,
    ) -> Result<(), EngineError> {
        if Some(pass) == self.fail_on_pass {
            return Err(EngineError::other("mock render failure"));
        }
        let (w, h) = self.resolution;
        out.resize((w * h * 4) as usize, 0.0);
        for (i, px) in out.chunks_exact_mut(4).enumerate() {
            px[0] = 0.5; // amplitude
            px[1] = (i % 32) as f32 * 0.25; // path distance
            px[2] = (i % 3) as f32; // bounces
            px[3] = 1.0;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

struct Probes {
    recompiles: Arc<AtomicU32>,
    released: Arc<AtomicBool>,
}

fn start_tracer(settings: Settings, fail_on_pass: Option<u32>) -> (WaveTracer, Probes) {
    let recompiles = Arc::new(AtomicU32::new(0));
    let released = Arc::new(AtomicBool::new(false));
    let probes = Probes {
        recompiles: Arc::clone(&recompiles),
        released: Arc::clone(&released),
    };

    let mut tracer = WaveTracer::new();
    tracer.set_settings(settings);
    tracer
        .start(move || {
            Ok(MockBackend {
                resolution: (0, 0),
                fail_on_pass,
                recompiles,
                released,
            })
        })
        .expect("tracer starts");
    (tracer, probes)
}

fn small_settings(num_passes: u32) -> Settings {
    Settings {
        resolution: (8, 8),
        num_passes,
        do_pass_average: false,
        ..Settings::default()
    }
}

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn drain_frames(tracer: &WaveTracer) -> Vec<u32> {
    let mut passes = Vec::new();
    while let Ok(event) = tracer.events().try_recv() {
        if let TracerEvent::FrameFinished { pass } = event {
            passes.push(pass);
        }
    }
    passes
}

#[test]
fn worker_enters_waiting_after_pass_budget() {
    let (mut tracer, _probes) = start_tracer(small_settings(5), None);

    assert!(
        wait_until(|| tracer.pass_count() == 5, Duration::from_secs(5)),
        "pass budget never reached, count = {}",
        tracer.pass_count()
    );
    thread::sleep(Duration::from_millis(100));

    let frames = drain_frames(&tracer);
    assert!(frames.len() >= 5, "expected 5 frame events, got {frames:?}");
    assert_eq!(frames.last(), Some(&5));

    // budget exhausted: no further frames arrive
    thread::sleep(Duration::from_millis(250));
    assert!(drain_frames(&tracer).is_empty(), "worker kept rendering past its budget");
    assert_eq!(tracer.pass_count(), 5);
    assert!(tracer.is_running(), "waiting worker must stay alive");

    tracer.stop();
}

#[test]
fn live_settings_reset_restarts_the_pass_sequence() {
    let (mut tracer, _probes) = start_tracer(small_settings(3), None);
    assert!(wait_until(|| tracer.pass_count() == 3, Duration::from_secs(5)));
    thread::sleep(Duration::from_millis(100));
    drain_frames(&tracer);

    tracer.set_live_settings(LiveSettings::default());

    // the sequence restarts from 0: the first new frame event is pass 1
    assert!(wait_until(|| tracer.pass_count() == 3, Duration::from_secs(5)));
    thread::sleep(Duration::from_millis(100));
    let frames = drain_frames(&tracer);
    assert_eq!(frames.first(), Some(&1), "sequence did not restart: {frames:?}");
    assert_eq!(frames, vec![1, 2, 3]);

    tracer.stop();
}

#[test]
fn settings_change_recompiles_and_restarts() {
    let (mut tracer, probes) = start_tracer(small_settings(2), None);
    assert!(wait_until(|| tracer.pass_count() == 2, Duration::from_secs(5)));
    let initial_recompiles = probes.recompiles.load(Ordering::SeqCst);

    let mut settings = small_settings(2);
    settings.user_code.push_str("\n// edited\n");
    tracer.set_settings(settings);

    assert!(wait_until(
        || probes.recompiles.load(Ordering::SeqCst) > initial_recompiles,
        Duration::from_secs(5)
    ));
    assert!(wait_until(|| tracer.pass_count() == 2, Duration::from_secs(5)));

    tracer.stop();
}

#[test]
fn resolution_change_rebuilds_the_buffer() {
    let (mut tracer, _probes) = start_tracer(small_settings(2), None);
    assert!(wait_until(|| tracer.pass_count() == 2, Duration::from_secs(5)));
    let before = tracer.get_image().expect("image after first run");
    assert_eq!((before.width, before.height), (8, 8));

    let mut settings = small_settings(2);
    settings.resolution = (16, 4);
    tracer.set_settings(settings);
    assert!(wait_until(|| tracer.pass_count() == 2, Duration::from_secs(5)));

    let after = tracer.get_image().expect("image after resize");
    assert_eq!((after.width, after.height), (16, 4));

    tracer.stop();
}

#[test]
fn snapshots_are_stable_between_renders() {
    let (mut tracer, _probes) = start_tracer(small_settings(4), None);
    assert!(wait_until(|| tracer.pass_count() == 4, Duration::from_secs(5)));

    let a = tracer.get_image().expect("first snapshot");
    let b = tracer.get_image().expect("second snapshot");
    assert_eq!(a, b, "snapshot changed without an intervening render");

    let ir_a = tracer.get_ir_map();
    let ir_b = tracer.get_ir_map();
    assert_eq!(ir_a, ir_b);

    tracer.stop();
}

#[test]
fn histogram_accumulates_in_wave_tracer_mode() {
    let (mut tracer, _probes) = start_tracer(small_settings(2), None);
    assert!(wait_until(|| tracer.pass_count() == 2, Duration::from_secs(5)));

    let info = tracer.get_ir_info();
    assert!(info.num_samples > 0, "no histogram samples accumulated");
    assert!(info.max_amplitude > 0.0);

    tracer.stop();
}

#[test]
fn stop_drains_cleanly() {
    let (mut tracer, probes) = start_tracer(small_settings(3), None);
    assert!(wait_until(|| tracer.pass_count() == 3, Duration::from_secs(5)));

    tracer.stop();
    assert!(!tracer.is_running());
    assert!(probes.released.load(Ordering::SeqCst), "backend not released");

    // getters stay safe after the worker exited
    assert!(tracer.get_image().is_some());
    let _ = tracer.get_ir_map();
    let _ = tracer.get_ir_info();

    let stopped = tracer
        .events()
        .try_iter()
        .find(|e| matches!(e, TracerEvent::Stopped { .. }));
    assert!(
        matches!(stopped, Some(TracerEvent::Stopped { error: None })),
        "expected a clean Stopped event"
    );
}

#[test]
fn render_errors_are_fatal_and_recorded() {
    let (mut tracer, probes) = start_tracer(small_settings(10), Some(2));

    assert!(
        wait_until(|| !tracer.is_running(), Duration::from_secs(5)),
        "worker should stop after a render error"
    );
    assert!(tracer.error_string().contains("mock render failure"));
    assert!(probes.released.load(Ordering::SeqCst));

    let events: Vec<TracerEvent> = tracer.events().try_iter().collect();
    match events.last() {
        Some(TracerEvent::Stopped { error: Some(msg) }) => {
            assert!(msg.contains("mock render failure"))
        }
        other => panic!("expected a failed Stopped event, got {other:?}"),
    }

    // exactly passes 0 and 1 completed before the failure
    let frames: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            TracerEvent::FrameFinished { pass } => Some(*pass),
            _ => None,
        })
        .collect();
    assert_eq!(frames, vec![1, 2]);

    tracer.stop();
}

#[test]
fn ir_image_request_is_served_asynchronously() {
    let (mut tracer, _probes) = start_tracer(small_settings(2), None);
    assert!(wait_until(|| tracer.pass_count() == 2, Duration::from_secs(5)));
    drain_frames(&tracer);

    tracer.request_ir_image(64, 32);

    let deadline = Instant::now() + Duration::from_secs(5);
    let image = loop {
        match tracer.events().recv_timeout(Duration::from_millis(100)) {
            Ok(TracerEvent::IrImageReady { image }) => break image,
            Ok(_) => continue,
            Err(_) if Instant::now() < deadline => continue,
            Err(e) => panic!("no IR image arrived: {e}"),
        }
    };
    assert_eq!((image.width, image.height), (64, 32));
    assert!(image.rgba.iter().any(|&v| v != 0));

    tracer.stop();
}
