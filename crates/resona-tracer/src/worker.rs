//! The wave-tracer worker thread.
//!
//! Control plane: three atomic flags (`stop`, `recompile`, `recreate`) plus
//! an atomic pass counter and a mutex holding the *pending* settings. Data
//! plane: one reader-writer lock over the downloaded buffer, the running
//! average and the histogram. The worker only holds the write lock while
//! copying host memory; GL work happens outside it.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use resona_core::EngineError;

use crate::backend::TraceBackend;
use crate::irmap::{IrInfo, IrMap};
use crate::settings::{LiveSettings, RenderMode, Settings};
use crate::ImageSnapshot;

/// Poll interval while waiting for new work or the stop flag.
const WAIT_TICK: Duration = Duration::from_millis(50);

/// One-shot notifications for the host's event system.
#[derive(Debug, Clone, PartialEq)]
pub enum TracerEvent {
    /// A pass finished; `pass` is the pass count after the render.
    FrameFinished { pass: u32 },
    /// An asynchronous histogram-image render completed.
    IrImageReady { image: ImageSnapshot },
    /// The worker exited; `error` carries the accumulated error text when
    /// the exit was a failure.
    Stopped { error: Option<String> },
}

#[derive(Debug)]
struct Control {
    settings: Settings,
    live: LiveSettings,
}

#[derive(Debug)]
struct TraceBuffers {
    resolution: (i32, i32),
    buffer: Vec<f32>,
    average: Vec<f32>,
    ir: IrMap,
}

struct Shared {
    stop: AtomicBool,
    recompile: AtomicBool,
    recreate: AtomicBool,
    pass_count: AtomicU32,
    control: Mutex<Control>,
    buffers: RwLock<TraceBuffers>,
    error: Mutex<String>,
    events: Sender<TracerEvent>,
}

impl Shared {
    fn record_error(&self, e: &EngineError) {
        let mut err = self.error.lock().unwrap();
        if !err.is_empty() {
            err.push('\n');
        }
        err.push_str(&e.to_string());
        log::warn!("wavetracer: {e}");
    }
}

/// Handle to the worker. Getters are callable from any thread; `stop` joins.
pub struct WaveTracer {
    shared: Arc<Shared>,
    events_rx: Receiver<TracerEvent>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WaveTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveTracer")
            .field("running", &self.is_running())
            .field("pass_count", &self.pass_count())
            .finish()
    }
}

impl Default for WaveTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveTracer {
    pub fn new() -> Self {
        let settings = Settings::default();
        let (events, events_rx) = unbounded();
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            recompile: AtomicBool::new(false),
            recreate: AtomicBool::new(false),
            pass_count: AtomicU32::new(0),
            buffers: RwLock::new(TraceBuffers {
                resolution: settings.resolution,
                buffer: Vec::new(),
                average: Vec::new(),
                ir: IrMap::new(settings.ir_quantum),
            }),
            control: Mutex::new(Control {
                settings,
                live: LiveSettings::default(),
            }),
            error: Mutex::new(String::new()),
            events,
        });
        Self {
            shared,
            events_rx,
            handle: None,
        }
    }

    /// Spawn the worker thread.
    ///
    /// `factory` runs on the worker thread and builds the backend there;
    /// the offscreen GL context must be created and made current on the
    /// thread that uses it.
    pub fn start<B, F>(&mut self, factory: F) -> Result<(), EngineError>
    where
        B: TraceBackend + 'static,
        F: FnOnce() -> Result<B, EngineError> + Send + 'static,
    {
        if self.is_running() {
            return Err(EngineError::other("wavetracer is already running"));
        }

        static THREAD_COUNT: AtomicUsize = AtomicUsize::new(0);
        let n = THREAD_COUNT.fetch_add(1, Ordering::Relaxed) + 1;

        self.shared.stop.store(false, Ordering::Release);
        self.shared.pass_count.store(0, Ordering::Release);
        self.shared.error.lock().unwrap().clear();

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("wavetracer-{n}"))
            .spawn(move || run_loop(shared, factory))
            .map_err(|e| EngineError::other(format!("failed to spawn wavetracer thread: {e}")))?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Replace the settings; forces a recompile (and a render-target rebuild
    /// when the resolution changed) and restarts the pass sequence at 0.
    pub fn set_settings(&self, settings: Settings) {
        {
            let mut control = self.shared.control.lock().unwrap();
            if settings.resolution != control.settings.resolution {
                self.shared.recreate.store(true, Ordering::Release);
            }
            control.settings = settings;
        }
        self.shared.recompile.store(true, Ordering::Release);
        self.shared.pass_count.store(0, Ordering::Release);
    }

    /// Replace the live (uniform-only) settings; restarts the pass sequence
    /// at 0 without recompiling.
    pub fn set_live_settings(&self, live: LiveSettings) {
        self.shared.control.lock().unwrap().live = live;
        self.shared.pass_count.store(0, Ordering::Release);
    }

    pub fn settings(&self) -> Settings {
        self.shared.control.lock().unwrap().settings.clone()
    }

    pub fn live_settings(&self) -> LiveSettings {
        self.shared.control.lock().unwrap().live.clone()
    }

    pub fn pass_count(&self) -> u32 {
        self.shared.pass_count.load(Ordering::Acquire)
    }

    /// Accumulated error text of the current/last run.
    pub fn error_string(&self) -> String {
        self.shared.error.lock().unwrap().clone()
    }

    pub fn events(&self) -> &Receiver<TracerEvent> {
        &self.events_rx
    }

    /// Snapshot of the latest rendered frame as an 8-bit image.
    ///
    /// Returns `None` until a frame exists at the current resolution, which
    /// guards against reading a buffer sized for a stale resolution. Reads
    /// the running average when pass averaging filled one.
    pub fn get_image(&self) -> Option<ImageSnapshot> {
        let buffers = self.shared.buffers.read().unwrap();
        let (w, h) = buffers.resolution;
        if w < 1 || h < 1 {
            return None;
        }
        let expected = w as usize * h as usize * 4;
        let src = if buffers.average.len() == expected {
            &buffers.average
        } else {
            &buffers.buffer
        };
        if src.len() != expected {
            return None;
        }

        let (w, h) = (w as usize, h as usize);
        let mut rgba = vec![0u8; expected];
        for y in 0..h {
            // GL rows run bottom-up
            let src_row = &src[(h - 1 - y) * w * 4..][..w * 4];
            let dst_row = &mut rgba[y * w * 4..][..w * 4];
            for (d, s) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
                d[0] = (s[0].clamp(0.0, 1.0) * 255.0) as u8;
                d[1] = (s[1].clamp(0.0, 1.0) * 255.0) as u8;
                d[2] = (s[2].clamp(0.0, 1.0) * 255.0) as u8;
                d[3] = 255;
            }
        }
        Some(ImageSnapshot {
            width: w,
            height: h,
            rgba,
        })
    }

    /// Snapshot of the raw float buffer (audio consumers).
    pub fn get_buffer(&self) -> Option<((i32, i32), Vec<f32>)> {
        let buffers = self.shared.buffers.read().unwrap();
        let (w, h) = buffers.resolution;
        let expected = (w.max(0) as usize) * (h.max(0) as usize) * 4;
        if expected == 0 || buffers.buffer.len() != expected {
            return None;
        }
        Some((buffers.resolution, buffers.buffer.clone()))
    }

    /// Value copy of the histogram, taken under the read lock.
    pub fn get_ir_map(&self) -> IrMap {
        self.shared.buffers.read().unwrap().ir.clone()
    }

    pub fn get_ir_info(&self) -> IrInfo {
        self.shared.buffers.read().unwrap().ir.info()
    }

    /// Render the histogram image on a throwaway thread and deliver it as a
    /// [`TracerEvent::IrImageReady`] so expensive plotting never blocks the
    /// calling (typically UI) thread.
    pub fn request_ir_image(&self, width: usize, height: usize) {
        let ir = self.get_ir_map();
        let events = self.shared.events.clone();
        thread::spawn(move || {
            let image = ir.render_image(width, height);
            let _ = events.send(TracerEvent::IrImageReady { image });
        });
    }

    /// Synchronous variant of [`WaveTracer::request_ir_image`].
    pub fn get_ir_image(&self, width: usize, height: usize) -> ImageSnapshot {
        self.get_ir_map().render_image(width, height)
    }

    /// Signal the worker to stop and block until it has exited; all backend
    /// resources are released before this returns.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WaveTracer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<B, F>(shared: Arc<Shared>, factory: F)
where
    B: TraceBackend + 'static,
    F: FnOnce() -> Result<B, EngineError>,
{
    let mut backend = match factory() {
        Ok(b) => b,
        Err(e) => {
            shared.record_error(&e);
            let _ = shared.events.send(TracerEvent::Stopped {
                error: Some(shared.error.lock().unwrap().clone()),
            });
            return;
        }
    };

    // Clear the flags before reading the settings so a setter racing this
    // startup re-flags and is observed on the first loop iteration.
    shared.recreate.store(false, Ordering::Release);
    shared.recompile.store(false, Ordering::Release);
    let mut settings = shared.control.lock().unwrap().settings.clone();

    let mut failed = backend
        .recreate(&settings)
        .and_then(|()| backend.recompile(&settings))
        .map_err(|e| shared.record_error(&e))
        .is_err();

    let mut local = Vec::new();

    while !failed && !shared.stop.load(Ordering::Acquire) {
        // apply pending configuration changes
        if shared.recreate.swap(false, Ordering::AcqRel) {
            shared.recompile.store(false, Ordering::Release);
            settings = shared.control.lock().unwrap().settings.clone();
            if let Err(e) = backend
                .recreate(&settings)
                .and_then(|()| backend.recompile(&settings))
            {
                shared.record_error(&e);
                failed = true;
                break;
            }
            let mut buffers = shared.buffers.write().unwrap();
            buffers.resolution = settings.resolution;
            buffers.buffer.clear();
            buffers.average.clear();
            buffers.ir = IrMap::new(settings.ir_quantum);
        } else if shared.recompile.swap(false, Ordering::AcqRel) {
            settings = shared.control.lock().unwrap().settings.clone();
            if let Err(e) = backend.recompile(&settings) {
                shared.record_error(&e);
                failed = true;
                break;
            }
        }

        let live = shared.control.lock().unwrap().live.clone();
        let pass = shared.pass_count.load(Ordering::Acquire);

        // GL work happens outside the buffer lock
        if let Err(e) = backend.render_pass(&live, pass, &mut local) {
            shared.record_error(&e);
            failed = true;
            break;
        }

        {
            let mut buffers = shared.buffers.write().unwrap();
            buffers.resolution = settings.resolution;
            if pass == 0 {
                buffers.average.clear();
                buffers.ir = IrMap::new(settings.ir_quantum);
            }
            buffers.buffer.clone_from(&local);
            if settings.do_pass_average {
                if buffers.average.len() != local.len() {
                    buffers.average.clone_from(&local);
                } else {
                    let n = pass as f32 + 1.0;
                    for (avg, v) in buffers.average.iter_mut().zip(&local) {
                        *avg += (*v - *avg) / n;
                    }
                }
            }
            if settings.render_mode == RenderMode::WaveTracer {
                for px in local.chunks_exact(4) {
                    buffers.ir.add_sample(px[0], px[1], px[2]);
                }
            }
        }

        // A concurrent settings change may have reset the counter while we
        // rendered; the reset wins and the stale pass goes unannounced.
        let next = pass.wrapping_add(1);
        if shared
            .pass_count
            .compare_exchange(pass, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = shared.events.send(TracerEvent::FrameFinished { pass: next });
        }

        // wait for work once the pass budget is exhausted
        let budget = settings.num_passes.max(1);
        while !shared.stop.load(Ordering::Acquire)
            && shared.pass_count.load(Ordering::Acquire) >= budget
            && !shared.recompile.load(Ordering::Acquire)
            && !shared.recreate.load(Ordering::Acquire)
        {
            thread::sleep(WAIT_TICK);
        }
    }

    backend.release();

    let error = {
        let err = shared.error.lock().unwrap();
        if err.is_empty() {
            None
        } else {
            Some(err.clone())
        }
    };
    let _ = shared.events.send(TracerEvent::Stopped { error });
}
