//! Offline wave tracing: a dedicated worker thread raymarches a distance
//! field on its own offscreen GL context, accumulates multi-pass averages,
//! folds the rendered buffer into an impulse-response histogram, and serves
//! thread-safe snapshots to GUI/audio consumers.

mod backend;
mod irmap;
mod settings;
mod worker;

pub use backend::{GlTraceBackend, TraceBackend, USER_CODE_MARKER};
pub use irmap::{IrBin, IrInfo, IrMap, MIN_AMPLITUDE};
pub use settings::{LiveSettings, RenderMode, Settings, DEFAULT_USER_CODE};
pub use worker::{TracerEvent, WaveTracer};

pub use resona_core::EngineError;

/// An 8-bit RGBA snapshot (rows top-down).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSnapshot {
    pub width: usize,
    pub height: usize,
    pub rgba: Vec<u8>,
}

impl ImageSnapshot {
    pub fn is_empty(&self) -> bool {
        self.rgba.is_empty()
    }
}
