//! Offline wave-tracing run without a window.
//!
//! The GL context is created here but made current on the worker thread
//! (the factory closure), traced for one pass budget, and the resulting
//! impulse-response info + plot are written out.

use std::num::NonZeroU32;
use std::time::Duration;

use glutin::display::GetGlDisplay;
use glutin::prelude::*;
use winit::event_loop::EventLoop;

use resona_core::EngineError;
use resona_tracer::{GlTraceBackend, Settings, TracerEvent, WaveTracer};

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("[wavetracer_offline] error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), EngineError> {
    let event_loop = EventLoop::new();

    let template = glutin::config::ConfigTemplateBuilder::new();
    let display_builder = glutin_winit::DisplayBuilder::new();

    let (_window, gl_config) = display_builder
        .build(&event_loop, template, |mut configs| configs.next().unwrap())
        .map_err(|e| EngineError::GlCreate(format!("DisplayBuilder.build: {e}")))?;
    let gl_display = gl_config.display();

    let context_attributes = glutin::context::ContextAttributesBuilder::new()
        .with_profile(glutin::context::GlProfile::Core)
        .build(None);

    let not_current_gl_context = unsafe {
        gl_display
            .create_context(&gl_config, &context_attributes)
            .map_err(|e| EngineError::GlCreate(format!("create_context: {e}")))?
    };

    let settings = Settings {
        resolution: (96, 96),
        num_passes: 8,
        ..Settings::default()
    };
    let budget = settings.num_passes;

    let mut tracer = WaveTracer::new();
    tracer.set_settings(settings);

    // The factory runs on the worker thread: pbuffer surface + current
    // context + glow loader all live there.
    tracer.start(move || {
        let attrs =
            glutin::surface::SurfaceAttributesBuilder::<glutin::surface::PbufferSurface>::new()
                .build(NonZeroU32::new(96).unwrap(), NonZeroU32::new(96).unwrap());
        let surface = unsafe {
            gl_display
                .create_pbuffer_surface(&gl_config, &attrs)
                .map_err(|e| EngineError::GlCreate(format!("create_pbuffer_surface: {e}")))?
        };
        let context = not_current_gl_context
            .make_current(&surface)
            .map_err(|e| EngineError::GlCreate(format!("make_current: {e}")))?;
        let gl = unsafe {
            glow::Context::from_loader_function(|s| {
                gl_display.get_proc_address(std::ffi::CString::new(s).unwrap().as_c_str())
                    as *const _
            })
        };
        Ok(GlTraceBackend::with_context_guard(
            gl,
            Box::new((context, surface)),
        ))
    })?;

    // wait for the pass budget (or a failure)
    loop {
        match tracer.events().recv_timeout(Duration::from_secs(30)) {
            Ok(TracerEvent::FrameFinished { pass }) => {
                log::info!("pass {pass}/{budget}");
                if pass >= budget {
                    break;
                }
            }
            Ok(TracerEvent::Stopped { error }) => {
                return Err(EngineError::other(format!(
                    "tracer stopped early: {}",
                    error.unwrap_or_default()
                )));
            }
            Ok(_) => {}
            Err(e) => return Err(EngineError::other(format!("no tracer progress: {e}"))),
        }
    }

    let info = tracer.get_ir_info();
    println!(
        "impulse response: {} samples in {} bins, peak amplitude {:.4}, max distance {:.2}",
        info.num_samples, info.num_bins, info.max_amplitude, info.max_distance
    );

    let ir = tracer.get_ir_image(512, 128);
    if let Some(img) =
        image::RgbaImage::from_raw(ir.width as u32, ir.height as u32, ir.rgba.clone())
    {
        img.save("ir_plot.png")
            .map_err(|e| EngineError::other(format!("failed to write ir_plot.png: {e}")))?;
        println!("wrote ir_plot.png ({}x{})", ir.width, ir.height);
    }

    if let Some(frame) = tracer.get_image() {
        if let Some(img) = image::RgbaImage::from_raw(
            frame.width as u32,
            frame.height as u32,
            frame.rgba.clone(),
        ) {
            img.save("trace_frame.png")
                .map_err(|e| EngineError::other(format!("failed to write trace_frame.png: {e}")))?;
            println!("wrote trace_frame.png ({}x{})", frame.width, frame.height);
        }
    }

    tracer.stop();
    Ok(())
}
