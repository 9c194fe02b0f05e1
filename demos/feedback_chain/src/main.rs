//! Two-stage feedback node chain in a window.
//!
//! Stage 0 samples its own previous frame through `u_tex_feedback` (decaying
//! trails with a moving injection), stage 1 post-processes stage 0's output.

use std::num::NonZeroU32;
use std::time::Instant;

use glow::HasContext;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;

use glutin::display::GetGlDisplay;
use glutin::prelude::*;
use raw_window_handle::HasRawWindowHandle;

use resona_core::{EngineError, FrameCtx, ResolutionPolicy};
use resona_glsl::Source;
use resona_node::TextureNode;
use resona_runtime_glow::FULLSCREEN_VERT;

const TRAILS_FRAG: &str = r#"
#version 330 core
in vec2 v_uv;
out vec4 fragColor;

uniform sampler2D u_tex_feedback;
uniform vec4  u_resolution;
uniform float u_time;

void main() {
    vec2 uv = clamp(v_uv, 0.0, 1.0);

    // slowly rotating feedback sample
    vec2 p = uv - 0.5;
    float a = 0.15 * sin(u_time * 0.3);
    mat2 R = mat2(cos(a), -sin(a), sin(a), cos(a));
    vec2 uv_r = R * p + 0.5;

    vec4 prev = texture(u_tex_feedback, clamp(uv_r, 0.0, 1.0));
    prev *= 0.985;

    // moving injection
    vec2 c = vec2(0.5 + 0.3 * sin(u_time * 0.7), 0.5 + 0.3 * cos(u_time * 0.9));
    float d = length(uv - c);
    float dot_ = smoothstep(0.06, 0.0, d);
    vec4 inj = vec4(dot_, dot_ * 0.7, dot_ * 0.3, 1.0);

    fragColor = max(prev, inj);
}
"#;

const GRADE_FRAG: &str = r#"
#version 330 core
in vec2 v_uv;
out vec4 fragColor;

uniform sampler2D u_tex0;
uniform float u_time;

void main() {
    vec2 uv = clamp(v_uv, 0.0, 1.0);
    vec4 c = texture(u_tex0, uv);

    // slow hue drift + vignette
    float shift = 0.5 + 0.5 * sin(u_time * 0.2);
    c.rgb = mix(c.rgb, c.gbr, shift * 0.4);
    float vig = smoothstep(0.95, 0.4, length(uv - 0.5));
    fragColor = vec4(c.rgb * vig, 1.0);
}
"#;

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("[feedback_chain] error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), EngineError> {
    let event_loop = EventLoop::new();

    let window_builder = WindowBuilder::new()
        .with_title("resona: feedback node chain")
        .with_inner_size(winit::dpi::LogicalSize::new(960.0, 540.0));

    let template = glutin::config::ConfigTemplateBuilder::new().with_alpha_size(8);

    let display_builder =
        glutin_winit::DisplayBuilder::new().with_window_builder(Some(window_builder));

    let (window, gl_config) = display_builder
        .build(&event_loop, template, |mut configs| configs.next().unwrap())
        .map_err(|e| EngineError::GlCreate(format!("DisplayBuilder.build: {e}")))?;

    let window = window
        .ok_or_else(|| EngineError::GlCreate("DisplayBuilder did not create a window".into()))?;
    let gl_display = gl_config.display();

    let raw_window_handle = window.raw_window_handle();

    let context_attributes = glutin::context::ContextAttributesBuilder::new()
        .with_profile(glutin::context::GlProfile::Core)
        .build(Some(raw_window_handle));

    let not_current_gl_context = unsafe {
        gl_display
            .create_context(&gl_config, &context_attributes)
            .map_err(|e| EngineError::GlCreate(format!("create_context: {e}")))?
    };

    let size = window.inner_size();
    let attrs = glutin::surface::SurfaceAttributesBuilder::<glutin::surface::WindowSurface>::new()
        .build(
            raw_window_handle,
            NonZeroU32::new(size.width.max(1)).unwrap(),
            NonZeroU32::new(size.height.max(1)).unwrap(),
        );

    let gl_surface = unsafe {
        gl_display
            .create_window_surface(&gl_config, &attrs)
            .map_err(|e| EngineError::GlCreate(format!("create_window_surface: {e}")))?
    };

    let gl_context = not_current_gl_context
        .make_current(&gl_surface)
        .map_err(|e| EngineError::GlCreate(format!("make_current: {e}")))?;

    let gl = unsafe {
        glow::Context::from_loader_function(|s| {
            gl_display.get_proc_address(std::ffi::CString::new(s).unwrap().as_c_str()) as *const _
        })
    };

    // --- the node chain ---
    let mut node = TextureNode::new("feedback_chain", ResolutionPolicy::custom(960, 540));
    node.init_texture_inputs(1);

    let trails = Source::new(FULLSCREEN_VERT, TRAILS_FRAG).with_origin("demo:trails");
    let grade = Source::new(FULLSCREEN_VERT, GRADE_FRAG).with_origin("demo:grade");
    unsafe {
        match node.create_shader_quad(&gl, &trails, &[]) {
            Ok(_) => {}
            Err(e) => {
                if let Some(log) = e.compile_log() {
                    for m in &log.messages {
                        eprintln!("trails {}:{}: {}", m.stage, m.line, m.message);
                    }
                }
                return Err(e);
            }
        }
        node.create_shader_quad(&gl, &grade, &["u_tex0"])?;
    }

    let start = Instant::now();
    let mut last_time = 0.0f64;
    let mut frame_no = 0u64;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;
        match event {
            Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                ..
            } => {
                unsafe { node.release(&gl) };
                *control_flow = ControlFlow::Exit;
            }
            Event::MainEventsCleared => {
                window.request_redraw();
            }
            Event::RedrawRequested(_) => {
                let time = start.elapsed().as_secs_f64();
                let frame = FrameCtx::new(time, (time - last_time).max(1e-6), frame_no);
                last_time = time;
                frame_no += 1;

                let mut tex_slot = 0u32;
                unsafe {
                    if let Err(e) = node
                        .render_shader_quad(&gl, 0, frame, &mut tex_slot)
                        .and_then(|()| node.render_shader_quad(&gl, 1, frame, &mut tex_slot))
                    {
                        eprintln!("[feedback_chain] render: {e}");
                        *control_flow = ControlFlow::Exit;
                        return;
                    }

                    let size = window.inner_size();
                    gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                    gl.viewport(0, 0, size.width as i32, size.height as i32);
                    gl.clear_color(0.0, 0.0, 0.0, 1.0);
                    gl.clear(glow::COLOR_BUFFER_BIT);
                    if let Err(e) = node.draw_output(
                        &gl,
                        size.width as i32,
                        size.height as i32,
                        [1.0, 1.0, 1.0, 1.0],
                    ) {
                        eprintln!("[feedback_chain] composite: {e}");
                    }
                }

                if let Err(e) = gl_surface.swap_buffers(&gl_context) {
                    eprintln!("[feedback_chain] swap_buffers: {e}");
                }
            }
            _ => {}
        }
    });
}
