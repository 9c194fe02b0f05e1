//! resona runtime (glow/OpenGL backend)
//
// This crate contains **only** the GL resource layer:
// - textures and framebuffers (including the color-attachment swap used for
//   ping-pong feedback)
// - shader programs with uniform/attribute reflection and value carry-over
//   across recompiles
// - the fullscreen-quad draw unit
//
// It does NOT contain windowing, node semantics, or the tracer; the host
// owns the GL context lifecycle and all entry points take `&glow::Context`.
#![allow(clippy::missing_safety_doc)]

mod framebuffer;
mod program;
mod quad;
mod texture;

pub use framebuffer::Framebuffer;
pub use program::{carry_uniform_values, Attribute, ShaderProgram, Uniform, UniformValue};
pub use quad::{FullscreenTriangle, ScreenQuad};
pub use texture::{Texture, TextureFormat};

pub use resona_core::{EngineError, FrameCtx};

/// Shared vertex stage for fullscreen passes.
pub const FULLSCREEN_VERT: &str = r#"#version 330 core
layout (location = 0) in vec2 a_pos;
layout (location = 1) in vec2 a_uv;
out vec2 v_uv;
void main() {
    v_uv = a_uv;
    gl_Position = vec4(a_pos, 0.0, 1.0);
}
"#;
