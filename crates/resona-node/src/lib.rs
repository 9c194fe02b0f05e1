//! The render-graph node: a chain of shader-quad stages over one internal
//! framebuffer, with swap-texture ping-pong for multi-stage chaining and
//! temporal feedback, and a resolution policy polled against the node's
//! texture inputs every frame.
//!
//! The surrounding DAG is the host's business; a node only exposes
//! [`TextureNode::value_texture`] to downstream consumers and pulls its
//! inputs through the [`TextureInput`] boundary.
#![allow(clippy::missing_safety_doc)]

mod input;

pub use input::{StaticTexture, TextureInput};

use std::fmt;

use glow::HasContext;

use resona_core::{EngineError, FrameCtx, ResolutionPolicy};
use resona_glsl::{IncludeStyle, Source};
use resona_runtime_glow::{
    Framebuffer, ScreenQuad, ShaderProgram, Texture, TextureFormat, FULLSCREEN_VERT,
};

// Fixed uniform vocabulary the engine feeds by exact name match.
pub const U_RESOLUTION: &str = "u_resolution";
pub const U_TIME: &str = "u_time";
pub const U_TIME_DELTA: &str = "u_time_delta";
pub const U_PASS: &str = "u_pass";
pub const U_TRANSFORMATION: &str = "u_transformation";
pub const U_COLOR_RANGE_MIN: &str = "u_color_range_min";
pub const U_COLOR_RANGE_MAX: &str = "u_color_range_max";
pub const U_TEX_FEEDBACK: &str = "u_tex_feedback";

/// Per-stage uniform strategy for leaf effects.
///
/// Effect variants (blur, mix, key, ...) share the node's whole render
/// contract and differ only in which uniforms they set; they implement this
/// and get invoked once per stage before each pass is drawn.
pub trait EffectUniforms {
    fn configure(&self, program: &mut ShaderProgram, frame: FrameCtx);
}

struct Stage {
    quad: ScreenQuad,
    tex_names: Vec<String>,
    u_resolution: Option<usize>,
    u_time: Option<usize>,
    u_time_delta: Option<usize>,
    u_pass: Option<usize>,
    u_transformation: Option<usize>,
    u_color_min: Option<usize>,
    u_color_max: Option<usize>,
    u_feedback: Option<usize>,
    u_tex: Vec<Option<usize>>,
    effect: Option<Box<dyn EffectUniforms>>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("tex_names", &self.tex_names)
            .field("has_feedback", &self.u_feedback.is_some())
            .field("has_effect", &self.effect.is_some())
            .finish()
    }
}

impl Stage {
    fn resolve_handles(&mut self) {
        let p = &self.quad.program;
        self.u_resolution = p.uniform_index(U_RESOLUTION);
        self.u_time = p.uniform_index(U_TIME);
        self.u_time_delta = p.uniform_index(U_TIME_DELTA);
        self.u_pass = p.uniform_index(U_PASS);
        self.u_transformation = p.uniform_index(U_TRANSFORMATION);
        self.u_color_min = p.uniform_index(U_COLOR_RANGE_MIN);
        self.u_color_max = p.uniform_index(U_COLOR_RANGE_MAX);
        self.u_feedback = p.uniform_index(U_TEX_FEEDBACK);
        self.u_tex = self
            .tex_names
            .iter()
            .map(|n| p.uniform_index(n))
            .collect();
    }
}

/// Whether the swap-texture exchange must happen before drawing pass `pass`
/// of stage `stage_index`.
///
/// Later stages read the previous stage's output; feedback stages read last
/// frame's; every pass after the first reads the previous pass's. In all
/// three cases the previously written texture leaves the FBO before it is
/// sampled, so a texture is never simultaneously a read source and the
/// write target.
fn exchange_needed(stage_index: usize, pass: u32, has_feedback: bool) -> bool {
    pass > 0 || stage_index > 0 || has_feedback
}

unsafe fn exchange(
    gl: &glow::Context,
    fbo: &mut Framebuffer,
    swap: &mut Option<Texture>,
) -> Result<(), EngineError> {
    let incoming = match swap.take() {
        Some(t) => t,
        None => {
            let color = fbo.color_texture().ok_or_else(|| {
                EngineError::GlCreate("render target lost its color attachment".into())
            })?;
            Texture::construct_like(gl, color)?
        }
    };
    let previous = fbo.swap_color_texture(gl, incoming)?;
    *swap = Some(previous);
    Ok(())
}

const COMPOSITE_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 fragColor;
uniform sampler2D u_tex;
uniform vec4 u_color;
void main() {
    fragColor = texture(u_tex, v_uv) * u_color;
}
"#;

/// A texture-processing node: 0..K shader-quad stages, one internal
/// framebuffer, one swap texture, and a resolution policy.
pub struct TextureNode {
    name: String,
    policy: ResolutionPolicy,
    format: TextureFormat,
    num_passes: u32,
    split: i32,
    color_range: Option<([f32; 4], [f32; 4])>,
    transformation: Option<[f32; 16]>,
    mag_interpolation: bool,
    inputs: Vec<Option<Box<dyn TextureInput>>>,
    include_resolver: Option<Box<dyn FnMut(&str, IncludeStyle) -> Option<String>>>,
    stages: Vec<Stage>,
    out_quad: Option<ScreenQuad>,
    swap_tex: Option<Texture>,
    fbo: Option<Framebuffer>,
    has_rendered: bool,
}

impl fmt::Debug for TextureNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureNode")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("num_passes", &self.num_passes)
            .field("stages", &self.stages)
            .field("inputs", &self.inputs.len())
            .field("has_fbo", &self.fbo.is_some())
            .field("has_rendered", &self.has_rendered)
            .finish()
    }
}

impl TextureNode {
    pub fn new(name: impl Into<String>, policy: ResolutionPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            format: TextureFormat::Rgba8,
            num_passes: 1,
            split: 1,
            color_range: None,
            transformation: None,
            mag_interpolation: true,
            inputs: Vec::new(),
            include_resolver: None,
            stages: Vec::new(),
            out_quad: None,
            swap_tex: None,
            fbo: None,
            has_rendered: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare how many texture-input slots this node exposes.
    pub fn init_texture_inputs(&mut self, count: usize) {
        self.inputs.resize_with(count, || None);
    }

    pub fn set_input(&mut self, slot: usize, input: Box<dyn TextureInput>) {
        debug_assert!(slot < self.inputs.len(), "input slot out of range");
        if let Some(s) = self.inputs.get_mut(slot) {
            *s = Some(input);
        }
    }

    pub fn clear_input(&mut self, slot: usize) {
        if let Some(s) = self.inputs.get_mut(slot) {
            *s = None;
        }
    }

    pub fn set_policy(&mut self, policy: ResolutionPolicy) {
        self.policy = policy;
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.policy
    }

    pub fn set_format(&mut self, format: TextureFormat) {
        self.format = format;
    }

    /// Enable multi-pass iteration. Only nodes that explicitly allow it
    /// should set this above 1.
    pub fn set_num_passes(&mut self, passes: u32) {
        self.num_passes = passes.max(1);
    }

    pub fn set_split(&mut self, split: i32) {
        self.split = split.max(1);
    }

    pub fn set_color_range(&mut self, min: [f32; 4], max: [f32; 4]) {
        self.color_range = Some((min, max));
    }

    pub fn set_transformation(&mut self, m: [f32; 16]) {
        self.transformation = Some(m);
    }

    pub fn set_mag_interpolation(&mut self, linear: bool) {
        self.mag_interpolation = linear;
    }

    pub fn set_include_resolver(
        &mut self,
        resolver: Box<dyn FnMut(&str, IncludeStyle) -> Option<String>>,
    ) {
        self.include_resolver = Some(resolver);
    }

    pub fn set_stage_effect(&mut self, stage: usize, effect: Box<dyn EffectUniforms>) {
        debug_assert!(stage < self.stages.len(), "stage index out of range");
        if let Some(s) = self.stages.get_mut(stage) {
            s.effect = Some(effect);
        }
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Current render-target size, `None` before the first render.
    pub fn resolution(&self) -> Option<(i32, i32)> {
        self.fbo.as_ref().map(Framebuffer::size)
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.fbo.as_ref().map(Framebuffer::aspect).unwrap_or(1.0)
    }

    /// Whether any configured input reports a change at `time`.
    pub fn inputs_changed(&self, time: f64) -> bool {
        self.inputs
            .iter()
            .flatten()
            .any(|input| input.has_changed(time))
    }

    /// The node's output for downstream consumers. Channel 0 is the color
    /// output; `None` until the node has rendered at least one frame.
    pub fn value_texture(&self, channel: usize) -> Option<&Texture> {
        if channel != 0 || !self.has_rendered {
            return None;
        }
        self.fbo.as_ref().and_then(Framebuffer::color_texture)
    }

    fn prepare_source(&mut self, src: &Source) -> Source {
        let mut src = src.clone();
        let unresolved = match &mut self.include_resolver {
            Some(resolver) => src.replace_includes(resolver),
            None => src.replace_includes(&mut |_, _| None),
        };
        for name in unresolved {
            log::warn!("{}: unresolved shader include '{name}'", self.name);
        }
        src
    }

    /// Compile a new stage appended to the stage chain.
    ///
    /// `tex_names[i]` is the sampler uniform the stage uses for the node's
    /// input slot `i`. On compile failure nothing is appended and the
    /// structured error propagates.
    pub unsafe fn create_shader_quad(
        &mut self,
        gl: &glow::Context,
        src: &Source,
        tex_names: &[&str],
    ) -> Result<usize, EngineError> {
        let src = self.prepare_source(src);
        let quad = ScreenQuad::create(gl, &src)?;
        let mut stage = Stage {
            quad,
            tex_names: tex_names.iter().map(|s| s.to_string()).collect(),
            u_resolution: None,
            u_time: None,
            u_time_delta: None,
            u_pass: None,
            u_transformation: None,
            u_color_min: None,
            u_color_max: None,
            u_feedback: None,
            u_tex: Vec::new(),
            effect: None,
        };
        stage.resolve_handles();
        self.stages.push(stage);
        Ok(self.stages.len() - 1)
    }

    /// Recompile an existing stage in place.
    ///
    /// Uniform values persist across the recompile wherever name and type
    /// still match; a failed compile leaves the old stage usable.
    pub unsafe fn recompile_shader_quad(
        &mut self,
        gl: &glow::Context,
        index: usize,
        src: &Source,
    ) -> Result<(), EngineError> {
        let src = self.prepare_source(src);
        let stage = self
            .stages
            .get_mut(index)
            .ok_or_else(|| EngineError::other("recompile of an unknown stage"))?;
        stage.quad.recompile(gl, &src)?;
        stage.resolve_handles();
        Ok(())
    }

    /// Execute one shader stage for the current frame.
    ///
    /// `tex_slot` is the running texture-unit counter shared by sibling
    /// stages and nodes within the frame; it advances by the number of
    /// textures this stage bound.
    pub unsafe fn render_shader_quad(
        &mut self,
        gl: &glow::Context,
        index: usize,
        frame: FrameCtx,
        tex_slot: &mut u32,
    ) -> Result<(), EngineError> {
        if index >= self.stages.len() {
            // released node or not-yet-compiled stage; nothing to draw
            return Ok(());
        }

        // Effective output resolution: poll the inputs, then the policy.
        let input_res = self
            .inputs
            .iter()
            .flatten()
            .find_map(|input| input.value(frame.time).map(Texture::size));
        let fallback = self
            .fbo
            .as_ref()
            .map(Framebuffer::size)
            .unwrap_or((self.policy.width, self.policy.height));
        let (w, h) = self.policy.resolve(input_res, fallback);

        // Hard invariant: never render against a stale-sized target.
        let stale = match &self.fbo {
            Some(f) => f.width != w || f.height != h || f.format != self.format,
            None => true,
        };
        if stale {
            if let Some(f) = self.fbo.take() {
                f.destroy(gl);
            }
            if let Some(t) = self.swap_tex.take() {
                t.destroy(gl);
            }
            self.has_rendered = false;
            match Framebuffer::create(gl, w, h, self.format) {
                Ok(f) => self.fbo = Some(f),
                Err(e) => {
                    // Leave the node in its released state; the caller must
                    // reinitialize before rendering again.
                    self.release(gl);
                    return Err(e);
                }
            }
            log::debug!("{}: render target (re)created at {w}x{h}", self.name);
        }

        let num_passes = self.num_passes.max(1);
        let split = self.split;
        let color_range = self.color_range;
        let transformation = self.transformation;

        let stage = &mut self.stages[index];
        let fbo = self
            .fbo
            .as_mut()
            .expect("render target exists after validation");
        let swap_tex = &mut self.swap_tex;
        let inputs = &self.inputs;

        fbo.bind(gl);
        fbo.set_viewport(gl);
        gl.disable(glow::DEPTH_TEST);

        let has_feedback = stage.u_feedback.is_some();
        let mut bound_last_pass = 0u32;

        for pass in 0..num_passes {
            if exchange_needed(index, pass, has_feedback) {
                exchange(gl, fbo, swap_tex)?;
            }

            if index == 0 && pass == 0 {
                gl.clear_color(0.0, 0.0, 0.0, 0.0);
                gl.clear(glow::COLOR_BUFFER_BIT);
            }

            // The frame delta is split evenly across passes so animated
            // multi-pass content stays time-correct.
            let dt = frame.delta / num_passes as f64;
            let p = &mut stage.quad.program;
            if let Some(i) = stage.u_resolution {
                p.uniform_mut(i).set_floats(
                    w as f32,
                    h as f32,
                    1.0 / w.max(1) as f32,
                    1.0 / h.max(1) as f32,
                );
            }
            if let Some(i) = stage.u_time {
                p.uniform_mut(i)
                    .set_float((frame.time + dt * pass as f64) as f32);
            }
            if let Some(i) = stage.u_time_delta {
                p.uniform_mut(i).set_float(dt as f32);
            }
            if let Some(i) = stage.u_pass {
                p.uniform_mut(i).set_int(pass as i32);
            }
            if let Some(m) = transformation {
                if let Some(i) = stage.u_transformation {
                    p.uniform_mut(i).set_mat4(&m);
                }
            }
            if let Some((lo, hi)) = color_range {
                if let Some(i) = stage.u_color_min {
                    p.uniform_mut(i).set_floats(lo[0], lo[1], lo[2], lo[3]);
                }
                if let Some(i) = stage.u_color_max {
                    p.uniform_mut(i).set_floats(hi[0], hi[1], hi[2], hi[3]);
                }
            }
            if let Some(effect) = &stage.effect {
                effect.configure(p, frame);
            }

            // Bind inputs to consecutive units from the shared counter.
            // Slot 0 of later stages reads the previous stage's output.
            let mut unit = *tex_slot;
            for (i, slot) in inputs.iter().enumerate() {
                let tex = if i == 0 && index > 0 {
                    swap_tex.as_ref()
                } else {
                    slot.as_ref().and_then(|input| input.value(frame.time))
                };
                match tex {
                    Some(t) => {
                        t.bind(gl, unit);
                        if let Some(u) = stage.u_tex.get(i).copied().flatten() {
                            p.uniform_mut(u).set_int(unit as i32);
                        }
                        unit += 1;
                    }
                    None => {
                        // Soft condition: the unit stays unbound and the
                        // shader samples undefined content.
                        log::debug!("{}: input slot {i} unresolved", self.name);
                    }
                }
            }
            if has_feedback {
                if let Some(t) = swap_tex.as_ref() {
                    t.bind(gl, unit);
                    if let Some(u) = stage.u_feedback {
                        p.uniform_mut(u).set_int(unit as i32);
                    }
                    unit += 1;
                }
            }
            gl.active_texture(glow::TEXTURE0);
            bound_last_pass = unit - *tex_slot;

            stage.quad.draw(gl, w, h, split);
        }

        *tex_slot += bound_last_pass;
        fbo.unbind(gl);
        self.has_rendered = true;
        Ok(())
    }

    /// Draw the node's output onto the currently bound framebuffer,
    /// centered and aspect-preserving, tinted by `color`.
    ///
    /// The caller owns viewport/blend state around this call.
    pub unsafe fn draw_output(
        &mut self,
        gl: &glow::Context,
        target_width: i32,
        target_height: i32,
        color: [f32; 4],
    ) -> Result<(), EngineError> {
        if !self.has_rendered {
            return Ok(());
        }
        if self.out_quad.is_none() {
            let src = Source::new(FULLSCREEN_VERT, COMPOSITE_FRAG)
                .with_origin(format!("{}:composite", self.name));
            self.out_quad = Some(ScreenQuad::create(gl, &src)?);
        }

        let Some(fbo) = self.fbo.as_ref() else {
            return Ok(());
        };
        let Some(tex) = fbo.color_texture() else {
            return Ok(());
        };

        tex.bind(gl, 0);
        let filter = if self.mag_interpolation {
            glow::LINEAR
        } else {
            glow::NEAREST
        };
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, filter as i32);

        // Centered viewport preserving the node's aspect.
        let node_aspect = fbo.aspect();
        let target_aspect = target_width as f32 / target_height.max(1) as f32;
        let (vw, vh) = if node_aspect >= target_aspect {
            (target_width, (target_width as f32 / node_aspect) as i32)
        } else {
            ((target_height as f32 * node_aspect) as i32, target_height)
        };
        let vx = (target_width - vw) / 2;
        let vy = (target_height - vh) / 2;

        let quad = self.out_quad.as_mut().expect("composite quad created");
        if let Some(u) = quad.program.uniform_by_name_mut("u_tex") {
            u.set_int(0);
        }
        if let Some(u) = quad.program.uniform_by_name_mut("u_color") {
            u.set_floats(color[0], color[1], color[2], color[3]);
        }
        gl.viewport(vx, vy, vw.max(1), vh.max(1));
        quad.draw(gl, vw.max(1), vh.max(1), 1);
        Ok(())
    }

    /// Release every GL resource: stages, composite quad, swap texture,
    /// framebuffer, in that order. Idempotent, safe on partial init.
    pub unsafe fn release(&mut self, gl: &glow::Context) {
        for stage in self.stages.drain(..) {
            stage.quad.destroy(gl);
        }
        if let Some(q) = self.out_quad.take() {
            q.destroy(gl);
        }
        if let Some(t) = self.swap_tex.take() {
            t.destroy(gl);
        }
        if let Some(f) = self.fbo.take() {
            f.destroy(gl);
        }
        self.has_rendered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_stage_first_pass_needs_no_exchange() {
        assert!(!exchange_needed(0, 0, false));
    }

    #[test]
    fn later_stages_always_exchange() {
        assert!(exchange_needed(1, 0, false));
        assert!(exchange_needed(2, 0, false));
    }

    #[test]
    fn feedback_stages_exchange_on_first_pass() {
        assert!(exchange_needed(0, 0, true));
    }

    #[test]
    fn later_passes_always_exchange() {
        assert!(exchange_needed(0, 1, false));
        assert!(exchange_needed(0, 2, true));
        assert!(exchange_needed(3, 5, false));
    }

    // Ping-pong non-aliasing at the handle level: simulate the exchange
    // discipline over opaque ids and assert the sampled texture is never the
    // written one, and always holds the previous pass's output.
    #[test]
    fn exchange_discipline_never_aliases() {
        let mut attachment = 1u32; // write target
        let mut swap = 2u32; // read source after exchange
        let mut last_written = None;

        for pass in 0..8u32 {
            if exchange_needed(0, pass, true) {
                std::mem::swap(&mut attachment, &mut swap);
            }
            // swap now holds what was last rendered; attachment is written
            assert_ne!(attachment, swap, "pass {pass} would read its own target");
            if let Some(prev) = last_written {
                assert_eq!(swap, prev, "pass {pass} must sample the previous output");
            }
            last_written = Some(attachment);
        }
    }
}
