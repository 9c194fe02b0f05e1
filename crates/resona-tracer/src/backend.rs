//! The GL seam of the worker.
//!
//! The worker loop only talks to a [`TraceBackend`]; the production
//! implementation owns an offscreen glow context (created *on the worker
//! thread* by the factory passed to `WaveTracer::start`), an RGBA32F render
//! target, and the raymarch quad. Contract tests drive the loop with a mock
//! instead.

use glow::HasContext;

use resona_core::EngineError;
use resona_glsl::Source;
use resona_runtime_glow::{Framebuffer, ScreenQuad, TextureFormat, FULLSCREEN_VERT};

use crate::settings::{LiveSettings, Settings};

pub trait TraceBackend {
    /// (Re)build the render target for `settings.resolution`.
    fn recreate(&mut self, settings: &Settings) -> Result<(), EngineError>;

    /// (Re)compile the trace shader from `settings`.
    fn recompile(&mut self, settings: &Settings) -> Result<(), EngineError>;

    /// Render one pass and download the RGBA f32 result into `out`.
    fn render_pass(
        &mut self,
        live: &LiveSettings,
        pass: u32,
        out: &mut Vec<f32>,
    ) -> Result<(), EngineError>;

    /// Release all backend resources. Idempotent.
    fn release(&mut self);
}

pub const USER_CODE_MARKER: &str = "//!user_functions!";

/// Assemble the full trace shader from the embedded skeleton and `settings`.
pub(crate) fn assemble_source(settings: &Settings) -> Result<Source, EngineError> {
    let mut src = Source::new(FULLSCREEN_VERT, WAVETRACER_FRAG).with_origin("wavetracer");
    src.add_define(&format!(
        "_RENDER_MODE {}",
        settings.render_mode.define_value()
    ));
    src.add_define(&format!("_MAX_TRACE_STEPS {}", settings.max_trace_steps.max(1)));
    src.add_define(&format!("_MAX_REFLECT {}", settings.max_reflect_steps.max(1)));
    src.add_define(&format!("_NUM_SAMPLES {}", settings.num_samples.max(1)));

    if !src.replace_section(USER_CODE_MARKER, &settings.user_code) {
        return Err(EngineError::other(
            "wavetracer shader skeleton is missing the user-code marker",
        ));
    }

    // the built-in df/* library backs unresolved includes
    let unresolved = src.replace_includes(&mut |_, _| None);
    for name in unresolved {
        log::warn!("wavetracer: unresolved include '{name}'");
    }
    Ok(src)
}

/// Production backend over an offscreen glow context.
pub struct GlTraceBackend {
    gl: glow::Context,
    // Keeps whatever object owns the underlying native context (glutin
    // context + surface, typically) alive as long as `gl` is used.
    _context_guard: Option<Box<dyn std::any::Any>>,
    fbo: Option<Framebuffer>,
    quad: Option<ScreenQuad>,
    resolution: (i32, i32),
}

impl std::fmt::Debug for GlTraceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlTraceBackend")
            .field("resolution", &self.resolution)
            .field("has_fbo", &self.fbo.is_some())
            .field("has_quad", &self.quad.is_some())
            .finish()
    }
}

impl GlTraceBackend {
    pub fn new(gl: glow::Context) -> Self {
        Self {
            gl,
            _context_guard: None,
            fbo: None,
            quad: None,
            resolution: (0, 0),
        }
    }

    /// Like [`GlTraceBackend::new`], additionally keeping `guard` alive for
    /// the backend's lifetime.
    pub fn with_context_guard(gl: glow::Context, guard: Box<dyn std::any::Any>) -> Self {
        Self {
            gl,
            _context_guard: Some(guard),
            fbo: None,
            quad: None,
            resolution: (0, 0),
        }
    }
}

fn set_f(quad: &mut ScreenQuad, name: &str, v: f32) {
    if let Some(u) = quad.program.uniform_by_name_mut(name) {
        u.set_float(v);
    }
}

fn set_vec3(quad: &mut ScreenQuad, name: &str, v: glam::Vec3) {
    if let Some(u) = quad.program.uniform_by_name_mut(name) {
        u.set_floats(v.x, v.y, v.z, 0.0);
    }
}

impl TraceBackend for GlTraceBackend {
    fn recreate(&mut self, settings: &Settings) -> Result<(), EngineError> {
        let (w, h) = settings.resolution;
        unsafe {
            if let Some(f) = self.fbo.take() {
                f.destroy(&self.gl);
            }
            self.fbo = Some(Framebuffer::create(&self.gl, w, h, TextureFormat::Rgba32F)?);
        }
        self.resolution = (w, h);
        Ok(())
    }

    fn recompile(&mut self, settings: &Settings) -> Result<(), EngineError> {
        let src = assemble_source(settings)?;
        unsafe {
            match &mut self.quad {
                Some(quad) => quad.recompile(&self.gl, &src)?,
                None => self.quad = Some(ScreenQuad::create(&self.gl, &src)?),
            }
        }
        let (w, h) = settings.resolution;
        let quad = self.quad.as_mut().expect("quad compiled");
        if let Some(u) = quad.program.uniform_by_name_mut("u_resolution") {
            u.set_floats(
                w as f32,
                h as f32,
                1.0 / w.max(1) as f32,
                1.0 / h.max(1) as f32,
            );
        }
        Ok(())
    }

    fn render_pass(
        &mut self,
        live: &LiveSettings,
        pass: u32,
        out: &mut Vec<f32>,
    ) -> Result<(), EngineError> {
        let fbo = self
            .fbo
            .as_ref()
            .ok_or_else(|| EngineError::other("wavetracer backend has no render target"))?;
        let quad = self
            .quad
            .as_mut()
            .ok_or_else(|| EngineError::other("wavetracer backend has no compiled shader"))?;

        if let Some(u) = quad.program.uniform_by_name_mut("u_transformation") {
            u.set_mat4(&live.camera.to_cols_array());
        }
        if let Some(u) = quad.program.uniform_by_name_mut("u_sound_source") {
            u.set_floats(
                live.sound_pos.x,
                live.sound_pos.y,
                live.sound_pos.z,
                live.sound_radius,
            );
        }
        set_vec3(quad, "u_sound_color", live.sound_color);
        set_f(quad, "u_fudge", live.fudge);
        set_f(quad, "u_epsilon", live.normal_eps);
        set_f(quad, "u_reflectivity", live.reflectivity);
        set_f(quad, "u_max_trace_dist", live.max_trace_dist);
        set_f(quad, "u_mic_angle", live.mic_angle);
        set_f(quad, "u_brightness", live.brightness);
        set_f(quad, "u_diffuse", live.diffuse);
        set_f(quad, "u_fresnel", live.fresnel);
        set_f(quad, "u_rnd_ray", live.rnd_ray);
        if let Some(u) = quad.program.uniform_by_name_mut("u_pass") {
            u.set_int(pass as i32);
        }

        let (w, h) = self.resolution;
        unsafe {
            fbo.bind(&self.gl);
            fbo.set_viewport(&self.gl);
            quad.draw(&self.gl, w, h, 1);
            self.gl.finish();
            fbo.read_color_f32(&self.gl, out);
            fbo.unbind(&self.gl);
        }
        Ok(())
    }

    fn release(&mut self) {
        unsafe {
            if let Some(q) = self.quad.take() {
                q.destroy(&self.gl);
            }
            if let Some(f) = self.fbo.take() {
                f.destroy(&self.gl);
            }
        }
    }
}

/// Raymarch skeleton the user's distance-field code is spliced into.
///
/// Per pixel the primary mode outputs `vec4(amplitude, path_distance,
/// bounce_count, 1)`; the host folds that into the impulse-response
/// histogram.
const WAVETRACER_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 fragColor;

uniform vec4 u_resolution;
uniform mat4 u_transformation;
uniform vec4 u_sound_source;   // xyz = position, w = radius
uniform vec3 u_sound_color;
uniform float u_fudge;
uniform float u_epsilon;
uniform float u_reflectivity;
uniform float u_max_trace_dist;
uniform float u_mic_angle;
uniform float u_brightness;
uniform float u_diffuse;
uniform float u_fresnel;
uniform float u_rnd_ray;
uniform int u_pass;

#include <df/primitives>
#include <df/operators>

//!user_functions!

float hash1(in vec3 p)
{
    return fract(sin(dot(p, vec3(12.9898, 78.233, 45.164))) * 43758.5453);
}

vec3 hash3(in vec3 p)
{
    return vec3(hash1(p), hash1(p + 17.17), hash1(p + 31.31)) * 2.0 - 1.0;
}

float sound_distance(in vec3 p)
{
    return DE_sound(p - u_sound_source.xyz) - u_sound_source.w;
}

vec3 room_normal(in vec3 p)
{
    vec2 e = vec2(max(u_epsilon, 1e-5), 0.0);
    return normalize(vec3(
        DE_room(p + e.xyy) - DE_room(p - e.xyy),
        DE_room(p + e.yxy) - DE_room(p - e.yxy),
        DE_room(p + e.yyx) - DE_room(p - e.yyx)));
}

// March one ray through reflections until it reaches the sound source,
// escapes, or runs out of bounces.
// Returns (amplitude, path distance, bounce count); zero amplitude = miss.
vec3 trace_ray(in vec3 ro, in vec3 rd, in float seed)
{
    float amp = 1.0;
    float path = 0.0;
    float bounces = 0.0;

    for (int b = 0; b < _MAX_REFLECT; ++b)
    {
        float t = 0.0;
        bool wall = false;
        for (int i = 0; i < _MAX_TRACE_STEPS; ++i)
        {
            vec3 p = ro + rd * t;
            float ds = sound_distance(p);
            if (ds < u_epsilon)
                return vec3(amp, path + t + max(ds, 0.0), bounces);
            float dw = DE_room(p);
            if (dw < u_epsilon)
            {
                wall = true;
                break;
            }
            t += min(ds, dw) * u_fudge;
            if (path + t > u_max_trace_dist)
                return vec3(0.0);
        }
        if (!wall)
            return vec3(0.0);

        vec3 p = ro + rd * t;
        vec3 n = room_normal(p);
        path += t;
        bounces += 1.0;

        amp *= u_reflectivity * DE_reflection(p, n);
        amp *= mix(1.0, 1.0 - 0.5 * abs(dot(rd, n)), u_fresnel);
        if (amp < 1e-4)
            return vec3(0.0);

        vec3 refl = reflect(rd, n);
        vec3 scatter = normalize(n + hash3(p * 93.17 + seed));
        rd = normalize(mix(refl, scatter, u_diffuse));
        ro = p + n * (2.0 * u_epsilon);
    }
    return vec3(0.0);
}

void main()
{
    vec2 uv = v_uv * 2.0 - 1.0;

    // Equi-angular projection of the pixel grid onto the microphone's
    // opening angle; the listener looks down -Z in camera space.
    float half_angle = radians(clamp(u_mic_angle, 1.0, 360.0)) * 0.5;
    vec2 sph = uv * half_angle;
    vec3 dir = vec3(sin(sph.x) * cos(sph.y), sin(sph.y), -cos(sph.x) * cos(sph.y));

    vec3 ro = (u_transformation * vec4(0.0, 0.0, 0.0, 1.0)).xyz;
    vec3 rd = normalize((u_transformation * vec4(dir, 0.0)).xyz);

#if _RENDER_MODE == 0
    // wave tracing: average multiple jittered rays per pixel
    float amp_sum = 0.0;
    float dist_sum = 0.0;
    float bounce_sum = 0.0;
    float hits = 0.0;
    for (int s = 0; s < _NUM_SAMPLES; ++s)
    {
        float seed = float(u_pass * _NUM_SAMPLES + s);
        vec3 jrd = normalize(rd + hash3(vec3(uv * 311.7, seed)) * u_rnd_ray * 0.05);
        vec3 r = trace_ray(ro, jrd, seed);
        if (r.x > 0.0)
        {
            amp_sum += r.x;
            dist_sum += r.x * r.y;
            bounce_sum += r.z;
            hits += 1.0;
        }
    }
    if (hits > 0.0)
        fragColor = vec4(amp_sum / float(_NUM_SAMPLES) * u_brightness,
                         dist_sum / amp_sum,
                         bounce_sum / hits,
                         1.0);
    else
        fragColor = vec4(0.0);
#elif _RENDER_MODE == 1
    // visual preview: shade the first hit
    float t = 0.0;
    vec3 col = vec3(0.0);
    for (int i = 0; i < _MAX_TRACE_STEPS; ++i)
    {
        vec3 p = ro + rd * t;
        float ds = sound_distance(p);
        if (ds < u_epsilon)
        {
            col = u_sound_color;
            break;
        }
        float dw = DE_room(p);
        if (dw < u_epsilon)
        {
            vec3 n = room_normal(p);
            float light = max(0.2, dot(n, normalize(vec3(0.5, 1.0, 0.3))));
            col = vec3(light) * u_reflectivity;
            break;
        }
        t += min(ds, dw) * u_fudge;
        if (t > u_max_trace_dist)
            break;
    }
    fragColor = vec4(col * u_brightness, 1.0);
#else
    // field slice: distance field cross-section through the XY plane
    vec3 p = vec3(uv * 12.0, 0.0);
    float d = DE_room(p);
    float s = sound_distance(p);
    vec3 col = vec3(fract(d * 0.25));
    if (s < 0.0)
        col = u_sound_color;
    else if (d < 0.0)
        col = vec3(0.1, 0.1, 0.3);
    fragColor = vec4(col * u_brightness, 1.0);
#endif
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use resona_core::SourceStage;

    #[test]
    fn assemble_splices_user_code_and_defines() {
        let settings = Settings::default();
        let src = assemble_source(&settings).unwrap();
        let frag = src.finalized(SourceStage::Fragment);
        assert!(frag.contains("#define _RENDER_MODE 0"));
        assert!(frag.contains("#define _MAX_TRACE_STEPS 100"));
        assert!(frag.contains("DE_room"));
        // the default library got pasted for the df includes
        assert!(frag.contains("sdBox"));
        assert!(!frag.contains(USER_CODE_MARKER));
    }

    #[test]
    fn assemble_rejects_skeletons_without_marker() {
        // a user-code string can never remove the marker before splicing,
        // so simulate a broken skeleton by splicing twice
        let settings = Settings::default();
        let mut src = assemble_source(&settings).unwrap();
        assert!(!src.replace_section(USER_CODE_MARKER, "x"));
    }

    #[test]
    fn assemble_respects_render_mode() {
        let settings = Settings {
            render_mode: crate::RenderMode::FieldSlice,
            ..Settings::default()
        };
        let src = assemble_source(&settings).unwrap();
        let frag = src.finalized(SourceStage::Fragment);
        assert!(frag.contains("#define _RENDER_MODE 2"));
    }
}
