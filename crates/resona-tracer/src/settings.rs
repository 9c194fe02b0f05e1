use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// What the tracer shader renders per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Amplitude / path-distance / bounce-count triples; the only mode that
    /// feeds the impulse-response histogram.
    WaveTracer,
    /// Shaded visual preview of the distance field.
    RayTracer,
    /// 2D cross-section of the distance field (scene debugging).
    FieldSlice,
}

impl RenderMode {
    /// Value injected as the `_RENDER_MODE` define.
    pub fn define_value(self) -> u32 {
        match self {
            RenderMode::WaveTracer => 0,
            RenderMode::RayTracer => 1,
            RenderMode::FieldSlice => 2,
        }
    }
}

/// Settings whose change requires a shader recompile (and, for resolution,
/// a render-target rebuild).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub resolution: (i32, i32),
    pub render_mode: RenderMode,
    /// User distance-field code spliced into the raymarch skeleton; must
    /// define `DE_room`, `DE_sound` and `DE_reflection`.
    pub user_code: String,
    /// Pass budget: the worker renders this many passes, then waits.
    pub num_passes: u32,
    pub max_trace_steps: u32,
    pub max_reflect_steps: u32,
    pub num_samples: u32,
    /// Keep a running average over passes (reset whenever the pass counter
    /// returns to 0).
    pub do_pass_average: bool,
    /// Distance quantum of the impulse-response histogram, in scene units.
    pub ir_quantum: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolution: (128, 128),
            render_mode: RenderMode::WaveTracer,
            user_code: DEFAULT_USER_CODE.to_string(),
            num_passes: 10,
            max_trace_steps: 100,
            max_reflect_steps: 5,
            num_samples: 10,
            do_pass_average: true,
            // one audio sample at 48 kHz and 343 m/s
            ir_quantum: 343.0 / 48000.0,
        }
    }
}

pub const DEFAULT_USER_CODE: &str = r#"float DE_room(in vec3 p)
{
    // inverted box as room
    return -sdBox(p, vec3(10.0));
}

float DE_sound(in vec3 p)
{
    return length(p);
}

float DE_reflection(in vec3 p, in vec3 n)
{
    return 1.0;
}
"#;

/// Settings that map straight onto uniforms; changing them only resets the
/// pass counter, no recompilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSettings {
    /// Camera/listener transform (listener looks down -Z).
    pub camera: Mat4,
    pub sound_pos: Vec3,
    pub sound_color: Vec3,
    pub sound_radius: f32,
    /// Ray-step fudge factor (march conservatism).
    pub fudge: f32,
    /// Surface/normal epsilon.
    pub normal_eps: f32,
    pub max_trace_dist: f32,
    /// Microphone opening angle in degrees.
    pub mic_angle: f32,
    /// Global reflection damping per bounce.
    pub reflectivity: f32,
    pub brightness: f32,
    /// Diffuse scatter amount on reflection.
    pub diffuse: f32,
    /// Grazing-angle emphasis.
    pub fresnel: f32,
    /// Random ray perturbation per pass (multi-sample decorrelation).
    pub rnd_ray: f32,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            camera: Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)),
            sound_pos: Vec3::ZERO,
            sound_color: Vec3::ONE,
            sound_radius: 1.0,
            fudge: 0.9,
            normal_eps: 0.0001,
            max_trace_dist: 100.0,
            mic_angle: 180.0,
            reflectivity: 0.9,
            brightness: 1.0,
            diffuse: 0.5,
            fresnel: 0.3,
            rnd_ray: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_roundtrip_through_json() {
        let s = Settings {
            num_passes: 5,
            render_mode: RenderMode::RayTracer,
            ..Settings::default()
        };
        let text = serde_json::to_string(&s).unwrap();
        let back: Settings = serde_json::from_str(&text).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn render_mode_define_values_are_stable() {
        assert_eq!(RenderMode::WaveTracer.define_value(), 0);
        assert_eq!(RenderMode::RayTracer.define_value(), 1);
        assert_eq!(RenderMode::FieldSlice.define_value(), 2);
    }

    #[test]
    fn default_user_code_defines_the_three_hooks() {
        for hook in ["DE_room", "DE_sound", "DE_reflection"] {
            assert!(DEFAULT_USER_CODE.contains(hook));
        }
    }
}
