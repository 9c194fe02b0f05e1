use glow::HasContext;

use resona_core::{CompileLog, EngineError, SourceStage};
use resona_glsl::{parse_info_log, Source};

/// CPU-side storage for one uniform's value.
///
/// All slots exist for every uniform; the reflected GL type decides which
/// slot `send_uniforms` actually pushes. Keeping the store uniform-shaped is
/// what makes value carry-over across recompiles a plain copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformValue {
    pub floats: [f32; 4],
    pub ints: [i32; 4],
    pub matrix: [f32; 16],
}

impl Default for UniformValue {
    fn default() -> Self {
        Self {
            floats: [0.0; 4],
            ints: [0; 4],
            matrix: [0.0; 16],
        }
    }
}

/// One reflected GLSL uniform with its current value.
#[derive(Debug, Clone)]
pub struct Uniform {
    pub name: String,
    /// GL type enum (`glow::FLOAT_VEC4`, ...).
    pub gl_type: u32,
    /// Array length (1 for non-arrays).
    pub size: i32,
    pub location: Option<glow::UniformLocation>,
    pub value: UniformValue,
}

impl Uniform {
    pub fn set_float(&mut self, x: f32) {
        self.value.floats[0] = x;
    }

    pub fn set_floats(&mut self, x: f32, y: f32, z: f32, w: f32) {
        self.value.floats = [x, y, z, w];
    }

    pub fn set_int(&mut self, i: i32) {
        self.value.ints[0] = i;
    }

    pub fn set_mat4(&mut self, m: &[f32; 16]) {
        self.value.matrix = *m;
    }
}

/// One reflected GLSL vertex attribute.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub gl_type: u32,
    pub size: i32,
    pub location: Option<u32>,
}

/// Copy values across from an older uniform table wherever name *and* GL
/// type match. A uniform whose type changed keeps its zeroed default.
pub fn carry_uniform_values(new: &mut [Uniform], old: &[Uniform]) {
    for u in new.iter_mut() {
        if let Some(prev) = old
            .iter()
            .find(|o| o.name == u.name && o.gl_type == u.gl_type)
        {
            u.value = prev.value;
        }
    }
}

/// A linked GL program plus its reflected uniform/attribute tables.
#[derive(Debug)]
pub struct ShaderProgram {
    pub program: glow::Program,
    uniforms: Vec<Uniform>,
    attributes: Vec<Attribute>,
}

impl ShaderProgram {
    /// Compile and link `src`, then reflect uniforms and attributes.
    ///
    /// Failures come back as [`EngineError::ShaderCompile`] with per-line
    /// messages tagged by stage; nothing is left allocated on error.
    pub unsafe fn compile(gl: &glow::Context, src: &Source) -> Result<Self, EngineError> {
        let vs = compile_stage(gl, SourceStage::Vertex, &src.finalized(SourceStage::Vertex))?;
        let fs = match compile_stage(gl, SourceStage::Fragment, &src.finalized(SourceStage::Fragment))
        {
            Ok(fs) => fs,
            Err(e) => {
                gl.delete_shader(vs);
                return Err(e);
            }
        };

        let program = match gl.create_program() {
            Ok(p) => p,
            Err(e) => {
                gl.delete_shader(vs);
                gl.delete_shader(fs);
                return Err(EngineError::GlCreate(format!("create_program failed: {e:?}")));
            }
        };
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);

        gl.detach_shader(program, vs);
        gl.detach_shader(program, fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);

        if !gl.get_program_link_status(program) {
            let raw = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(EngineError::ShaderCompile(CompileLog {
                messages: parse_info_log(SourceStage::Linker, &raw),
                raw,
            }));
        }

        let mut compiled = Self {
            program,
            uniforms: Vec::new(),
            attributes: Vec::new(),
        };
        compiled.reflect(gl);
        Ok(compiled)
    }

    unsafe fn reflect(&mut self, gl: &glow::Context) {
        let num_uniforms = gl.get_active_uniforms(self.program);
        for i in 0..num_uniforms {
            if let Some(info) = gl.get_active_uniform(self.program, i) {
                let location = gl.get_uniform_location(self.program, &info.name);
                self.uniforms.push(Uniform {
                    name: info.name,
                    gl_type: info.utype,
                    size: info.size,
                    location,
                    value: UniformValue::default(),
                });
            }
        }

        let num_attributes = gl.get_active_attributes(self.program);
        for i in 0..num_attributes {
            if let Some(info) = gl.get_active_attribute(self.program, i) {
                let location = gl.get_attrib_location(self.program, &info.name);
                self.attributes.push(Attribute {
                    name: info.name,
                    gl_type: info.atype,
                    size: info.size,
                    location,
                });
            }
        }
    }

    pub fn uniforms(&self) -> &[Uniform] {
        &self.uniforms
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Index-based handle for repeated per-frame access.
    pub fn uniform_index(&self, name: &str) -> Option<usize> {
        self.uniforms.iter().position(|u| u.name == name)
    }

    pub fn uniform_mut(&mut self, index: usize) -> &mut Uniform {
        &mut self.uniforms[index]
    }

    pub fn uniform_by_name_mut(&mut self, name: &str) -> Option<&mut Uniform> {
        self.uniforms.iter_mut().find(|u| u.name == name)
    }

    pub unsafe fn use_program(&self, gl: &glow::Context) {
        gl.use_program(Some(self.program));
    }

    /// Push every reflected uniform value to the GPU.
    ///
    /// The program must be in use.
    pub unsafe fn send_uniforms(&self, gl: &glow::Context) {
        for u in &self.uniforms {
            let Some(loc) = u.location.as_ref() else {
                continue;
            };
            let f = &u.value.floats;
            let i = &u.value.ints;
            match u.gl_type {
                glow::FLOAT => gl.uniform_1_f32(Some(loc), f[0]),
                glow::FLOAT_VEC2 => gl.uniform_2_f32(Some(loc), f[0], f[1]),
                glow::FLOAT_VEC3 => gl.uniform_3_f32(Some(loc), f[0], f[1], f[2]),
                glow::FLOAT_VEC4 => gl.uniform_4_f32(Some(loc), f[0], f[1], f[2], f[3]),
                glow::INT | glow::BOOL | glow::SAMPLER_2D | glow::SAMPLER_3D
                | glow::SAMPLER_CUBE => gl.uniform_1_i32(Some(loc), i[0]),
                glow::INT_VEC2 => gl.uniform_2_i32(Some(loc), i[0], i[1]),
                glow::INT_VEC3 => gl.uniform_3_i32(Some(loc), i[0], i[1], i[2]),
                glow::INT_VEC4 => gl.uniform_4_i32(Some(loc), i[0], i[1], i[2], i[3]),
                glow::FLOAT_MAT4 => {
                    gl.uniform_matrix_4_f32_slice(Some(loc), false, &u.value.matrix)
                }
                other => {
                    log::debug!("uniform '{}' has unhandled GL type 0x{other:x}", u.name);
                }
            }
        }
    }

    /// Compile `src` into a fresh program and adopt it, carrying uniform
    /// values forward by name + type. On failure the existing program stays
    /// untouched and usable.
    pub unsafe fn recompile(&mut self, gl: &glow::Context, src: &Source) -> Result<(), EngineError> {
        let mut next = Self::compile(gl, src)?;
        carry_uniform_values(&mut next.uniforms, &self.uniforms);
        gl.delete_program(self.program);
        *self = next;
        Ok(())
    }

    pub unsafe fn destroy(self, gl: &glow::Context) {
        gl.delete_program(self.program);
    }
}

unsafe fn compile_stage(
    gl: &glow::Context,
    stage: SourceStage,
    text: &str,
) -> Result<glow::Shader, EngineError> {
    let kind = match stage {
        SourceStage::Vertex => glow::VERTEX_SHADER,
        _ => glow::FRAGMENT_SHADER,
    };
    let shader = gl
        .create_shader(kind)
        .map_err(|e| EngineError::GlCreate(format!("create_shader({stage}) failed: {e:?}")))?;
    gl.shader_source(shader, text);
    gl.compile_shader(shader);
    if !gl.get_shader_compile_status(shader) {
        let raw = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        return Err(EngineError::ShaderCompile(CompileLog {
            messages: parse_info_log(stage, &raw),
            raw,
        }));
    }
    Ok(shader)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(name: &str, gl_type: u32, floats: [f32; 4]) -> Uniform {
        Uniform {
            name: name.into(),
            gl_type,
            size: 1,
            location: None,
            value: UniformValue {
                floats,
                ..UniformValue::default()
            },
        }
    }

    #[test]
    fn carry_preserves_matching_name_and_type() {
        let old = vec![uniform("u_color", glow::FLOAT_VEC4, [0.1, 0.2, 0.3, 0.4])];
        let mut new = vec![uniform("u_color", glow::FLOAT_VEC4, [0.0; 4])];
        carry_uniform_values(&mut new, &old);
        assert_eq!(new[0].value.floats, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn carry_skips_type_changes() {
        let old = vec![uniform("u_x", glow::FLOAT_VEC4, [1.0; 4])];
        let mut new = vec![uniform("u_x", glow::FLOAT, [0.0; 4])];
        carry_uniform_values(&mut new, &old);
        assert_eq!(new[0].value.floats, [0.0; 4]);
    }

    #[test]
    fn carry_skips_renamed_uniforms() {
        let old = vec![uniform("u_a", glow::FLOAT, [1.0; 4])];
        let mut new = vec![uniform("u_b", glow::FLOAT, [0.0; 4])];
        carry_uniform_values(&mut new, &old);
        assert_eq!(new[0].value.floats, [0.0; 4]);
    }

    #[test]
    fn carry_handles_int_and_matrix_slots() {
        let mut old = uniform("u_m", glow::FLOAT_MAT4, [0.0; 4]);
        old.value.matrix[5] = 2.5;
        let mut old_tex = uniform("u_tex", glow::SAMPLER_2D, [0.0; 4]);
        old_tex.value.ints[0] = 3;
        let old = vec![old, old_tex];
        let mut new = vec![
            uniform("u_m", glow::FLOAT_MAT4, [0.0; 4]),
            uniform("u_tex", glow::SAMPLER_2D, [0.0; 4]),
        ];
        carry_uniform_values(&mut new, &old);
        assert_eq!(new[0].value.matrix[5], 2.5);
        assert_eq!(new[1].value.ints[0], 3);
    }
}
