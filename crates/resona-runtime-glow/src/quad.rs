use glow::HasContext;

use resona_core::EngineError;
use resona_glsl::Source;

use crate::program::ShaderProgram;

/// Fullscreen-covering triangle (pos + uv interleaved).
#[derive(Debug)]
pub struct FullscreenTriangle {
    vao: glow::VertexArray,
    vbo: glow::Buffer,
}

impl FullscreenTriangle {
    pub unsafe fn new(gl: &glow::Context) -> Result<Self, EngineError> {
        let verts: [f32; 12] = [
            -1.0, -1.0, 0.0, 0.0, 3.0, -1.0, 2.0, 0.0, -1.0, 3.0, 0.0, 2.0,
        ];

        let vao = gl
            .create_vertex_array()
            .map_err(|e| EngineError::GlCreate(format!("create_vertex_array: {e}")))?;
        let vbo = match gl.create_buffer() {
            Ok(vbo) => vbo,
            Err(e) => {
                gl.delete_vertex_array(vao);
                return Err(EngineError::GlCreate(format!("create_buffer: {e}")));
            }
        };

        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        gl.buffer_data_u8_slice(
            glow::ARRAY_BUFFER,
            bytemuck::cast_slice(&verts),
            glow::STATIC_DRAW,
        );

        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 4 * 4, 0);
        gl.enable_vertex_attrib_array(1);
        gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, 4 * 4, 2 * 4);

        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);

        Ok(Self { vao, vbo })
    }

    pub unsafe fn draw(&self, gl: &glow::Context) {
        gl.bind_vertex_array(Some(self.vao));
        gl.draw_arrays(glow::TRIANGLES, 0, 3);
        gl.bind_vertex_array(None);
    }

    pub unsafe fn destroy(self, gl: &glow::Context) {
        gl.delete_vertex_array(self.vao);
        gl.delete_buffer(self.vbo);
    }
}

/// The unit of one rendering pass: quad geometry + compiled program.
#[derive(Debug)]
pub struct ScreenQuad {
    tri: FullscreenTriangle,
    pub program: ShaderProgram,
}

impl ScreenQuad {
    pub unsafe fn create(gl: &glow::Context, src: &Source) -> Result<Self, EngineError> {
        let program = ShaderProgram::compile(gl, src)?;
        let tri = match FullscreenTriangle::new(gl) {
            Ok(tri) => tri,
            Err(e) => {
                program.destroy(gl);
                return Err(e);
            }
        };
        Ok(Self { tri, program })
    }

    /// Draw the quad with all stored uniform values sent.
    ///
    /// `splits > 1` renders in that many horizontal scissor bands so the
    /// driver can interleave other work between bands (interactivity, not
    /// correctness).
    pub unsafe fn draw(&self, gl: &glow::Context, width: i32, height: i32, splits: i32) {
        self.program.use_program(gl);
        self.program.send_uniforms(gl);

        let splits = splits.max(1);
        if splits == 1 {
            self.tri.draw(gl);
        } else {
            gl.enable(glow::SCISSOR_TEST);
            let band = (height + splits - 1) / splits;
            let mut y = 0;
            while y < height {
                let h = band.min(height - y);
                gl.scissor(0, y, width, h);
                self.tri.draw(gl);
                y += band;
            }
            gl.disable(glow::SCISSOR_TEST);
        }
    }

    /// Swap in a newly compiled program, keeping uniform values by
    /// name + type. The old program survives a failed compile.
    pub unsafe fn recompile(&mut self, gl: &glow::Context, src: &Source) -> Result<(), EngineError> {
        self.program.recompile(gl, src)
    }

    pub unsafe fn destroy(self, gl: &glow::Context) {
        self.program.destroy(gl);
        self.tri.destroy(gl);
    }
}
