use glow::HasContext;

use resona_core::EngineError;

/// Channel/pixel layout of a texture or render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// 8-bit normalized RGBA, the interactive-graph default.
    Rgba8,
    /// 32-bit float RGBA, used wherever the CPU reads values back
    /// (wave tracing, histogram sampling).
    Rgba32F,
}

impl TextureFormat {
    pub fn internal_format(self) -> i32 {
        match self {
            TextureFormat::Rgba8 => glow::RGBA8 as i32,
            TextureFormat::Rgba32F => glow::RGBA32F as i32,
        }
    }

    pub fn pixel_type(self) -> u32 {
        match self {
            TextureFormat::Rgba8 => glow::UNSIGNED_BYTE,
            TextureFormat::Rgba32F => glow::FLOAT,
        }
    }
}

/// A 2D GPU texture plus the metadata the engine sizes policies against.
///
/// Exclusively owned by whoever created it (a framebuffer or a node);
/// downstream consumers only ever see `&Texture`. `destroy` consumes the
/// value, so a released texture cannot be touched again.
#[derive(Debug, PartialEq, Eq)]
pub struct Texture {
    pub raw: glow::Texture,
    pub width: i32,
    pub height: i32,
    pub format: TextureFormat,
}

impl Texture {
    pub unsafe fn create(
        gl: &glow::Context,
        width: i32,
        height: i32,
        format: TextureFormat,
    ) -> Result<Self, EngineError> {
        if width < 1 || height < 1 {
            return Err(EngineError::GlCreate(format!(
                "texture size {width}x{height} is invalid"
            )));
        }

        let raw = gl
            .create_texture()
            .map_err(|e| EngineError::GlCreate(format!("create_texture failed: {e:?}")))?;

        gl.bind_texture(glow::TEXTURE_2D, Some(raw));
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_MIN_FILTER,
            glow::LINEAR as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_MAG_FILTER,
            glow::LINEAR as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_WRAP_S,
            glow::CLAMP_TO_EDGE as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_WRAP_T,
            glow::CLAMP_TO_EDGE as i32,
        );
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            format.internal_format(),
            width,
            height,
            0,
            glow::RGBA,
            format.pixel_type(),
            None,
        );
        gl.bind_texture(glow::TEXTURE_2D, None);

        Ok(Self {
            raw,
            width,
            height,
            format,
        })
    }

    /// A fresh GL object with the same size and format as `other`.
    ///
    /// This is the swap-texture factory: ping-pong partners must be
    /// attachment-compatible.
    pub unsafe fn construct_like(gl: &glow::Context, other: &Texture) -> Result<Self, EngineError> {
        Self::create(gl, other.width, other.height, other.format)
    }

    /// Upload RGBA8 pixel data (host-provided content, demo/test inputs).
    pub unsafe fn upload_rgba8(&self, gl: &glow::Context, pixels: &[u8]) {
        debug_assert_eq!(pixels.len(), (self.width * self.height * 4) as usize);
        gl.bind_texture(glow::TEXTURE_2D, Some(self.raw));
        gl.tex_sub_image_2d(
            glow::TEXTURE_2D,
            0,
            0,
            0,
            self.width,
            self.height,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            glow::PixelUnpackData::Slice(pixels),
        );
        gl.bind_texture(glow::TEXTURE_2D, None);
    }

    /// Bind to the given texture unit.
    pub unsafe fn bind(&self, gl: &glow::Context, unit: u32) {
        gl.active_texture(glow::TEXTURE0 + unit);
        gl.bind_texture(glow::TEXTURE_2D, Some(self.raw));
    }

    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    pub unsafe fn destroy(self, gl: &glow::Context) {
        gl.delete_texture(self.raw);
    }
}
