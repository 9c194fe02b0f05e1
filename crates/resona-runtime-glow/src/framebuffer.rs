use glow::HasContext;

use resona_core::EngineError;

use crate::texture::{Texture, TextureFormat};

/// Offscreen render target: FBO plus exactly one owned color texture.
///
/// Size and format are fixed at creation; a node that needs a different size
/// destroys and recreates the whole target. The color texture can be swapped
/// against a partner (`swap_color_texture`, the ping-pong exchange) or taken
/// out entirely, leaving the FBO attachment-less until recreated.
#[derive(Debug)]
pub struct Framebuffer {
    pub fbo: glow::Framebuffer,
    color: Option<Texture>,
    pub width: i32,
    pub height: i32,
    pub format: TextureFormat,
}

impl Framebuffer {
    pub unsafe fn create(
        gl: &glow::Context,
        width: i32,
        height: i32,
        format: TextureFormat,
    ) -> Result<Self, EngineError> {
        let color = Texture::create(gl, width, height, format)?;
        let fbo = match gl.create_framebuffer() {
            Ok(fbo) => fbo,
            Err(e) => {
                color.destroy(gl);
                return Err(EngineError::GlCreate(format!(
                    "create_framebuffer failed: {e:?}"
                )));
            }
        };

        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
        gl.framebuffer_texture_2d(
            glow::FRAMEBUFFER,
            glow::COLOR_ATTACHMENT0,
            glow::TEXTURE_2D,
            Some(color.raw),
            0,
        );

        let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
        if status != glow::FRAMEBUFFER_COMPLETE {
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            gl.delete_framebuffer(fbo);
            color.destroy(gl);
            return Err(EngineError::GlCreate(format!(
                "framebuffer incomplete: 0x{status:x}"
            )));
        }
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);

        Ok(Self {
            fbo,
            color: Some(color),
            width,
            height,
            format,
        })
    }

    pub unsafe fn bind(&self, gl: &glow::Context) {
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.fbo));
    }

    pub unsafe fn unbind(&self, gl: &glow::Context) {
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
    }

    pub unsafe fn set_viewport(&self, gl: &glow::Context) {
        gl.viewport(0, 0, self.width, self.height);
    }

    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    /// The current color attachment, `None` after `take_color_texture`.
    pub fn color_texture(&self) -> Option<&Texture> {
        self.color.as_ref()
    }

    /// Attach `incoming` as the color target and hand back the texture that
    /// was attached before. Sizes and formats must match.
    ///
    /// This is the ping-pong primitive: after the exchange the returned
    /// texture holds the previously rendered content (safe to sample) while
    /// `incoming` is what subsequent draws write into.
    pub unsafe fn swap_color_texture(
        &mut self,
        gl: &glow::Context,
        incoming: Texture,
    ) -> Result<Texture, EngineError> {
        debug_assert_eq!((incoming.width, incoming.height), (self.width, self.height));
        debug_assert_eq!(incoming.format, self.format);

        let outgoing = self.color.take().ok_or_else(|| {
            EngineError::GlCreate("framebuffer has no color attachment to swap".into())
        })?;

        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.fbo));
        gl.framebuffer_texture_2d(
            glow::FRAMEBUFFER,
            glow::COLOR_ATTACHMENT0,
            glow::TEXTURE_2D,
            Some(incoming.raw),
            0,
        );
        self.color = Some(incoming);
        Ok(outgoing)
    }

    /// Detach and return the color texture, transferring ownership out.
    ///
    /// The framebuffer is unusable until a texture is swapped back in or the
    /// target is recreated.
    pub unsafe fn take_color_texture(&mut self, gl: &glow::Context) -> Option<Texture> {
        let tex = self.color.take()?;
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.fbo));
        gl.framebuffer_texture_2d(
            glow::FRAMEBUFFER,
            glow::COLOR_ATTACHMENT0,
            glow::TEXTURE_2D,
            None,
            0,
        );
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        Some(tex)
    }

    /// Download the color attachment as packed RGBA f32.
    ///
    /// `out` is resized to `width * height * 4`. This stalls the pipeline;
    /// callers decide how often they can afford it.
    pub unsafe fn read_color_f32(&self, gl: &glow::Context, out: &mut Vec<f32>) {
        let len = (self.width * self.height * 4) as usize;
        out.resize(len, 0.0);
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.fbo));
        gl.read_pixels(
            0,
            0,
            self.width,
            self.height,
            glow::RGBA,
            glow::FLOAT,
            glow::PixelPackData::Slice(bytemuck::cast_slice_mut(out.as_mut_slice())),
        );
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
    }

    pub unsafe fn destroy(mut self, gl: &glow::Context) {
        if let Some(tex) = self.color.take() {
            tex.destroy(gl);
        }
        gl.delete_framebuffer(self.fbo);
    }
}
