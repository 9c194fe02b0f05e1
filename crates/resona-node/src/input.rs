//! The texture-input parameter boundary.
//!
//! A node never owns its inputs: the host's parameter system decides what a
//! slot resolves to at a given time (another node's output, a static image,
//! nothing). The node only borrows the texture for the duration of a bind.

use resona_runtime_glow::Texture;

pub trait TextureInput {
    /// The texture this input currently resolves to, or `None`.
    fn value(&self, time: f64) -> Option<&Texture>;

    /// Whether the resolved texture may differ from the last frame's.
    fn has_changed(&self, time: f64) -> bool;
}

/// A fixed host-owned texture (uploaded image, another node's published
/// output snapshot).
#[derive(Debug)]
pub struct StaticTexture {
    tex: Texture,
}

impl StaticTexture {
    pub fn new(tex: Texture) -> Self {
        Self { tex }
    }

    /// Hand the texture back to the host for cleanup.
    pub fn into_inner(self) -> Texture {
        self.tex
    }
}

impl TextureInput for StaticTexture {
    fn value(&self, _time: f64) -> Option<&Texture> {
        Some(&self.tex)
    }

    fn has_changed(&self, _time: f64) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resona_runtime_glow::TextureFormat;
    use std::num::NonZeroU32;

    // GL handles are plain ids; fabricating one exercises the bookkeeping
    // without a context.
    fn fake_texture(id: u32, w: i32, h: i32) -> Texture {
        Texture {
            raw: glow::NativeTexture(NonZeroU32::new(id).unwrap()),
            width: w,
            height: h,
            format: TextureFormat::Rgba8,
        }
    }

    #[test]
    fn static_texture_always_resolves_and_never_changes() {
        let input = StaticTexture::new(fake_texture(7, 512, 256));
        let tex = input.value(0.0).expect("static input resolves");
        assert_eq!(tex.size(), (512, 256));
        assert!(!input.has_changed(0.0));
        assert!(!input.has_changed(10.0));
        assert_eq!(input.into_inner().size(), (512, 256));
    }
}
