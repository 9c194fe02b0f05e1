//! Output-resolution policy for render-graph nodes.
//!
//! Nodes do not know their upstream resolution until the upstream node has
//! rendered at least once, so the policy is evaluated every frame against the
//! first resolved texture input. The caller supplies a fallback (the current
//! FBO size, or the custom size before any FBO exists) which also covers
//! deliberate feedback cycles: a cycle re-uses the previous frame's size
//! instead of blocking.

use serde::{Deserialize, Serialize};

/// How a node derives its output size from its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    /// Explicitly configured width/height.
    Custom,
    /// Same size as the first resolved input.
    FromInput,
    /// First resolved input scaled by `scale`, minimum 2x2.
    InputScaled,
    /// Width fixed; height recomputed to preserve the input aspect.
    FixedWidthRatio,
    /// Height fixed; width recomputed to preserve the input aspect.
    FixedHeightRatio,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPolicy {
    pub mode: ResolutionMode,
    pub width: i32,
    pub height: i32,
    pub scale: f32,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            mode: ResolutionMode::Custom,
            width: 1024,
            height: 1024,
            scale: 1.0,
        }
    }
}

impl ResolutionPolicy {
    pub fn custom(width: i32, height: i32) -> Self {
        Self {
            mode: ResolutionMode::Custom,
            width,
            height,
            ..Self::default()
        }
    }

    pub fn from_input() -> Self {
        Self {
            mode: ResolutionMode::FromInput,
            ..Self::default()
        }
    }

    pub fn input_scaled(scale: f32) -> Self {
        Self {
            mode: ResolutionMode::InputScaled,
            scale,
            ..Self::default()
        }
    }

    pub fn fixed_width(width: i32) -> Self {
        Self {
            mode: ResolutionMode::FixedWidthRatio,
            width,
            ..Self::default()
        }
    }

    pub fn fixed_height(height: i32) -> Self {
        Self {
            mode: ResolutionMode::FixedHeightRatio,
            height,
            ..Self::default()
        }
    }

    /// Evaluate the policy against the first resolved input size.
    ///
    /// `fallback` is used whenever the mode needs an input and none has
    /// resolved yet (first frame, or a feedback cycle).
    pub fn resolve(&self, input: Option<(i32, i32)>, fallback: (i32, i32)) -> (i32, i32) {
        let clamp1 = |(w, h): (i32, i32)| (w.max(1), h.max(1));
        match self.mode {
            ResolutionMode::Custom => clamp1((self.width, self.height)),
            ResolutionMode::FromInput => clamp1(input.unwrap_or(fallback)),
            ResolutionMode::InputScaled => match input {
                Some((iw, ih)) => (
                    ((iw as f32 * self.scale) as i32).max(2),
                    ((ih as f32 * self.scale) as i32).max(2),
                ),
                None => clamp1(fallback),
            },
            ResolutionMode::FixedWidthRatio => match input {
                Some((iw, ih)) => {
                    let w = self.width.max(1);
                    let h = (w as f32 * ih as f32 / iw.max(1) as f32).round() as i32;
                    (w, h.max(1))
                }
                None => clamp1(fallback),
            },
            ResolutionMode::FixedHeightRatio => match input {
                Some((iw, ih)) => {
                    let h = self.height.max(1);
                    let w = (h as f32 * iw as f32 / ih.max(1) as f32).round() as i32;
                    (w.max(1), h)
                }
                None => clamp1(fallback),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_ignores_input() {
        let p = ResolutionPolicy::custom(640, 480);
        assert_eq!(p.resolve(Some((100, 100)), (1, 1)), (640, 480));
        assert_eq!(p.resolve(None, (1, 1)), (640, 480));
    }

    #[test]
    fn from_input_follows_input_and_falls_back() {
        let p = ResolutionPolicy::from_input();
        assert_eq!(p.resolve(Some((320, 200)), (64, 64)), (320, 200));
        assert_eq!(p.resolve(None, (64, 64)), (64, 64));
    }

    #[test]
    fn input_scaled_clamps_to_two() {
        let p = ResolutionPolicy::input_scaled(0.5);
        assert_eq!(p.resolve(Some((512, 256)), (8, 8)), (256, 128));
        // tiny input still yields a renderable target
        assert_eq!(p.resolve(Some((2, 2)), (8, 8)), (2, 2));
        let down = ResolutionPolicy::input_scaled(0.01);
        assert_eq!(down.resolve(Some((100, 100)), (8, 8)), (2, 2));
    }

    #[test]
    fn fixed_width_preserves_input_aspect() {
        // 512x256 input at fixed width 256 -> 256x128
        let p = ResolutionPolicy::fixed_width(256);
        assert_eq!(p.resolve(Some((512, 256)), (1, 1)), (256, 128));
        // portrait input
        assert_eq!(p.resolve(Some((256, 512)), (1, 1)), (256, 512));
    }

    #[test]
    fn fixed_height_preserves_input_aspect() {
        let p = ResolutionPolicy::fixed_height(128);
        assert_eq!(p.resolve(Some((512, 256)), (1, 1)), (256, 128));
    }

    #[test]
    fn cycle_reuses_previous_size() {
        // A feedback cycle never resolves an input; the caller passes the
        // previous frame's FBO size as the fallback.
        let p = ResolutionPolicy::from_input();
        assert_eq!(p.resolve(None, (333, 444)), (333, 444));
    }

    #[test]
    fn degenerate_sizes_are_clamped() {
        let p = ResolutionPolicy::custom(0, -5);
        assert_eq!(p.resolve(None, (1, 1)), (1, 1));
        let p = ResolutionPolicy::fixed_width(256);
        assert_eq!(p.resolve(Some((0, 100)), (1, 1)).0, 256);
    }
}
