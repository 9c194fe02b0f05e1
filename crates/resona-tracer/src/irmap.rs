//! Impulse-response histogram.
//!
//! The wave tracer's primary render mode outputs one (amplitude, path
//! distance, bounce count) triple per pixel; folding those into a histogram
//! over quantized distance yields the acoustic impulse response of the
//! traced scene. Everything here is plain CPU data so snapshots are cheap
//! copies.

use std::collections::BTreeMap;

use crate::ImageSnapshot;

/// Samples with an absolute amplitude below this carry no audible energy
/// and are discarded before binning.
pub const MIN_AMPLITUDE: f32 = 1e-5;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IrBin {
    pub amplitude: f32,
    pub count: u32,
    pub bounce_sum: f32,
}

/// Summary of a histogram at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IrInfo {
    pub num_samples: u64,
    pub num_bins: usize,
    pub max_amplitude: f32,
    pub max_distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrMap {
    quantum: f32,
    bins: BTreeMap<u32, IrBin>,
    num_samples: u64,
    max_distance: f32,
}

impl IrMap {
    pub fn new(quantum: f32) -> Self {
        Self {
            quantum: quantum.max(1e-6),
            bins: BTreeMap::new(),
            num_samples: 0,
            max_distance: 0.0,
        }
    }

    pub fn quantum(&self) -> f32 {
        self.quantum
    }

    pub fn clear(&mut self) {
        self.bins.clear();
        self.num_samples = 0;
        self.max_distance = 0.0;
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn num_samples(&self) -> u64 {
        self.num_samples
    }

    /// Fold one traced sample into the histogram.
    ///
    /// Near-zero amplitudes and non-finite or negative distances are
    /// discarded (misses and numerical garbage from the GPU buffer).
    pub fn add_sample(&mut self, amplitude: f32, distance: f32, bounces: f32) {
        if amplitude.abs() < MIN_AMPLITUDE {
            return;
        }
        if !distance.is_finite() || distance < 0.0 || !amplitude.is_finite() {
            return;
        }
        let key = (distance / self.quantum) as u32;
        let bin = self.bins.entry(key).or_default();
        bin.amplitude += amplitude;
        bin.count += 1;
        bin.bounce_sum += bounces.max(0.0);
        self.num_samples += 1;
        if distance > self.max_distance {
            self.max_distance = distance;
        }
    }

    pub fn bins(&self) -> impl Iterator<Item = (f32, &IrBin)> {
        self.bins
            .iter()
            .map(|(k, b)| (*k as f32 * self.quantum, b))
    }

    pub fn info(&self) -> IrInfo {
        IrInfo {
            num_samples: self.num_samples,
            num_bins: self.bins.len(),
            max_amplitude: self
                .bins
                .values()
                .map(|b| b.amplitude)
                .fold(0.0_f32, f32::max),
            max_distance: self.max_distance,
        }
    }

    /// Render the histogram as an amplitude-over-distance plot.
    ///
    /// Bar brightness encodes the average bounce count of the column
    /// (direct sound renders brighter than late reflections).
    pub fn render_image(&self, width: usize, height: usize) -> ImageSnapshot {
        let width = width.max(1);
        let height = height.max(1);
        let mut rgba = vec![0u8; width * height * 4];

        let info = self.info();
        if info.num_bins > 0 && info.max_amplitude > 0.0 && info.max_distance > 0.0 {
            // accumulate bins into pixel columns
            let mut columns = vec![(0.0_f32, 0.0_f32, 0u32); width];
            for (dist, bin) in self.bins() {
                let x = ((dist / info.max_distance) * (width - 1) as f32) as usize;
                let c = &mut columns[x.min(width - 1)];
                c.0 += bin.amplitude;
                c.1 += bin.bounce_sum;
                c.2 += bin.count;
            }
            let max_col = columns.iter().map(|c| c.0).fold(0.0_f32, f32::max);
            for (x, (amp, bounce_sum, count)) in columns.iter().enumerate() {
                if *count == 0 || max_col <= 0.0 {
                    continue;
                }
                let norm = (amp / max_col).clamp(0.0, 1.0);
                let bar = (norm * (height - 1) as f32) as usize;
                let avg_bounce = bounce_sum / *count as f32;
                let fade = 1.0 / (1.0 + avg_bounce * 0.5);
                let value = (200.0 + 55.0 * fade) as u8;
                for y in 0..=bar {
                    // rows run bottom-up
                    let row = height - 1 - y;
                    let px = (row * width + x) * 4;
                    rgba[px] = value;
                    rgba[px + 1] = (value as f32 * fade) as u8;
                    rgba[px + 2] = 64;
                    rgba[px + 3] = 255;
                }
            }
        }

        ImageSnapshot {
            width,
            height,
            rgba,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_accumulate_into_quantized_bins() {
        let mut ir = IrMap::new(1.0);
        ir.add_sample(0.5, 3.2, 1.0);
        ir.add_sample(0.25, 3.7, 2.0);
        ir.add_sample(0.1, 10.0, 0.0);
        assert_eq!(ir.num_bins(), 2);
        assert_eq!(ir.num_samples(), 3);
        let info = ir.info();
        assert!((info.max_amplitude - 0.75).abs() < 1e-6);
        assert!((info.max_distance - 10.0).abs() < 1e-6);
    }

    #[test]
    fn near_zero_amplitudes_are_discarded() {
        let mut ir = IrMap::new(1.0);
        ir.add_sample(0.0, 5.0, 1.0);
        ir.add_sample(MIN_AMPLITUDE / 2.0, 5.0, 1.0);
        assert!(ir.is_empty());
    }

    #[test]
    fn garbage_distances_are_discarded() {
        let mut ir = IrMap::new(1.0);
        ir.add_sample(1.0, f32::NAN, 0.0);
        ir.add_sample(1.0, f32::INFINITY, 0.0);
        ir.add_sample(1.0, -2.0, 0.0);
        assert!(ir.is_empty());
    }

    #[test]
    fn clear_resets_everything() {
        let mut ir = IrMap::new(0.5);
        ir.add_sample(1.0, 1.0, 1.0);
        ir.clear();
        assert!(ir.is_empty());
        assert_eq!(ir.info(), IrInfo::default());
    }

    #[test]
    fn render_image_is_deterministic_for_a_snapshot() {
        let mut ir = IrMap::new(0.25);
        for i in 0..32 {
            ir.add_sample(1.0 / (1.0 + i as f32), i as f32 * 0.3, (i % 4) as f32);
        }
        let a = ir.render_image(64, 32);
        let b = ir.render_image(64, 32);
        assert_eq!(a, b);
        assert_eq!(a.rgba.len(), 64 * 32 * 4);
        assert!(a.rgba.iter().any(|&v| v != 0));
    }

    #[test]
    fn empty_histogram_renders_a_blank_image() {
        let ir = IrMap::new(1.0);
        let img = ir.render_image(16, 16);
        assert!(img.rgba.iter().all(|&v| v == 0));
    }
}
