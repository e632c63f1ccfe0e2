//! C2: peakfinder8 connected-component Bragg peak search.
//!
//! Implements the canonical algorithm referenced by the live processing
//! pipeline (not the bit-rotted duplicates that float around in adjacent
//! algorithm modules): per-radial-bin background statistics, an annular
//! SNR candidate test, ASIC-local 4-connected components, and per-component
//! local background subtraction by mean with iterative 3-sigma rejection.

use std::collections::{HashMap, HashSet};

use crate::data::{BadPixelMap, DetectorImage, PeakList, RadiusMap};

#[derive(Debug, Clone)]
pub struct Peakfinder8Params {
    pub max_num_peaks: usize,
    pub asic_nx: usize,
    pub asic_ny: usize,
    pub nasics_x: usize,
    pub nasics_y: usize,
    pub adc_threshold: f32,
    pub minimum_snr: f32,
    pub min_pixel_count: usize,
    pub max_pixel_count: usize,
    pub local_bg_radius: i64,
    pub min_res: f32,
    pub max_res: f32,
}

/// Iterative mean-with-3-sigma-rejection used both for local background
/// subtraction. Capped at a handful of iterations; real backgrounds
/// converge in 2-3 passes.
const MAX_REJECTION_ITERATIONS: usize = 5;

pub struct Peakfinder8 {
    params: Peakfinder8Params,
    /// (loaded_mask) AND (min_res <= radius <= max_res), built once.
    effective_mask: Vec<bool>,
    radius_map: RadiusMap,
    shape: (usize, usize),
}

impl Peakfinder8 {
    pub fn new(
        params: Peakfinder8Params,
        bad_pixel_map: &BadPixelMap,
        radius_map: RadiusMap,
    ) -> Self {
        let shape = bad_pixel_map.shape;
        let mut effective_mask = Vec::with_capacity(shape.0 * shape.1);
        for i in 0..shape.0 * shape.1 {
            let ss = i / shape.1;
            let fs = i % shape.1;
            let radius = radius_map.get(ss, fs);
            let in_ring = radius >= params.min_res && radius <= params.max_res;
            effective_mask.push(bad_pixel_map.is_good(ss, fs) && in_ring);
        }

        Self {
            params,
            effective_mask,
            radius_map,
            shape,
        }
    }

    fn asic_id(&self, ss: usize, fs: usize) -> (usize, usize) {
        (ss / self.params.asic_ny, fs / self.params.asic_nx)
    }

    /// Run the full search over a single calibrated frame. Never panics
    /// on empty input.
    pub fn find_peaks(&self, data: &DetectorImage) -> PeakList {
        debug_assert_eq!(data.shape, self.shape);
        let (ss_len, fs_len) = self.shape;
        let n = ss_len * fs_len;
        if n == 0 {
            return PeakList::empty();
        }

        // 1. Radial statistics over unmasked pixels.
        let mut bins: HashMap<i64, (f64, f64, u32)> = HashMap::new();
        for i in 0..n {
            if !self.effective_mask[i] {
                continue;
            }
            let ss = i / fs_len;
            let fs = i % fs_len;
            let bin = self.radius_map.get(ss, fs).floor() as i64;
            let value = data.data[i] as f64;
            let entry = bins.entry(bin).or_insert((0.0, 0.0, 0));
            entry.0 += value;
            entry.1 += value * value;
            entry.2 += 1;
        }
        let bin_stats: HashMap<i64, (f32, f32)> = bins
            .into_iter()
            .map(|(bin, (sum, sumsq, count))| {
                let mean = sum / count as f64;
                let var = (sumsq / count as f64 - mean * mean).max(0.0);
                (bin, (mean as f32, var.sqrt() as f32))
            })
            .collect();

        // 2. Candidate selection.
        let mut is_candidate = vec![false; n];
        for i in 0..n {
            if !self.effective_mask[i] {
                continue;
            }
            let ss = i / fs_len;
            let fs = i % fs_len;
            let value = data.data[i];
            if value < self.params.adc_threshold {
                continue;
            }
            let bin = self.radius_map.get(ss, fs).floor() as i64;
            let (mean, std) = bin_stats.get(&bin).copied().unwrap_or((0.0, 0.0));
            if value >= mean + self.params.minimum_snr * std {
                is_candidate[i] = true;
            }
        }

        // 3. ASIC-local 4-connected components, discovered in scan order
        //    (row-major over the flat buffer is exactly ss-major then fs).
        let mut visited = vec![false; n];
        let mut components: Vec<Vec<usize>> = Vec::new();
        for start in 0..n {
            if !is_candidate[start] || visited[start] {
                continue;
            }
            let start_ss = start / fs_len;
            let start_fs = start % fs_len;
            let start_asic = self.asic_id(start_ss, start_fs);

            let mut component = Vec::new();
            let mut stack = vec![start];
            visited[start] = true;
            while let Some(idx) = stack.pop() {
                component.push(idx);
                let ss = idx / fs_len;
                let fs = idx % fs_len;
                let neighbors = [
                    (ss.checked_sub(1), Some(fs)),
                    (Some(ss + 1).filter(|&s| s < ss_len), Some(fs)),
                    (Some(ss), fs.checked_sub(1)),
                    (Some(ss), Some(fs + 1).filter(|&f| f < fs_len)),
                ];
                for (ns, nf) in neighbors {
                    let (Some(ns), Some(nf)) = (ns, nf) else {
                        continue;
                    };
                    if self.asic_id(ns, nf) != start_asic {
                        continue;
                    }
                    let nidx = ns * fs_len + nf;
                    if is_candidate[nidx] && !visited[nidx] {
                        visited[nidx] = true;
                        stack.push(nidx);
                    }
                }
            }
            components.push(component);
        }

        // 4. Component filtering by size.
        let kept: Vec<Vec<usize>> = components
            .into_iter()
            .filter(|c| {
                c.len() >= self.params.min_pixel_count && c.len() <= self.params.max_pixel_count
            })
            .collect();

        // 5-6. Local background subtraction and intensity-weighted centroid.
        let mut peaks = PeakList::empty();
        for component in &kept {
            let local_bg = self.local_background(component, data);

            let mut sum_value = 0.0f32;
            let mut sum_fs = 0.0f32;
            let mut sum_ss = 0.0f32;
            for &idx in component {
                let ss = idx / fs_len;
                let fs = idx % fs_len;
                let value = (data.data[idx] - local_bg).max(0.0);
                sum_value += value;
                sum_fs += value * fs as f32;
                sum_ss += value * ss as f32;
            }

            if sum_value <= 0.0 || !sum_value.is_finite() {
                continue;
            }

            peaks.fs.push(sum_fs / sum_value);
            peaks.ss.push(sum_ss / sum_value);
            peaks.intensity.push(sum_value);

            if peaks.num_peaks() >= self.params.max_num_peaks {
                break;
            }
        }

        peaks
    }

    /// Mean of unmasked pixels in an annulus around `component`'s bounding
    /// box (outer radius `local_bg_radius`, excluding the component's own
    /// pixels), with iterative 3-sigma rejection.
    fn local_background(&self, component: &[usize], data: &DetectorImage) -> f32 {
        let (_, fs_len) = self.shape;
        let (ss_len, _) = self.shape;
        let radius = self.params.local_bg_radius.max(0) as usize;

        let mut min_ss = usize::MAX;
        let mut max_ss = 0usize;
        let mut min_fs = usize::MAX;
        let mut max_fs = 0usize;
        let member: HashSet<usize> = component.iter().copied().collect();
        for &idx in component {
            let ss = idx / fs_len;
            let fs = idx % fs_len;
            min_ss = min_ss.min(ss);
            max_ss = max_ss.max(ss);
            min_fs = min_fs.min(fs);
            max_fs = max_fs.max(fs);
        }

        let outer_min_ss = min_ss.saturating_sub(radius);
        let outer_max_ss = (max_ss + radius).min(ss_len.saturating_sub(1));
        let outer_min_fs = min_fs.saturating_sub(radius);
        let outer_max_fs = (max_fs + radius).min(fs_len.saturating_sub(1));

        let mut sample: Vec<f32> = Vec::new();
        for ss in outer_min_ss..=outer_max_ss {
            for fs in outer_min_fs..=outer_max_fs {
                let idx = ss * fs_len + fs;
                if member.contains(&idx) {
                    continue;
                }
                if !self.effective_mask[idx] {
                    continue;
                }
                sample.push(data.data[idx]);
            }
        }

        if sample.is_empty() {
            return 0.0;
        }

        let mut mean = mean_of(&sample);
        for _ in 0..MAX_REJECTION_ITERATIONS {
            let std = std_of(&sample, mean);
            let filtered: Vec<f32> = sample
                .iter()
                .copied()
                .filter(|v| (v - mean).abs() <= 3.0 * std)
                .collect();
            if filtered.len() == sample.len() || filtered.is_empty() {
                break;
            }
            sample = filtered;
            mean = mean_of(&sample);
        }
        mean
    }
}

fn mean_of(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len() as f32
}

fn std_of(values: &[f32], mean: f32) -> f32 {
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / values.len() as f32;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_radius_map(shape: (usize, usize)) -> RadiusMap {
        let (ss_len, fs_len) = shape;
        let cy = (ss_len as f32 - 1.0) / 2.0;
        let cx = (fs_len as f32 - 1.0) / 2.0;
        let mut data = Vec::with_capacity(ss_len * fs_len);
        for ss in 0..ss_len {
            for fs in 0..fs_len {
                let dy = ss as f32 - cy;
                let dx = fs as f32 - cx;
                data.push((dy * dy + dx * dx).sqrt());
            }
        }
        RadiusMap::new(data, shape)
    }

    fn single_asic_params(min_res: f32, max_res: f32) -> Peakfinder8Params {
        Peakfinder8Params {
            max_num_peaks: 2048,
            asic_nx: 64,
            asic_ny: 64,
            nasics_x: 1,
            nasics_y: 1,
            adc_threshold: 200.0,
            minimum_snr: 4.0,
            min_pixel_count: 2,
            max_pixel_count: 50,
            local_bg_radius: 4,
            min_res,
            max_res,
        }
    }

    fn background_with_spot(shape: (usize, usize), spot: Option<(usize, usize)>) -> DetectorImage {
        let mut img = DetectorImage::filled(shape, 100.0);
        if let Some((cy, cx)) = spot {
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    let ss = (cy as i64 + dy) as usize;
                    let fs = (cx as i64 + dx) as usize;
                    img.set(ss, fs, 5000.0);
                }
            }
        }
        img
    }

    #[test]
    fn test_s1_single_hit() {
        let shape = (64, 64);
        let mask = BadPixelMap::all_good(shape);
        let radius = flat_radius_map(shape);
        let finder = Peakfinder8::new(single_asic_params(0.0, 100.0), &mask, radius);
        let img = background_with_spot(shape, Some((32, 32)));

        let peaks = finder.find_peaks(&img);
        assert_eq!(peaks.num_peaks(), 1);
        assert!((peaks.fs[0] - 32.0).abs() < 0.5);
        assert!((peaks.ss[0] - 32.0).abs() < 0.5);
        assert!(peaks.intensity[0] > 40000.0);
    }

    #[test]
    fn test_s2_no_hit() {
        let shape = (64, 64);
        let mask = BadPixelMap::all_good(shape);
        let radius = flat_radius_map(shape);
        let finder = Peakfinder8::new(single_asic_params(0.0, 100.0), &mask, radius);
        let img = background_with_spot(shape, None);

        assert_eq!(finder.find_peaks(&img).num_peaks(), 0);
    }

    #[test]
    fn test_s3_masked_out_spot() {
        let shape = (64, 64);
        let mut mask = BadPixelMap::all_good(shape);
        mask.data[32 * 64 + 32] = 0;
        let radius = flat_radius_map(shape);
        let finder = Peakfinder8::new(single_asic_params(0.0, 100.0), &mask, radius);
        let img = background_with_spot(shape, Some((32, 32)));

        assert_eq!(finder.find_peaks(&img).num_peaks(), 0);
    }

    #[test]
    fn test_s4_resolution_filter() {
        let shape = (64, 64);
        let mask = BadPixelMap::all_good(shape);
        let radius = flat_radius_map(shape);
        let finder = Peakfinder8::new(single_asic_params(50.0, 100.0), &mask, radius);
        let img = background_with_spot(shape, Some((32, 32)));

        assert_eq!(finder.find_peaks(&img).num_peaks(), 0);
    }

    #[test]
    fn test_truncates_at_max_num_peaks_without_sorting_by_intensity() {
        let shape = (64, 64);
        let mask = BadPixelMap::all_good(shape);
        let radius = flat_radius_map(shape);
        let mut params = single_asic_params(0.0, 100.0);
        params.max_num_peaks = 1;
        let finder = Peakfinder8::new(params, &mask, radius);

        let mut img = DetectorImage::filled(shape, 100.0);
        for (cy, cx) in [(10usize, 10usize), (50usize, 50usize)] {
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    let ss = (cy as i64 + dy) as usize;
                    let fs = (cx as i64 + dx) as usize;
                    img.set(ss, fs, 5000.0);
                }
            }
        }

        let peaks = finder.find_peaks(&img);
        assert_eq!(peaks.num_peaks(), 1);
        assert!((peaks.fs[0] - 10.0).abs() < 0.5);
    }

    #[test]
    fn test_empty_frame_never_panics() {
        let shape = (0, 0);
        let mask = BadPixelMap::all_good(shape);
        let radius = RadiusMap::new(vec![], shape);
        let finder = Peakfinder8::new(single_asic_params(0.0, 100.0), &mask, radius);
        let img = DetectorImage::new(vec![], shape);
        assert_eq!(finder.find_peaks(&img).num_peaks(), 0);
    }
}
