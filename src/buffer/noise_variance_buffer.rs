use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::error::{AlnError, AlnResult};

/// How the split controller judges a leaf's fit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ErrorMode {
    /// Compare leaf error against nearest-neighbour noise with an F-test at
    /// `significance` percent.
    FTest { significance: f64 },
    /// Split whenever a leaf's mean squared error exceeds `threshold`.
    FixedMse { threshold: f64 },
}

impl Default for ErrorMode {
    fn default() -> Self {
        ErrorMode::FTest { significance: 90.0 }
    }
}

impl ErrorMode {
    /// Classic single-number form: negative values select an F-test at `-v`
    /// percent, anything else is a fixed MSE threshold.
    pub fn from_mse_or_f(v: f64) -> Self {
        if v < 0.0 {
            ErrorMode::FTest { significance: -v }
        } else {
            ErrorMode::FixedMse { threshold: v }
        }
    }

    pub fn tracks_noise(&self) -> bool {
        matches!(self, ErrorMode::FTest { .. })
    }

    pub fn validate(&self) -> AlnResult<()> {
        match *self {
            ErrorMode::FTest { significance } if !(significance > 0.0 && significance < 100.0) => {
                Err(AlnError::invalid(format!(
                    "significance must lie strictly between 0 and 100, got {significance}"
                )))
            }
            ErrorMode::FixedMse { threshold } if !(threshold >= 0.0 && threshold.is_finite()) => {
                Err(AlnError::invalid(format!(
                    "MSE threshold must be finite and non-negative, got {threshold}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// One buffered sample with the difference to, and squared domain distance
/// from, its nearest known neighbour.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferRow<'a> {
    pub sample: &'a [f64],
    pub neighbor_diff: &'a [f64],
    pub neighbor_sq_dist: f64,
}

/// Circular sample buffer that keeps nearest-neighbour pairs up to date on
/// every insertion. Rows are `sample | diff | sq_dist`.
#[derive(Clone, Debug)]
pub struct NoiseVarianceBuffer {
    dim: usize,
    output: usize,
    capacity: usize,
    mode: ErrorMode,
    data: Vec<f64>,
    len: usize,
    cursor: usize,
}

impl NoiseVarianceBuffer {
    pub fn new(dim: usize, output: usize, capacity: usize, mode: ErrorMode) -> AlnResult<Self> {
        if capacity == 0 {
            return Err(AlnError::invalid("buffer capacity must be positive"));
        }
        if dim < 2 || output >= dim {
            return Err(AlnError::invalid(format!(
                "bad buffer shape: dimension {dim}, output {output}"
            )));
        }
        mode.validate()?;
        Ok(Self {
            dim,
            output,
            capacity,
            mode,
            data: Vec::new(),
            len: 0,
            cursor: 0,
        })
    }

    #[inline]
    fn width(&self) -> usize {
        2 * self.dim + 1
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn output_index(&self) -> usize {
        self.output
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mode(&self) -> ErrorMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn row(&self, i: usize) -> Option<BufferRow<'_>> {
        if i >= self.len {
            return None;
        }
        let w = self.width();
        let r = &self.data[i * w..(i + 1) * w];
        Some(BufferRow {
            sample: &r[..self.dim],
            neighbor_diff: &r[self.dim..2 * self.dim],
            neighbor_sq_dist: r[2 * self.dim],
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = BufferRow<'_>> + '_ {
        (0..self.len).filter_map(move |i| self.row(i))
    }

    pub fn sample(&self, i: usize) -> Option<&[f64]> {
        self.row(i).map(|r| r.sample)
    }

    fn allocate(&mut self) -> AlnResult<()> {
        let cells = self
            .capacity
            .checked_mul(self.width())
            .ok_or_else(|| AlnError::OutOfMemory("buffer size overflows".into()))?;
        self.data.try_reserve_exact(cells).map_err(|e| {
            AlnError::OutOfMemory(format!(
                "cannot allocate {} samples of width {}: {e}",
                self.capacity,
                self.width()
            ))
        })?;
        self.data.resize(cells, 0.0);
        Ok(())
    }

    #[inline]
    fn domain_sq_dist(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b)
            .enumerate()
            .filter(|(j, _)| *j != self.output)
            .map(|(_, (p, q))| (p - q) * (p - q))
            .sum()
    }

    pub fn insert(&mut self, sample: &[f64]) -> AlnResult<()> {
        if sample.len() != self.dim {
            return Err(AlnError::invalid(format!(
                "sample has {} values, expected {}",
                sample.len(),
                self.dim
            )));
        }
        if self.data.is_empty() {
            self.allocate()?;
        }

        let w = self.width();
        let dim = self.dim;
        let mut best_dist = f64::INFINITY;
        let mut best_diff = vec![0.0; dim];

        if self.mode.tracks_noise() {
            let full = self.len == self.capacity;
            for i in 0..self.len {
                // the slot about to be overwritten no longer counts
                if full && i == self.cursor {
                    continue;
                }
                let start = i * w;
                let d = self.domain_sq_dist(sample, &self.data[start..start + dim]);
                let (row, rest) = self.data[start..start + w].split_at_mut(dim);
                let (diff, dist) = rest.split_at_mut(dim);
                if d < dist[0] {
                    for j in 0..dim {
                        diff[j] = sample[j] - row[j];
                    }
                    dist[0] = d;
                }
                if d < best_dist {
                    for j in 0..dim {
                        best_diff[j] = row[j] - sample[j];
                    }
                    best_dist = d;
                }
            }
        } else {
            best_dist = 0.0;
        }

        let start = self.cursor * w;
        let slot = &mut self.data[start..start + w];
        slot[..dim].copy_from_slice(sample);
        slot[dim..2 * dim].copy_from_slice(&best_diff);
        slot[2 * dim] = best_dist;

        self.cursor = (self.cursor + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
        Ok(())
    }

    /// Replaces each desired output by the mean of itself and its nearest
    /// neighbour's. Only meaningful when neighbours are tracked; returns the
    /// number of rows changed.
    pub fn reduce_noise_variance(&mut self) -> usize {
        if !self.mode.tracks_noise() {
            return 0;
        }
        let w = self.width();
        let (dim, out) = (self.dim, self.output);
        let mut changed = 0;
        for i in 0..self.len {
            let r = &mut self.data[i * w..(i + 1) * w];
            if r[2 * dim].is_finite() {
                r[out] -= 0.5 * r[dim + out];
                changed += 1;
            }
        }
        changed
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.len = 0;
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() <= eps
    }

    fn f_test() -> ErrorMode {
        ErrorMode::FTest { significance: 90.0 }
    }

    #[test]
    fn first_sample_has_no_neighbour() {
        let mut b = NoiseVarianceBuffer::new(2, 1, 4, f_test()).unwrap();
        assert!(b.is_empty());
        b.insert(&[1.0, 2.0]).unwrap();
        let r = b.row(0).unwrap();
        assert_eq!(r.sample, &[1.0, 2.0]);
        assert_eq!(r.neighbor_diff, &[0.0, 0.0]);
        assert!(r.neighbor_sq_dist.is_infinite());
        assert!(b.row(1).is_none());
    }

    #[test]
    fn later_close_sample_becomes_neighbour() {
        let mut b = NoiseVarianceBuffer::new(2, 1, 4, f_test()).unwrap();
        for s in [[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [0.1, 0.1]] {
            b.insert(&s).unwrap();
        }
        let origin = b.row(0).unwrap();
        // only the input axis counts towards the distance
        assert!(approx_eq(origin.neighbor_sq_dist, 0.01, 1e-12));
        assert!(approx_eq(origin.neighbor_diff[0], 0.1, 1e-12));
        assert!(approx_eq(origin.neighbor_diff[1], 0.1, 1e-12));

        let newest = b.row(3).unwrap();
        assert!(approx_eq(newest.neighbor_sq_dist, 0.01, 1e-12));
        assert!(approx_eq(newest.neighbor_diff[0], -0.1, 1e-12));

        assert!(approx_eq(b.row(1).unwrap().neighbor_sq_dist, 0.81, 1e-12));
        assert_eq!(b.row(2).unwrap().neighbor_sq_dist, 1.0);
    }

    #[test]
    fn fixed_mse_mode_skips_neighbour_search() {
        let mut b = NoiseVarianceBuffer::new(2, 1, 3, ErrorMode::FixedMse { threshold: 0.01 }).unwrap();
        b.insert(&[0.0, 0.0]).unwrap();
        b.insert(&[0.1, 5.0]).unwrap();
        for r in b.rows() {
            assert_eq!(r.neighbor_sq_dist, 0.0);
            assert_eq!(r.neighbor_diff, &[0.0, 0.0]);
        }
        assert_eq!(b.reduce_noise_variance(), 0);
    }

    #[test]
    fn wraps_around_when_full() {
        let mut b = NoiseVarianceBuffer::new(2, 1, 3, f_test()).unwrap();
        for v in 0..5 {
            b.insert(&[v as f64, 0.0]).unwrap();
        }
        assert_eq!(b.len(), 3);
        assert_eq!(b.sample(0).unwrap()[0], 3.0);
        assert_eq!(b.sample(1).unwrap()[0], 4.0);
        assert_eq!(b.sample(2).unwrap()[0], 2.0);
        // sample 4 evicted sample 1, so it must pair with 3
        assert_eq!(b.row(1).unwrap().neighbor_sq_dist, 1.0);
        assert_eq!(b.row(1).unwrap().neighbor_diff[0], -1.0);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(NoiseVarianceBuffer::new(2, 1, 0, f_test()).is_err());
        assert!(NoiseVarianceBuffer::new(1, 0, 4, f_test()).is_err());
        assert!(NoiseVarianceBuffer::new(2, 2, 4, f_test()).is_err());
        assert!(NoiseVarianceBuffer::new(2, 1, 4, ErrorMode::FTest { significance: 100.0 }).is_err());
        assert!(NoiseVarianceBuffer::new(2, 1, 4, ErrorMode::FixedMse { threshold: -1.0 }).is_err());
        let mut b = NoiseVarianceBuffer::new(3, 2, 4, f_test()).unwrap();
        assert!(matches!(b.insert(&[1.0, 2.0]), Err(AlnError::InvalidArgument(_))));
    }

    #[test]
    fn reduce_noise_averages_with_neighbour() {
        let mut b = NoiseVarianceBuffer::new(2, 1, 4, f_test()).unwrap();
        b.insert(&[0.0, 1.0]).unwrap();
        b.insert(&[0.1, 3.0]).unwrap();
        assert_eq!(b.reduce_noise_variance(), 2);
        assert_eq!(b.sample(0).unwrap()[1], 2.0);
        assert_eq!(b.sample(1).unwrap()[1], 2.0);
    }

    #[test]
    fn mse_or_f_number_maps_to_mode() {
        assert_eq!(ErrorMode::from_mse_or_f(-75.0), ErrorMode::FTest { significance: 75.0 });
        assert_eq!(ErrorMode::from_mse_or_f(0.001), ErrorMode::FixedMse { threshold: 0.001 });
        assert!(ErrorMode::from_mse_or_f(-75.0).tracks_noise());
    }

    #[test]
    fn clear_allows_reuse() {
        let mut b = NoiseVarianceBuffer::new(2, 1, 2, f_test()).unwrap();
        b.insert(&[0.0, 0.0]).unwrap();
        b.clear();
        assert!(b.is_empty());
        b.insert(&[1.0, 1.0]).unwrap();
        assert!(b.row(0).unwrap().neighbor_sq_dist.is_infinite());
    }

    proptest! {
        #[test]
        fn stored_distance_is_true_nearest(
            points in prop::collection::vec(prop::collection::vec(-5.0f64..5.0, 3), 2..40),
        ) {
            let mut b = NoiseVarianceBuffer::new(3, 1, 64, f_test()).unwrap();
            for p in &points {
                b.insert(p).unwrap();
            }
            for i in 0..b.len() {
                let ri = b.row(i).unwrap();
                let mut best = f64::INFINITY;
                for j in 0..b.len() {
                    if i == j {
                        continue;
                    }
                    let rj = b.row(j).unwrap();
                    let d = (ri.sample[0] - rj.sample[0]).powi(2) + (ri.sample[2] - rj.sample[2]).powi(2);
                    best = best.min(d);
                }
                prop_assert!((ri.neighbor_sq_dist - best).abs() <= 1e-9 * (1.0 + best));
                let along = ri.neighbor_diff[0].powi(2) + ri.neighbor_diff[2].powi(2);
                prop_assert!((along - best).abs() <= 1e-9 * (1.0 + best));
            }
        }
    }
}
