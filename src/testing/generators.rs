use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `n` evenly spaced samples of `y = |x|` on `[-1, 1]`, as `[x, y]`.
pub fn abs_samples(n: usize) -> Vec<Vec<f64>> {
    let step = if n > 1 { 2.0 / (n - 1) as f64 } else { 0.0 };
    (0..n)
        .map(|i| {
            let x = -1.0 + step * i as f64;
            vec![x, x.abs()]
        })
        .collect()
}

/// `n` samples `[x, f(x) + u]` with `x` uniform on `[-1, 1]` and `u` uniform
/// on `[-amplitude, amplitude]`.
pub fn noisy_samples(n: usize, f: impl Fn(f64) -> f64, amplitude: f64, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let x: f64 = rng.random_range(-1.0..=1.0);
            let noise = if amplitude > 0.0 {
                rng.random_range(-amplitude..=amplitude)
            } else {
                0.0
            };
            vec![x, f(x) + noise]
        })
        .collect()
}
