use crate::core::error::{AlnError, AlnResult};

pub const DOF_BUCKETS: usize = 13;

/// Critical F ratios per degrees-of-freedom bucket.
const F_90: [f64; DOF_BUCKETS] = [
    9.00, 5.39, 4.11, 3.45, 3.05, 2.78, 2.59, 2.44, 2.32, 1.79, 1.61, 1.51, 1.40,
];
const F_75: [f64; DOF_BUCKETS] = [
    3.00, 2.36, 2.06, 1.89, 1.78, 1.70, 1.64, 1.59, 1.55, 1.36, 1.28, 1.24, 1.19,
];
const F_50: [f64; DOF_BUCKETS] = [1.0; DOF_BUCKETS];
const F_25: [f64; DOF_BUCKETS] = [
    0.333, 0.424, 0.485, 0.529, 0.562, 0.588, 0.610, 0.629, 0.645, 0.735, 0.781, 0.806, 0.840,
];
const F_10: [f64; DOF_BUCKETS] = [
    0.111, 0.185, 0.243, 0.290, 0.327, 0.359, 0.386, 0.410, 0.431, 0.558, 0.621, 0.662, 0.714,
];

/// Exact per-hit buckets up to 10 hits, then coarser ones above 10/20/30/40/60.
pub fn dof_bucket(hits: usize) -> usize {
    match hits {
        h if h > 60 => 12,
        h if h > 40 => 11,
        h if h > 30 => 10,
        h if h > 20 => 9,
        h if h > 10 => 8,
        h => h.saturating_sub(2),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FTable {
    significance: f64,
    limits: [f64; DOF_BUCKETS],
}

impl FTable {
    /// Tabulated levels are used as is; others scale the 75% table
    /// log-linearly around 50%.
    pub fn new(significance: f64) -> AlnResult<Self> {
        if !(significance > 0.0 && significance < 100.0) {
            return Err(AlnError::invalid(format!(
                "significance must lie strictly between 0 and 100, got {significance}"
            )));
        }
        let limits = match significance {
            s if s == 90.0 => F_90,
            s if s == 75.0 => F_75,
            s if s == 50.0 => F_50,
            s if s == 25.0 => F_25,
            s if s == 10.0 => F_10,
            s => {
                let power = (s - 50.0) / 25.0;
                F_75.map(|f| f.powf(power))
            }
        };
        Ok(Self {
            significance,
            limits,
        })
    }

    pub fn significance(&self) -> f64 {
        self.significance
    }

    pub fn limit(&self, hits: usize) -> f64 {
        self.limits[dof_bucket(hits).min(DOF_BUCKETS - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() <= eps
    }

    #[test]
    fn buckets_coarsen_with_hits() {
        assert_eq!(dof_bucket(2), 0);
        assert_eq!(dof_bucket(5), 3);
        assert_eq!(dof_bucket(10), 8);
        assert_eq!(dof_bucket(11), 8);
        assert_eq!(dof_bucket(20), 8);
        assert_eq!(dof_bucket(21), 9);
        assert_eq!(dof_bucket(31), 10);
        assert_eq!(dof_bucket(41), 11);
        assert_eq!(dof_bucket(60), 11);
        assert_eq!(dof_bucket(61), 12);
        assert_eq!(dof_bucket(100_000), 12);
        assert_eq!(dof_bucket(0), 0);
    }

    #[test]
    fn tabulated_levels_are_exact() {
        let t = FTable::new(90.0).unwrap();
        assert_eq!(t.limit(2), 9.00);
        assert_eq!(t.limit(1000), 1.40);
        assert_eq!(FTable::new(10.0).unwrap().limit(15), 0.431);
        assert_eq!(FTable::new(50.0).unwrap().limit(7), 1.0);
    }

    #[test]
    fn other_levels_interpolate_from_75() {
        let t = FTable::new(60.0).unwrap();
        assert!(approx_eq(t.limit(2), 3.0f64.powf(0.4), EPS));
        let t = FTable::new(40.0).unwrap();
        assert!(approx_eq(t.limit(100), 1.19f64.powf(-0.4), EPS));
        assert!(t.limit(100) < 1.0);
    }

    #[test]
    fn limits_fall_with_more_hits() {
        for s in [10.0, 25.0, 60.0, 75.0, 90.0, 95.0] {
            let t = FTable::new(s).unwrap();
            let mut prev = t.limit(2);
            for h in 3..80 {
                let cur = t.limit(h);
                if s > 50.0 {
                    assert!(cur <= prev, "s={s} h={h}");
                } else {
                    assert!(cur >= prev, "s={s} h={h}");
                }
                prev = cur;
            }
        }
    }

    #[test]
    fn rejects_out_of_range_levels() {
        assert!(FTable::new(0.0).is_err());
        assert!(FTable::new(100.0).is_err());
        assert!(FTable::new(f64::NAN).is_err());
    }
}
