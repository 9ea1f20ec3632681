//! The Welford/Chan online-variance kernel shared by the `int`, `float`,
//! `nat` and `dec2` accumulator kinds (§4.B.1, §4.B.2).
//!
//! The codec boundary rejects non-finite floats before they ever reach an
//! accumulator (`InvalidScalar`), so there is no infinite/NaN path to
//! propagate here, unlike a pure `f64` running-sum design that leans on
//! Postgres's own infinite/NaN float semantics. `int`/`nat`/`dec2` must
//! round-trip `sum`/`min`/`max` exactly, so those three fields are tracked
//! in an exact integer lane (`i128`) alongside the float lane used for
//! `mean`/`sum_sq_diff`, which only ever feeds
//! `variance`/`stddev`/`coefficient_of_variation_pct`.

use serde::{Deserialize, Serialize};

use crate::error::StatsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumKind {
    Int,
    Nat,
    Float,
    Dec2,
}

impl NumKind {
    pub fn type_tag(self) -> &'static str {
        match self {
            NumKind::Int => "int_agg",
            NumKind::Nat => "nat_agg",
            NumKind::Float => "float_agg",
            NumKind::Dec2 => "dec2_agg",
        }
    }

    fn is_exact(self) -> bool {
        !matches!(self, NumKind::Float)
    }
}

/// `x` is the observation already projected into the kernel's working
/// representation: the raw value for `int`/`float`/`nat`, the value
/// scaled by 100 for `dec2`. Exact kinds additionally carry `x` as an
/// `i64` so `sum`/`min`/`max` can be tracked without floating-point
/// drift; `float` only ever populates the float lane.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NumericAccumulator {
    pub kind: NumKind,
    pub count: u64,
    /// Exact running sum for `int`/`nat`/`dec2` (scaled); unused for `float`.
    pub exact_sum: i128,
    /// Exact running min/max for `int`/`nat`/`dec2` (scaled); unused for `float`.
    pub exact_min: i64,
    pub exact_max: i64,
    /// Running sum/min/max for `float`; unused for exact kinds.
    pub float_sum: f64,
    pub float_min: f64,
    pub float_max: f64,
    /// Welford state, always carried in `f64` regardless of kind.
    pub mean: f64,
    pub sum_sq_diff: f64,
}

impl NumericAccumulator {
    pub fn new(kind: NumKind) -> Self {
        NumericAccumulator {
            kind,
            count: 0,
            exact_sum: 0,
            exact_min: 0,
            exact_max: 0,
            float_sum: 0.0,
            float_min: 0.0,
            float_max: 0.0,
            mean: 0.0,
            sum_sq_diff: 0.0,
        }
    }

    /// `raw` is the value as observed (unscaled); `x` is what the Welford
    /// recurrence should actually accumulate (scaled by 100 for `dec2`,
    /// identical to `raw` otherwise). Separated so `nat`'s negativity
    /// check can look at the real observed value.
    pub fn accum(&mut self, raw: i64, x: f64) -> Result<(), StatsError> {
        if self.kind == NumKind::Nat && raw < 0 {
            return Err(StatsError::NegativeNat(raw));
        }

        let count = self.count + 1;
        let delta = x - self.mean;
        let mean = self.mean + delta / count as f64;
        let delta2 = x - mean;
        self.sum_sq_diff += delta * delta2;
        self.mean = mean;

        if self.count == 0 {
            if self.kind.is_exact() {
                self.exact_min = raw;
                self.exact_max = raw;
            } else {
                self.float_min = x;
                self.float_max = x;
            }
        } else if self.kind.is_exact() {
            self.exact_min = self.exact_min.min(raw);
            self.exact_max = self.exact_max.max(raw);
        } else {
            self.float_min = self.float_min.min(x);
            self.float_max = self.float_max.max(x);
        }

        if self.kind.is_exact() {
            self.exact_sum += raw as i128;
        } else {
            self.float_sum += x;
        }
        self.count = count;
        Ok(())
    }

    /// Chan's parallel-form merge of two Welford states (§4.B.1).
    pub fn merge(&self, other: &NumericAccumulator) -> Result<NumericAccumulator, StatsError> {
        if self.kind != other.kind {
            return Err(StatsError::TypeMismatch {
                name: String::new(),
                expected: self.kind.type_tag(),
                found: other.kind.type_tag(),
            });
        }
        if self.count == 0 {
            return Ok(*other);
        }
        if other.count == 0 {
            return Ok(*self);
        }

        let n = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean =
            self.mean + delta * (other.count as f64 / n as f64);
        let sum_sq_diff = self.sum_sq_diff
            + other.sum_sq_diff
            + delta * delta * (self.count as f64 * other.count as f64 / n as f64);

        let mut merged = NumericAccumulator {
            kind: self.kind,
            count: n,
            mean,
            sum_sq_diff,
            ..*self
        };

        if self.kind.is_exact() {
            merged.exact_sum = self.exact_sum + other.exact_sum;
            merged.exact_min = self.exact_min.min(other.exact_min);
            merged.exact_max = self.exact_max.max(other.exact_max);
        } else {
            merged.float_sum = self.float_sum + other.float_sum;
            merged.float_min = self.float_min.min(other.float_min);
            merged.float_max = self.float_max.max(other.float_max);
        }
        Ok(merged)
    }

    pub fn variance(&self) -> Option<f64> {
        if self.count > 1 {
            Some(self.sum_sq_diff / (self.count - 1) as f64)
        } else {
            None
        }
    }

    pub fn stddev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    pub fn mean_unscaled(&self) -> f64 {
        match self.kind {
            NumKind::Dec2 => self.mean / 100.0,
            _ => self.mean,
        }
    }

    pub fn coefficient_of_variation_pct(&self) -> Option<f64> {
        let stddev = self.stddev()?;
        let mean = self.mean_unscaled();
        if mean == 0.0 {
            None
        } else {
            Some((self.stddev_unscaled(stddev) / mean) * 100.0)
        }
    }

    fn stddev_unscaled(&self, stddev: f64) -> f64 {
        match self.kind {
            NumKind::Dec2 => stddev / 100.0,
            _ => stddev,
        }
    }

    pub fn variance_unscaled(&self) -> Option<f64> {
        let v = self.variance()?;
        Some(match self.kind {
            NumKind::Dec2 => v / 10_000.0,
            _ => v,
        })
    }

    pub fn stddev_unscaled_opt(&self) -> Option<f64> {
        let s = self.stddev()?;
        Some(self.stddev_unscaled(s))
    }

    /// Exact sum, already unscaled for `dec2` (divided by 100).
    pub fn sum_exact(&self) -> ExactNumber {
        if self.kind.is_exact() {
            if self.kind == NumKind::Dec2 {
                ExactNumber::Dec2Scaled(self.exact_sum)
            } else {
                ExactNumber::Int(self.exact_sum)
            }
        } else {
            ExactNumber::Float(self.float_sum)
        }
    }

    pub fn min_exact(&self) -> ExactNumber {
        if self.kind.is_exact() {
            if self.kind == NumKind::Dec2 {
                ExactNumber::Dec2Scaled(self.exact_min as i128)
            } else {
                ExactNumber::Int(self.exact_min as i128)
            }
        } else {
            ExactNumber::Float(self.float_min)
        }
    }

    pub fn max_exact(&self) -> ExactNumber {
        if self.kind.is_exact() {
            if self.kind == NumKind::Dec2 {
                ExactNumber::Dec2Scaled(self.exact_max as i128)
            } else {
                ExactNumber::Int(self.exact_max as i128)
            }
        } else {
            ExactNumber::Float(self.float_max)
        }
    }
}

/// A sum/min/max value in its natively-exact representation, ready for
/// the document materializer to render (§4.E).
#[derive(Debug, Clone, Copy)]
pub enum ExactNumber {
    Int(i128),
    /// A `dec2` value scaled by 100; divide by 100.0 before display.
    Dec2Scaled(i128),
    Float(f64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn naive(values: &[f64]) -> (f64, f64, f64, f64) {
        let n = values.len() as f64;
        let sum: f64 = values.iter().sum();
        let mean = sum / n;
        let sum_sq_diff: f64 = values.iter().map(|x| (x - mean).powi(2)).sum();
        (sum, mean, sum_sq_diff, n)
    }

    #[test]
    fn welford_matches_naive_two_pass() {
        let values = [10.0, 5.0, 20.0, 1.0, 7.0, 3.0];
        let mut acc = NumericAccumulator::new(NumKind::Float);
        for &v in &values {
            acc.accum(0, v).unwrap();
        }
        let (sum, mean, sum_sq_diff, n) = naive(&values);
        assert_eq!(acc.count as f64, n);
        assert_relative_eq!(acc.float_sum, sum);
        assert_relative_eq!(acc.mean, mean);
        assert_relative_eq!(acc.sum_sq_diff, sum_sq_diff, epsilon = 1e-9);
    }

    #[test]
    fn merge_associative_and_matches_single_pass() {
        let values = [10.0, 5.0, 20.0, 1.0, 7.0, 3.0];
        let mut whole = NumericAccumulator::new(NumKind::Float);
        for &v in &values {
            whole.accum(0, v).unwrap();
        }

        for split in 1..values.len() {
            let mut a = NumericAccumulator::new(NumKind::Float);
            for &v in &values[..split] {
                a.accum(0, v).unwrap();
            }
            let mut b = NumericAccumulator::new(NumKind::Float);
            for &v in &values[split..] {
                b.accum(0, v).unwrap();
            }
            let merged = a.merge(&b).unwrap();
            assert_eq!(merged.count, whole.count);
            assert_relative_eq!(merged.float_sum, whole.float_sum, epsilon = 1e-9);
            assert_relative_eq!(merged.sum_sq_diff, whole.sum_sq_diff, epsilon = 1e-9);
        }
    }

    #[test]
    fn int_sum_min_max_are_exact() {
        let mut acc = NumericAccumulator::new(NumKind::Int);
        for v in [10_i64, 5, 20] {
            acc.accum(v, v as f64).unwrap();
        }
        assert_eq!(acc.count, 3);
        assert_eq!(acc.exact_sum, 35);
        assert_eq!(acc.exact_min, 5);
        assert_eq!(acc.exact_max, 20);
        assert_relative_eq!(acc.mean, 35.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(acc.variance().unwrap(), 58.33333333333, epsilon = 1e-6);
        assert_relative_eq!(acc.stddev().unwrap(), 7.637626158, epsilon = 1e-6);
    }

    #[test]
    fn nat_rejects_negative() {
        let mut acc = NumericAccumulator::new(NumKind::Nat);
        let err = acc.accum(-1, -1.0).unwrap_err();
        assert_eq!(err, StatsError::NegativeNat(-1));
    }

    #[test]
    fn dec2_scales_by_100_and_stays_exact() {
        let mut acc = NumericAccumulator::new(NumKind::Dec2);
        // observations 1.50, 2.25 -> scaled 150, 225
        acc.accum(150, 150.0).unwrap();
        acc.accum(225, 225.0).unwrap();
        assert_eq!(acc.exact_sum, 375);
        match acc.sum_exact() {
            ExactNumber::Dec2Scaled(v) => assert_eq!(v, 375),
            _ => panic!("expected Dec2Scaled"),
        }
    }

    #[test]
    fn count_le_one_has_no_variance() {
        let mut acc = NumericAccumulator::new(NumKind::Float);
        acc.accum(0, 5.0).unwrap();
        assert_eq!(acc.variance(), None);
        assert_eq!(acc.stddev(), None);
        assert_eq!(acc.coefficient_of_variation_pct(), None);
    }

    #[test]
    fn zero_mean_suppresses_cv_but_not_variance() {
        let mut acc = NumericAccumulator::new(NumKind::Float);
        for v in [-2.0, 2.0] {
            acc.accum(0, v).unwrap();
        }
        assert_eq!(acc.mean, 0.0);
        assert!(acc.variance().is_some());
        assert!(acc.stddev().is_some());
        assert_eq!(acc.coefficient_of_variation_pct(), None);
    }
}
