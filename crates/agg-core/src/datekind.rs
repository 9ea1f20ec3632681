//! The `date` kernel (§4.B.4): a count-map plus a running `(min, max)`
//! pair. ISO `YYYY-MM-DD` strings sort lexicographically in the same
//! order as the calendar, so plain `String` comparison is correct and we
//! don't need a date-parsing dependency here.

use serde::{Deserialize, Serialize};

use crate::countmap::CountMapAccumulator;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DateAccumulator {
    pub counts: CountMapAccumulator,
    pub min: String,
    pub max: String,
}

impl DateAccumulator {
    /// An accumulator with no observations yet. `min`/`max` are
    /// meaningless until the first `accum` call, the same convention
    /// `NumericAccumulator` uses for `count == 0`.
    pub fn empty() -> Self {
        DateAccumulator {
            counts: CountMapAccumulator::new(),
            min: String::new(),
            max: String::new(),
        }
    }

    pub fn accum(&mut self, value: &str) {
        if self.counts.counts.is_empty() {
            self.min = value.to_string();
            self.max = value.to_string();
        } else {
            if value < self.min.as_str() {
                self.min = value.to_string();
            }
            if value > self.max.as_str() {
                self.max = value.to_string();
            }
        }
        self.counts.accum(value);
    }

    pub fn merge(&self, other: &DateAccumulator) -> DateAccumulator {
        let counts = self.counts.merge(&other.counts);
        let (min, max) = if self.counts.counts.is_empty() {
            (other.min.clone(), other.max.clone())
        } else if other.counts.counts.is_empty() {
            (self.min.clone(), self.max.clone())
        } else {
            (
                std::cmp::min(self.min.clone(), other.min.clone()),
                std::cmp::max(self.max.clone(), other.max.clone()),
            )
        };
        DateAccumulator { counts, min, max }
    }
}

/// A valid ISO `YYYY-MM-DD` string: four digits, `-`, two digits, `-`,
/// two digits, with calendar-plausible month/day ranges. We don't pull in
/// a date crate for this — the grammar is fixed and small.
pub fn is_valid_iso_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return false;
    }
    let digits_ok = bytes
        .iter()
        .enumerate()
        .all(|(i, b)| matches!(i, 4 | 7) || b.is_ascii_digit());
    if !digits_ok {
        return false;
    }
    let month: u32 = s[5..7].parse().unwrap_or(0);
    let day: u32 = s[8..10].parse().unwrap_or(0);
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_min_max_lexicographically() {
        let mut acc = DateAccumulator::empty();
        acc.accum("2024-03-15");
        acc.accum("2023-11-01");
        acc.accum("2024-06-01");
        assert_eq!(acc.min, "2023-11-01");
        assert_eq!(acc.max, "2024-06-01");
    }

    #[test]
    fn validates_iso_shape() {
        assert!(is_valid_iso_date("2024-01-31"));
        assert!(!is_valid_iso_date("2024-13-01"));
        assert!(!is_valid_iso_date("2024-01-32"));
        assert!(!is_valid_iso_date("not-a-date"));
        assert!(!is_valid_iso_date("2024/01/01"));
    }

    #[test]
    fn merge_takes_wider_bounds() {
        let mut a = DateAccumulator::empty();
        a.accum("2024-01-01");
        let mut b = DateAccumulator::empty();
        b.accum("2024-12-31");
        let merged = a.merge(&b);
        assert_eq!(merged.min, "2024-01-01");
        assert_eq!(merged.max, "2024-12-31");
        assert_eq!(merged.counts.counts.len(), 2);
    }
}
