//! The `arr` kernel (§4.B.5): counts how many arrays were observed and
//! the frequency of each distinct element across all of them, stringified
//! by the same rule the document codec uses for plain scalars.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArrAccumulator {
    pub count: u64,
    pub counts: BTreeMap<String, u64>,
}

impl ArrAccumulator {
    pub fn new() -> Self {
        ArrAccumulator::default()
    }

    pub fn accum(&mut self, elements: &[String]) {
        self.count += 1;
        for el in elements {
            *self.counts.entry(el.clone()).or_insert(0) += 1;
        }
    }

    pub fn merge(&self, other: &ArrAccumulator) -> ArrAccumulator {
        let mut counts = self.counts.clone();
        for (k, v) in &other.counts {
            *counts.entry(k.clone()).or_insert(0) += v;
        }
        ArrAccumulator {
            count: self.count + other.count,
            counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_arrays_and_elements() {
        let mut acc = ArrAccumulator::new();
        for arr in [
            vec!["1".to_string(), "2".to_string()],
            vec!["2".to_string(), "3".to_string()],
            vec!["3".to_string(), "4".to_string()],
        ] {
            acc.accum(&arr);
        }
        assert_eq!(acc.count, 3);
        assert_eq!(acc.counts.get("1"), Some(&1));
        assert_eq!(acc.counts.get("2"), Some(&2));
        assert_eq!(acc.counts.get("3"), Some(&2));
        assert_eq!(acc.counts.get("4"), Some(&1));
    }

    #[test]
    fn duplicate_elements_within_one_array_count_multiply() {
        let mut acc = ArrAccumulator::new();
        acc.accum(&["a".to_string(), "a".to_string(), "b".to_string()]);
        assert_eq!(acc.counts.get("a"), Some(&2));
        assert_eq!(acc.count, 1);
    }

    #[test]
    fn merge_sums_count_and_counts() {
        let mut a = ArrAccumulator::new();
        a.accum(&["x".to_string()]);
        let mut b = ArrAccumulator::new();
        b.accum(&["x".to_string(), "y".to_string()]);
        let merged = a.merge(&b);
        assert_eq!(merged.count, 2);
        assert_eq!(merged.counts.get("x"), Some(&2));
        assert_eq!(merged.counts.get("y"), Some(&1));
    }
}
