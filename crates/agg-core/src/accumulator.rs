//! The per-variable accumulator (§3 aggregate-entry variants, §4.B) and
//! the per-entity state that maps variable names to them (§4.C).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arrkind::ArrAccumulator;
use crate::countmap::{self, CountMapAccumulator};
use crate::datekind::DateAccumulator;
use crate::error::StatsError;
use crate::numeric::{NumKind, NumericAccumulator};
use crate::stat::Stat;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Accumulator {
    Numeric(NumericAccumulator),
    Str(CountMapAccumulator),
    Bool(CountMapAccumulator),
    Date(DateAccumulator),
    Arr(ArrAccumulator),
}

impl Accumulator {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Accumulator::Numeric(n) => n.kind.type_tag(),
            Accumulator::Str(_) => "str_agg",
            Accumulator::Bool(_) => "bool_agg",
            Accumulator::Date(_) => "date_agg",
            Accumulator::Arr(_) => "arr_agg",
        }
    }

    /// Create the accumulator variant that corresponds to the kind of
    /// `stat`, and fold in this first observation. Insertion is lazy
    /// (§4.C): this is only called the first time a variable name is
    /// seen.
    pub fn init(stat: &Stat) -> Result<Accumulator, StatsError> {
        let mut acc = Accumulator::empty_for(stat)?;
        acc.update(stat)?;
        Ok(acc)
    }

    fn empty_for(stat: &Stat) -> Result<Accumulator, StatsError> {
        Ok(match stat {
            Stat::Int(_) => Accumulator::Numeric(NumericAccumulator::new(NumKind::Int)),
            Stat::Float(_) => Accumulator::Numeric(NumericAccumulator::new(NumKind::Float)),
            Stat::Dec2(_) => Accumulator::Numeric(NumericAccumulator::new(NumKind::Dec2)),
            Stat::Nat(_) => Accumulator::Numeric(NumericAccumulator::new(NumKind::Nat)),
            Stat::Str(_) => Accumulator::Str(CountMapAccumulator::new()),
            Stat::Bool(_) => Accumulator::Bool(CountMapAccumulator::new()),
            Stat::Date(d) => {
                if !crate::datekind::is_valid_iso_date(d) {
                    return Err(StatsError::InvalidScalar(format!(
                        "'{d}' is not a valid ISO YYYY-MM-DD date"
                    )));
                }
                // `update` does the real insert right after this, so we
                // only need a truly empty accumulator here.
                Accumulator::Date(DateAccumulator::empty())
            }
            Stat::Arr(_) => Accumulator::Arr(ArrAccumulator::new()),
        })
    }

    /// Apply one more observation of the same (already-bound) kind.
    pub fn update(&mut self, stat: &Stat) -> Result<(), StatsError> {
        match (self, stat) {
            (Accumulator::Numeric(acc), Stat::Int(v)) if acc.kind == NumKind::Int => {
                acc.accum(*v, *v as f64)
            }
            (Accumulator::Numeric(acc), Stat::Nat(v)) if acc.kind == NumKind::Nat => {
                acc.accum(*v, *v as f64)
            }
            (Accumulator::Numeric(acc), Stat::Float(v)) if acc.kind == NumKind::Float => {
                acc.accum(0, *v)
            }
            (Accumulator::Numeric(acc), Stat::Dec2(v)) if acc.kind == NumKind::Dec2 => {
                acc.accum(*v, *v as f64)
            }
            (Accumulator::Str(acc), Stat::Str(s)) => {
                acc.accum(s);
                Ok(())
            }
            (Accumulator::Bool(acc), Stat::Bool(b)) => {
                acc.accum(countmap::normalize_bool(*b));
                Ok(())
            }
            (Accumulator::Date(acc), Stat::Date(d)) => {
                if !crate::datekind::is_valid_iso_date(d) {
                    return Err(StatsError::InvalidScalar(format!(
                        "'{d}' is not a valid ISO YYYY-MM-DD date"
                    )));
                }
                acc.accum(d);
                Ok(())
            }
            (Accumulator::Arr(acc), Stat::Arr(elements)) => {
                let strs: Vec<String> = elements.iter().map(Stat::stringify_element).collect();
                acc.accum(&strs);
                Ok(())
            }
            (existing, stat) => Err(StatsError::TypeMismatch {
                name: String::new(),
                expected: existing.type_tag(),
                found: stat.type_tag(),
            }),
        }
    }

    pub fn merge(&self, other: &Accumulator) -> Result<Accumulator, StatsError> {
        match (self, other) {
            (Accumulator::Numeric(a), Accumulator::Numeric(b)) if a.kind == b.kind => {
                Ok(Accumulator::Numeric(a.merge(b)?))
            }
            (Accumulator::Str(a), Accumulator::Str(b)) => Ok(Accumulator::Str(a.merge(b))),
            (Accumulator::Bool(a), Accumulator::Bool(b)) => Ok(Accumulator::Bool(a.merge(b))),
            (Accumulator::Date(a), Accumulator::Date(b)) => Ok(Accumulator::Date(a.merge(b))),
            (Accumulator::Arr(a), Accumulator::Arr(b)) => Ok(Accumulator::Arr(a.merge(b))),
            (a, b) => Err(StatsError::TypeMismatch {
                name: String::new(),
                expected: a.type_tag(),
                found: b.type_tag(),
            }),
        }
    }
}

/// The per-aggregation, per-entity state of §4.C: a lazily-populated,
/// monomorphic map from variable name to accumulator. This is also the
/// type serialized for worker-to-leader transport (§4.D, §9): its fields
/// already mirror the unrounded `stats_agg` document, so no separate
/// "compact struct vs. wire document" split is needed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsState(pub BTreeMap<String, Accumulator>);

impl StatsState {
    pub fn new() -> Self {
        StatsState::default()
    }

    /// Fold one named observation into the state, enforcing the
    /// monomorphism invariant of §4.C.
    pub fn observe(&mut self, name: &str, stat: &Stat) -> Result<(), StatsError> {
        match self.0.get_mut(name) {
            None => {
                self.0.insert(name.to_string(), Accumulator::init(stat)?);
                Ok(())
            }
            Some(acc) => acc.update(stat).map_err(|e| match e {
                StatsError::TypeMismatch {
                    expected, found, ..
                } => StatsError::TypeMismatch {
                    name: name.to_string(),
                    expected,
                    found,
                },
                other => other,
            }),
        }
    }

    /// Insert an already-built accumulator for `name`, used when
    /// decoding an incoming `stats_agg` document (merge-of-aggs, §4.D
    /// case 3) rather than raw observations.
    pub fn insert_accumulator(
        &mut self,
        name: &str,
        acc: Accumulator,
    ) -> Result<(), StatsError> {
        match self.0.remove(name) {
            None => {
                self.0.insert(name.to_string(), acc);
                Ok(())
            }
            Some(existing) => {
                let merged = existing.merge(&acc).map_err(|e| match e {
                    StatsError::TypeMismatch {
                        expected, found, ..
                    } => StatsError::TypeMismatch {
                        name: name.to_string(),
                        expected,
                        found,
                    },
                    other => other,
                })?;
                self.0.insert(name.to_string(), merged);
                Ok(())
            }
        }
    }

    /// Union of two partially-aggregated states (§4.D `combine`):
    /// one-sided keys are copied verbatim, shared keys are merged.
    pub fn combine(&mut self, other: &StatsState) -> Result<(), StatsError> {
        for (name, acc) in &other.0 {
            self.insert_accumulator(name, acc.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::SmallRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    const RUNS: usize = 10;
    const VALS: usize = 1000;

    #[test]
    fn lazily_binds_first_observation_kind() {
        let mut state = StatsState::new();
        state.observe("reading", &Stat::Int(10)).unwrap();
        match state.0.get("reading").unwrap() {
            Accumulator::Numeric(n) => assert_eq!(n.kind, NumKind::Int),
            _ => panic!("expected numeric"),
        }
    }

    #[test]
    fn rejects_type_mismatch_on_same_name() {
        let mut state = StatsState::new();
        state.observe("x", &Stat::Int(1)).unwrap();
        let err = state.observe("x", &Stat::Str("oops".into())).unwrap_err();
        match err {
            StatsError::TypeMismatch { name, .. } => assert_eq!(name, "x"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn combine_unions_one_sided_keys() {
        let mut a = StatsState::new();
        a.observe("num", &Stat::Int(150)).unwrap();
        a.observe("flag", &Stat::Bool(true)).unwrap();

        let mut b = StatsState::new();
        b.observe("num", &Stat::Int(50)).unwrap();
        b.observe("cat", &Stat::Str("tech".into())).unwrap();

        a.combine(&b).unwrap();
        assert_eq!(a.0.len(), 3);
        match a.0.get("num").unwrap() {
            Accumulator::Numeric(n) => assert_eq!(n.count, 2),
            _ => panic!("expected numeric"),
        }
    }

    /// Observation order must not affect `count`/`sum`/`min`/`max` (exact
    /// integer lane) and must only affect `mean` up to floating-point
    /// rounding, no matter how the same multiset of values is shuffled or
    /// chunked before being folded in via `combine`.
    #[test]
    fn permuted_and_chunked_merges_agree_with_sequential_accumulation() {
        let mut rng = SmallRng::seed_from_u64(0xACC_04);
        for run in 0..RUNS {
            let mut values: Vec<i64> = (0..VALS as i64).map(|i| i - VALS as i64 / 2 + run as i64).collect();
            values.shuffle(&mut rng);

            let mut sequential = StatsState::new();
            for v in &values {
                sequential.observe("x", &Stat::Int(*v)).unwrap();
            }

            let chunk_count = 1 + run % 5;
            let mut chunks: Vec<StatsState> = (0..chunk_count).map(|_| StatsState::new()).collect();
            for (i, v) in values.iter().enumerate() {
                chunks[i % chunk_count].observe("x", &Stat::Int(*v)).unwrap();
            }
            chunks.shuffle(&mut rng);
            let mut combined = chunks.pop().unwrap();
            for chunk in chunks {
                combined.combine(&chunk).unwrap();
            }

            let (seq_acc, comb_acc) = match (
                sequential.0.get("x").unwrap(),
                combined.0.get("x").unwrap(),
            ) {
                (Accumulator::Numeric(a), Accumulator::Numeric(b)) => (a, b),
                _ => panic!("expected numeric"),
            };

            assert_eq!(seq_acc.count, comb_acc.count);
            assert_eq!(seq_acc.exact_sum, comb_acc.exact_sum);
            assert_eq!(seq_acc.exact_min, comb_acc.exact_min);
            assert_eq!(seq_acc.exact_max, comb_acc.exact_max);
            assert_relative_eq!(seq_acc.mean, comb_acc.mean, epsilon = 1e-6);
        }
    }
}
