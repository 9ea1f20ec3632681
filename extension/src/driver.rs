//! The aggregation driver: the pair-collector and the two
//! `StatsState`-backed aggregates, built with
//! `aggregate_builder::aggregate`. `agg_from_stats` and `merge_agg`
//! share `State = agg_core::StatsState` and reuse `combine`/`serialize`/
//! `deserialize`/`finally` verbatim -- only `transition` differs in
//! which document shape it decodes.
//!
//! The pair-collector keeps the name `agg(name, stat)`; its
//! stats-document counterpart is named `agg_from_stats(stats)` rather
//! than a second overload of `agg`, since the aggregate builder binds
//! one Rust module name to one `CREATE AGGREGATE` name.

use std::collections::BTreeMap;

use aggregate_builder::aggregate;
use pgrx::*;

use agg_core::document::{
    decode_stats, decode_stats_agg, finalize_stats_agg, finalize_stats_document,
};
use agg_core::StatsState;

#[aggregate]
impl agg {
    type State = BTreeMap<String, serde_json::Value>;

    fn transition(
        state: Option<State>,
        #[sql_type("text")] name: String,
        #[sql_type("jsonb")] stat: JsonB,
    ) -> Option<State> {
        let mut state = state.unwrap_or_default();
        state.insert(name, stat.0);
        Some(state)
    }

    fn finally(state: Option<&mut State>) -> Option<JsonB> {
        state.map(|pairs| JsonB(finalize_stats_document(pairs)))
    }

    const PARALLEL_SAFE: bool = true;

    fn serialize(state: &mut State) -> bytea {
        crate::do_serialize!(state)
    }

    fn deserialize(bytes: bytea) -> State {
        crate::do_deserialize!(bytes, State)
    }

    fn combine(state1: Option<&State>, state2: Option<&State>) -> Option<State> {
        match (state1, state2) {
            (None, None) => None,
            (None, Some(only)) | (Some(only), None) => Some(only.clone()),
            (Some(a), Some(b)) => {
                let mut merged = a.clone();
                for (k, v) in b {
                    merged.insert(k.clone(), v.clone());
                }
                Some(merged)
            }
        }
    }
}

#[aggregate]
impl agg_from_stats {
    type State = StatsState;

    fn transition(state: Option<State>, #[sql_type("jsonb")] stats: JsonB) -> Option<State> {
        let mut state = state.unwrap_or_default();
        let observations = decode_stats(&stats.0, crate::STRICT_ARRAYS.get())
            .unwrap_or_else(|e| error!("{}", e));
        for (name, stat) in &observations {
            crate::aggregate_utils::observe_logged(&mut state, name, stat);
        }
        Some(state)
    }

    fn finally(state: Option<&mut State>) -> Option<JsonB> {
        state.map(|s| JsonB(finalize_stats_agg(s)))
    }

    const PARALLEL_SAFE: bool = true;

    fn serialize(state: &mut State) -> bytea {
        crate::do_serialize!(state)
    }

    fn deserialize(bytes: bytea) -> State {
        crate::do_deserialize!(bytes, State)
    }

    fn combine(state1: Option<&State>, state2: Option<&State>) -> Option<State> {
        combine_stats_states(state1, state2)
    }
}

#[aggregate]
impl merge_agg {
    type State = StatsState;

    fn transition(state: Option<State>, #[sql_type("jsonb")] stats_agg: JsonB) -> Option<State> {
        let mut state = state.unwrap_or_default();
        let other = decode_stats_agg(&stats_agg.0).unwrap_or_else(|e| error!("{}", e));
        state.combine(&other).unwrap_or_else(|e| error!("{}", e));
        Some(state)
    }

    fn finally(state: Option<&mut State>) -> Option<JsonB> {
        state.map(|s| JsonB(finalize_stats_agg(s)))
    }

    const PARALLEL_SAFE: bool = true;

    fn serialize(state: &mut State) -> bytea {
        crate::do_serialize!(state)
    }

    fn deserialize(bytes: bytea) -> State {
        crate::do_deserialize!(bytes, State)
    }

    fn combine(state1: Option<&State>, state2: Option<&State>) -> Option<State> {
        combine_stats_states(state1, state2)
    }
}

fn combine_stats_states(state1: Option<&StatsState>, state2: Option<&StatsState>) -> Option<StatsState> {
    match (state1, state2) {
        (None, None) => None,
        (None, Some(only)) | (Some(only), None) => Some(only.clone()),
        (Some(a), Some(b)) => {
            let mut merged = a.clone();
            merged.combine(b).unwrap_or_else(|e| error!("{}", e));
            Some(merged)
        }
    }
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use pgrx::*;

    #[pg_test]
    fn agg_pair_collector_matches_stats() {
        let result = Spi::get_one::<JsonB>(
            "SELECT agg(name, stat) FROM (VALUES \
                ('reading', stat(10)), ('flag', stat(true))) AS t(name, stat)",
        )
        .unwrap()
        .unwrap();
        assert_eq!(result.0["type"], "stats");
        assert_eq!(result.0["reading"]["value"], 10);
    }

    #[pg_test]
    fn agg_from_stats_matches_spec_scenario() {
        let result = Spi::get_one::<JsonB>(
            "SELECT agg_from_stats(stats) FROM (VALUES \
                (stats('{\"reading\": 10}'::jsonb)), \
                (stats('{\"reading\": 5}'::jsonb)), \
                (stats('{\"reading\": 20}'::jsonb))) AS t(stats)",
        )
        .unwrap()
        .unwrap();
        assert_eq!(result.0["reading"]["count"], 3);
        assert_eq!(result.0["reading"]["sum"], 35);
        assert_eq!(result.0["reading"]["min"], 5);
        assert_eq!(result.0["reading"]["max"], 20);
    }

    #[pg_test]
    fn merge_agg_combines_partial_aggregates() {
        let result = Spi::get_one::<JsonB>(
            "SELECT merge_agg(agg) FROM (VALUES \
                (merge('{\"num\":{\"type\":\"int_agg\",\"count\":1,\"sum\":150,\"min\":150,\"max\":150,\"mean\":150.00,\"variance\":0.00,\"stddev\":0.00,\"coefficient_of_variation_pct\":0.00}}'::jsonb, \
                        '{\"type\":\"stats_agg\"}'::jsonb)), \
                (stats_to_agg(stats('{\"num\": 50}'::jsonb)))) AS t(agg)",
        )
        .unwrap()
        .unwrap();
        assert_eq!(result.0["num"]["count"], 2);
        assert_eq!(result.0["num"]["sum"], 200.0);
    }

    /// The decode-then-merge path must preserve the exact integer lane
    /// bit-for-bit past `f64`'s 2^53 integer precision limit, not just
    /// for sums small enough that a float round-trip happens to agree.
    #[pg_test]
    fn merge_agg_preserves_exact_sum_beyond_f64_precision() {
        let result = Spi::get_one::<JsonB>(
            "SELECT merge_agg(agg) FROM (VALUES \
                (merge('{\"num\":{\"type\":\"int_agg\",\"count\":1,\"sum\":9007199254740993,\"min\":9007199254740993,\"max\":9007199254740993,\"mean\":9007199254740993.00,\"variance\":null,\"stddev\":null,\"coefficient_of_variation_pct\":null}}'::jsonb, \
                        '{\"type\":\"stats_agg\"}'::jsonb)), \
                (stats_to_agg(stats('{\"num\": 1}'::jsonb)))) AS t(agg)",
        )
        .unwrap()
        .unwrap();
        assert_eq!(result.0["num"]["count"], 2);
        assert_eq!(result.0["num"]["sum"], 9007199254740994i64);
        assert_eq!(result.0["num"]["max"], 9007199254740993i64);
    }
}
