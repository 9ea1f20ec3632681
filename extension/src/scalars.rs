//! The three scalar functions of SPEC_FULL §6 beyond `stat(...)`:
//! `stats(document) -> stats`, `stats_to_agg(stats) -> stats_agg`, and
//! `merge(a, b) -> stats_agg`. None of these touch the aggregate
//! protocol — they're one-shot document transforms, reusing the same
//! `agg_core::document`/`StatsState` machinery the aggregates use.

use pgrx::*;

use agg_core::document::{decode_stats, decode_stats_agg, finalize_stats_agg, stamp_stats_discriminator};
use agg_core::StatsState;

/// Stamps the `"type": "stats"` discriminator onto an ad-hoc
/// `name -> stat` object, validating each value along the way.
#[pg_extern(immutable, parallel_safe)]
fn stats(document: JsonB) -> JsonB {
    stamp_stats_discriminator(&document.0, crate::STRICT_ARRAYS.get())
        .map(JsonB)
        .unwrap_or_else(|e| error!("{}", e))
}

/// Promotes a single `stats` document straight to a finalized
/// `stats_agg` by running accumulation once and finalizing (SPEC_FULL
/// §6): equivalent to `agg(stats)` over a one-row input.
#[pg_extern(immutable, parallel_safe)]
fn stats_to_agg(stats: JsonB) -> JsonB {
    let observations =
        decode_stats(&stats.0, crate::STRICT_ARRAYS.get()).unwrap_or_else(|e| error!("{}", e));
    let mut state = StatsState::new();
    for (name, stat) in &observations {
        crate::aggregate_utils::observe_logged(&mut state, name, stat);
    }
    JsonB(finalize_stats_agg(&state))
}

/// Merges two finalized `stats_agg` documents into one (SPEC_FULL §6).
/// Each side is decoded back into per-variable accumulators, combined
/// pairwise (§4.D `combine`), then re-finalized.
#[pg_extern(immutable, parallel_safe)]
fn merge(a: JsonB, b: JsonB) -> JsonB {
    let mut state = decode_stats_agg(&a.0).unwrap_or_else(|e| error!("{}", e));
    let other = decode_stats_agg(&b.0).unwrap_or_else(|e| error!("{}", e));
    state.combine(&other).unwrap_or_else(|e| error!("{}", e));
    JsonB(finalize_stats_agg(&state))
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;
    use crate::codec::stat_int;

    #[pg_test]
    fn stats_to_agg_matches_spec_scenario() {
        let mut doc = serde_json::Map::new();
        doc.insert("reading".to_string(), stat_int(10).0);
        let stats_doc = stats(JsonB(serde_json::Value::Object(doc)));
        // Only a single observation went in above; exercise merge's
        // two-sided accumulation with a second stats document instead.
        let agg = stats_to_agg(stats_doc);
        assert_eq!(agg.0["reading"]["count"], 1);
        assert_eq!(agg.0["reading"]["sum"], 10);
    }

    #[pg_test]
    fn merge_combines_two_partial_aggregates() {
        let mut doc_a = serde_json::Map::new();
        doc_a.insert("num".to_string(), stat_int(150).0);
        let agg_a = stats_to_agg(stats(JsonB(serde_json::Value::Object(doc_a))));

        let mut doc_b = serde_json::Map::new();
        doc_b.insert("num".to_string(), stat_int(50).0);
        let agg_b = stats_to_agg(stats(JsonB(serde_json::Value::Object(doc_b))));

        let merged = merge(agg_a, agg_b);
        assert_eq!(merged.0["num"]["count"], 2);
        assert_eq!(merged.0["num"]["sum"], 200);
        assert_eq!(merged.0["num"]["mean"], 100.0);
    }

    /// Same gap as `driver.rs`'s merge_agg test: a sum past `f64`'s 2^53
    /// integer precision must still come back exact after a decode.
    #[pg_test]
    fn merge_preserves_exact_sum_beyond_f64_precision() {
        let agg_a = JsonB(serde_json::json!({
            "type": "stats_agg",
            "num": {
                "type": "int_agg",
                "count": 1,
                "sum": 9007199254740993i64,
                "min": 9007199254740993i64,
                "max": 9007199254740993i64,
                "mean": 9007199254740993.0,
                "variance": null,
                "stddev": null,
                "coefficient_of_variation_pct": null,
            }
        }));
        let mut doc_b = serde_json::Map::new();
        doc_b.insert("num".to_string(), stat_int(1).0);
        let agg_b = stats_to_agg(stats(JsonB(serde_json::Value::Object(doc_b))));

        let merged = merge(agg_a, agg_b);
        assert_eq!(merged.0["num"]["count"], 2);
        assert_eq!(merged.0["num"]["sum"], 9007199254740994i64);
        assert_eq!(merged.0["num"]["max"], 9007199254740993i64);
    }
}
