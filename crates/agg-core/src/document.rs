//! The document materializer (§4.E): translates between the three
//! canonical document shapes (`stat`, `stats`, `stats_agg`) and this
//! crate's typed model.
//!
//! `serde_json::Map` is backed by a `BTreeMap` as long as the
//! `preserve_order` feature stays off (it does, nothing in this
//! workspace enables it), so every object we build here comes out with
//! its keys already in lexicographic order — the canonical-form
//! invariant falls out of the data structure instead of needing an
//! explicit sort pass.
//!
//! Every JSON number in this module is built from an exact decimal
//! string via `Number::from_string_unchecked` (the `arbitrary_precision`
//! feature) rather than `Number::from_f64`. That sidesteps `f64`
//! shortest-round-trip formatting dropping the trailing zero a rounded
//! `dec2` value or a finalized statistic needs (`100.0` instead of the
//! required `100.00`).

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::accumulator::{Accumulator, StatsState};
use crate::arrkind::ArrAccumulator;
use crate::countmap::CountMapAccumulator;
use crate::datekind::DateAccumulator;
use crate::error::StatsError;
use crate::numeric::{ExactNumber, NumKind, NumericAccumulator};
use crate::stat::{self, Stat};

// ---------------------------------------------------------------------
// stat
// ---------------------------------------------------------------------

/// Encode one observation as a `{"type": ..., "value": ...}` document
/// (§4.A, §6). Array elements are rendered with their own natural JSON
/// shape (numbers as numbers, not stringified) — the stringified form
/// `stringify_element` produces is for the `arr` count-map kernel only,
/// not for the wire document.
pub fn encode_stat(stat: &Stat) -> Result<Value, StatsError> {
    let value = match stat {
        Stat::Arr(elements) => {
            let rendered: Result<Vec<Value>, StatsError> =
                elements.iter().map(encode_scalar_value).collect();
            Value::Array(rendered?)
        }
        other => encode_scalar_value(other)?,
    };
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String(stat.type_tag().to_string()));
    map.insert("value".to_string(), value);
    Ok(Value::Object(map))
}

fn encode_scalar_value(stat: &Stat) -> Result<Value, StatsError> {
    match stat {
        Stat::Int(i) => Ok(Value::Number(Number::from_string_unchecked(i.to_string()))),
        Stat::Nat(i) => Ok(Value::Number(Number::from_string_unchecked(i.to_string()))),
        Stat::Float(f) => json_float(*f),
        Stat::Dec2(scaled) => Ok(Value::Number(Number::from_string_unchecked(
            stat::format_dec2(*scaled),
        ))),
        Stat::Bool(b) => Ok(Value::Bool(*b)),
        Stat::Str(s) => Ok(Value::String(s.clone())),
        Stat::Date(d) => Ok(Value::String(d.clone())),
        Stat::Arr(_) => Err(StatsError::MalformedDocument(
            "nested arrays are not supported by the arr kind".to_string(),
        )),
    }
}

fn json_float(f: f64) -> Result<Value, StatsError> {
    if !f.is_finite() {
        return Err(StatsError::InvalidScalar(format!(
            "{f} is not a finite float"
        )));
    }
    Ok(Value::Number(Number::from_string_unchecked(
        stat::format_shortest_f64(f),
    )))
}

/// Decode a `{"type": ..., "value": ...}` document back into a [`Stat`].
/// Used by `agg-from-stats`'s transition to recover observations from an
/// incoming `stats` document, and (for `stat(document) -> stats`-style
/// validation) by callers who only need to check shape.
pub fn decode_stat(value: &Value, strict_arrays: bool) -> Result<Stat, StatsError> {
    let obj = value
        .as_object()
        .ok_or_else(|| StatsError::MalformedDocument("stat must be a JSON object".to_string()))?;
    let type_tag = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| StatsError::MalformedDocument("stat is missing 'type'".to_string()))?;
    let val = obj
        .get("value")
        .ok_or_else(|| StatsError::MalformedDocument("stat is missing 'value'".to_string()))?;

    match type_tag {
        "int" => val
            .as_i64()
            .map(Stat::Int)
            .ok_or_else(|| StatsError::MalformedDocument("int value must be an integer".into())),
        "nat" => val
            .as_i64()
            .map(Stat::Nat)
            .ok_or_else(|| StatsError::MalformedDocument("nat value must be an integer".into())),
        "float" => val
            .as_f64()
            .map(Stat::Float)
            .ok_or_else(|| StatsError::MalformedDocument("float value must be numeric".into())),
        "dec2" => {
            let text = match val {
                Value::Number(n) => n.to_string(),
                _ => return Err(StatsError::MalformedDocument("dec2 value must be numeric".into())),
            };
            Ok(Stat::Dec2(stat::round_half_away_from_zero_scaled(&text)?))
        }
        "bool" => val
            .as_bool()
            .map(Stat::Bool)
            .ok_or_else(|| StatsError::MalformedDocument("bool value must be true/false".into())),
        "str" => val
            .as_str()
            .map(|s| Stat::Str(s.to_string()))
            .ok_or_else(|| StatsError::MalformedDocument("str value must be text".into())),
        "date" => {
            let s = val
                .as_str()
                .ok_or_else(|| StatsError::MalformedDocument("date value must be text".into()))?;
            if !crate::datekind::is_valid_iso_date(s) {
                return Err(StatsError::InvalidScalar(format!(
                    "'{s}' is not a valid ISO YYYY-MM-DD date"
                )));
            }
            Ok(Stat::Date(s.to_string()))
        }
        "arr" => {
            let elements = val
                .as_array()
                .ok_or_else(|| StatsError::MalformedDocument("arr value must be an array".into()))?;
            if strict_arrays {
                reject_heterogeneous_elements(elements)?;
            }
            let decoded: Result<Vec<Stat>, StatsError> =
                elements.iter().map(decode_arr_element).collect();
            Stat::array(decoded?)
        }
        other => Err(StatsError::UnknownStatType(other.to_string())),
    }
}

/// Reject an `arr` value whose elements don't all share one JSON scalar
/// kind (null/bool/number/string), gated by `docstat_toolkit.strict_arrays`
/// (default on). Nested arrays/objects are always rejected regardless of
/// this setting, by [`decode_arr_element`] itself.
fn reject_heterogeneous_elements(elements: &[Value]) -> Result<(), StatsError> {
    let mut kinds = elements.iter().map(json_scalar_kind);
    let first = match kinds.next() {
        None => return Ok(()),
        Some(kind) => kind?,
    };
    for kind in kinds {
        let kind = kind?;
        if kind != first {
            return Err(StatsError::MalformedDocument(format!(
                "heterogeneous arr elements ({first} and {kind}) are rejected while docstat_toolkit.strict_arrays is on"
            )));
        }
    }
    Ok(())
}

fn json_scalar_kind(value: &Value) -> Result<&'static str, StatsError> {
    match value {
        Value::Null => Ok("null"),
        Value::Bool(_) => Ok("bool"),
        Value::Number(_) => Ok("number"),
        Value::String(_) => Ok("string"),
        Value::Array(_) | Value::Object(_) => Err(StatsError::MalformedDocument(
            "arr elements must be scalar".to_string(),
        )),
    }
}

/// Decode one `arr` element. The wire form carries each element in its
/// own natural JSON shape, not a nested `stat` object, so there is no
/// type tag to read — we stringify on the way in using the same rule
/// the `arr` kernel uses on the way out (§4.B.5) and wrap it as a `Str`,
/// which `stringify_element` then renders back out verbatim.
fn decode_arr_element(value: &Value) -> Result<Stat, StatsError> {
    let rendered = match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => crate::countmap::normalize_bool(*b).to_string(),
        Value::Number(n) => stringify_json_number(n),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            return Err(StatsError::MalformedDocument(
                "arr elements must be scalar".to_string(),
            ))
        }
    };
    Ok(Stat::Str(rendered))
}

fn stringify_json_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else if let Some(f) = n.as_f64() {
        stat::format_shortest_f64(f)
    } else {
        n.to_string()
    }
}

// ---------------------------------------------------------------------
// stats
// ---------------------------------------------------------------------

/// Stamp the `"type": "stats"` discriminator onto a caller-supplied
/// name -> `stat` map (§6 `stats(document) -> stats`). Each value is
/// validated by round-tripping it through [`decode_stat`] without
/// keeping the decoded form — this function is a validating copy, not
/// an accumulator.
pub fn stamp_stats_discriminator(input: &Value, strict_arrays: bool) -> Result<Value, StatsError> {
    let obj = input.as_object().ok_or_else(|| {
        StatsError::MalformedDocument("stats(...) input must be a JSON object".to_string())
    })?;
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String("stats".to_string()));
    for (k, v) in obj {
        if k == "type" {
            continue;
        }
        decode_stat(v, strict_arrays)?;
        map.insert(k.clone(), v.clone());
    }
    Ok(Value::Object(map))
}

/// Wrap a name -> (already-encoded) `stat` map collected by the
/// pair-collector aggregate (§4.D case 1) into a finalized `stats`
/// document.
pub fn finalize_stats_document(pairs: &BTreeMap<String, Value>) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String("stats".to_string()));
    for (k, v) in pairs {
        map.insert(k.clone(), v.clone());
    }
    Value::Object(map)
}

/// Decode an incoming `stats` document into its named observations, in
/// document order (the driver folds each into per-entity state, where
/// order doesn't matter). Rejects anything missing the `"stats"`
/// discriminator.
pub fn decode_stats(doc: &Value, strict_arrays: bool) -> Result<Vec<(String, Stat)>, StatsError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| StatsError::MalformedDocument("stats document must be an object".into()))?;
    if obj.get("type").and_then(Value::as_str) != Some("stats") {
        return Err(StatsError::MalformedDocument(
            "stats document is missing the \"stats\" discriminator".to_string(),
        ));
    }
    let mut out = Vec::with_capacity(obj.len().saturating_sub(1));
    for (k, v) in obj {
        if k == "type" {
            continue;
        }
        out.push((k.clone(), decode_stat(v, strict_arrays)?));
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// stats_agg: finalize
// ---------------------------------------------------------------------

/// Finalize a per-entity state into a `stats_agg` document (§4.D.1),
/// with every numeric accumulator's derived statistics computed and
/// rounded, and the top-level discriminator in place.
pub fn finalize_stats_agg(state: &StatsState) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String("stats_agg".to_string()));
    for (name, acc) in &state.0 {
        map.insert(name.clone(), finalize_accumulator(acc));
    }
    Value::Object(map)
}

fn finalize_accumulator(acc: &Accumulator) -> Value {
    match acc {
        Accumulator::Numeric(n) => finalize_numeric(n),
        Accumulator::Str(cm) => finalize_countmap(cm, "str_agg"),
        Accumulator::Bool(cm) => finalize_countmap(cm, "bool_agg"),
        Accumulator::Date(d) => finalize_date(d),
        Accumulator::Arr(a) => finalize_arr(a),
    }
}

fn finalize_numeric(acc: &NumericAccumulator) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String(acc.kind.type_tag().to_string()));
    map.insert(
        "count".to_string(),
        Value::Number(Number::from_string_unchecked(acc.count.to_string())),
    );
    if acc.count == 0 {
        map.insert("sum".to_string(), zero_for_kind(acc.kind));
        map.insert("min".to_string(), Value::Null);
        map.insert("max".to_string(), Value::Null);
        map.insert("mean".to_string(), Value::Null);
        map.insert("sum_sq_diff".to_string(), zero_for_kind(acc.kind));
        map.insert("variance".to_string(), Value::Null);
        map.insert("stddev".to_string(), Value::Null);
        map.insert("coefficient_of_variation_pct".to_string(), Value::Null);
    } else {
        map.insert("sum".to_string(), render_exact(acc.sum_exact()));
        map.insert("min".to_string(), render_exact(acc.min_exact()));
        map.insert("max".to_string(), render_exact(acc.max_exact()));
        map.insert("mean".to_string(), round2_number(acc.mean_unscaled()));
        let sum_sq_diff_unscaled = match acc.kind {
            NumKind::Dec2 => acc.sum_sq_diff / 10_000.0,
            _ => acc.sum_sq_diff,
        };
        map.insert("sum_sq_diff".to_string(), round2_number(sum_sq_diff_unscaled));
        map.insert("variance".to_string(), opt_round2(acc.variance_unscaled()));
        map.insert("stddev".to_string(), opt_round2(acc.stddev_unscaled_opt()));
        map.insert(
            "coefficient_of_variation_pct".to_string(),
            opt_round2(acc.coefficient_of_variation_pct()),
        );
    }
    Value::Object(map)
}

fn zero_for_kind(kind: NumKind) -> Value {
    let text = if kind == NumKind::Dec2 { "0.00" } else { "0" };
    Value::Number(Number::from_string_unchecked(text.to_string()))
}

fn render_exact(value: ExactNumber) -> Value {
    let text = match value {
        ExactNumber::Int(v) => v.to_string(),
        ExactNumber::Dec2Scaled(v) => stat::format_dec2_i128(v),
        ExactNumber::Float(f) => stat::format_shortest_f64(f),
    };
    Value::Number(Number::from_string_unchecked(text))
}

fn round2_number(value: f64) -> Value {
    Value::Number(Number::from_string_unchecked(format!(
        "{:.2}",
        stat::round2(value)
    )))
}

fn opt_round2(value: Option<f64>) -> Value {
    value.map(round2_number).unwrap_or(Value::Null)
}

fn finalize_countmap(acc: &CountMapAccumulator, type_tag: &str) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String(type_tag.to_string()));
    map.insert("counts".to_string(), counts_to_json(&acc.counts));
    Value::Object(map)
}

fn finalize_date(acc: &DateAccumulator) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String("date_agg".to_string()));
    map.insert("counts".to_string(), counts_to_json(&acc.counts.counts));
    map.insert("min".to_string(), Value::String(acc.min.clone()));
    map.insert("max".to_string(), Value::String(acc.max.clone()));
    Value::Object(map)
}

fn finalize_arr(acc: &ArrAccumulator) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String("arr_agg".to_string()));
    map.insert(
        "count".to_string(),
        Value::Number(Number::from_string_unchecked(acc.count.to_string())),
    );
    map.insert("counts".to_string(), counts_to_json(&acc.counts));
    Value::Object(map)
}

fn counts_to_json(counts: &BTreeMap<String, u64>) -> Value {
    let mut map = Map::new();
    for (k, v) in counts {
        map.insert(
            k.clone(),
            Value::Number(Number::from_string_unchecked(v.to_string())),
        );
    }
    Value::Object(map)
}

// ---------------------------------------------------------------------
// stats_agg: decode (merge-of-aggs, §4.D case 3)
// ---------------------------------------------------------------------

/// Decode a `stats_agg` document back into per-entity state, so
/// `merge_agg`/`merge` can fold it pairwise into another state. Because
/// the source document already went through finalize's two-decimal
/// rounding, the reconstructed `mean`/`sum_sq_diff` carry that rounding
/// error forward — this is the accepted cost of round-tripping through
/// an already-finalized document rather than the unrounded serialized
/// form used for worker-to-leader transport.
pub fn decode_stats_agg(doc: &Value) -> Result<StatsState, StatsError> {
    let obj = doc.as_object().ok_or_else(|| {
        StatsError::MalformedDocument("stats_agg document must be an object".to_string())
    })?;
    if obj.get("type").and_then(Value::as_str) != Some("stats_agg") {
        return Err(StatsError::MalformedDocument(
            "stats_agg document is missing the \"stats_agg\" discriminator".to_string(),
        ));
    }
    let mut state = StatsState::new();
    for (k, v) in obj {
        if k == "type" {
            continue;
        }
        state.insert_accumulator(k, decode_aggregate_entry(v)?)?;
    }
    Ok(state)
}

fn decode_aggregate_entry(value: &Value) -> Result<Accumulator, StatsError> {
    let obj = value.as_object().ok_or_else(|| {
        StatsError::MalformedDocument("aggregate entry must be an object".to_string())
    })?;
    let tag = obj.get("type").and_then(Value::as_str).ok_or_else(|| {
        StatsError::MalformedDocument("aggregate entry is missing 'type'".to_string())
    })?;
    Ok(match tag {
        "int_agg" => Accumulator::Numeric(decode_numeric(NumKind::Int, obj)?),
        "nat_agg" => Accumulator::Numeric(decode_numeric(NumKind::Nat, obj)?),
        "float_agg" => Accumulator::Numeric(decode_numeric(NumKind::Float, obj)?),
        "dec2_agg" => Accumulator::Numeric(decode_numeric(NumKind::Dec2, obj)?),
        "str_agg" => Accumulator::Str(decode_countmap(obj, "str_agg")?),
        "bool_agg" => Accumulator::Bool(decode_bool_countmap(obj)?),
        "date_agg" => Accumulator::Date(decode_date(obj)?),
        "arr_agg" => Accumulator::Arr(decode_arr(obj)?),
        other => return Err(StatsError::UnknownAggType(other.to_string())),
    })
}

fn required_f64(obj: &Map<String, Value>, field: &str, ctx: &str) -> Result<f64, StatsError> {
    obj.get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| StatsError::MalformedDocument(format!("{ctx} is missing numeric field '{field}'")))
}

/// The field's exact decimal text, as `render_exact` originally wrote
/// it -- `Number::to_string()` reproduces the literal digits under
/// `arbitrary_precision` rather than round-tripping through `f64`.
fn required_number_text(
    obj: &Map<String, Value>,
    field: &str,
    ctx: &str,
) -> Result<String, StatsError> {
    match obj.get(field) {
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(StatsError::MalformedDocument(format!(
            "{ctx} is missing numeric field '{field}'"
        ))),
    }
}

fn decode_numeric(kind: NumKind, obj: &Map<String, Value>) -> Result<NumericAccumulator, StatsError> {
    let count = obj
        .get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| StatsError::MalformedDocument(format!("{} is missing 'count'", kind.type_tag())))?;

    let mut acc = NumericAccumulator::new(kind);
    acc.count = count;
    if count == 0 {
        return Ok(acc);
    }

    let scale = if kind == NumKind::Dec2 { 100.0 } else { 1.0 };
    let mean = required_f64(obj, "mean", kind.type_tag())?;
    acc.mean = mean * scale;
    acc.sum_sq_diff = match obj.get("variance").and_then(Value::as_f64) {
        Some(variance) => variance * scale * scale * (count - 1) as f64,
        None => 0.0,
    };

    if kind.is_exact() {
        let sum_text = required_number_text(obj, "sum", kind.type_tag())?;
        let min_text = required_number_text(obj, "min", kind.type_tag())?;
        let max_text = required_number_text(obj, "max", kind.type_tag())?;
        if kind == NumKind::Dec2 {
            // Already rendered to exactly 2 fractional digits by
            // `render_exact`/`format_dec2_i128`, so this is a parse, not
            // a rounding decision -- but reuse the rounding parser
            // rather than hand-rolling a second decimal-string reader.
            acc.exact_sum = stat::round_half_away_from_zero_scaled_i128(&sum_text)?;
            acc.exact_min = stat::round_half_away_from_zero_scaled(&min_text)?;
            acc.exact_max = stat::round_half_away_from_zero_scaled(&max_text)?;
        } else {
            acc.exact_sum = stat::parse_exact_i128(&sum_text)?;
            acc.exact_min = i64::try_from(stat::parse_exact_i128(&min_text)?)
                .map_err(|_| StatsError::InvalidScalar(format!("'{min_text}' overflows an exact lane")))?;
            acc.exact_max = i64::try_from(stat::parse_exact_i128(&max_text)?)
                .map_err(|_| StatsError::InvalidScalar(format!("'{max_text}' overflows an exact lane")))?;
        }
    } else {
        acc.float_sum = required_f64(obj, "sum", kind.type_tag())?;
        acc.float_min = required_f64(obj, "min", kind.type_tag())?;
        acc.float_max = required_f64(obj, "max", kind.type_tag())?;
    }
    Ok(acc)
}

fn decode_countmap(obj: &Map<String, Value>, ctx: &str) -> Result<CountMapAccumulator, StatsError> {
    Ok(CountMapAccumulator {
        counts: decode_counts_map(obj, ctx)?,
    })
}

fn decode_bool_countmap(obj: &Map<String, Value>) -> Result<CountMapAccumulator, StatsError> {
    let counts = decode_counts_map(obj, "bool_agg")?;
    for key in counts.keys() {
        if key != "true" && key != "false" {
            return Err(StatsError::MalformedDocument(format!(
                "bool_agg counts key '{key}' must be \"true\" or \"false\""
            )));
        }
    }
    Ok(CountMapAccumulator { counts })
}

fn decode_counts_map(obj: &Map<String, Value>, ctx: &str) -> Result<BTreeMap<String, u64>, StatsError> {
    let counts_obj = obj
        .get("counts")
        .and_then(Value::as_object)
        .ok_or_else(|| StatsError::MalformedDocument(format!("{ctx} is missing 'counts'")))?;
    let mut counts = BTreeMap::new();
    for (k, v) in counts_obj {
        let n = v.as_u64().ok_or_else(|| {
            StatsError::MalformedDocument(format!(
                "{ctx} counts value for '{k}' must be a non-negative integer"
            ))
        })?;
        counts.insert(k.clone(), n);
    }
    Ok(counts)
}

fn decode_date(obj: &Map<String, Value>) -> Result<DateAccumulator, StatsError> {
    let counts = decode_countmap(obj, "date_agg")?;
    let min = obj
        .get("min")
        .and_then(Value::as_str)
        .ok_or_else(|| StatsError::MalformedDocument("date_agg is missing 'min'".to_string()))?
        .to_string();
    let max = obj
        .get("max")
        .and_then(Value::as_str)
        .ok_or_else(|| StatsError::MalformedDocument("date_agg is missing 'max'".to_string()))?
        .to_string();
    Ok(DateAccumulator { counts, min, max })
}

fn decode_arr(obj: &Map<String, Value>) -> Result<ArrAccumulator, StatsError> {
    let count = obj
        .get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| StatsError::MalformedDocument("arr_agg is missing 'count'".to_string()))?;
    let counts = decode_counts_map(obj, "arr_agg")?;
    Ok(ArrAccumulator { count, counts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_scalar_stat_round_trips() {
        for stat in [
            Stat::Int(42),
            Stat::Nat(7),
            Stat::Float(3.5),
            Stat::Bool(true),
            Stat::Str("hello".to_string()),
            Stat::Date("2024-03-15".to_string()),
        ] {
            let doc = encode_stat(&stat).unwrap();
            assert_eq!(decode_stat(&doc, true).unwrap(), stat);
        }
    }

    #[test]
    fn dec2_stat_encodes_with_two_fraction_digits() {
        let doc = encode_stat(&Stat::Dec2(12300)).unwrap();
        assert_eq!(doc["value"].to_string(), "123.00");
    }

    #[test]
    fn arr_elements_encode_as_native_json_scalars() {
        let arr = Stat::array(vec![Stat::Int(1), Stat::Str("x".to_string())]).unwrap();
        let doc = encode_stat(&arr).unwrap();
        assert!(doc["value"][0].is_number());
        assert!(doc["value"][1].is_string());
    }

    #[test]
    fn stats_document_carries_discriminator_and_sorted_keys() {
        let mut pairs = BTreeMap::new();
        pairs.insert("zeta".to_string(), encode_stat(&Stat::Int(1)).unwrap());
        pairs.insert("alpha".to_string(), encode_stat(&Stat::Int(2)).unwrap());
        let doc = finalize_stats_document(&pairs);
        let keys: Vec<&String> = doc.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["alpha", "type", "zeta"]);
    }

    #[test]
    fn decode_stats_rejects_missing_discriminator() {
        let doc = serde_json::json!({"x": {"type": "int", "value": 1}});
        let err = decode_stats(&doc, true).unwrap_err();
        assert!(matches!(err, StatsError::MalformedDocument(_)));
    }

    #[test]
    fn strict_arrays_rejects_mixed_element_kinds() {
        let doc = serde_json::json!({"type": "arr", "value": [1, "two"]});
        let err = decode_stat(&doc, true).unwrap_err();
        assert!(matches!(err, StatsError::MalformedDocument(_)));
    }

    #[test]
    fn lenient_arrays_stringify_mixed_element_kinds() {
        let doc = serde_json::json!({"type": "arr", "value": [1, "two"]});
        let stat = decode_stat(&doc, false).unwrap();
        assert_eq!(
            stat,
            Stat::Arr(vec![Stat::Str("1".to_string()), Stat::Str("two".to_string())])
        );
    }

    #[test]
    fn finalize_and_decode_stats_agg_round_trips_numeric_shape() {
        let mut state = StatsState::new();
        state.observe("reading", &Stat::Int(10)).unwrap();
        state.observe("reading", &Stat::Int(5)).unwrap();
        state.observe("reading", &Stat::Int(20)).unwrap();
        let doc = finalize_stats_agg(&state);
        assert_eq!(doc["type"], "stats_agg");
        assert_eq!(doc["reading"]["count"], 3);
        assert_eq!(doc["reading"]["sum"], 35);
        assert_eq!(doc["reading"]["min"], 5);
        assert_eq!(doc["reading"]["max"], 20);

        let decoded = decode_stats_agg(&doc).unwrap();
        match decoded.0.get("reading").unwrap() {
            Accumulator::Numeric(n) => {
                assert_eq!(n.count, 3);
                assert_eq!(n.exact_sum, 35);
            }
            _ => panic!("expected numeric"),
        }
    }

    /// `decode_numeric` must reconstruct `sum`/`min`/`max` for the exact
    /// kinds bit-for-bit, not by round-tripping through `f64` -- past
    /// 2^53 an `f64` can no longer represent every integer, so a sum
    /// this large would silently drift under a float-based decode.
    #[test]
    fn decode_stats_agg_preserves_int_sum_beyond_f64_precision() {
        let big: i64 = 9_007_199_254_740_993; // 2^53 + 1, not exactly an f64
        let mut state = StatsState::new();
        state.observe("reading", &Stat::Int(big)).unwrap();
        state.observe("reading", &Stat::Int(1)).unwrap();
        let doc = finalize_stats_agg(&state);

        let decoded = decode_stats_agg(&doc).unwrap();
        match decoded.0.get("reading").unwrap() {
            Accumulator::Numeric(n) => {
                assert_eq!(n.exact_sum, big as i128 + 1);
                assert_eq!(n.exact_max, big);
            }
            _ => panic!("expected numeric"),
        }
    }

    /// Same precision requirement for the `dec2` lane, whose exact value
    /// is carried as a scaled integer rather than a plain one.
    #[test]
    fn decode_stats_agg_preserves_dec2_sum_beyond_f64_precision() {
        let big_scaled: i64 = 9_007_199_254_740_993; // exact as dec2-scaled i64, not as f64
        let mut state = StatsState::new();
        state.observe("price", &Stat::Dec2(big_scaled)).unwrap();
        let doc = finalize_stats_agg(&state);

        let decoded = decode_stats_agg(&doc).unwrap();
        match decoded.0.get("price").unwrap() {
            Accumulator::Numeric(n) => {
                assert_eq!(n.exact_sum, big_scaled as i128);
            }
            _ => panic!("expected numeric"),
        }
    }

    #[test]
    fn finalize_str_agg_matches_spec_scenario() {
        let mut state = StatsState::new();
        for v in ["apple", "banana", "apple"] {
            state.observe("category", &Stat::Str(v.to_string())).unwrap();
        }
        let doc = finalize_stats_agg(&state);
        assert_eq!(doc["category"]["type"], "str_agg");
        assert_eq!(doc["category"]["counts"]["apple"], 2);
        assert_eq!(doc["category"]["counts"]["banana"], 1);
    }

    #[test]
    fn count_zero_numeric_finalizes_to_nulls() {
        let acc = NumericAccumulator::new(NumKind::Int);
        let doc = finalize_numeric(&acc);
        assert_eq!(doc["count"], 0);
        assert_eq!(doc["sum"], 0);
        assert!(doc["min"].is_null());
        assert!(doc["mean"].is_null());
    }

    #[test]
    fn bool_agg_decode_rejects_bad_keys() {
        let doc = serde_json::json!({
            "type": "stats_agg",
            "flag": {"type": "bool_agg", "counts": {"maybe": 1}}
        });
        let err = decode_stats_agg(&doc).unwrap_err();
        assert!(matches!(err, StatsError::MalformedDocument(_)));
    }
}
