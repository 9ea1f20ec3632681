//! The value codec (§4.A, SPEC_FULL §2): one `stat(...)` overload per
//! host scalar type pgrx can bind without ambiguity, plus the one
//! kind with no automatic dispatch (`stat_nat`). Each overload builds
//! the matching [`Stat`] and hands it to `agg_core::document::encode_stat`
//! for rendering.

use pgrx::*;

use agg_core::document::encode_stat;
use agg_core::stat::Stat;

fn encode(stat: &Stat) -> JsonB {
    encode_stat(stat)
        .map(JsonB)
        .unwrap_or_else(|e| error!("{}", e))
}

#[pg_extern(immutable, parallel_safe, name = "stat")]
fn stat_int(value: i32) -> JsonB {
    encode(&Stat::Int(value as i64))
}

#[pg_extern(immutable, parallel_safe, name = "stat")]
fn stat_float(value: f64) -> JsonB {
    encode(&Stat::Float(value))
}

#[pg_extern(immutable, parallel_safe, name = "stat")]
fn stat_dec2(value: AnyNumeric) -> JsonB {
    // `numeric` is Postgres's own exact decimal type; go through its
    // exact textual representation rather than `f64`, which can't
    // represent most decimal fractions exactly and would reintroduce
    // the rounding error `dec2` exists to avoid.
    let scaled = agg_core::stat::round_half_away_from_zero_scaled(&value.to_string())
        .unwrap_or_else(|e| error!("invalid numeric value for dec2: {}", e));
    encode(&Stat::Dec2(scaled))
}

#[pg_extern(immutable, parallel_safe, name = "stat")]
fn stat_bool(value: bool) -> JsonB {
    encode(&Stat::Bool(value))
}

#[pg_extern(immutable, parallel_safe, name = "stat")]
fn stat_text(value: &str) -> JsonB {
    encode(&Stat::Str(value.to_string()))
}

#[pg_extern(immutable, parallel_safe, name = "stat")]
fn stat_date(value: Date) -> JsonB {
    encode(&Stat::Date(iso_date(value)))
}

/// `nat` has no automatic host-type mapping (SPEC_FULL §2): this is its
/// sole constructor, for callers who want a non-negative-int observation
/// distinct from `int`.
#[pg_extern(immutable, parallel_safe)]
fn stat_nat(value: i64) -> JsonB {
    encode(&Stat::Nat(value))
}

fn iso_date(d: Date) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day())
}

/// A nullable array element stringifies to the literal `"null"` the same
/// way a JSON `null` does when a `stats`/`stats_agg` document is decoded
/// (`agg_core::document::decode_arr_element`).
fn array_stat<T>(values: Vec<Option<T>>, to_stat: impl Fn(T) -> Stat) -> JsonB {
    let elements: Vec<Stat> = values
        .into_iter()
        .map(|v| v.map(&to_stat).unwrap_or_else(|| Stat::Str("null".to_string())))
        .collect();
    match Stat::array(elements) {
        Ok(arr) => encode(&arr),
        Err(e) => error!("{}", e),
    }
}

#[pg_extern(immutable, parallel_safe, name = "stat")]
fn stat_int_array(value: Array<i64>) -> JsonB {
    let values: Vec<Option<i64>> = value.iter().collect();
    array_stat(values, Stat::Int)
}

#[pg_extern(immutable, parallel_safe, name = "stat")]
fn stat_float_array(value: Array<f64>) -> JsonB {
    let values: Vec<Option<f64>> = value.iter().collect();
    array_stat(values, Stat::Float)
}

#[pg_extern(immutable, parallel_safe, name = "stat")]
fn stat_text_array(value: Array<&str>) -> JsonB {
    let values: Vec<Option<&str>> = value.iter().collect();
    array_stat(values, |s: &str| Stat::Str(s.to_string()))
}

#[pg_extern(immutable, parallel_safe, name = "stat")]
fn stat_bool_array(value: Array<bool>) -> JsonB {
    let values: Vec<Option<bool>> = value.iter().collect();
    array_stat(values, Stat::Bool)
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;

    #[pg_test]
    fn stat_int_encodes_int_kind() {
        let doc = crate::codec::stat_int(42);
        assert_eq!(doc.0["type"], "int");
        assert_eq!(doc.0["value"], 42);
    }

    #[pg_test]
    fn stat_dec2_rounds_half_away_from_zero() {
        let doc = crate::codec::stat_dec2(AnyNumeric::try_from(1.005).unwrap());
        assert_eq!(doc.0["type"], "dec2");
        assert_eq!(doc.0["value"].to_string(), "1.01");
    }

    #[pg_test]
    fn stat_date_renders_iso_form() {
        let d = Date::new(2024, 3, 15).unwrap();
        let doc = crate::codec::stat_date(d);
        assert_eq!(doc.0["value"], "2024-03-15");
    }

    #[pg_test]
    fn stat_nat_rejects_nothing_at_the_codec_boundary() {
        // NegativeNat is raised by the accumulator (§4.B.1), not the codec.
        let doc = crate::codec::stat_nat(-1);
        assert_eq!(doc.0["type"], "nat");
        assert_eq!(doc.0["value"], -1);
    }
}
