//! The tagged scalar observation (§3 `stat`, §4.A). This module knows
//! nothing about Postgres datums or OIDs — that dispatch belongs to the
//! `extension` crate's codec; this is the closed tagged union the codec
//! decodes *into*, and the one the accumulator kernels consume.

use serde::{Deserialize, Serialize};

use crate::error::StatsError;

/// One observation. `Dec2` is already scaled by 100 (exact two-decimal
/// value as an integer) — the codec does the half-away-from-zero
/// rounding to 2 digits before ever constructing this variant, so every
/// `Dec2` payload downstream is assumed exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stat {
    Int(i64),
    Float(f64),
    Dec2(i64),
    Nat(i64),
    Str(String),
    Bool(bool),
    Date(String),
    Arr(Vec<Stat>),
}

impl Stat {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Stat::Int(_) => "int",
            Stat::Float(_) => "float",
            Stat::Dec2(_) => "dec2",
            Stat::Nat(_) => "nat",
            Stat::Str(_) => "str",
            Stat::Bool(_) => "bool",
            Stat::Date(_) => "date",
            Stat::Arr(_) => "arr",
        }
    }

    /// Construct an `arr` stat, rejecting nested arrays (§4.A: "recursive
    /// arrays are rejected").
    pub fn array(elements: Vec<Stat>) -> Result<Stat, StatsError> {
        if elements.iter().any(|e| matches!(e, Stat::Arr(_))) {
            return Err(StatsError::MalformedDocument(
                "nested arrays are not supported by the arr kind".to_string(),
            ));
        }
        Ok(Stat::Arr(elements))
    }

    /// Stringify a scalar element the way the `arr` kernel wants it
    /// (§4.B.5): strings verbatim, numerics by their shortest round-trip
    /// decimal rendering, booleans as `true`/`false`. `Arr` itself can't
    /// appear here because `Stat::array` refuses to construct one.
    pub fn stringify_element(&self) -> String {
        match self {
            Stat::Int(i) => i.to_string(),
            Stat::Nat(i) => i.to_string(),
            Stat::Float(f) => format_shortest_f64(*f),
            Stat::Dec2(scaled) => format_dec2(*scaled),
            Stat::Bool(b) => crate::countmap::normalize_bool(*b).to_string(),
            Stat::Str(s) => s.clone(),
            Stat::Date(d) => d.clone(),
            Stat::Arr(_) => unreachable!("arrays cannot nest inside an arr observation"),
        }
    }
}

/// `serde_json`'s own formatter already produces the shortest
/// round-trip decimal for an `f64` (it goes through the same `ryu`-style
/// machinery as `to_string`), so we reuse the standard library's
/// `Display` for `f64`, which does the same thing.
pub fn format_shortest_f64(f: f64) -> String {
    if f == f.trunc() && f.abs() < 1e15 {
        format!("{:.0}", f)
    } else {
        format!("{f}")
    }
}

/// Render a `dec2`-scaled integer (value * 100) back to its decimal
/// text, e.g. `12345` -> `"123.45"`, `-5` -> `"-0.05"`.
pub fn format_dec2(scaled: i64) -> String {
    format_dec2_i128(scaled as i128)
}

/// Same as [`format_dec2`] but over the wider `i128` lane used for
/// running sums, which can exceed `i64` well before any single
/// observation would.
pub fn format_dec2_i128(scaled: i128) -> String {
    let negative = scaled < 0;
    let abs = scaled.unsigned_abs();
    let whole = abs / 100;
    let frac = abs % 100;
    format!("{}{}.{:02}", if negative { "-" } else { "" }, whole, frac)
}

/// Round half-away-from-zero to 2 fractional digits, returned as the
/// scaled integer (value * 100). This is the single rounding rule used
/// both at the codec boundary (§4.A) and at finalize time (§4.D.1).
///
/// Takes the value's exact decimal text (Postgres `numeric`'s own
/// output, or a JSON number's arbitrary-precision text) rather than an
/// `f64`: a binary float can't represent most decimal fractions
/// exactly, so multiplying by 100.0 and rounding can land on the wrong
/// side of a tie (`1.005_f64` is actually `1.00499999999999989...`,
/// which rounds to 100, not 101). Parsing the digits directly and only
/// looking at the third fractional digit to decide the tie sidesteps
/// that entirely.
pub fn round_half_away_from_zero_scaled(s: &str) -> Result<i64, StatsError> {
    let scaled = round_half_away_from_zero_scaled_i128(s)?;
    i64::try_from(scaled)
        .map_err(|_| StatsError::InvalidScalar(format!("'{s}' overflows a dec2 value")))
}

/// Same as [`round_half_away_from_zero_scaled`] but returned as `i128`,
/// for the wider running-sum lane.
pub fn round_half_away_from_zero_scaled_i128(s: &str) -> Result<i128, StatsError> {
    let s = s.trim();
    let (negative, unsigned) = if let Some(rest) = s.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = s.strip_prefix('+') {
        (false, rest)
    } else {
        (false, s)
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(StatsError::InvalidScalar(format!(
            "'{s}' is not a decimal number"
        )));
    }
    let int_val: i128 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| StatsError::InvalidScalar(format!("'{s}' is not a decimal number")))?
    };
    let mut frac_digits = frac_part.chars();
    let mut next_digit = || -> Result<i128, StatsError> {
        match frac_digits.next() {
            None => Ok(0),
            Some(c) => c
                .to_digit(10)
                .map(|d| d as i128)
                .ok_or_else(|| StatsError::InvalidScalar(format!("'{s}' is not a decimal number"))),
        }
    };
    let d1 = next_digit()?;
    let d2 = next_digit()?;
    let d3 = next_digit()?;
    let magnitude = int_val * 100 + d1 * 10 + d2 + if d3 >= 5 { 1 } else { 0 };
    Ok(if negative { -magnitude } else { magnitude })
}

/// Parse a field already rendered as an exact integer literal (no
/// fractional part) -- the `sum`/`min`/`max` fields of an `int_agg`/
/// `nat_agg` document, which `render_exact` always writes as a bare
/// `i128::to_string()` with no float round-trip involved.
pub fn parse_exact_i128(s: &str) -> Result<i128, StatsError> {
    s.parse()
        .map_err(|_| StatsError::InvalidScalar(format!("'{s}' is not an exact integer")))
}

/// Round half-away-from-zero to 2 fractional digits, returned as `f64`.
/// `f64::round` already rounds halves away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nested_arrays() {
        let err = Stat::array(vec![Stat::Arr(vec![Stat::Int(1)])]).unwrap_err();
        assert!(matches!(err, StatsError::MalformedDocument(_)));
    }

    #[test]
    fn dec2_formatting_round_trips() {
        assert_eq!(format_dec2(12345), "123.45");
        assert_eq!(format_dec2(-5), "-0.05");
        assert_eq!(format_dec2(0), "0.00");
    }

    #[test]
    fn half_away_from_zero_rounding() {
        assert_eq!(round_half_away_from_zero_scaled("1.005").unwrap(), 101);
        assert_eq!(round_half_away_from_zero_scaled("-1.005").unwrap(), -101);
        assert_eq!(round2(1.005), 1.01);
        assert_eq!(round2(2.0), 2.0);
    }

    #[test]
    fn half_away_from_zero_rounding_is_exact_past_f64_precision() {
        // 1.005 is stored as 1.00499999999999989... in f64, so a
        // float-multiply-then-round implementation rounds this down to
        // 100 instead of up to 101. Parsing the digit string sidesteps
        // that representation error entirely.
        assert_eq!(round_half_away_from_zero_scaled("1.005").unwrap(), 101);
        assert_eq!(round_half_away_from_zero_scaled("0.125").unwrap(), 13);
        assert_eq!(round_half_away_from_zero_scaled("123").unwrap(), 12300);
        assert_eq!(round_half_away_from_zero_scaled("-0.004").unwrap(), 0);
        assert_eq!(
            round_half_away_from_zero_scaled_i128("12345678901234.005").unwrap(),
            1234567890123401
        );
    }

    #[test]
    fn stringify_matches_spec_examples() {
        let tags = Stat::array(vec![Stat::Int(1), Stat::Int(2)]).unwrap();
        match tags {
            Stat::Arr(elems) => {
                assert_eq!(elems[0].stringify_element(), "1");
                assert_eq!(elems[1].stringify_element(), "2");
            }
            _ => unreachable!(),
        }
    }
}
