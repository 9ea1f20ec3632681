use std::fmt;

/// Failure kinds raised by the accumulation core. All are fatal to the
/// operation that raised them; none are recovered locally (a silent skip
/// could corrupt a downstream aggregate, so we never attempt one).
#[derive(Debug, Clone, PartialEq)]
pub enum StatsError {
    UnknownStatType(String),
    UnknownAggType(String),
    MalformedDocument(String),
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    InvalidScalar(String),
    NegativeNat(i64),
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsError::UnknownStatType(t) => write!(f, "unknown stat type '{t}'"),
            StatsError::UnknownAggType(t) => write!(f, "unknown aggregate entry type '{t}'"),
            StatsError::MalformedDocument(msg) => write!(f, "malformed document: {msg}"),
            StatsError::TypeMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "variable '{name}' is already bound to a {expected} accumulator, \
                 got an observation of kind {found}"
            ),
            StatsError::InvalidScalar(msg) => write!(f, "invalid scalar: {msg}"),
            StatsError::NegativeNat(v) => write!(f, "nat observation {v} is negative"),
        }
    }
}

impl std::error::Error for StatsError {}
