//! Pure accumulation core for the hierarchical statistics aggregate
//! family: the typed observation/accumulator/state model (§3, §4.A-E)
//! and the `stat`/`stats`/`stats_agg` document codec, with no
//! dependency on Postgres or `pgrx`. The `extension` crate is the only
//! consumer and owns all of the host-facing plumbing (scalar function
//! dispatch, the aggregate protocol, memory contexts).

pub mod accumulator;
pub mod arrkind;
pub mod countmap;
pub mod datekind;
pub mod document;
pub mod error;
pub mod numeric;
pub mod stat;

pub use accumulator::{Accumulator, StatsState};
pub use error::StatsError;
pub use numeric::{ExactNumber, NumKind, NumericAccumulator};
pub use stat::Stat;
