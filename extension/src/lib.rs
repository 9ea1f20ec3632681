mod aggregate_utils;
mod codec;
mod driver;
mod palloc;
mod raw;
mod scalars;
mod type_builder;

use pgrx::*;

pg_module_magic!();

/// Gates whether a non-recursive but heterogeneous `arr` observation
/// (e.g. `[1, "two"]`) is rejected outright (strict, the default) or
/// coerced element-by-element via the `arr` kernel's stringification
/// rule (lenient). Recursive arrays are rejected either way.
static STRICT_ARRAYS: GucSetting<bool> = GucSetting::<bool>::new(true);

#[pg_guard]
pub extern "C" fn _PG_init() {
    GucRegistry::define_bool_guc(
        "docstat_toolkit.strict_arrays",
        "reject heterogeneously-typed arr observations instead of stringifying them",
        "when off, an arr observation whose elements don't share a JSON scalar kind is \
            coerced element-by-element instead of raising MalformedDocument",
        &STRICT_ARRAYS,
        GucContext::Userset,
    );
}

#[cfg(test)]
pub mod pg_test {
    pub fn setup(_options: Vec<&str>) {
        // perform one-off initialization when the pg_test framework starts
    }

    pub fn postgresql_conf_options() -> Vec<&'static str> {
        // return any postgresql.conf settings that are required for your tests
        vec![]
    }
}
