//! Serialization helpers for aggregate transition state (§4.D
//! serialize/deserialize): a small versioned header in front of a
//! `bincode`-encoded payload, wrapped in a Postgres `bytea`. Adapted
//! from the toolkit's own varlena-serialization convention, trimmed
//! down to just the two macros the aggregates in `driver.rs` need —
//! the `pg_type!`-style `flatten!`/`build!` struct machinery isn't used
//! here since none of our states are flat_serialize structs.

#[repr(u8)]
pub enum SerializationType {
    Default = 1,
}

/// Serialize `$state` (a `&State`) into a `bytea` Datum: a 4-byte
/// varlena header (filled in by Postgres itself), one version byte,
/// one [`SerializationType`] byte, then the `bincode` payload.
#[macro_export]
macro_rules! do_serialize {
    ($state: ident) => {{
        $crate::do_serialize!($state, version: 1)
    }};
    ($state: ident, version: $version: expr) => {{
        use $crate::type_builder::SerializationType;
        use std::convert::TryInto;
        use std::io::{Cursor, Write};

        let state = &*$state;
        let serialized_size = bincode::serialized_size(state)
            .unwrap_or_else(|e| pgrx::error!("serialization error {}", e));
        let our_size = serialized_size + 2; // version byte + serialization-type byte
        let allocated_size = our_size + 4; // + varlena header
        let allocated_size: usize = allocated_size
            .try_into()
            .unwrap_or_else(|e| pgrx::error!("serialization error {}", e));
        if allocated_size > 0x3FFF_FFFF {
            pgrx::error!("size {} bytes is too large to serialize", allocated_size)
        }

        let bytes: &mut [u8] = unsafe {
            let bytes = pgrx::pg_sys::palloc0(allocated_size);
            std::slice::from_raw_parts_mut(bytes.cast(), allocated_size)
        };
        let mut writer = Cursor::new(bytes);
        writer
            .write_all(&[0; 4]) // varlena header space, Postgres fills this in
            .unwrap_or_else(|e| pgrx::error!("serialization error {}", e));
        writer
            .write_all(&[$version])
            .unwrap_or_else(|e| pgrx::error!("serialization error {}", e));
        writer
            .write_all(&[SerializationType::Default as u8])
            .unwrap_or_else(|e| pgrx::error!("serialization error {}", e));
        bincode::serialize_into(&mut writer, state)
            .unwrap_or_else(|e| pgrx::error!("serialization error {}", e));

        unsafe {
            let bytes = writer.into_inner();
            pgrx::set_varsize(bytes.as_mut_ptr().cast(), bytes.len() as i32);
            $crate::raw::bytea::from(pgrx::pg_sys::Datum::from(bytes.as_mut_ptr()))
        }
    }};
}

/// Deserialize a `bytea` Datum previously produced by [`do_serialize`]
/// back into `$t`.
#[macro_export]
macro_rules! do_deserialize {
    ($bytes: ident, $t: ty) => {{
        use $crate::type_builder::SerializationType;

        let state: $t = unsafe {
            let detoasted = pgrx::pg_sys::pg_detoast_datum_packed($bytes.0.cast_mut_ptr());
            let len = pgrx::varsize_any_exhdr(detoasted);
            let data = pgrx::vardata_any(detoasted) as *const u8;
            let bytes = std::slice::from_raw_parts(data, len);
            if bytes.is_empty() {
                pgrx::error!("deserialization error, no bytes")
            }
            if bytes[0] != 1 {
                pgrx::error!(
                    "deserialization error, invalid serialization version {}",
                    bytes[0]
                )
            }
            if bytes[1] != SerializationType::Default as u8 {
                pgrx::error!(
                    "deserialization error, invalid serialization type {}",
                    bytes[1]
                )
            }
            bincode::deserialize(&bytes[2..])
                .unwrap_or_else(|e| pgrx::error!("deserialization error {}", e))
        };
        state
    }};
}
