mod debug_info;
mod indexing_container;

pub use debug_info::*;
pub use indexing_container::*;

pub use byte_unit;
pub use derive_more;
pub use derive_new;
pub use derive_where;
pub use log;
pub use parking_lot;
pub use serde;
pub use serde_yaml;
pub use thiserror;
pub use tracy_client;

/// Trait for values that carry a [`DebugInfo`]
pub trait AsDebugInfo {
    fn as_debug_info(&self) -> &DebugInfo;
}

/// Formats a number of bytes with a binary unit, e.g. `1.50 KiB`
pub fn format_bytes(bytes: usize) -> String {
    let adjusted = byte_unit::Byte::from_u64(bytes as u64).get_appropriate_unit(byte_unit::UnitType::Binary);
    format!("{adjusted:.2}")
}

/// Asserts the given condition only when the `assertions` feature is active.
///
/// Used in the hot path of the aggregation where a full `assert!` would be too costly in release builds.
#[macro_export]
macro_rules! checked_assert {
    ($($arg:tt)*) => {
        if cfg!(feature = "assertions") {
            assert!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_binary_unit() {
        assert_eq!(format_bytes(1536), "1.50 KiB");
    }
}
