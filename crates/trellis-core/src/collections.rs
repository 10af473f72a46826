//! Hash collection aliases used across the reconciler.
//!
//! Keyed child lookup and the scheduler's task table sit on hot paths, so the
//! default build uses `rustc-hash`. Enable the `std-hash` feature to switch to
//! the SipHash-backed std maps.

#[cfg(feature = "std-hash")]
pub mod map {
    pub use std::collections::HashMap;

    pub fn with_capacity<K, V>(capacity: usize) -> HashMap<K, V> {
        HashMap::with_capacity(capacity)
    }
}

#[cfg(not(feature = "std-hash"))]
pub mod map {
    pub use rustc_hash::FxHashMap as HashMap;

    pub fn with_capacity<K, V>(capacity: usize) -> HashMap<K, V> {
        HashMap::with_capacity_and_hasher(capacity, Default::default())
    }
}
