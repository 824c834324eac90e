//! Container data structures for the Keel engine.

mod key_index_mapper;

pub use key_index_mapper::KeyIndexMapper;

/// A [`hashbrown::HashMap`] with the fast FxHash hasher.
pub type HashMap<K, V> = hashbrown::HashMap<K, V, rustc_hash::FxBuildHasher>;

/// A [`hashbrown::HashSet`] with the fast FxHash hasher.
pub type HashSet<K> = hashbrown::HashSet<K, rustc_hash::FxBuildHasher>;
