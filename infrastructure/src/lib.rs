// Module declarations
pub mod identifiers;
pub mod persistence;

// Re-export all implementations
pub use identifiers::{is_object_id, is_uuid};
pub use persistence::{InMemoryPokemonRepository, MongoPokemonRepository};
