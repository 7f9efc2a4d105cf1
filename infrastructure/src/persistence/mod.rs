pub mod in_memory_repository;
pub mod mongo_repository;

// Re-export both repository types
pub use in_memory_repository::InMemoryPokemonRepository;
pub use mongo_repository::MongoPokemonRepository;
