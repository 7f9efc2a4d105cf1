// ./infrastructure/src/persistence/in_memory_repository.rs
use application::{PokemonRepository, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use domain::{NewPokemon, Pokemon, PokemonId, PokemonPatch};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Version key the store stamps on every new record.
const VERSION_KEY: &str = "__v";

/// In-memory pokemon collection with unique `name` and `no` indexes.
///
/// Reads go straight to the maps. Writes take `write_gate` so the uniqueness
/// check and the insert happen as one step.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPokemonRepository {
    // Pokemon ID -> Pokemon
    records: Arc<DashMap<PokemonId, Arc<Pokemon>>>,
    // Unique indexes
    names: Arc<DashMap<String, PokemonId>>,
    numbers: Arc<DashMap<i64, PokemonId>>,
    write_gate: Arc<Mutex<()>>,
}

impl InMemoryPokemonRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn name_taken(&self, name: &str, owner: Option<&PokemonId>) -> bool {
        self.names
            .get(name)
            .is_some_and(|entry| Some(entry.value()) != owner)
    }

    fn no_taken(&self, no: i64, owner: Option<&PokemonId>) -> bool {
        self.numbers
            .get(&no)
            .is_some_and(|entry| Some(entry.value()) != owner)
    }
}

fn duplicate_name(name: &str) -> StoreError {
    StoreError::UniqueViolation(format!("{{ name: {:?} }}", name))
}

fn duplicate_no(no: i64) -> StoreError {
    StoreError::UniqueViolation(format!("{{ no: {} }}", no))
}

#[async_trait]
impl PokemonRepository for InMemoryPokemonRepository {
    #[instrument(skip(self, pokemon), fields(name = %pokemon.name, no = pokemon.no))]
    async fn insert_one(&self, pokemon: NewPokemon) -> Result<Pokemon, StoreError> {
        let _gate = self.write_gate.lock().await;
        if self.name_taken(&pokemon.name, None) {
            return Err(duplicate_name(&pokemon.name));
        }
        if self.no_taken(pokemon.no, None) {
            return Err(duplicate_no(pokemon.no));
        }

        let id = PokemonId::new(Uuid::new_v4().to_string());
        let mut attributes = pokemon.attributes;
        attributes.insert(VERSION_KEY.to_string(), json!(0));
        let stored = Pokemon {
            id: id.clone(),
            name: pokemon.name,
            no: pokemon.no,
            attributes,
        };
        debug!(pokemon_id = %id, "Saving pokemon to in-memory store");

        self.names.insert(stored.name.clone(), id.clone());
        self.numbers.insert(stored.no, id.clone());
        self.records.insert(id, Arc::new(stored.clone()));
        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn find_by_no(&self, no: i64) -> Result<Option<Pokemon>, StoreError> {
        let id = self.numbers.get(&no).map(|entry| entry.value().clone());
        match id {
            Some(id) => self.find_by_id(&id).await,
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &PokemonId) -> Result<Option<Pokemon>, StoreError> {
        debug!(pokemon_id = %id, "Getting pokemon from in-memory store");
        let pokemon = self.records.get(id).map(|entry| (**entry.value()).clone());
        Ok(pokemon)
    }

    #[instrument(skip(self))]
    async fn find_by_name(&self, name: &str) -> Result<Option<Pokemon>, StoreError> {
        let id = self.names.get(name).map(|entry| entry.value().clone());
        match id {
            Some(id) => self.find_by_id(&id).await,
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_page(&self, limit: usize, offset: usize) -> Result<Vec<Pokemon>, StoreError> {
        let mut all: Vec<Arc<Pokemon>> = self
            .records
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.sort_unstable_by_key(|pokemon| pokemon.no);

        let page: Vec<Pokemon> = all
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|pokemon| (*pokemon).clone().without_internal_fields())
            .collect();
        debug!(returned = page.len(), "Listed pokemon page from in-memory store");
        Ok(page)
    }

    #[instrument(skip(self, patch))]
    async fn update_one(&self, id: &PokemonId, patch: &PokemonPatch) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().await;
        let current = self.records.get(id).map(|entry| Arc::clone(entry.value()));
        let Some(current) = current else {
            // Nothing matched; a document store reports zero modified here.
            debug!(pokemon_id = %id, "Update matched no pokemon");
            return Ok(());
        };

        if let Some(name) = &patch.name {
            if self.name_taken(name, Some(id)) {
                return Err(duplicate_name(name));
            }
        }
        if let Some(no) = patch.no {
            if self.no_taken(no, Some(id)) {
                return Err(duplicate_no(no));
            }
        }

        let updated = current.merged_with(patch);
        if updated.name != current.name {
            self.names.remove(&current.name);
            self.names.insert(updated.name.clone(), id.clone());
        }
        if updated.no != current.no {
            self.numbers.remove(&current.no);
            self.numbers.insert(updated.no, id.clone());
        }
        debug!(pokemon_id = %id, "Updating pokemon in in-memory store");
        self.records.insert(id.clone(), Arc::new(updated));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_one(&self, id: &PokemonId) -> Result<u64, StoreError> {
        let _gate = self.write_gate.lock().await;
        debug!(pokemon_id = %id, "Deleting pokemon from in-memory store");
        match self.records.remove(id) {
            Some((_, removed)) => {
                self.names.remove(&removed.name);
                self.numbers.remove(&removed.no);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_assigns_id_and_version() {
        let repo = InMemoryPokemonRepository::new();
        let stored = repo.insert_one(NewPokemon::new("pikachu", 25)).await.unwrap();

        assert!(Uuid::parse_str(stored.id.as_str()).is_ok());
        assert_eq!(stored.attributes.get(VERSION_KEY), Some(&json!(0)));
        assert_eq!(repo.len(), 1);
        assert_eq!(
            repo.find_by_id(&stored.id).await.unwrap(),
            Some(stored.clone())
        );
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_name_and_no() {
        let repo = InMemoryPokemonRepository::new();
        repo.insert_one(NewPokemon::new("pikachu", 25)).await.unwrap();

        let by_name = repo.insert_one(NewPokemon::new("pikachu", 26)).await;
        assert_eq!(
            by_name,
            Err(StoreError::UniqueViolation("{ name: \"pikachu\" }".to_string()))
        );
        let by_no = repo.insert_one(NewPokemon::new("raichu", 25)).await;
        assert_eq!(
            by_no,
            Err(StoreError::UniqueViolation("{ no: 25 }".to_string()))
        );
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn find_page_sorts_by_no_and_projects_internal_fields() {
        let repo = InMemoryPokemonRepository::new();
        for (name, no) in [("charmander", 4), ("bulbasaur", 1), ("squirtle", 7), ("ivysaur", 2)] {
            repo.insert_one(NewPokemon::new(name, no)).await.unwrap();
        }

        let page = repo.find_page(2, 1).await.unwrap();
        let numbers: Vec<i64> = page.iter().map(|p| p.no).collect();
        assert_eq!(numbers, vec![2, 4]);
        assert!(page.iter().all(|p| !p.attributes.contains_key(VERSION_KEY)));

        assert!(repo.find_page(5, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_moves_unique_indexes() {
        let repo = InMemoryPokemonRepository::new();
        let stored = repo.insert_one(NewPokemon::new("pikachu", 25)).await.unwrap();
        let patch = PokemonPatch {
            name: Some("raichu".to_string()),
            no: Some(26),
            ..Default::default()
        };
        repo.update_one(&stored.id, &patch).await.unwrap();

        assert!(repo.find_by_name("pikachu").await.unwrap().is_none());
        assert!(repo.find_by_no(25).await.unwrap().is_none());
        let raichu = repo.find_by_no(26).await.unwrap().unwrap();
        assert_eq!(raichu.id, stored.id);
        assert_eq!(raichu.name, "raichu");

        // The freed name can be claimed again.
        repo.insert_one(NewPokemon::new("pikachu", 25)).await.unwrap();
    }

    #[tokio::test]
    async fn update_allows_keeping_own_unique_values() {
        let repo = InMemoryPokemonRepository::new();
        let stored = repo.insert_one(NewPokemon::new("pikachu", 25)).await.unwrap();
        let patch = PokemonPatch {
            name: Some("pikachu".to_string()),
            no: Some(25),
            ..Default::default()
        };
        assert!(repo.update_one(&stored.id, &patch).await.is_ok());
    }

    #[tokio::test]
    async fn update_rejects_name_owned_by_another_record() {
        let repo = InMemoryPokemonRepository::new();
        repo.insert_one(NewPokemon::new("pikachu", 25)).await.unwrap();
        let raichu = repo.insert_one(NewPokemon::new("raichu", 26)).await.unwrap();
        let patch = PokemonPatch {
            name: Some("pikachu".to_string()),
            ..Default::default()
        };

        let result = repo.update_one(&raichu.id, &patch).await;
        assert!(matches!(result, Err(StoreError::UniqueViolation(_))));
        assert_eq!(
            repo.find_by_id(&raichu.id).await.unwrap().unwrap().name,
            "raichu"
        );
    }

    #[tokio::test]
    async fn delete_reports_count_and_frees_indexes() {
        let repo = InMemoryPokemonRepository::new();
        let stored = repo.insert_one(NewPokemon::new("pikachu", 25)).await.unwrap();

        assert_eq!(repo.delete_one(&stored.id).await.unwrap(), 1);
        assert_eq!(repo.delete_one(&stored.id).await.unwrap(), 0);
        assert!(repo.is_empty());
        assert!(repo.find_by_name("pikachu").await.unwrap().is_none());
        assert!(repo.find_by_no(25).await.unwrap().is_none());
    }
}
