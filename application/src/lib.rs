use async_trait::async_trait;
use domain::{DomainError, NewPokemon, Pokemon, PokemonId, PokemonPatch};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

// --- Application Errors ---
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    DuplicateKey(String),
    /// Detail stays in the server log; the message is safe to show callers.
    #[error("{0}")]
    Internal(String),
    #[error("Domain validation error: {0}")]
    DomainError(#[from] DomainError), // Propagate domain errors cleanly
}

/// Outcome classification reported by a store adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A unique index rejected the write. Carries the offending key, e.g. `{ name: "pikachu" }`.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("store failure: {0}")]
    Backend(String),
}

// --- Infrastructure Interfaces (Traits) ---

/// Interface for the pokemon document collection.
#[async_trait]
pub trait PokemonRepository: Send + Sync {
    /// Inserts a new record and returns it as stored.
    async fn insert_one(&self, pokemon: NewPokemon) -> Result<Pokemon, StoreError>;
    async fn find_by_no(&self, no: i64) -> Result<Option<Pokemon>, StoreError>;
    async fn find_by_id(&self, id: &PokemonId) -> Result<Option<Pokemon>, StoreError>;
    /// Exact match on the stored (lowercase) name.
    async fn find_by_name(&self, name: &str) -> Result<Option<Pokemon>, StoreError>;
    /// One page of records sorted ascending by `no`, with internal fields projected out.
    async fn find_page(&self, limit: usize, offset: usize) -> Result<Vec<Pokemon>, StoreError>;
    /// Applies the patch to the record with the given id.
    async fn update_one(&self, id: &PokemonId, patch: &PokemonPatch) -> Result<(), StoreError>;
    /// Deletes by exact id. Returns the number of deleted records.
    async fn delete_one(&self, id: &PokemonId) -> Result<u64, StoreError>;
}

/// Answers whether a string is a valid store-native identifier.
pub trait IdentifierPolicy: Send + Sync {
    fn is_valid_id(&self, candidate: &str) -> bool;
}

impl<F> IdentifierPolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_valid_id(&self, candidate: &str) -> bool {
        self(candidate)
    }
}

// --- Request Models (DTOs) ---

/// Pagination parameters for listing. Both are optional on the wire.
#[derive(Deserialize, Debug, Default, Clone, Copy)]
pub struct PaginationQuery {
    /// Page size. Falls back to the configured default limit.
    pub limit: Option<usize>,
    /// Number of records to skip. Defaults to 0.
    pub offset: Option<usize>,
}

// --- Application Services (Use Cases) ---

/// Record service over the pokemon collection.
pub struct PokemonService {
    repo: Arc<dyn PokemonRepository>,
    id_policy: Arc<dyn IdentifierPolicy>,
    default_limit: usize,
}

impl PokemonService {
    pub fn new(
        repo: Arc<dyn PokemonRepository>,
        id_policy: Arc<dyn IdentifierPolicy>,
        default_limit: usize,
    ) -> Self {
        Self {
            repo,
            id_policy,
            default_limit,
        }
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    #[instrument(skip(self, input), fields(name = %input.name, no = input.no))]
    pub async fn create(&self, mut input: NewPokemon) -> Result<Pokemon, ApplicationError> {
        info!("Attempting to create pokemon");
        input.validate()?;
        input.name = input.name.to_lowercase();

        let pokemon = self
            .repo
            .insert_one(input)
            .await
            .map_err(|e| handle_store_error(e, "create"))?;
        info!(pokemon_id = %pokemon.id, "Pokemon created successfully");
        Ok(pokemon)
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        pagination: PaginationQuery,
    ) -> Result<Vec<Pokemon>, ApplicationError> {
        let limit = pagination.limit.unwrap_or(self.default_limit);
        let offset = pagination.offset.unwrap_or(0);
        if limit == 0 {
            warn!("Rejected listing with zero limit");
            return Err(ApplicationError::BadRequest(
                "limit must be at least 1".to_string(),
            ));
        }

        let page = self
            .repo
            .find_page(limit, offset)
            .await
            .map_err(|e| handle_store_error(e, "list"))?;
        debug!(limit, offset, returned = page.len(), "Pokemon page fetched");
        Ok(page)
    }

    /// Resolves one record by number, then store id, then name.
    ///
    /// A strategy that matches nothing falls through to the next one, so a
    /// numeric term without a matching `no` can still resolve by name.
    #[instrument(skip(self))]
    pub async fn find_by_term(&self, term: &str) -> Result<Pokemon, ApplicationError> {
        let mut found = None;

        if let Some(no) = pokedex_number(term) {
            debug!(no, "Looking up pokemon by number");
            found = self
                .repo
                .find_by_no(no)
                .await
                .map_err(|e| handle_store_error(e, "find"))?;
        }

        if found.is_none() && self.id_policy.is_valid_id(term) {
            debug!("Looking up pokemon by store id");
            found = self
                .repo
                .find_by_id(&PokemonId::new(term.to_string()))
                .await
                .map_err(|e| handle_store_error(e, "find"))?;
        }

        if found.is_none() {
            let name = term.to_lowercase();
            let name = name.trim();
            debug!(name, "Looking up pokemon by name");
            found = self
                .repo
                .find_by_name(name)
                .await
                .map_err(|e| handle_store_error(e, "find"))?;
        }

        found.ok_or_else(|| {
            warn!("Pokemon not found");
            ApplicationError::NotFound(format!(
                "Pokemon with id, name or no \"{}\" not found",
                term
            ))
        })
    }

    /// Applies a partial update and returns the previous record merged with the patch.
    ///
    /// The returned value is not re-read from the store.
    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        term: &str,
        mut patch: PokemonPatch,
    ) -> Result<Pokemon, ApplicationError> {
        info!("Attempting to update pokemon");
        let pokemon = self.find_by_term(term).await?;

        patch.validate()?;
        if let Some(name) = patch.name.as_mut() {
            *name = name.to_lowercase();
        }

        self.repo
            .update_one(&pokemon.id, &patch)
            .await
            .map_err(|e| handle_store_error(e, "update"))?;
        info!(pokemon_id = %pokemon.id, "Pokemon updated successfully");
        Ok(pokemon.merged_with(&patch))
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<String, ApplicationError> {
        info!("Attempting to remove pokemon");
        if !self.id_policy.is_valid_id(id) {
            warn!("Rejected removal with malformed id");
            return Err(ApplicationError::BadRequest(format!(
                "{} is not a valid id",
                id
            )));
        }

        let deleted_count = self
            .repo
            .delete_one(&PokemonId::new(id.to_string()))
            .await
            .map_err(|e| handle_store_error(e, "remove"))?;
        if deleted_count == 0 {
            warn!("Removal matched no pokemon");
            return Err(ApplicationError::BadRequest(format!(
                "Pokemon with id \"{}\" not found",
                id
            )));
        }

        info!("Pokemon removed successfully");
        Ok(format!("{} has been successfully removed", id))
    }
}

/// Reads a term as a whole number, accepting any numeric spelling (`25`, `25.0`, `2.5e1`).
fn pokedex_number(term: &str) -> Option<i64> {
    let value = term.trim().parse::<f64>().ok()?;
    // Bounds keep the cast exact; fractions and inf/NaN never match a `no`
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Translates a store outcome into the caller-facing error taxonomy.
fn handle_store_error(err: StoreError, action: &str) -> ApplicationError {
    match err {
        StoreError::UniqueViolation(key) => {
            warn!(key = %key, "Unique constraint rejected pokemon write");
            ApplicationError::DuplicateKey(format!("Pokemon exists in db {}", key))
        }
        StoreError::Backend(msg) => {
            error!(action, "Pokemon store failure: {}", msg);
            ApplicationError::Internal(format!("Can't {} Pokemon - Check server logs", action))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_maps_to_duplicate_key() {
        let err = handle_store_error(
            StoreError::UniqueViolation("{ name: \"pikachu\" }".to_string()),
            "create",
        );
        assert!(
            matches!(err, ApplicationError::DuplicateKey(msg) if msg == "Pokemon exists in db { name: \"pikachu\" }")
        );
    }

    #[test]
    fn backend_failure_maps_to_internal_without_detail() {
        let err = handle_store_error(
            StoreError::Backend("connection reset by peer".to_string()),
            "update",
        );
        match err {
            ApplicationError::Internal(msg) => {
                assert_eq!(msg, "Can't update Pokemon - Check server logs");
                assert!(!msg.contains("connection reset"));
            }
            other => panic!("expected internal error, got {:?}", other),
        }
    }

    #[test]
    fn numeric_terms_in_any_spelling_read_as_numbers() {
        for term in ["25", " 25 ", "+25", "025", "25.0", "2.5e1"] {
            assert_eq!(pokedex_number(term), Some(25), "term {:?}", term);
        }
    }

    #[test]
    fn non_whole_or_non_numeric_terms_are_not_numbers() {
        for term in ["2.5", "pikachu", "", "inf", "NaN", "1e300"] {
            assert_eq!(pokedex_number(term), None, "term {:?}", term);
        }
    }

    #[test]
    fn closures_act_as_identifier_policies() {
        let policy: Arc<dyn IdentifierPolicy> =
            Arc::new(|candidate: &str| candidate.starts_with("id-"));
        assert!(policy.is_valid_id("id-7"));
        assert!(!policy.is_valid_id("pikachu"));
    }
}
