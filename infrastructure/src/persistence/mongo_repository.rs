// ./infrastructure/src/persistence/mongo_repository.rs
use application::{PokemonRepository, StoreError};
use async_trait::async_trait;
use domain::{NewPokemon, Pokemon, PokemonId, PokemonPatch};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Bson, Document, doc, oid::ObjectId, to_document},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::IndexOptions,
};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument};

/// Collection holding pokemon documents.
const POKEMON_COLLECTION: &str = "pokemons";

/// Server error code for a unique index violation.
const DUPLICATE_KEY_CODE: i32 = 11000;
const VERSION_KEY: &str = "__v";

/// Pokemon collection backed by MongoDB.
#[derive(Debug, Clone)]
pub struct MongoPokemonRepository {
    collection: Collection<Document>,
}

impl MongoPokemonRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(POKEMON_COLLECTION),
        }
    }

    /// Connects to the server and makes sure the unique indexes exist.
    #[instrument(skip(uri))]
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await.map_err(classify)?;
        let repo = Self::new(&client.database(database));
        repo.ensure_indexes().await?;
        info!(database, collection = POKEMON_COLLECTION, "MongoDB pokemon collection ready");
        Ok(repo)
    }

    /// `name` and `no` are unique; the store is what enforces it.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = |keys: Document| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };
        self.collection
            .create_indexes([unique(doc! { "name": 1 }), unique(doc! { "no": 1 })])
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn find_one(&self, filter: Document) -> Result<Option<Pokemon>, StoreError> {
        match self.collection.find_one(filter).await.map_err(classify)? {
            Some(document) => pokemon_from_document(document).map(Some),
            None => Ok(None),
        }
    }
}

/// Splits a driver error into unique-index violations and everything else.
fn classify(err: MongoError) -> StoreError {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE =>
        {
            StoreError::UniqueViolation(duplicate_key_detail(&write_error.message))
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

/// Pulls the `{ field: value }` part out of an E11000 message.
fn duplicate_key_detail(message: &str) -> String {
    match message.split_once("dup key: ") {
        Some((_, key)) => key.trim().to_string(),
        None => message.to_string(),
    }
}

fn attributes_to_document(attributes: &Map<String, Value>) -> Result<Document, StoreError> {
    to_document(attributes)
        .map_err(|e| StoreError::Backend(format!("Failed to encode pokemon attributes: {}", e)))
}

fn pokemon_from_document(document: Document) -> Result<Pokemon, StoreError> {
    let malformed =
        |reason: String| StoreError::Backend(format!("Malformed pokemon document: {}", reason));

    let id = document
        .get_object_id("_id")
        .map_err(|e| malformed(e.to_string()))?
        .to_hex();
    let name = document
        .get_str("name")
        .map_err(|e| malformed(e.to_string()))?
        .to_string();
    let no = match document.get("no") {
        Some(Bson::Int32(n)) => i64::from(*n),
        Some(Bson::Int64(n)) => *n,
        Some(Bson::Double(n)) if n.fract() == 0.0 => *n as i64,
        other => return Err(malformed(format!("unexpected `no` value {:?}", other))),
    };

    let attributes = document
        .into_iter()
        .filter(|(key, _)| !matches!(key.as_str(), "_id" | "name" | "no"))
        .map(|(key, value)| (key, value.into_relaxed_extjson()))
        .collect();

    Ok(Pokemon {
        id: PokemonId::new(id),
        name,
        no,
        attributes,
    })
}

#[async_trait]
impl PokemonRepository for MongoPokemonRepository {
    #[instrument(skip(self, pokemon), fields(name = %pokemon.name, no = pokemon.no))]
    async fn insert_one(&self, pokemon: NewPokemon) -> Result<Pokemon, StoreError> {
        let mut document = attributes_to_document(&pokemon.attributes)?;
        document.insert("_id", ObjectId::new());
        document.insert("name", pokemon.name);
        document.insert("no", pokemon.no);
        document.insert(VERSION_KEY, 0_i32);

        self.collection
            .insert_one(document.clone())
            .await
            .map_err(classify)?;
        debug!("Pokemon document inserted");
        pokemon_from_document(document)
    }

    #[instrument(skip(self))]
    async fn find_by_no(&self, no: i64) -> Result<Option<Pokemon>, StoreError> {
        self.find_one(doc! { "no": no }).await
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &PokemonId) -> Result<Option<Pokemon>, StoreError> {
        match ObjectId::parse_str(id.as_str()) {
            Ok(oid) => self.find_one(doc! { "_id": oid }).await,
            Err(_) => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_name(&self, name: &str) -> Result<Option<Pokemon>, StoreError> {
        self.find_one(doc! { "name": name }).await
    }

    #[instrument(skip(self))]
    async fn find_page(&self, limit: usize, offset: usize) -> Result<Vec<Pokemon>, StoreError> {
        let cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "no": 1 })
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .skip(u64::try_from(offset).unwrap_or(u64::MAX))
            .projection(doc! { "__v": 0 })
            .await
            .map_err(classify)?;
        let documents: Vec<Document> = cursor.try_collect().await.map_err(classify)?;
        debug!(returned = documents.len(), "Listed pokemon page from MongoDB");
        documents.into_iter().map(pokemon_from_document).collect()
    }

    #[instrument(skip(self, patch))]
    async fn update_one(&self, id: &PokemonId, patch: &PokemonPatch) -> Result<(), StoreError> {
        let oid = ObjectId::parse_str(id.as_str()).map_err(|e| {
            error!(pokemon_id = %id, "Refusing update with non-ObjectId id");
            StoreError::Backend(format!("Invalid ObjectId '{}': {}", id, e))
        })?;

        let mut set = attributes_to_document(&patch.attributes)?;
        if let Some(name) = &patch.name {
            set.insert("name", name.as_str());
        }
        if let Some(no) = patch.no {
            set.insert("no", no);
        }
        if set.is_empty() {
            debug!("Empty patch, nothing to update");
            return Ok(());
        }

        let result = self
            .collection
            .update_one(doc! { "_id": oid }, doc! { "$set": set })
            .await
            .map_err(classify)?;
        debug!(
            matched = result.matched_count,
            modified = result.modified_count,
            "Pokemon document updated"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_one(&self, id: &PokemonId) -> Result<u64, StoreError> {
        let Ok(oid) = ObjectId::parse_str(id.as_str()) else {
            return Ok(0);
        };
        let result = self
            .collection
            .delete_one(doc! { "_id": oid })
            .await
            .map_err(classify)?;
        Ok(result.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_key_detail_extracts_key() {
        let message = "E11000 duplicate key error collection: pokedex.pokemons index: name_1 dup key: { name: \"pikachu\" }";
        assert_eq!(duplicate_key_detail(message), "{ name: \"pikachu\" }");
    }

    fn write_error(code: i32, code_name: &str, message: &str) -> MongoError {
        let write_error: mongodb::error::WriteError = mongodb::bson::from_document(doc! {
            "code": code,
            "codeName": code_name,
            "errmsg": message,
        })
        .unwrap();
        MongoError::from(ErrorKind::Write(WriteFailure::WriteError(write_error)))
    }

    #[test]
    fn classify_maps_duplicate_key_to_unique_violation() {
        let err = write_error(
            DUPLICATE_KEY_CODE,
            "DuplicateKey",
            "E11000 duplicate key error collection: pokedex.pokemons index: name_1 dup key: { name: \"pikachu\" }",
        );
        assert_eq!(
            classify(err),
            StoreError::UniqueViolation("{ name: \"pikachu\" }".to_string())
        );
    }

    #[test]
    fn classify_maps_other_write_errors_to_backend() {
        let err = write_error(121, "DocumentValidationFailure", "Document failed validation");
        assert!(matches!(
            classify(err),
            StoreError::Backend(msg) if msg.contains("Document failed validation")
        ));
    }

    #[test]
    fn duplicate_key_detail_falls_back_to_message() {
        assert_eq!(duplicate_key_detail("boom"), "boom");
    }

    #[test]
    fn document_converts_to_pokemon() {
        let oid = ObjectId::new();
        let document = doc! {
            "_id": oid,
            "name": "pikachu",
            "no": 25_i32,
            "__v": 0_i32,
            "type": "electric",
        };

        let pokemon = pokemon_from_document(document).unwrap();
        assert_eq!(pokemon.id.as_str(), oid.to_hex());
        assert_eq!(pokemon.name, "pikachu");
        assert_eq!(pokemon.no, 25);
        assert_eq!(pokemon.attributes.get("__v"), Some(&json!(0)));
        assert_eq!(pokemon.attributes.get("type"), Some(&json!("electric")));
        assert!(!pokemon.attributes.contains_key("_id"));
    }

    #[test]
    fn document_without_number_is_malformed() {
        let document = doc! { "_id": ObjectId::new(), "name": "missingno" };
        assert!(matches!(
            pokemon_from_document(document),
            Err(StoreError::Backend(msg)) if msg.contains("Malformed")
        ));
    }

    #[test]
    fn attributes_encode_as_document() {
        let mut attributes = Map::new();
        attributes.insert("type".to_string(), json!("electric"));
        attributes.insert("moves".to_string(), json!(["thunderbolt"]));
        let document = attributes_to_document(&attributes).unwrap();
        assert_eq!(document.get_str("type").unwrap(), "electric");
        assert!(document.get_array("moves").is_ok());
    }
}
