//! Store-native identifier predicates, pluggable as `application::IdentifierPolicy`.

use mongodb::bson::oid::ObjectId;
use uuid::Uuid;

/// True for 24-character hex MongoDB ObjectIds.
pub fn is_object_id(candidate: &str) -> bool {
    ObjectId::parse_str(candidate).is_ok()
}

/// True for UUIDs, the ids handed out by the in-memory store.
pub fn is_uuid(candidate: &str) -> bool {
    Uuid::parse_str(candidate).is_ok()
}
