use std::collections::HashMap;

use crate::filter::IndexValue;

/// A value storable in a `Store`.
///
/// `collection_name` names the JSONL file the record lives in; `id` is the
/// primary key within that collection; `indexed_fields` declares the subset
/// of fields queryable via `Filter` without deserializing every record.
pub trait Record: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync {
    fn id(&self) -> String;
    fn updated_at(&self) -> i64;
    fn collection_name() -> &'static str;
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}
