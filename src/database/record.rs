//! Generic keyed record model.

use chrono::{DateTime, Utc};
use mongodb::bson::Document;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::entity::Cacheable;
use crate::key::{CacheKey, KeyValue};

/// A record addressed by `(namespace, record_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// MongoDB document ID
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Owning namespace (first key field)
    pub namespace: String,

    /// Record ID within the namespace (second key field)
    pub record_id: String,

    /// Record payload
    #[serde(default)]
    pub body: Document,

    /// Last write time
    pub updated_at: DateTime<Utc>,

    #[serde(skip)]
    pub cache_key: Option<CacheKey>,
}

impl Record {
    /// Stored field names of the primary key, in key order.
    pub const KEY_FIELDS: &'static [&'static str] = &["namespace", "record_id"];

    /// Create a new record.
    pub fn new(namespace: impl Into<String>, record_id: impl Into<String>, body: Document) -> Self {
        Self {
            id: None,
            namespace: namespace.into(),
            record_id: record_id.into(),
            body,
            updated_at: Utc::now(),
            cache_key: None,
        }
    }

    /// Key tuple for looking a record up without loading it first.
    pub fn key(namespace: &str, record_id: &str) -> Vec<KeyValue> {
        vec![KeyValue::from(namespace), KeyValue::from(record_id)]
    }
}

impl Cacheable for Record {
    const ENTITY_NAME: &'static str = "Record";

    fn primary_key_values(&self) -> Vec<KeyValue> {
        Self::key(&self.namespace, &self.record_id)
    }

    fn cache_key(&self) -> Option<CacheKey> {
        self.cache_key
    }

    fn set_cache_key(&mut self, key: CacheKey) {
        self.cache_key = Some(key);
    }
}
