//! MongoDB-backed persistent store.
//!
//! Each entity is stored as one document holding its serde fields plus a
//! `_token` field: its cache key, which places it in the token space that
//! bulk loads scan. Documents are located by their primary-key fields.

use std::marker::PhantomData;

use anyhow::{Context, bail};
use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{self, Binary, Bson, Document, doc};
use mongodb::options::{IndexOptions, ReplaceOptions};
use mongodb::{Collection, IndexModel};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::Database;
use crate::entity::Cacheable;
use crate::key::{self, CacheKey, KeyValue};
use crate::store::{PersistentStore, RowConsumer};

/// Document field holding the record's token.
pub const TOKEN_FIELD: &str = "_token";

/// Store for one entity type in one collection.
pub struct MongoStore<T> {
    collection: Collection<Document>,
    key_fields: Vec<String>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> MongoStore<T>
where
    T: Cacheable + Serialize + DeserializeOwned,
{
    /// Create a store over `collection`, whose documents are keyed by
    /// `key_fields` in primary-key order.
    pub fn new(db: &Database, collection: &str, key_fields: &[&str]) -> Self {
        Self {
            collection: db.collection(collection),
            key_fields: key_fields.iter().map(|f| f.to_string()).collect(),
            _entity: PhantomData,
        }
    }

    /// Create the unique key index and the token index.
    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let mut key_index = Document::new();
        for field in &self.key_fields {
            key_index.insert(field.clone(), 1);
        }

        self.collection
            .create_index(
                IndexModel::builder()
                    .keys(key_index)
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        self.collection
            .create_index(IndexModel::builder().keys(doc! { TOKEN_FIELD: 1 }).build())
            .await?;

        debug!("Ensured indexes on {}", self.collection.name());
        Ok(())
    }

    fn key_filter(&self, keys: &[KeyValue]) -> anyhow::Result<Document> {
        if keys.len() != self.key_fields.len() {
            bail!(
                "{} expects {} key values, got {}",
                T::ENTITY_NAME,
                self.key_fields.len(),
                keys.len()
            );
        }

        let mut filter = Document::new();
        for (field, value) in self.key_fields.iter().zip(keys) {
            filter.insert(field.clone(), to_bson(value)?);
        }
        Ok(filter)
    }

    fn cache_key_of(entity: &T) -> anyhow::Result<CacheKey> {
        match entity.cache_key() {
            Some(key) => Ok(key),
            None => key::derive_key(&entity.primary_key_values())
                .with_context(|| format!("can't derive token for {}", T::ENTITY_NAME)),
        }
    }
}

/// Stored form of a key value.
fn to_bson(value: &KeyValue) -> anyhow::Result<Bson> {
    let bson = match value {
        KeyValue::Bool(v) => Bson::Boolean(*v),
        KeyValue::Int(v) => Bson::Int64(*v),
        KeyValue::UInt(v) => match i64::try_from(*v) {
            Ok(v) => Bson::Int64(v),
            Err(_) => bail!("key value {} does not fit a stored int64", v),
        },
        KeyValue::Float(v) => Bson::Double(*v),
        KeyValue::Text(v) => Bson::String(v.clone()),
        KeyValue::Bytes(v) | KeyValue::Hashed(v) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: v.clone(),
        }),
        KeyValue::Json(v) => bson::to_bson(v)?,
    };
    Ok(bson)
}

#[async_trait]
impl<T> PersistentStore<T> for MongoStore<T>
where
    T: Cacheable + Serialize + DeserializeOwned,
{
    async fn find_one(&self, keys: &[KeyValue]) -> anyhow::Result<Option<T>> {
        let filter = self.key_filter(keys)?;
        let result = self.collection.find_one(filter).await?;
        debug!("DB get {}: {:?}", T::ENTITY_NAME, result.is_some());

        match result {
            Some(document) => Ok(Some(bson::from_document(document)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, entity: &T) -> anyhow::Result<bool> {
        let cache_key = Self::cache_key_of(entity)?;
        let filter = self.key_filter(&entity.primary_key_values())?;

        let mut document = bson::to_document(entity)?;
        document.insert(TOKEN_FIELD, cache_key.token());

        let options = ReplaceOptions::builder().upsert(true).build();
        let result = self
            .collection
            .replace_one(filter, document)
            .with_options(options)
            .await?;

        debug!("Saved {} {}", T::ENTITY_NAME, cache_key);
        Ok(result.matched_count > 0 || result.upserted_id.is_some())
    }

    async fn remove(&self, entity: &T) -> anyhow::Result<bool> {
        let filter = self.key_filter(&entity.primary_key_values())?;
        let result = self.collection.delete_one(filter).await?;

        debug!("Deleted {}: {}", T::ENTITY_NAME, result.deleted_count > 0);
        Ok(result.deleted_count > 0)
    }

    async fn load(
        &self,
        start_token: i64,
        end_token: i64,
        consumer: &dyn RowConsumer<T>,
    ) -> anyhow::Result<u64> {
        let filter = doc! { TOKEN_FIELD: { "$gte": start_token, "$lt": end_token } };
        let mut cursor = self.collection.find(filter).await?;
        let mut count = 0;

        while let Some(document) = cursor.next().await {
            let row: T = bson::from_document(document?)?;
            consumer.accept(row).await?;
            count += 1;
        }

        Ok(count)
    }
}
