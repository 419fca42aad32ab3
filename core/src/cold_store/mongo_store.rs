//! MongoDB-backed [`ColdStore`] using the official driver. The conditional upsert is a
//! single `find_one_and_update`: a `version` filter for ordinary writes, and a filter
//! requiring the `version` field to be absent (with `upsert: true`) for the
//! `expectedVersion == 0` "create if missing" case.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Binary, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, IndexModel};

use crate::cold_store::{ColdDocument, ColdStore, ConditionalPutResult};
use crate::error::{EngineError, EngineResult, Tier};
use crate::model::{RecordMeta, SessionId};

const DUPLICATE_KEY_CODE: i32 = 11000;

pub struct MongoColdStore {
    collection: Collection<Document>,
}

impl MongoColdStore {
    pub async fn connect(uri: &str, database: &str, collection: &str) -> EngineResult<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| EngineError::storage(Tier::Cold, e))?;
        let collection = client.database(database).collection::<Document>(collection);
        let store = MongoColdStore { collection };
        store.ensure_ttl_index().await?;
        Ok(store)
    }

    pub fn from_collection(collection: Collection<Document>) -> Self {
        MongoColdStore { collection }
    }

    async fn ensure_ttl_index(&self) -> EngineResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(IndexOptions::builder().expire_after(std::time::Duration::from_secs(0)).build())
            .build();
        self.collection
            .create_index(index, None)
            .await
            .map_err(|e| EngineError::storage(Tier::Cold, e))?;
        Ok(())
    }
}

fn to_document(session: &SessionId, doc: &ColdDocument) -> Document {
    doc! {
        "_id": session.as_str(),
        "blob": Binary { subtype: mongodb::bson::spec::BinarySubtype::Generic, bytes: doc.blob.clone() },
        "version": doc.meta.version as i64,
        "fencing_token": doc.meta.fencing_token.map(|t| t as i64),
        "updated_at": datetime_to_bson(doc.meta.updated_at),
        "expires_at": datetime_to_bson(doc.meta.expires_at),
    }
}

fn datetime_to_bson(dt: DateTime<Utc>) -> Bson {
    Bson::DateTime(mongodb::bson::DateTime::from_millis(dt.timestamp_millis()))
}

fn from_document(doc: Document) -> EngineResult<ColdDocument> {
    let blob = match doc.get("blob") {
        Some(Bson::Binary(b)) => b.bytes.clone(),
        _ => return Err(EngineError::ValidationError("cold document missing blob".into())),
    };
    let version = doc
        .get_i64("version")
        .map_err(|_| EngineError::ValidationError("cold document missing version".into()))?
        as u64;
    let fencing_token = doc.get_i64("fencing_token").ok().map(|v| v as u64);
    let updated_at = bson_to_datetime(&doc, "updated_at")?;
    let expires_at = bson_to_datetime(&doc, "expires_at")?;

    Ok(ColdDocument {
        blob,
        meta: RecordMeta {
            version,
            fencing_token,
            updated_at,
            expires_at,
        },
    })
}

fn bson_to_datetime(doc: &Document, field: &str) -> EngineResult<DateTime<Utc>> {
    match doc.get(field) {
        Some(Bson::DateTime(dt)) => Ok(dt.to_chrono()),
        _ => Err(EngineError::ValidationError(format!("cold document missing {field}"))),
    }
}

fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

#[async_trait]
impl ColdStore for MongoColdStore {
    async fn get(&self, session: &SessionId) -> EngineResult<Option<ColdDocument>> {
        let found = self
            .collection
            .find_one(doc! { "_id": session.as_str() }, None)
            .await
            .map_err(|e| EngineError::storage(Tier::Cold, e))?;
        found.map(from_document).transpose()
    }

    async fn conditional_put(
        &self,
        session: &SessionId,
        document: ColdDocument,
        expected_version: u64,
    ) -> EngineResult<ConditionalPutResult> {
        let replacement = to_document(session, &document);
        let (filter, upsert) = if expected_version == 0 {
            (
                doc! { "_id": session.as_str(), "version": { "$exists": false } },
                true,
            )
        } else {
            (
                doc! { "_id": session.as_str(), "version": expected_version as i64 },
                false,
            )
        };

        let options = FindOneAndUpdateOptions::builder()
            .upsert(upsert)
            .return_document(ReturnDocument::After)
            .build();

        let update = doc! { "$set": replacement };
        match self.collection.find_one_and_update(filter, update, options).await {
            Ok(Some(_)) => Ok(ConditionalPutResult { applied: true, current: None }),
            Ok(None) => {
                let current = self.get(session).await?;
                Ok(ConditionalPutResult { applied: false, current })
            }
            Err(e) if is_duplicate_key_error(&e) => {
                let current = self.get(session).await?;
                Ok(ConditionalPutResult { applied: false, current })
            }
            Err(e) => Err(EngineError::storage(Tier::Cold, e)),
        }
    }

    async fn delete(&self, session: &SessionId) -> EngineResult<()> {
        self.collection
            .delete_one(doc! { "_id": session.as_str() }, None)
            .await
            .map_err(|e| EngineError::storage(Tier::Cold, e))?;
        Ok(())
    }

    async fn ping(&self) -> EngineResult<()> {
        self.collection
            .find_one(doc! {}, None)
            .await
            .map_err(|e| EngineError::storage(Tier::Cold, e))?;
        Ok(())
    }
}
