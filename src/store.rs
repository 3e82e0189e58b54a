use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::Document;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("document {collection}/{id} is not an object")]
    Malformed { collection: String, id: String },
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// Read side of the hosted document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents of a collection, in the order the store returns them.
    async fn fetch_collection(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    async fn fetch_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError>;
}

fn into_document(collection: &str, id: String, data: Value) -> Result<Document, StoreError> {
    match data {
        Value::Object(fields) => Ok(Document::new(id, fields)),
        _ => Err(StoreError::Malformed {
            collection: collection.to_string(),
            id,
        }),
    }
}

/// Documents kept as JSONB rows keyed by (collection, id).
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init_db(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn upsert(&self, collection: &str, doc: &Document) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO regdash.documents (collection, id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, id) DO UPDATE
            SET data = EXCLUDED.data
            "#,
        )
        .bind(collection)
        .bind(&doc.id)
        .bind(Value::Object(doc.fields.clone()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn fetch_collection(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, data FROM regdash.documents \
             WHERE collection = $1 \
             ORDER BY created_at, id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            documents.push(into_document(collection, row.try_get("id")?, row.try_get("data")?)?);
        }
        debug!(collection, count = documents.len(), "fetched collection");
        Ok(documents)
    }

    async fn fetch_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            "SELECT data FROM regdash.documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(into_document(
                collection,
                id.to_string(),
                row.try_get("data")?,
            )?)),
            None => Ok(None),
        }
    }
}

/// Fixed set of documents held in memory, loaded from a JSON snapshot.
///
/// Snapshot layout: `{"<collection>": [{"id": "...", ...fields}, ...]}`. Array order is the
/// fetch order.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: HashMap<String, Vec<Document>>,
}

impl MemoryStore {
    pub fn from_snapshot(snapshot: Value) -> Result<Self, StoreError> {
        let Value::Object(collections) = snapshot else {
            return Err(StoreError::Snapshot(
                "snapshot root must be an object of collections".to_string(),
            ));
        };

        let mut store = Self::default();
        for (collection, docs) in collections {
            let Value::Array(docs) = docs else {
                return Err(StoreError::Snapshot(format!(
                    "collection {collection} must be an array of documents"
                )));
            };
            for (index, doc) in docs.into_iter().enumerate() {
                let Value::Object(mut fields) = doc else {
                    return Err(StoreError::Malformed {
                        collection: collection.clone(),
                        id: index.to_string(),
                    });
                };
                let id = match fields.remove("id") {
                    Some(Value::String(id)) => id,
                    Some(other) => other.to_string(),
                    None => index.to_string(),
                };
                store.insert(&collection, Document::new(id, fields));
            }
        }
        Ok(store)
    }

    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Snapshot(format!("{}: {e}", path.display())))?;
        let snapshot: Value = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Snapshot(format!("{}: {e}", path.display())))?;
        let store = Self::from_snapshot(snapshot)?;
        info!(path = %path.display(), collections = store.collections.len(), "loaded snapshot");
        Ok(store)
    }

    pub fn insert(&mut self, collection: &str, doc: Document) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    #[cfg(test)]
    pub fn with_document(mut self, collection: &str, id: &str, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.insert(collection, Document::new(id, fields));
        self
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch_collection(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        Ok(self.collections.get(collection).cloned().unwrap_or_default())
    }

    async fn fetch_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| doc.id == id))
            .cloned())
    }
}

fn native_timestamp(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Value {
    let seconds = Utc
        .with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .map(|ts| ts.timestamp())
        .unwrap_or_default();
    json!({ "seconds": seconds, "nanoseconds": 0 })
}

pub async fn seed(store: &PgDocumentStore) -> anyhow::Result<()> {
    let registrations = vec![
        (
            "cipherville",
            "Avery Lee",
            "avery.lee@example.com",
            "9876500001",
            "CBIT",
            Some("CSE"),
            Some("3"),
            Some("160122733001"),
            Some("website"),
            native_timestamp(2026, 2, 2, 10, 15),
        ),
        (
            "cipherville",
            "Jules Moreno",
            "jules.moreno@example.com",
            "9876500002",
            "VNR VJIET",
            Some("ECE"),
            Some("2"),
            None,
            Some("instagram"),
            native_timestamp(2026, 2, 3, 18, 40),
        ),
        (
            "dsa-master",
            "Kiara Patel",
            "kiara.patel@example.com",
            "9876500003",
            "cbit",
            Some("IT"),
            Some("4"),
            Some("160121737044"),
            None,
            json!("2026-02-04T09:05:00Z"),
        ),
        (
            "dsa-master",
            "Avery Lee",
            "avery.lee@example.com",
            "9876500001",
            "CBIT",
            Some("CSE"),
            Some("3"),
            Some("160122733001"),
            Some("website"),
            native_timestamp(2026, 2, 4, 11, 0),
        ),
        (
            "ethitech-mania",
            "Rohan Das",
            "rohan.das@example.com",
            "9876500004",
            "MGIT",
            None,
            None,
            None,
            None,
            Value::Null,
        ),
    ];

    let mut per_event: HashMap<&str, u64> = HashMap::new();
    let mut participants: Vec<(&str, &str)> = Vec::new();

    for (event, name, email, phone, college, branch, year, roll, source, registered_at) in
        registrations
    {
        let mut fields = Map::new();
        fields.insert("fullName".into(), json!(name));
        fields.insert("email".into(), json!(email));
        fields.insert("phoneNumber".into(), json!(phone));
        fields.insert("college".into(), json!(college));
        fields.insert("branch".into(), json!(branch));
        fields.insert("year".into(), json!(year));
        fields.insert("rollNumber".into(), json!(roll));
        fields.insert("registrationSource".into(), json!(source));
        fields.insert("registeredAt".into(), registered_at);

        let id = format!("seed-{event}-{}", email.replace(['@', '.'], "-"));
        store.upsert(event, &Document::new(id, fields)).await?;

        *per_event.entry(event).or_default() += 1;
        if !participants.iter().any(|(seen, _)| *seen == email) {
            participants.push((email, college));
        }
    }

    let mut cbit = 0u64;
    for (email, college) in &participants {
        let is_cbit = crate::models::is_cbit_college(Some(college));
        if is_cbit {
            cbit += 1;
        }
        let mut fields = Map::new();
        fields.insert("email".into(), json!(email));
        fields.insert("college".into(), json!(college));
        fields.insert("isCBIT".into(), json!(is_cbit));
        fields.insert(
            "firstRegisteredAt".into(),
            native_timestamp(2026, 2, 2, 10, 15),
        );
        store
            .upsert("participants", &Document::new(email.to_string(), fields))
            .await?;
    }

    let total: u64 = per_event.values().sum();
    let unique = participants.len() as u64;
    let stats = json!({
        "totalRegistrations": total,
        "uniqueRegistrations": unique,
        "uniqueCbitCount": cbit,
        "uniqueNonCbitCount": unique - cbit,
        "events": per_event,
    });
    if let Value::Object(fields) = stats {
        store
            .upsert("counters", &Document::new("stats", fields))
            .await?;
    }

    Ok(())
}

pub async fn import_csv(
    store: &PgDocumentStore,
    collection: &str,
    csv_path: &Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CsvRow {
        id: Option<String>,
        full_name: String,
        email: String,
        phone_number: String,
        college: String,
        branch: Option<String>,
        year: Option<String>,
        roll_number: Option<String>,
        registration_source: Option<String>,
        registered_at: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut imported = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let mut fields = Map::new();
        fields.insert("fullName".into(), json!(row.full_name));
        fields.insert("email".into(), json!(row.email));
        fields.insert("phoneNumber".into(), json!(row.phone_number));
        fields.insert("college".into(), json!(row.college));
        fields.insert("branch".into(), json!(row.branch));
        fields.insert("year".into(), json!(row.year));
        fields.insert("rollNumber".into(), json!(row.roll_number));
        fields.insert("registrationSource".into(), json!(row.registration_source));
        fields.insert("registeredAt".into(), json!(row.registered_at));

        let id = row
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        if store.upsert(collection, &Document::new(id, fields)).await? {
            imported += 1;
        }
    }

    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_keeps_array_order_and_strips_ids() {
        let store = MemoryStore::from_snapshot(json!({
            "cipherville": [
                {"id": "b", "fullName": "Second"},
                {"id": "a", "fullName": "First"},
                {"fullName": "No id"}
            ],
            "counters": [{"id": "stats", "totalRegistrations": 3}]
        }))
        .unwrap();

        let docs = store.fetch_collection("cipherville").await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "2"]);
        assert!(!docs[0].fields.contains_key("id"));

        let stats = store.fetch_document("counters", "stats").await.unwrap();
        assert_eq!(stats.map(|d| d.count("totalRegistrations")), Some(3));
        assert!(store.fetch_document("counters", "nope").await.unwrap().is_none());
        assert!(store.fetch_collection("unknown").await.unwrap().is_empty());
    }

    #[test]
    fn snapshot_rejects_non_array_collections() {
        let err = MemoryStore::from_snapshot(json!({"cipherville": {"a": {}}})).unwrap_err();
        assert!(matches!(err, StoreError::Snapshot(_)));
    }

    #[test]
    fn snapshot_file_is_read_from_disk() {
        let path = std::env::temp_dir().join(format!("regdash-{}.json", Uuid::new_v4()));
        std::fs::write(&path, r#"{"participants": [{"id": "p1", "isCBIT": true}]}"#).unwrap();
        let store = MemoryStore::from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(store.collections["participants"].len(), 1);
    }
}
