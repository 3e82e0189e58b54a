use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::models::{EventInfo, ParticipantRecord, RegistrationRecord, StatsSummary};
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub source: String,
    pub message: String,
}

/// Registrations for every configured event, plus the facet values present in them.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub events: Vec<EventInfo>,
    pub registrations: HashMap<String, Vec<RegistrationRecord>>,
    pub branches: Vec<String>,
    pub years: Vec<String>,
    pub failures: Vec<LoadFailure>,
}

impl Dataset {
    pub fn event_records(&self, event_id: &str) -> &[RegistrationRecord] {
        self.registrations
            .get(event_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every event's records concatenated in declaration order.
    pub fn combined(&self) -> Vec<RegistrationRecord> {
        self.events
            .iter()
            .flat_map(|event| self.event_records(&event.id).iter().cloned())
            .collect()
    }

    pub fn total(&self) -> usize {
        self.registrations.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Participants {
    pub records: Vec<ParticipantRecord>,
    pub failure: Option<LoadFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub stats: Option<StatsSummary>,
    pub failure: Option<LoadFailure>,
}

/// Sorted distinct non-empty values of a record field.
pub fn facet_values<'a, I, F>(records: I, field: F) -> Vec<String>
where
    I: IntoIterator<Item = &'a RegistrationRecord>,
    F: Fn(&RegistrationRecord) -> Option<&str>,
{
    records
        .into_iter()
        .filter_map(|record| field(record))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadTicket(u64);

#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn DocumentStore>,
    generation: Arc<AtomicU64>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Starts a new load generation. Earlier tickets become stale.
    pub fn begin(&self) -> LoadTicket {
        LoadTicket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: LoadTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.0
    }

    pub async fn load_all(&self, events: &[EventInfo]) -> Dataset {
        let handles: Vec<_> = events
            .iter()
            .map(|event| {
                let store = Arc::clone(&self.store);
                let event = event.clone();
                let event_id = event.id.clone();
                let handle = tokio::spawn(async move {
                    let docs = store.fetch_collection(&event.id).await?;
                    Ok::<_, crate::store::StoreError>(
                        docs.iter()
                            .map(|doc| RegistrationRecord::from_document(doc, &event))
                            .collect::<Vec<_>>(),
                    )
                });
                (event_id, handle)
            })
            .collect();

        let mut registrations = HashMap::with_capacity(events.len());
        let mut failures = Vec::new();

        for (event_id, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(records)) => Ok(records),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("fetch task failed: {e}")),
            };
            match outcome {
                Ok(records) => {
                    info!(event = %event_id, count = records.len(), "loaded registrations");
                    registrations.insert(event_id, records);
                }
                Err(message) => {
                    warn!(event = %event_id, error = %message, "failed to load registrations");
                    failures.push(LoadFailure {
                        source: event_id.clone(),
                        message,
                    });
                    registrations.insert(event_id, Vec::new());
                }
            }
        }

        let all = registrations.values().flatten();
        let branches = facet_values(all.clone(), |r| r.branch.as_deref());
        let years = facet_values(all, |r| r.year.as_deref());

        Dataset {
            events: events.to_vec(),
            registrations,
            branches,
            years,
            failures,
        }
    }

    pub async fn load_summary(&self, collection: &str, id: &str) -> Summary {
        match self.store.fetch_document(collection, id).await {
            Ok(Some(doc)) => Summary {
                stats: Some(StatsSummary::from_document(&doc)),
                failure: None,
            },
            Ok(None) => {
                info!(collection, id, "no stats document found");
                Summary::default()
            }
            Err(e) => {
                warn!(collection, id, error = %e, "failed to load stats");
                Summary {
                    stats: None,
                    failure: Some(LoadFailure {
                        source: format!("{collection}/{id}"),
                        message: e.to_string(),
                    }),
                }
            }
        }
    }

    pub async fn load_participants(&self, collection: &str) -> Participants {
        match self.store.fetch_collection(collection).await {
            Ok(docs) => {
                info!(collection, count = docs.len(), "loaded participants");
                Participants {
                    records: docs.iter().map(ParticipantRecord::from_document).collect(),
                    failure: None,
                }
            }
            Err(e) => {
                warn!(collection, error = %e, "failed to load participants");
                Participants {
                    records: Vec::new(),
                    failure: Some(LoadFailure {
                        source: collection.to_string(),
                        message: e.to_string(),
                    }),
                }
            }
        }
    }
}

/// Holds the dataset currently on display.
pub struct Dashboard {
    aggregator: Aggregator,
    dataset: Option<Dataset>,
}

impl Dashboard {
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            aggregator,
            dataset: None,
        }
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    /// Installs a finished load unless a newer one has started since. Returns whether the
    /// dataset was accepted.
    pub fn apply(&mut self, ticket: LoadTicket, dataset: Dataset) -> bool {
        if !self.aggregator.is_current(ticket) {
            debug!(?ticket, "discarding superseded load");
            return false;
        }
        self.dataset = Some(dataset);
        true
    }

    pub async fn reload(&mut self, events: &[EventInfo]) -> bool {
        let ticket = self.aggregator.begin();
        let dataset = self.aggregator.load_all(events).await;
        self.apply(ticket, dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingFor {
        inner: MemoryStore,
        broken: &'static str,
    }

    #[async_trait]
    impl DocumentStore for FailingFor {
        async fn fetch_collection(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
            if collection == self.broken {
                return Err(StoreError::Database(sqlx::Error::Protocol(
                    "permission denied".to_string(),
                )));
            }
            self.inner.fetch_collection(collection).await
        }

        async fn fetch_document(
            &self,
            collection: &str,
            id: &str,
        ) -> Result<Option<Document>, StoreError> {
            if collection == self.broken {
                return Err(StoreError::Database(sqlx::Error::Protocol(
                    "permission denied".to_string(),
                )));
            }
            self.inner.fetch_document(collection, id).await
        }
    }

    fn events() -> Vec<EventInfo> {
        vec![
            EventInfo::new("cipherville", "Cipherville"),
            EventInfo::new("dsa-master", "DSA Master"),
            EventInfo::new("ethitech-mania", "Ethitech Mania"),
        ]
    }

    fn store() -> MemoryStore {
        MemoryStore::default()
            .with_document(
                "cipherville",
                "c1",
                json!({"fullName": "Avery", "branch": "CSE", "year": "3"}),
            )
            .with_document(
                "cipherville",
                "c2",
                json!({"fullName": "Jules", "branch": "ECE", "year": 10}),
            )
            .with_document("dsa-master", "d1", json!({"fullName": "Kiara", "branch": "CSE"}))
            .with_document(
                "ethitech-mania",
                "e1",
                json!({"fullName": "Rohan", "branch": "", "year": "2"}),
            )
            .with_document(
                "counters",
                "stats",
                json!({"totalRegistrations": 4, "events": {"cipherville": 2}}),
            )
    }

    #[tokio::test]
    async fn records_are_tagged_with_their_event() {
        let aggregator = Aggregator::new(Arc::new(store()));
        let dataset = aggregator.load_all(&events()).await;

        assert!(dataset.failures.is_empty());
        assert_eq!(dataset.total(), 4);
        for event in events() {
            for record in dataset.event_records(&event.id) {
                assert_eq!(record.event_id, event.id);
                assert_eq!(record.event_name, event.name);
            }
        }
        let names: Vec<_> = dataset
            .combined()
            .into_iter()
            .filter_map(|r| r.full_name)
            .collect();
        assert_eq!(names, vec!["Avery", "Jules", "Kiara", "Rohan"]);
    }

    #[tokio::test]
    async fn facets_are_sorted_as_strings_without_blanks() {
        let aggregator = Aggregator::new(Arc::new(store()));
        let dataset = aggregator.load_all(&events()).await;

        assert_eq!(dataset.branches, vec!["CSE", "ECE"]);
        assert_eq!(dataset.years, vec!["10", "2", "3"]);
    }

    #[tokio::test]
    async fn one_failed_event_leaves_the_others_intact() {
        let aggregator = Aggregator::new(Arc::new(FailingFor {
            inner: store(),
            broken: "dsa-master",
        }));
        let dataset = aggregator.load_all(&events()).await;

        assert_eq!(dataset.registrations.len(), 3);
        assert!(dataset.event_records("dsa-master").is_empty());
        assert_eq!(dataset.event_records("cipherville").len(), 2);
        assert_eq!(dataset.event_records("ethitech-mania").len(), 1);
        assert!(dataset
            .event_records("cipherville")
            .iter()
            .all(|r| r.event_id == "cipherville"));
        assert_eq!(dataset.failures.len(), 1);
        assert_eq!(dataset.failures[0].source, "dsa-master");
        assert_eq!(dataset.branches, vec!["CSE", "ECE"]);
    }

    #[tokio::test]
    async fn summary_is_absent_on_missing_document_or_error() {
        let aggregator = Aggregator::new(Arc::new(store()));
        let summary = aggregator.load_summary("counters", "stats").await;
        assert_eq!(summary.stats.map(|s| s.total_registrations), Some(4));

        let missing = aggregator.load_summary("counters", "other").await;
        assert!(missing.stats.is_none());
        assert!(missing.failure.is_none());

        let failing = Aggregator::new(Arc::new(FailingFor {
            inner: store(),
            broken: "counters",
        }));
        let errored = failing.load_summary("counters", "stats").await;
        assert!(errored.stats.is_none());
        assert_eq!(
            errored.failure.map(|f| f.source),
            Some("counters/stats".to_string())
        );
    }

    #[tokio::test]
    async fn participants_failure_yields_empty_list() {
        let aggregator = Aggregator::new(Arc::new(FailingFor {
            inner: store(),
            broken: "participants",
        }));
        let participants = aggregator.load_participants("participants").await;
        assert!(participants.records.is_empty());
        assert!(participants.failure.is_some());
    }

    #[tokio::test]
    async fn each_load_returns_a_fresh_dataset() {
        let aggregator = Aggregator::new(Arc::new(store()));
        let first = aggregator.load_all(&events()).await;
        let second = aggregator.load_all(&events()[..1]).await;
        assert_eq!(first.total(), 4);
        assert_eq!(second.total(), 2);
        assert_eq!(first.events.len(), 3);
    }

    #[tokio::test]
    async fn superseded_loads_are_discarded() {
        let aggregator = Aggregator::new(Arc::new(store()));
        let mut dashboard = Dashboard::new(aggregator.clone());

        let stale = aggregator.begin();
        let stale_data = aggregator.load_all(&events()[..1]).await;
        let fresh = aggregator.begin();
        let fresh_data = aggregator.load_all(&events()).await;

        assert!(dashboard.apply(fresh, fresh_data));
        assert!(!dashboard.apply(stale, stale_data));
        assert_eq!(dashboard.dataset().map(Dataset::total), Some(4));

        assert!(dashboard.reload(&events()[1..2]).await);
        assert_eq!(dashboard.dataset().map(Dataset::total), Some(1));
    }
}
