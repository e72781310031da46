//! Fetch Orchestrator: the engine's single entry point
//!
//! [`QuellClient::query`] routes every call down one of three paths:
//!
//! - reads are answered from the store, fetching only the remainder;
//! - recognized mutations go to the server and then update the store;
//! - everything else is forwarded verbatim.

use std::sync::Arc;
use std::time::Duration;

use quellstore::NormalizedStore;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ast::{Document, OperationKind};
use crate::config::{CacheOptions, ClientConfig, IdentifierFields, TypeMaps};
use crate::error::Result;
use crate::merge::merge_responses;
use crate::mutation::MutationIntent;
use crate::normalize::Normalizer;
use crate::parser::parse_document;
use crate::planner::CacheReadPlanner;
use crate::prototype::{OperationType, Prototype, PrototypeBuilder};
use crate::remainder::RemainderQuery;
use crate::stats::CacheStats;
use crate::transport::{GraphResponse, HttpTransport, Transport, TransportError};

/// Route chosen for one call
#[derive(Debug, Clone, PartialEq)]
enum Route {
    Read,
    Mutation(MutationIntent),
    PassThrough { normalize: bool },
}

/// Caching client for one endpoint
pub struct QuellClient<T = HttpTransport> {
    endpoint: String,
    transport: T,
    store: Arc<NormalizedStore>,
    maps: TypeMaps,
    options: CacheOptions,
    identifiers: IdentifierFields,
    stats: CacheStats,
}

impl QuellClient<HttpTransport> {
    /// HTTP client from a loaded config file
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        Self::new(
            config.endpoint,
            HttpTransport::new(),
            config.maps,
            config.options,
        )
    }
}

impl<T: Transport> QuellClient<T> {
    /// Create a client, opening the store its options select
    pub fn new(
        endpoint: impl Into<String>,
        transport: T,
        maps: TypeMaps,
        options: CacheOptions,
    ) -> Result<Self> {
        let store = Arc::new(options.open_store()?);
        Ok(Self::with_store(endpoint, transport, store, maps, options))
    }

    /// Create a client over an already opened store
    pub fn with_store(
        endpoint: impl Into<String>,
        transport: T,
        store: Arc<NormalizedStore>,
        maps: TypeMaps,
        options: CacheOptions,
    ) -> Self {
        let identifiers = options.identifier_fields();
        let endpoint = endpoint.into();
        info!(
            "Quell client for {} (ttl: {}s, scope: {:?})",
            endpoint, options.cache_time_seconds, options.storage_scope
        );

        Self {
            endpoint,
            transport,
            store,
            maps,
            options,
            identifiers,
            stats: CacheStats::new(),
        }
    }

    /// Answer `query`, from the store when possible
    ///
    /// Text that does not parse is forwarded unchanged.
    pub async fn query(&self, query: &str) -> Result<GraphResponse> {
        match parse_document(query) {
            Ok(document) => self.execute(query, &document).await,
            Err(e) => {
                debug!("Forwarding unparsed query: {}", e);
                self.stats.record_pass_through();
                Ok(self.send(query).await?)
            }
        }
    }

    /// Answer an already parsed document; `query` is its source text
    pub async fn execute(&self, query: &str, document: &Document) -> Result<GraphResponse> {
        if let Err(e) = self.store.sweep() {
            warn!("Expiry sweep failed: {}", e);
        }

        let (prototype, operation_type) = PrototypeBuilder::new(&self.maps, &self.identifiers)
            .build(document)
            .into_expanded();

        let writes = document
            .operations
            .first()
            .is_some_and(|operation| operation.kind == OperationKind::Mutation);

        match self.route(&operation_type, &prototype, writes) {
            Route::Read => self.read(prototype).await,
            Route::Mutation(intent) => self.mutate(query, intent, &prototype).await,
            Route::PassThrough { normalize } => {
                self.pass_through(query, normalize.then_some(&prototype))
                    .await
            }
        }
    }

    /// Pick the path for an operation; responses to forwarded mutations are
    /// never normalized
    fn route(&self, operation_type: &OperationType, prototype: &Prototype, writes: bool) -> Route {
        match operation_type {
            OperationType::Query => Route::Read,
            OperationType::Mutation => {
                match MutationIntent::classify(prototype, &self.maps, &self.identifiers) {
                    Some(intent) => Route::Mutation(intent),
                    None => {
                        debug!("Mutation intent unknown, forwarding");
                        Route::PassThrough { normalize: false }
                    }
                }
            }
            OperationType::UnQuellable(reason) => {
                debug!("Forwarding: {}", reason);
                Route::PassThrough {
                    normalize: !writes && reason.allows_normalization(),
                }
            }
        }
    }

    async fn send(&self, query: &str) -> std::result::Result<GraphResponse, TransportError> {
        self.transport
            .execute(&self.endpoint, query, &self.options.request_headers)
            .await
    }

    async fn read(&self, mut prototype: Prototype) -> Result<GraphResponse> {
        let plan = CacheReadPlanner::new(&self.store).plan(&mut prototype)?;
        if plan.complete {
            self.stats.record_hit();
            return Ok(GraphResponse::from_data(plan.data));
        }

        if plan.data.is_empty() {
            self.stats.record_miss();
        } else {
            self.stats.record_partial_hit();
        }

        let remainder = RemainderQuery::build(&prototype, &self.identifiers).to_string();
        trace!("Fetching remainder: {}", remainder);

        let fetched = self.send(&remainder).await?;
        if let Some(errors) = fetched.errors.filter(|e| !e.is_empty()) {
            return Err(TransportError::server(errors).into());
        }

        let fetched = fetched.data.unwrap_or_default();
        let merged = merge_responses(&prototype, &plan.data, &fetched, &self.identifiers)?;
        self.normalize(&merged, &prototype);

        Ok(GraphResponse::from_data(merged))
    }

    async fn mutate(
        &self,
        query: &str,
        intent: MutationIntent,
        prototype: &Prototype,
    ) -> Result<GraphResponse> {
        self.stats.record_mutation();
        let response = self.send(query).await?;

        if response.has_errors() {
            warn!("Mutation reported errors, store left as is");
            return Ok(response);
        }

        let empty = Map::new();
        let data = response.data.as_ref().unwrap_or(&empty);
        if let Err(e) = intent.apply(&self.store, prototype, data, &self.identifiers) {
            warn!("Failed to apply {:?}: {}", intent, e);
        }

        Ok(response)
    }

    async fn pass_through(
        &self,
        query: &str,
        prototype: Option<&Prototype>,
    ) -> Result<GraphResponse> {
        self.stats.record_pass_through();
        let response = self.send(query).await?;

        if let (Some(prototype), Some(data)) = (prototype, response.data.as_ref()) {
            if !response.has_errors() {
                self.normalize(data, prototype);
            }
        }

        Ok(response)
    }

    /// Write a response into the store; failures only cost future hits
    fn normalize(&self, data: &Map<String, Value>, prototype: &Prototype) {
        match Normalizer::new(&self.store, &self.identifiers).normalize(data, prototype) {
            Ok(report) => {
                self.stats.record_entries(report.entries_written as u64);
                self.stats.record_uncacheable(report.uncacheable.len() as u64);
            }
            Err(e) => warn!("Failed to normalize response: {}", e),
        }
    }

    /// Remove everything from the store
    pub fn clear_cache(&self) -> Result<()> {
        self.store.clear()?;
        info!("Cache cleared");
        Ok(())
    }

    /// Sweep expired records every `period` in the background
    pub fn spawn_expiry_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = store.sweep() {
                    warn!("Expiry sweep failed: {}", e);
                }
            }
        })
    }

    /// Normalized store
    pub fn store(&self) -> &Arc<NormalizedStore> {
        &self.store
    }

    /// Call statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Remote endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Type maps
    pub fn maps(&self) -> &TypeMaps {
        &self.maps
    }

    /// Options
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuellError;
    use crate::testing::{countries, maps, FakeServer};
    use quellstore::{ManualClock, MemoryStore};
    use serde_json::json;

    fn client() -> (QuellClient<FakeServer>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = NormalizedStore::with_clock(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(600),
            clock.clone(),
        )
        .unwrap();
        let client = QuellClient::with_store(
            "http://localhost:4000/graphql",
            FakeServer::new(countries()),
            Arc::new(store),
            maps(),
            CacheOptions::default(),
        );
        (client, clock)
    }

    fn data(response: GraphResponse) -> Value {
        Value::Object(response.data.unwrap())
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (client, _) = client();

        let first = client.query("{ country(id: 2) { id name } }").await.unwrap();
        assert_eq!(data(first), json!({"country": {"id": 2, "name": "Peru"}}));
        assert_eq!(
            client.transport().requests(),
            vec!["query { country(id: 2) { id name } }".to_string()]
        );

        let entry = client.store().read_entry("Country--2").unwrap().unwrap();
        assert_eq!(
            serde_json::to_string(&entry.fields).unwrap(),
            r#"{"id":2,"name":"Peru"}"#
        );

        let second = client.query("{ country(id: 2) { id name } }").await.unwrap();
        assert_eq!(data(second), json!({"country": {"id": 2, "name": "Peru"}}));
        assert_eq!(client.transport().requests().len(), 1);

        assert_eq!(client.stats().misses(), 1);
        assert_eq!(client.stats().hits(), 1);
    }

    #[tokio::test]
    async fn test_partial_hit_fetches_only_missing_fields() {
        let (client, _) = client();
        client.query("{ country(id: 1) { id name } }").await.unwrap();

        let response = client
            .query("{ country(id: 1) { id name population } }")
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_string(&response.data.unwrap()).unwrap(),
            r#"{"country":{"id":1,"name":"Bolivia","population":12}}"#
        );
        assert_eq!(
            client.transport().requests()[1],
            "query { country(id: 1) { population } }"
        );
        assert_eq!(client.stats().partial_hits(), 1);
    }

    #[tokio::test]
    async fn test_collection_round_trip() {
        let (client, _) = client();
        let query = "{ countries { id name capital { id name } cities { id name } } }";

        let fetched = client.query(query).await.unwrap();
        let cached = client.query(query).await.unwrap();
        assert_eq!(fetched, cached);
        assert_eq!(client.transport().requests().len(), 1);

        // Entities written by the collection answer by-id reads too
        let response = client
            .query("{ country(id: 1) { name cities { name } } }")
            .await
            .unwrap();
        assert_eq!(
            data(response),
            json!({"country": {"name": "Bolivia", "cities": [{"name": "Sucre"}, {"name": "La Paz"}]}})
        );
        assert_eq!(client.transport().requests().len(), 1);
    }

    #[tokio::test]
    async fn test_entity_reached_through_two_paths() {
        let (client, _) = client();
        let query = "{ country(id: 1) { id capital { id name } cities { id } } }";

        let fetched = client.query(query).await.unwrap();
        assert_eq!(
            data(fetched.clone()),
            json!({"country": {
                "id": 1,
                "capital": {"id": 10, "name": "Sucre"},
                "cities": [{"id": 10}, {"id": 11}]
            }})
        );

        let sucre = client.store().read_entry("City--10").unwrap().unwrap();
        assert_eq!(sucre.fields.get("name"), Some(&json!("Sucre")));

        let cached = client.query(query).await.unwrap();
        assert_eq!(fetched, cached);
        assert_eq!(client.transport().requests().len(), 1);
    }

    #[tokio::test]
    async fn test_same_entity_under_two_aliases() {
        let (client, _) = client();
        let query = "{ a: country(id: 1) { id } b: country(id: 1) { name } }";

        let fetched = client.query(query).await.unwrap();
        assert_eq!(
            data(fetched.clone()),
            json!({"a": {"id": 1}, "b": {"name": "Bolivia"}})
        );

        let cached = client.query(query).await.unwrap();
        assert_eq!(fetched, cached);
        assert_eq!(client.transport().requests().len(), 1);
        assert_eq!(client.stats().hits(), 1);
    }

    #[tokio::test]
    async fn test_no_phantom_fields() {
        let (client, _) = client();
        client
            .query("{ country(id: 1) { id name population } }")
            .await
            .unwrap();

        let response = client.query("{ country(id: 1) { name } }").await.unwrap();
        assert_eq!(data(response), json!({"country": {"name": "Bolivia"}}));
    }

    #[tokio::test]
    async fn test_aliases_survive_the_cache() {
        let (client, _) = client();
        let query = r#"{ home: country(id: "1") { id title: name } }"#;

        let fetched = client.query(query).await.unwrap();
        assert_eq!(data(fetched), json!({"home": {"id": 1, "title": "Bolivia"}}));

        let cached = client.query(query).await.unwrap();
        assert_eq!(data(cached), json!({"home": {"id": 1, "title": "Bolivia"}}));
        assert_eq!(client.stats().hits(), 1);
    }

    #[tokio::test]
    async fn test_partial_list_refetched_whole() {
        let (client, _) = client();
        client.query("{ countries { id name } }").await.unwrap();

        let response = client
            .query("{ countries { id name population } }")
            .await
            .unwrap();
        assert_eq!(
            client.transport().requests()[1],
            "query { countries { id name population } }"
        );
        assert_eq!(data(response)["countries"][1]["population"], json!(33));
    }

    #[tokio::test]
    async fn test_delete_removes_from_every_answer() {
        let (client, _) = client();
        client.query("{ countries { id name } }").await.unwrap();

        client
            .transport()
            .script(Ok(GraphResponse::from_data(
                json!({"deleteCountry": {"id": 2}}).as_object().unwrap().clone(),
            )));
        client
            .query("mutation { deleteCountry(id: 2) { id } }")
            .await
            .unwrap();

        let response = client.query("{ countries { id name } }").await.unwrap();
        assert_eq!(
            data(response),
            json!({"countries": [{"id": 1, "name": "Bolivia"}, {"id": 3, "name": "Chile"}]})
        );
        assert_eq!(client.transport().requests().len(), 2);
        assert_eq!(client.stats().mutations(), 1);
        assert!(client.store().read_entry("Country--2").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_patches_cached_entity() {
        let (client, _) = client();
        client.query("{ country(id: 3) { id name } }").await.unwrap();

        client
            .transport()
            .script(Ok(GraphResponse::from_data(
                json!({"updateCountry": {"id": 3, "name": "Chili"}})
                    .as_object()
                    .unwrap()
                    .clone(),
            )));
        client
            .query(r#"mutation { updateCountry(id: 3, name: "Chili") { id name } }"#)
            .await
            .unwrap();

        let response = client.query("{ country(id: 3) { id name } }").await.unwrap();
        assert_eq!(data(response), json!({"country": {"id": 3, "name": "Chili"}}));
        assert_eq!(client.transport().requests().len(), 2);
    }

    #[tokio::test]
    async fn test_create_normalizes_result() {
        let (client, _) = client();
        client
            .transport()
            .script(Ok(GraphResponse::from_data(
                json!({"addCountry": {"id": 9, "name": "Uruguay"}})
                    .as_object()
                    .unwrap()
                    .clone(),
            )));

        client
            .query(r#"mutation { addCountry(name: "Uruguay") { id name } }"#)
            .await
            .unwrap();

        let response = client.query("{ country(id: 9) { id name } }").await.unwrap();
        assert_eq!(data(response), json!({"country": {"id": 9, "name": "Uruguay"}}));
        assert_eq!(client.transport().requests().len(), 1);
    }

    #[tokio::test]
    async fn test_mutation_errors_leave_store_alone() {
        let (client, _) = client();
        client.query("{ country(id: 3) { id name } }").await.unwrap();

        client.transport().script(Ok(GraphResponse {
            data: None,
            errors: Some(vec![json!({"message": "forbidden"})]),
        }));
        let response = client
            .query("mutation { deleteCountry(id: 3) { id } }")
            .await
            .unwrap();

        assert!(response.has_errors());
        assert!(client.store().read_entry("Country--3").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_mutation_passes_through() {
        let (client, _) = client();
        client.transport().script(Ok(GraphResponse::from_data(
            json!({"renameCountry": {"id": 1}}).as_object().unwrap().clone(),
        )));

        let query = r#"mutation { renameCountry(from: "a", to: "b") { id } }"#;
        client.query(query).await.unwrap();

        assert_eq!(client.transport().requests(), vec![query.to_string()]);
        assert_eq!(client.stats().pass_throughs(), 1);
        assert_eq!(client.stats().mutations(), 0);
        assert!(client.store().is_empty());
    }

    #[tokio::test]
    async fn test_expiry_forces_refetch() {
        let (client, clock) = client();
        client.query("{ country(id: 2) { id name } }").await.unwrap();

        clock.advance_secs(599);
        client.query("{ country(id: 2) { id name } }").await.unwrap();
        assert_eq!(client.transport().requests().len(), 1);

        clock.advance_secs(2);
        client.query("{ country(id: 2) { id name } }").await.unwrap();
        assert_eq!(client.transport().requests().len(), 2);
    }

    #[tokio::test]
    async fn test_variables_pass_through_verbatim() {
        let (client, _) = client();
        client.transport().script(Ok(GraphResponse::from_data(
            json!({"country": {"id": 1}}).as_object().unwrap().clone(),
        )));

        let query = "query Q($id: ID) { country(id: $id) { id } }";
        let response = client.query(query).await.unwrap();

        assert_eq!(data(response), json!({"country": {"id": 1}}));
        assert_eq!(client.transport().requests(), vec![query.to_string()]);
        assert!(client.store().is_empty());
    }

    #[tokio::test]
    async fn test_unmapped_pass_through_still_normalizes() {
        let (client, _) = client();
        let query = "{ country(id: 1) { id name weather { temp } } }";

        let response = client.query(query).await.unwrap();
        assert_eq!(client.transport().requests(), vec![query.to_string()]);
        assert_eq!(data(response)["country"]["weather"], json!({"temp": 21}));

        let entry = client.store().read_entry("Country--1").unwrap().unwrap();
        assert_eq!(entry.fields.get("name"), Some(&json!("Bolivia")));
        assert!(!entry.fields.contains_key("weather"));
        assert!(!entry.references.contains_key("weather"));
    }

    #[tokio::test]
    async fn test_unparsable_text_passes_through() {
        let (client, _) = client();
        client.transport().script(Ok(GraphResponse {
            data: None,
            errors: Some(vec![json!({"message": "Syntax Error"})]),
        }));

        let response = client.query("{ country(id: 1) { id ").await.unwrap();
        assert!(response.has_errors());
        assert_eq!(client.stats().pass_throughs(), 1);
        assert!(client.store().is_empty());
    }

    #[tokio::test]
    async fn test_remainder_errors_fail_the_call() {
        let (client, _) = client();
        client.transport().script(Ok(GraphResponse {
            data: None,
            errors: Some(vec![json!({"message": "boom"})]),
        }));

        let error = client
            .query("{ country(id: 1) { id name } }")
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            QuellError::Transport(TransportError::Server { .. })
        ));
        assert!(client.store().is_empty());
    }

    #[tokio::test]
    async fn test_short_response_is_shape_mismatch() {
        let (client, _) = client();
        client.transport().script(Ok(GraphResponse::from_data(
            json!({"country": {"id": 1}}).as_object().unwrap().clone(),
        )));

        let error = client
            .query("{ country(id: 1) { id name } }")
            .await
            .unwrap_err();
        match error {
            QuellError::ShapeMismatch(mismatch) => assert_eq!(mismatch.path, "country.name"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces() {
        let (client, _) = client();
        client
            .transport()
            .script(Err(TransportError::Other("connection refused".to_string())));

        let error = client
            .query("{ country(id: 1) { id } }")
            .await
            .unwrap_err();
        assert!(matches!(error, QuellError::Transport(TransportError::Other(_))));
    }

    #[tokio::test]
    async fn test_fragments_are_expanded() {
        let (client, _) = client();

        let response = client
            .query("{ country(id: 1) { ...parts } } fragment parts on Country { id name }")
            .await
            .unwrap();
        assert_eq!(data(response), json!({"country": {"id": 1, "name": "Bolivia"}}));
        assert_eq!(
            client.transport().requests(),
            vec!["query { country(id: 1) { id name } }".to_string()]
        );

        client.query("{ country(id: 1) { id name } }").await.unwrap();
        assert_eq!(client.transport().requests().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let (client, _) = client();
        client.query("{ country(id: 2) { id name } }").await.unwrap();
        assert!(!client.store().is_empty());

        client.clear_cache().unwrap();
        assert!(client.store().is_empty());

        client.query("{ country(id: 2) { id name } }").await.unwrap();
        assert_eq!(client.transport().requests().len(), 2);
    }

    #[tokio::test]
    async fn test_expiry_sweeper() {
        let (client, clock) = client();
        client.query("{ country(id: 2) { id name } }").await.unwrap();
        clock.advance_secs(601);

        let sweeper = client.spawn_expiry_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.abort();

        assert!(client.store().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_calls() {
        let (client, _) = client();
        let client = Arc::new(client);

        let a = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.query("{ country(id: 1) { id name } }").await })
        };
        let b = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.query("{ country(id: 2) { id name } }").await })
        };

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert!(client.store().read_entry("Country--1").unwrap().is_some());
        assert!(client.store().read_entry("Country--2").unwrap().is_some());
    }
}
