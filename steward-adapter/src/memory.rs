//! In-process adapter backed by a map of records.
//!
//! Used by the test suites and for local dry runs of the daemon. Every call is
//! logged, failures can be scripted per method, and a bucket hint can be
//! attached to every reply to exercise the limiter feedback path.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};

use steward_core::{AdapterKind, EntityType, ExternalId};

use crate::capability::{Adapter, BucketHint, CanonicalRecord, ExternalRecord, ListParams, Page, Reply};
use crate::error::AdapterError;
use crate::manifest::{Manifest, Method};

/// One observed call, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List {
        entity_type: EntityType,
        cursor: Option<String>,
    },
    Fetch {
        entity_type: EntityType,
        id: ExternalId,
    },
    Create {
        entity_type: EntityType,
        payload: Value,
    },
    Update {
        entity_type: EntityType,
        id: ExternalId,
        payload: Value,
    },
    Delete {
        entity_type: EntityType,
        id: ExternalId,
    },
}

impl Call {
    pub fn method(&self) -> Method {
        match self {
            Call::List { .. } => Method::List,
            Call::Fetch { .. } => Method::Fetch,
            Call::Create { .. } => Method::Create,
            Call::Update { .. } => Method::Update,
            Call::Delete { .. } => Method::Delete,
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        match self {
            Call::List { entity_type, .. }
            | Call::Fetch { entity_type, .. }
            | Call::Create { entity_type, .. }
            | Call::Update { entity_type, .. }
            | Call::Delete { entity_type, .. } => entity_type,
        }
    }
}

struct Scripted {
    method: Method,
    entity_type: Option<EntityType>,
    remaining: u32,
    error: AdapterError,
}

struct State {
    records: BTreeMap<EntityType, BTreeMap<ExternalId, Value>>,
    next_id: u64,
    calls: Vec<Call>,
    failures: Vec<Scripted>,
    hint: Option<BucketHint>,
}

pub struct InMemoryAdapter {
    kind: AdapterKind,
    manifest: Manifest,
    state: Mutex<State>,
}

impl InMemoryAdapter {
    pub fn new(kind: AdapterKind) -> Self {
        Self {
            kind,
            manifest: Manifest::for_kind(kind),
            state: Mutex::new(State {
                records: BTreeMap::new(),
                next_id: 1000,
                calls: Vec::new(),
                failures: Vec::new(),
                hint: None,
            }),
        }
    }

    /// Attach `hint` to every subsequent reply.
    pub fn with_hint(self, hint: BucketHint) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.hint = Some(hint);
        }
        self
    }

    /// Store a record as if it already existed in the external system.
    pub fn seed(&self, entity_type: &str, id: &str, data: Value) {
        if let Ok(mut state) = self.state.lock() {
            state
                .records
                .entry(EntityType::from(entity_type))
                .or_default()
                .insert(ExternalId::from(id), data);
        }
    }

    pub fn record(&self, entity_type: &str, id: &str) -> Option<Value> {
        let state = self.state.lock().ok()?;
        state
            .records
            .get(&EntityType::from(entity_type))?
            .get(&ExternalId::from(id))
            .cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    /// Fail the next matching call with `error`.
    pub fn fail_next(&self, method: Method, entity_type: Option<&str>, error: AdapterError) {
        self.fail_times(method, entity_type, 1, error);
    }

    /// Fail the next `times` matching calls with `error`. `None` matches any
    /// entity type.
    pub fn fail_times(
        &self,
        method: Method,
        entity_type: Option<&str>,
        times: u32,
        error: AdapterError,
    ) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.push(Scripted {
                method,
                entity_type: entity_type.map(EntityType::from),
                remaining: times,
                error,
            });
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, AdapterError> {
        self.state
            .lock()
            .map_err(|_| AdapterError::fetch("memory", "adapter state lock poisoned"))
    }

    /// Log `call`, then surface a scripted failure if one matches.
    fn enter(&self, call: Call) -> Result<MutexGuard<'_, State>, AdapterError> {
        let mut state = self.lock()?;
        let method = call.method();
        let entity_type = call.entity_type().clone();
        state.calls.push(call);
        let scripted = state.failures.iter_mut().find(|s| {
            s.remaining > 0
                && s.method == method
                && s.entity_type.as_ref().map_or(true, |t| *t == entity_type)
        });
        if let Some(scripted) = scripted {
            scripted.remaining -= 1;
            return Err(scripted.error.clone());
        }
        Ok(state)
    }

    fn require_route(&self, entity_type: &EntityType, method: Method) -> Result<(), AdapterError> {
        self.manifest.route(entity_type, method).map(|_| ())
    }
}

fn not_found(entity_type: &EntityType, id: &ExternalId) -> AdapterError {
    AdapterError::EntityNotFound {
        entity_type: entity_type.clone(),
        id: id.to_string(),
    }
}

fn with_id(mut data: Value, id: &ExternalId) -> Value {
    if let Value::Object(map) = &mut data {
        map.insert("id".into(), Value::String(id.to_string()));
    }
    data
}

#[async_trait]
impl Adapter for InMemoryAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    async fn list(
        &self,
        entity_type: &EntityType,
        params: ListParams,
    ) -> Result<Reply<Page>, AdapterError> {
        self.require_route(entity_type, Method::List)?;
        let state = self.enter(Call::List {
            entity_type: entity_type.clone(),
            cursor: params.cursor.clone(),
        })?;
        let offset = match params.cursor.as_deref() {
            None => 0,
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| AdapterError::fetch("memory", format!("bad cursor '{cursor}'")))?,
        };
        let all = state.records.get(entity_type);
        let total = all.map_or(0, BTreeMap::len);
        let records = all
            .into_iter()
            .flat_map(|records| records.iter())
            .skip(offset)
            .take(params.page_size.max(1))
            .map(|(id, data)| ExternalRecord {
                id: id.clone(),
                data: with_id(data.clone(), id),
            })
            .collect::<Vec<_>>();
        let consumed = offset + records.len();
        let next_cursor = (consumed < total).then(|| consumed.to_string());
        Ok(Reply::new(Page {
            records,
            next_cursor,
        })
        .with_bucket(state.hint.clone()))
    }

    async fn fetch(
        &self,
        entity_type: &EntityType,
        id: &ExternalId,
    ) -> Result<Reply<Option<ExternalRecord>>, AdapterError> {
        self.require_route(entity_type, Method::Fetch)?;
        let state = self.enter(Call::Fetch {
            entity_type: entity_type.clone(),
            id: id.clone(),
        })?;
        let record = state
            .records
            .get(entity_type)
            .and_then(|records| records.get(id))
            .map(|data| ExternalRecord {
                id: id.clone(),
                data: with_id(data.clone(), id),
            });
        Ok(Reply::new(record).with_bucket(state.hint.clone()))
    }

    async fn create(
        &self,
        entity_type: &EntityType,
        payload: Value,
    ) -> Result<Reply<ExternalRecord>, AdapterError> {
        self.require_route(entity_type, Method::Create)?;
        let mut state = self.enter(Call::Create {
            entity_type: entity_type.clone(),
            payload: payload.clone(),
        })?;
        state.next_id += 1;
        let id = ExternalId::from(state.next_id.to_string());
        state
            .records
            .entry(entity_type.clone())
            .or_default()
            .insert(id.clone(), payload.clone());
        let data = with_id(payload, &id);
        Ok(Reply::new(ExternalRecord { id, data }).with_bucket(state.hint.clone()))
    }

    async fn update(
        &self,
        entity_type: &EntityType,
        id: &ExternalId,
        payload: Value,
    ) -> Result<Reply<ExternalRecord>, AdapterError> {
        self.require_route(entity_type, Method::Update)?;
        let mut state = self.enter(Call::Update {
            entity_type: entity_type.clone(),
            id: id.clone(),
            payload: payload.clone(),
        })?;
        let hint = state.hint.clone();
        let current = state
            .records
            .get_mut(entity_type)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| not_found(entity_type, id))?;
        match (current, payload) {
            (Value::Object(existing), Value::Object(patch)) => existing.extend(patch),
            (current, payload) => *current = payload,
        }
        let data = state
            .records
            .get(entity_type)
            .and_then(|records| records.get(id))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(Reply::new(ExternalRecord {
            id: id.clone(),
            data: with_id(data, id),
        })
        .with_bucket(hint))
    }

    async fn delete(
        &self,
        entity_type: &EntityType,
        id: &ExternalId,
    ) -> Result<Reply<()>, AdapterError> {
        self.require_route(entity_type, Method::Delete)?;
        let mut state = self.enter(Call::Delete {
            entity_type: entity_type.clone(),
            id: id.clone(),
        })?;
        state
            .records
            .get_mut(entity_type)
            .and_then(|records| records.remove(id))
            .ok_or_else(|| not_found(entity_type, id))?;
        Ok(Reply::new(()).with_bucket(state.hint.clone()))
    }

    fn to_canonical(
        &self,
        entity_type: &EntityType,
        record: &ExternalRecord,
    ) -> Result<CanonicalRecord, AdapterError> {
        let Value::Object(data) = &record.data else {
            return Err(AdapterError::transform(
                entity_type,
                format!("record {} is not an object", record.id),
            ));
        };
        let mut attributes = Map::new();
        let mut related = std::collections::BTreeSet::new();
        for (key, value) in data {
            match key.as_str() {
                "id" => {}
                "relationships" => {
                    let Value::Object(rels) = value else {
                        return Err(AdapterError::transform(
                            entity_type,
                            format!("record {} has malformed relationships", record.id),
                        ));
                    };
                    related.extend(rels.keys().map(|k| EntityType::from(k.as_str())));
                }
                _ => {
                    attributes.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(CanonicalRecord {
            entity_type: entity_type.clone(),
            external_id: record.id.clone(),
            attributes: Value::Object(attributes),
            related,
        })
    }

    fn to_external(&self, entity_type: &EntityType, value: &Value) -> Result<Value, AdapterError> {
        let Value::Object(map) = value else {
            return Err(AdapterError::transform(entity_type, "outbound value is not an object"));
        };
        let mut payload = map.clone();
        payload.remove("id");
        Ok(Value::Object(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> EntityType {
        EntityType::from("person")
    }

    #[tokio::test]
    async fn list_pages_through_seeded_records() {
        let adapter = InMemoryAdapter::new(AdapterKind::Pco);
        for id in ["1", "2", "3"] {
            adapter.seed("person", id, json!({ "name": id }));
        }
        let first = adapter.list(&person(), ListParams::first(2)).await.expect("page 1");
        assert_eq!(first.value.records.len(), 2);
        let cursor = first.value.next_cursor.expect("more");
        let second = adapter
            .list(
                &person(),
                ListParams {
                    page_size: 2,
                    cursor: Some(cursor),
                },
            )
            .await
            .expect("page 2");
        assert_eq!(second.value.records.len(), 1);
        assert!(second.value.next_cursor.is_none());
    }

    #[tokio::test]
    async fn scripted_failure_fires_once() {
        let adapter = InMemoryAdapter::new(AdapterKind::Pco);
        adapter.fail_next(Method::List, Some("person"), AdapterError::fetch("people.people.list", "503"));
        assert!(adapter.list(&person(), ListParams::first(10)).await.is_err());
        assert!(adapter.list(&person(), ListParams::first(10)).await.is_ok());
        assert_eq!(adapter.calls().len(), 2);
    }

    #[tokio::test]
    async fn unsupported_method_is_rejected_before_the_call_log() {
        let adapter = InMemoryAdapter::new(AdapterKind::Pco);
        let err = adapter
            .delete(&EntityType::from("campus"), &ExternalId::from("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedOperation { .. }));
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn create_assigns_ids_and_update_merges() {
        let adapter = InMemoryAdapter::new(AdapterKind::Pco);
        let created = adapter
            .create(&person(), json!({ "first_name": "Ada" }))
            .await
            .expect("create");
        let id = created.value.id.clone();
        adapter
            .update(&person(), &id, json!({ "last_name": "Lovelace" }))
            .await
            .expect("update");
        let stored = adapter.record("person", id.as_str()).expect("stored");
        assert_eq!(stored, json!({ "first_name": "Ada", "last_name": "Lovelace" }));
    }

    #[test]
    fn canonical_transform_collects_related_types() {
        let adapter = InMemoryAdapter::new(AdapterKind::Pco);
        let record = ExternalRecord {
            id: ExternalId::from("5"),
            data: json!({
                "id": "5",
                "name": "Ada",
                "relationships": { "household": {}, "email": {} }
            }),
        };
        let canonical = adapter.to_canonical(&person(), &record).expect("transform");
        assert_eq!(canonical.attributes, json!({ "name": "Ada" }));
        let related: Vec<&str> = canonical.related.iter().map(|t| t.as_str()).collect();
        assert_eq!(related, vec!["email", "household"]);
    }

    #[test]
    fn non_object_payload_is_a_transform_error() {
        let adapter = InMemoryAdapter::new(AdapterKind::Pco);
        let record = ExternalRecord {
            id: ExternalId::from("5"),
            data: json!("garbage"),
        };
        assert!(matches!(
            adapter.to_canonical(&person(), &record),
            Err(AdapterError::Transform { .. })
        ));
    }
}
