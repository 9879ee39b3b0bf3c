//! Mutation processing chain: one internal row change pushed to an external
//! system.
//!
//! Each mutation resolves its table to a canonical entity, its adapter route
//! from the manifest, then runs the insert / update / delete path. The link
//! registry is consulted before and updated after every external call, so a
//! replayed mutation (at-least-once delivery) lands on the same external
//! record instead of creating a second one.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use steward_adapter::{detect_table, AdapterError, Method};
use steward_core::{EntityId, EntityType, ExternalLink};

use crate::context::SyncContext;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

/// A change to one row of a canonical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub kind: MutationKind,
    pub table_name: String,
    /// Row key: a string, a number, or an object carrying `id`.
    pub primary_key: Value,
    /// Row contents after the change. Ignored for deletes.
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MutationOutcome {
    Created { link: ExternalLink },
    Updated { link: ExternalLink },
    Deleted { link: ExternalLink },
}

impl MutationOutcome {
    pub fn link(&self) -> &ExternalLink {
        match self {
            MutationOutcome::Created { link }
            | MutationOutcome::Updated { link }
            | MutationOutcome::Deleted { link } => link,
        }
    }
}

/// Push one mutation through the adapter bound to `ctx`.
pub async fn process_mutation(
    ctx: &SyncContext,
    mutation: &Mutation,
) -> Result<MutationOutcome, SyncError> {
    let descriptor = detect_table(&mutation.table_name)?;
    let entity_type = descriptor.entity_type();
    let raw = primary_key(&entity_type, &mutation.primary_key)?;
    let entity_id = EntityId::canonical(descriptor, &raw);
    let existing = ctx
        .links
        .get_for_entity_in(&ctx.org_id, ctx.kind(), &entity_type, &entity_id)
        .await
        .map_err(SyncError::LinkRetrieval)?;

    tracing::debug!(
        org = %ctx.org_id,
        adapter = %ctx.kind(),
        kind = ?mutation.kind,
        %entity_type,
        %entity_id,
        "processing mutation"
    );

    match (mutation.kind, existing) {
        (MutationKind::Insert, None) => insert(ctx, entity_type, entity_id, &mutation.value).await,
        (MutationKind::Insert, Some(link)) => {
            tracing::debug!(external_id = %link.external_id, "insert already linked, updating");
            update(ctx, link, &mutation.value).await
        }
        (MutationKind::Update, Some(link)) => update(ctx, link, &mutation.value).await,
        (MutationKind::Delete, Some(link)) => delete(ctx, link).await,
        (MutationKind::Update | MutationKind::Delete, None) => Err(SyncError::EntityNotFound {
            entity_type,
            id: entity_id.to_string(),
        }),
    }
}

async fn insert(
    ctx: &SyncContext,
    entity_type: EntityType,
    entity_id: EntityId,
    value: &Value,
) -> Result<MutationOutcome, SyncError> {
    let route = ctx.adapter.manifest().route(&entity_type, Method::Create)?.clone();
    let payload = ctx.adapter.to_external(&entity_type, value)?;
    let created = ctx
        .throttled(&route, ctx.adapter.create(&entity_type, payload))
        .await?;
    let link = ExternalLink::new(
        ctx.org_id.clone(),
        ctx.kind(),
        entity_type,
        entity_id,
        created.id,
        Utc::now(),
    );
    let outcome = ctx.links.link(link).await.map_err(SyncError::LinkUpsert)?;
    tracing::info!(
        org = %ctx.org_id,
        adapter = %ctx.kind(),
        entity_id = %outcome.link().entity_id,
        external_id = %outcome.link().external_id,
        "external record created"
    );
    Ok(MutationOutcome::Created {
        link: outcome.into_link(),
    })
}

async fn update(
    ctx: &SyncContext,
    link: ExternalLink,
    value: &Value,
) -> Result<MutationOutcome, SyncError> {
    let route = ctx
        .adapter
        .manifest()
        .route(&link.entity_type, Method::Update)?
        .clone();
    let payload = ctx.adapter.to_external(&link.entity_type, value)?;
    ctx.links
        .mark_sync_in_progress(&ctx.org_id, ctx.kind(), &link.external_id)
        .await
        .map_err(SyncError::LinkUpsert)?;

    let result = ctx
        .throttled(
            &route,
            ctx.adapter.update(&link.entity_type, &link.external_id, payload),
        )
        .await;
    if let Err(err) = result {
        if let Err(release) = ctx
            .links
            .release_many(&ctx.org_id, ctx.kind(), std::slice::from_ref(&link.external_id))
            .await
        {
            tracing::warn!(external_id = %link.external_id, error = %release, "could not release claim");
        }
        return Err(err);
    }

    let done = ctx
        .links
        .mark_sync_completed(&ctx.org_id, ctx.kind(), &link.external_id)
        .await
        .map_err(SyncError::LinkUpsert)?;
    Ok(MutationOutcome::Updated {
        link: done.unwrap_or(link),
    })
}

async fn delete(ctx: &SyncContext, link: ExternalLink) -> Result<MutationOutcome, SyncError> {
    let route = ctx
        .adapter
        .manifest()
        .route(&link.entity_type, Method::Delete)?
        .clone();
    ctx.throttled(&route, ctx.adapter.delete(&link.entity_type, &link.external_id))
        .await?;
    let removed = ctx
        .links
        .delete(&ctx.org_id, ctx.kind(), &link.external_id)
        .await
        .map_err(SyncError::LinkUpsert)?;
    Ok(MutationOutcome::Deleted {
        link: removed.unwrap_or(link),
    })
}

fn primary_key(entity_type: &EntityType, key: &Value) -> Result<String, SyncError> {
    match key {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Object(map) => match map.get("id") {
            Some(id) => primary_key(entity_type, id),
            None => Err(bad_key(entity_type, key)),
        },
        _ => Err(bad_key(entity_type, key)),
    }
}

fn bad_key(entity_type: &EntityType, key: &Value) -> SyncError {
    SyncError::Transform(AdapterError::transform(
        entity_type,
        format!("unusable primary key {key}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> EntityType {
        EntityType::from("person")
    }

    #[test]
    fn primary_key_accepts_strings_numbers_and_id_objects() {
        assert_eq!(primary_key(&person(), &json!("per_1")).unwrap(), "per_1");
        assert_eq!(primary_key(&person(), &json!(42)).unwrap(), "42");
        assert_eq!(primary_key(&person(), &json!({ "id": "abc" })).unwrap(), "abc");
    }

    #[test]
    fn unusable_primary_key_is_a_transform_error() {
        for key in [json!(null), json!(""), json!({ "name": "x" }), json!([1])] {
            let err = primary_key(&person(), &key).unwrap_err();
            assert!(matches!(err, SyncError::Transform(_)), "{key}: {err}");
        }
    }

    #[test]
    fn mutation_deserializes_without_value() {
        let m: Mutation = serde_json::from_value(json!({
            "kind": "delete",
            "table_name": "people",
            "primary_key": "per_1"
        }))
        .expect("parse");
        assert_eq!(m.kind, MutationKind::Delete);
        assert!(m.value.is_null());
    }
}
