//! Adapter lookup table keyed by tag.

use std::collections::HashMap;
use std::sync::Arc;

use steward_core::{AdapterKind, TokenKey};

use crate::capability::{Adapter, AdapterFactory};
use crate::error::AdapterError;

/// Factories by [`AdapterKind`]. Resolved once per workflow run; unknown tags
/// fail fast and name every accepted tag.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: HashMap<AdapterKind, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one for the same kind.
    pub fn register(&mut self, factory: Arc<dyn AdapterFactory>) -> &mut Self {
        self.factories.insert(factory.kind(), factory);
        self
    }

    pub fn with(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.register(factory);
        self
    }

    /// Registered kinds in declaration order.
    pub fn kinds(&self) -> Vec<AdapterKind> {
        AdapterKind::ALL
            .into_iter()
            .filter(|kind| self.factories.contains_key(kind))
            .collect()
    }

    /// Parse `tag` and connect.
    pub async fn resolve(
        &self,
        tag: &str,
        token_key: &TokenKey,
    ) -> Result<Arc<dyn Adapter>, AdapterError> {
        let kind: AdapterKind = tag.parse().map_err(|_| self.unsupported(tag))?;
        self.resolve_kind(kind, token_key).await
    }

    pub async fn resolve_kind(
        &self,
        kind: AdapterKind,
        token_key: &TokenKey,
    ) -> Result<Arc<dyn Adapter>, AdapterError> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| self.unsupported(kind.as_str()))?;
        tracing::debug!(adapter = %kind, token = %token_key, "connecting adapter");
        factory.connect(token_key).await
    }

    fn unsupported(&self, tag: &str) -> AdapterError {
        let choices = self
            .kinds()
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        AdapterError::Unsupported {
            tag: tag.to_owned(),
            choices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::FixedFactory;
    use crate::memory::InMemoryAdapter;

    fn registry() -> AdapterRegistry {
        AdapterRegistry::new().with(Arc::new(FixedFactory::new(Arc::new(InMemoryAdapter::new(
            AdapterKind::Pco,
        )))))
    }

    #[tokio::test]
    async fn resolves_registered_tag() {
        let adapter = registry()
            .resolve("pco", &TokenKey::from("tok"))
            .await
            .expect("resolve");
        assert_eq!(adapter.kind(), AdapterKind::Pco);
    }

    #[tokio::test]
    async fn unknown_tag_lists_choices() {
        let err = registry()
            .resolve("fellowship_one", &TokenKey::from("tok"))
            .await
            .err()
            .expect("must fail");
        match err {
            AdapterError::Unsupported { tag, choices } => {
                assert_eq!(tag, "fellowship_one");
                assert_eq!(choices, "pco");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn known_but_unregistered_kind_is_unsupported() {
        let err = registry()
            .resolve_kind(AdapterKind::Ccb, &TokenKey::from("tok"))
            .await
            .err()
            .expect("must fail");
        assert!(err.to_string().contains("'ccb'"));
    }
}
