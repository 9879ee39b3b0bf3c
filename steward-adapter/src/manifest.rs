//! Per-adapter endpoint manifests.
//!
//! A manifest lists, for every entity type an adapter can reach, the API
//! module and resource it lives under and the methods the API exposes for it.
//! [`Manifest::new`] turns that list into a `(entity type, method) → route`
//! table once; the sync layer looks routes up by key instead of synthesizing
//! calls at runtime. Routes double as rate-limiter keys.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use steward_core::{AdapterKind, EntityType};

use crate::error::{AdapterError, DetectError};

/// Capability an endpoint may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    List,
    Fetch,
    Create,
    Update,
    Delete,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::List,
        Method::Fetch,
        Method::Create,
        Method::Update,
        Method::Delete,
    ];
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::List => write!(f, "list"),
            Method::Fetch => write!(f, "fetch"),
            Method::Create => write!(f, "create"),
            Method::Update => write!(f, "update"),
            Method::Delete => write!(f, "delete"),
        }
    }
}

/// Logical route, `<module>.<resource>.<method>`. Used as a limiter key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Route(pub String);

impl Route {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Route {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// One entity type as the external API exposes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityEndpoint {
    pub entity_type: &'static str,
    pub module: &'static str,
    pub resource: &'static str,
    pub methods: &'static [Method],
    /// Listable but deliberately excluded from full pulls.
    pub skip_sync: bool,
    /// Webhook event types starting with this prefix target this endpoint.
    pub event_prefix: Option<&'static str>,
}

impl EntityEndpoint {
    pub fn supports(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }

    pub fn is_syncable(&self) -> bool {
        self.supports(Method::List) && !self.skip_sync
    }
}

#[derive(Debug, Clone)]
pub struct Manifest {
    adapter: AdapterKind,
    endpoints: Vec<EntityEndpoint>,
    routes: HashMap<(EntityType, Method), Route>,
}

impl Manifest {
    pub fn new(adapter: AdapterKind, endpoints: Vec<EntityEndpoint>) -> Self {
        let mut routes = HashMap::new();
        for endpoint in &endpoints {
            for method in endpoint.methods {
                routes.insert(
                    (EntityType::from(endpoint.entity_type), *method),
                    Route(format!("{}.{}.{method}", endpoint.module, endpoint.resource)),
                );
            }
        }
        Self {
            adapter,
            endpoints,
            routes,
        }
    }

    /// Built-in manifest for `adapter`.
    pub fn for_kind(adapter: AdapterKind) -> Self {
        match adapter {
            AdapterKind::Pco => Self::new(adapter, PCO_ENDPOINTS.to_vec()),
            AdapterKind::Ccb => Self::new(adapter, CCB_ENDPOINTS.to_vec()),
        }
    }

    pub fn adapter(&self) -> AdapterKind {
        self.adapter
    }

    pub fn endpoints(&self) -> &[EntityEndpoint] {
        &self.endpoints
    }

    pub fn endpoint(&self, entity_type: &EntityType) -> Result<&EntityEndpoint, DetectError> {
        self.endpoints
            .iter()
            .find(|e| e.entity_type == entity_type.as_str())
            .ok_or_else(|| DetectError::UnknownEntityType {
                adapter: self.adapter,
                entity_type: entity_type.clone(),
            })
    }

    pub fn supports(&self, entity_type: &EntityType, method: Method) -> bool {
        self.routes.contains_key(&(entity_type.clone(), method))
    }

    pub fn route(&self, entity_type: &EntityType, method: Method) -> Result<&Route, AdapterError> {
        self.routes
            .get(&(entity_type.clone(), method))
            .ok_or_else(|| AdapterError::UnsupportedOperation {
                adapter: self.adapter,
                entity_type: entity_type.clone(),
                method,
            })
    }

    /// Entity types a full pull walks, in declaration order.
    pub fn syncable(&self) -> Vec<EntityType> {
        self.endpoints
            .iter()
            .filter(|e| e.is_syncable())
            .map(|e| EntityType::from(e.entity_type))
            .collect()
    }

    /// Entity type a webhook event targets (longest matching prefix).
    pub fn entity_for_event(&self, event_type: &str) -> Result<EntityType, DetectError> {
        self.endpoints
            .iter()
            .filter_map(|e| e.event_prefix.map(|prefix| (prefix, e)))
            .filter(|(prefix, _)| event_type.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, e)| EntityType::from(e.entity_type))
            .ok_or_else(|| DetectError::UnknownEvent {
                adapter: self.adapter,
                event_type: event_type.to_owned(),
            })
    }
}

// ---------------------------------------------------------------------------
// Built-in manifests
// ---------------------------------------------------------------------------

const CRUD: &[Method] = &[
    Method::List,
    Method::Fetch,
    Method::Create,
    Method::Update,
    Method::Delete,
];
const READ_ONLY: &[Method] = &[Method::List, Method::Fetch];

const PCO_ENDPOINTS: &[EntityEndpoint] = &[
    EntityEndpoint {
        entity_type: "person",
        module: "people",
        resource: "people",
        methods: CRUD,
        skip_sync: false,
        event_prefix: Some("people.v2.events.person."),
    },
    EntityEndpoint {
        entity_type: "household",
        module: "people",
        resource: "households",
        methods: CRUD,
        skip_sync: false,
        event_prefix: Some("people.v2.events.household."),
    },
    EntityEndpoint {
        entity_type: "email",
        module: "people",
        resource: "emails",
        methods: CRUD,
        skip_sync: false,
        event_prefix: Some("people.v2.events.email."),
    },
    EntityEndpoint {
        entity_type: "phone_number",
        module: "people",
        resource: "phone_numbers",
        methods: CRUD,
        skip_sync: false,
        event_prefix: Some("people.v2.events.phone_number."),
    },
    EntityEndpoint {
        entity_type: "address",
        module: "people",
        resource: "addresses",
        methods: CRUD,
        skip_sync: false,
        event_prefix: Some("people.v2.events.address."),
    },
    EntityEndpoint {
        entity_type: "campus",
        module: "people",
        resource: "campuses",
        methods: READ_ONLY,
        skip_sync: false,
        event_prefix: Some("people.v2.events.campus."),
    },
    EntityEndpoint {
        entity_type: "group",
        module: "groups",
        resource: "groups",
        methods: READ_ONLY,
        skip_sync: false,
        event_prefix: Some("groups.v2.events.group."),
    },
    EntityEndpoint {
        entity_type: "group_membership",
        module: "groups",
        resource: "memberships",
        methods: CRUD,
        skip_sync: false,
        event_prefix: Some("groups.v2.events.membership."),
    },
    EntityEndpoint {
        entity_type: "event",
        module: "calendar",
        resource: "events",
        methods: READ_ONLY,
        skip_sync: true,
        event_prefix: Some("calendar.v2.events.event."),
    },
];

const CCB_ENDPOINTS: &[EntityEndpoint] = &[
    EntityEndpoint {
        entity_type: "person",
        module: "individuals",
        resource: "individual_profiles",
        methods: CRUD,
        skip_sync: false,
        event_prefix: Some("individual."),
    },
    EntityEndpoint {
        entity_type: "group",
        module: "groups",
        resource: "group_profiles",
        methods: &[Method::List, Method::Fetch, Method::Create, Method::Update],
        skip_sync: false,
        event_prefix: Some("group."),
    },
    EntityEndpoint {
        entity_type: "group_membership",
        module: "groups",
        resource: "group_participants",
        methods: &[Method::List, Method::Create, Method::Delete],
        skip_sync: false,
        event_prefix: Some("group_participant."),
    },
    EntityEndpoint {
        entity_type: "event",
        module: "events",
        resource: "event_profiles",
        methods: READ_ONLY,
        skip_sync: false,
        event_prefix: Some("event."),
    },
];
