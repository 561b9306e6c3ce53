use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use nursery_core::{EntityId, OrgId, UserId};

use crate::Event;

/// Org-scoped envelope around an event payload.
///
/// This is the unit written to the audit trail. `entity_type` names the record
/// the event is about ("sales.order", "dispatch.load", "inventory.batch").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    org_id: OrgId,

    entity_id: EntityId,
    entity_type: String,

    event_type: String,
    event_version: u32,
    occurred_at: DateTime<Utc>,
    actor: Option<UserId>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        org_id: OrgId,
        entity_id: EntityId,
        entity_type: impl Into<String>,
        event_type: impl Into<String>,
        event_version: u32,
        occurred_at: DateTime<Utc>,
        actor: Option<UserId>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            org_id,
            entity_id,
            entity_type: entity_type.into(),
            event_type: event_type.into(),
            event_version,
            occurred_at,
            actor,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn org_id(&self) -> OrgId {
        self.org_id
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn actor(&self) -> Option<UserId> {
        self.actor
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl EventEnvelope<JsonValue> {
    /// Wrap a typed event, serializing its payload to JSON.
    pub fn from_event<T>(
        org_id: OrgId,
        entity_id: EntityId,
        entity_type: impl Into<String>,
        actor: Option<UserId>,
        event: &T,
    ) -> Result<Self, serde_json::Error>
    where
        T: Event + Serialize,
    {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(
            Uuid::now_v7(),
            org_id,
            entity_id,
            entity_type,
            event.event_type(),
            event.version(),
            event.occurred_at(),
            actor,
            payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct Sample {
        at: DateTime<Utc>,
        quantity: i32,
    }

    impl Event for Sample {
        fn event_type(&self) -> &'static str {
            "test.sample"
        }

        fn version(&self) -> u32 {
            2
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn from_event_captures_metadata_and_payload() {
        let org = OrgId::new();
        let entity = EntityId::new();
        let at = Utc::now();
        let env = EventEnvelope::from_event(org, entity, "test.entity", None, &Sample { at, quantity: 4 })
            .unwrap();

        assert_eq!(env.org_id(), org);
        assert_eq!(env.entity_id(), entity);
        assert_eq!(env.event_type(), "test.sample");
        assert_eq!(env.event_version(), 2);
        assert_eq!(env.occurred_at(), at);
        assert_eq!(env.payload()["quantity"], 4);
    }
}
