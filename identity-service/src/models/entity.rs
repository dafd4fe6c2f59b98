//! Entity identifiers and registry records shared by every entity kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::contact_info::ContactInfo;
use super::rights::Rights;

/// Kind of an entity known to the identity server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Application,
    Client,
    EndDevice,
    Gateway,
    Organization,
    User,
}

impl EntityKind {
    /// Kinds managed by the entity registry (everything except users and devices).
    pub const REGISTRY: [EntityKind; 4] = [
        EntityKind::Application,
        EntityKind::Client,
        EntityKind::Gateway,
        EntityKind::Organization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Application => "application",
            EntityKind::Client => "client",
            EntityKind::EndDevice => "end_device",
            EntityKind::Gateway => "gateway",
            EntityKind::Organization => "organization",
            EntityKind::User => "user",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Application => "applications",
            EntityKind::Client => "clients",
            EntityKind::EndDevice => "end_devices",
            EntityKind::Gateway => "gateways",
            EntityKind::Organization => "organizations",
            EntityKind::User => "users",
        }
    }

    /// Accounts can hold rights on other entities.
    pub fn is_account(&self) -> bool {
        matches!(self, EntityKind::User | EntityKind::Organization)
    }

    /// Whether an account of kind `self` may be a member of an entity of kind `entity`.
    pub fn can_be_member_of(&self, entity: EntityKind) -> bool {
        match self {
            EntityKind::User => !matches!(entity, EntityKind::User | EntityKind::EndDevice),
            EntityKind::Organization => matches!(
                entity,
                EntityKind::Application | EntityKind::Client | EntityKind::Gateway
            ),
            _ => false,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "application" | "applications" => Ok(EntityKind::Application),
            "client" | "clients" => Ok(EntityKind::Client),
            "end_device" | "end_devices" => Ok(EntityKind::EndDevice),
            "gateway" | "gateways" => Ok(EntityKind::Gateway),
            "organization" | "organizations" => Ok(EntityKind::Organization),
            "user" | "users" => Ok(EntityKind::User),
            other => Err(format!("unknown entity kind `{}`", other)),
        }
    }
}

/// Identifier of an end device, scoped to its application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndDeviceId {
    pub application_id: String,
    pub device_id: String,
}

/// Tagged identifier of any entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityId {
    Application(String),
    Client(String),
    EndDevice(EndDeviceId),
    Gateway(String),
    Organization(String),
    User(String),
}

impl EntityId {
    /// Builds an identifier for every kind with a flat string ID.
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        match kind {
            EntityKind::Application => Some(EntityId::Application(id)),
            EntityKind::Client => Some(EntityId::Client(id)),
            EntityKind::Gateway => Some(EntityId::Gateway(id)),
            EntityKind::Organization => Some(EntityId::Organization(id)),
            EntityKind::User => Some(EntityId::User(id)),
            EntityKind::EndDevice => None,
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        EntityId::User(id.into())
    }

    pub fn organization(id: impl Into<String>) -> Self {
        EntityId::Organization(id.into())
    }

    pub fn application(id: impl Into<String>) -> Self {
        EntityId::Application(id.into())
    }

    pub fn gateway(id: impl Into<String>) -> Self {
        EntityId::Gateway(id.into())
    }

    pub fn client(id: impl Into<String>) -> Self {
        EntityId::Client(id.into())
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityId::Application(_) => EntityKind::Application,
            EntityId::Client(_) => EntityKind::Client,
            EntityId::EndDevice(_) => EntityKind::EndDevice,
            EntityId::Gateway(_) => EntityKind::Gateway,
            EntityId::Organization(_) => EntityKind::Organization,
            EntityId::User(_) => EntityKind::User,
        }
    }

    /// The string ID. For end devices this is the device ID.
    pub fn id(&self) -> &str {
        match self {
            EntityId::Application(id)
            | EntityId::Client(id)
            | EntityId::Gateway(id)
            | EntityId::Organization(id)
            | EntityId::User(id) => id,
            EntityId::EndDevice(dev) => &dev.device_id,
        }
    }

    pub fn is_account(&self) -> bool {
        self.kind().is_account()
    }

    /// Entity on which rights for this identifier are stored.
    /// End devices inherit the rights of their application.
    pub fn rights_holder(&self) -> EntityId {
        match self {
            EntityId::EndDevice(dev) => EntityId::Application(dev.application_id.clone()),
            other => other.clone(),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::EndDevice(dev) => {
                write!(f, "end_device:{}.{}", dev.application_id, dev.device_id)
            }
            other => write!(f, "{}:{}", other.kind(), other.id()),
        }
    }
}

/// Approval state shared by users and OAuth clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Requested,
    Approved,
    Rejected,
    Flagged,
    Suspended,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Requested => "requested",
            State::Approved => "approved",
            State::Rejected => "rejected",
            State::Flagged => "flagged",
            State::Suspended => "suspended",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(State::Requested),
            "approved" => Ok(State::Approved),
            "rejected" => Ok(State::Rejected),
            "flagged" => Ok(State::Flagged),
            "suspended" => Ok(State::Suspended),
            other => Err(format!("unknown state `{}`", other)),
        }
    }
}

/// OAuth grant types a client may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grant {
    AuthorizationCode,
    Password,
    RefreshToken,
}

/// Kind-specific part of a registry entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityDetails {
    Application,
    Organization,
    Gateway {
        #[serde(default)]
        eui: Option<String>,
        #[serde(default)]
        status_public: bool,
        #[serde(default)]
        location_public: bool,
    },
    Client {
        #[serde(default)]
        state: State,
        #[serde(default)]
        state_description: String,
        #[serde(default)]
        rights: Rights,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_hash: Option<String>,
        #[serde(default)]
        grants: Vec<Grant>,
        #[serde(default)]
        skip_authorization: bool,
        #[serde(default)]
        endorsed: bool,
    },
}

impl EntityDetails {
    /// Default details for a freshly created entity of `kind`.
    pub fn for_kind(kind: EntityKind) -> Option<Self> {
        match kind {
            EntityKind::Application => Some(EntityDetails::Application),
            EntityKind::Organization => Some(EntityDetails::Organization),
            EntityKind::Gateway => Some(EntityDetails::Gateway {
                eui: None,
                status_public: false,
                location_public: false,
            }),
            EntityKind::Client => Some(EntityDetails::Client {
                state: State::Requested,
                state_description: String::new(),
                rights: Rights::default(),
                secret_hash: None,
                grants: Vec::new(),
                skip_authorization: false,
                endorsed: false,
            }),
            EntityKind::User | EntityKind::EndDevice => None,
        }
    }
}

/// Application, client, gateway or organization stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub ids: EntityId,
    pub name: String,
    pub description: String,
    pub contact_info: Vec<ContactInfo>,
    pub details: EntityDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Entity {
    pub fn new(ids: EntityId, name: String, description: String) -> Option<Self> {
        let details = EntityDetails::for_kind(ids.kind())?;
        let now = Utc::now();
        Some(Self {
            ids,
            name,
            description,
            contact_info: Vec::new(),
            details,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// State of an OAuth client; other kinds have no state.
    pub fn client_state(&self) -> Option<(State, &str)> {
        match &self.details {
            EntityDetails::Client {
                state,
                state_description,
                ..
            } => Some((*state, state_description.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_kind_constraints() {
        assert!(EntityKind::User.can_be_member_of(EntityKind::Organization));
        assert!(EntityKind::User.can_be_member_of(EntityKind::Gateway));
        assert!(!EntityKind::Organization.can_be_member_of(EntityKind::Organization));
        assert!(EntityKind::Organization.can_be_member_of(EntityKind::Application));
        assert!(!EntityKind::Application.can_be_member_of(EntityKind::Gateway));
        assert!(!EntityKind::User.can_be_member_of(EntityKind::User));
    }

    #[test]
    fn test_end_device_rights_live_on_application() {
        let dev = EntityId::EndDevice(EndDeviceId {
            application_id: "foo".into(),
            device_id: "dev-1".into(),
        });
        assert_eq!(dev.rights_holder(), EntityId::application("foo"));
        assert_eq!(dev.to_string(), "end_device:foo.dev-1");
    }

    #[test]
    fn test_entity_id_serde_shape() {
        let json = serde_json::to_value(EntityId::gateway("g")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "gateway", "id": "g"}));
        let back: EntityId = serde_json::from_value(json).unwrap();
        assert_eq!(back, EntityId::gateway("g"));
    }

    #[test]
    fn test_kind_parses_plural_path_segments() {
        assert_eq!("gateways".parse::<EntityKind>().unwrap(), EntityKind::Gateway);
        assert!("devices".parse::<EntityKind>().is_err());
    }
}
