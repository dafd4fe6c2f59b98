//! Rights catalogue and the set algebra used by every policy decision.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::entity::EntityKind;

macro_rules! rights {
    ($($variant:ident => $name:literal, $family:expr;)*) => {
        /// A single permission. Rights are grouped in families by entity kind;
        /// rights without a family are universal.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Right {
            $($variant,)*
        }

        impl Right {
            pub const VARIANTS: &'static [Right] = &[$(Right::$variant,)*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Right::$variant => $name,)*
                }
            }

            /// Entity kind whose family this right belongs to.
            pub fn family(&self) -> Option<EntityKind> {
                match self {
                    $(Right::$variant => $family,)*
                }
            }
        }

        impl FromStr for Right {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Right::$variant),)*
                    other => Err(format!("unknown right `{}`", other)),
                }
            }
        }
    };
}

const USER: Option<EntityKind> = Some(EntityKind::User);
const APPLICATION: Option<EntityKind> = Some(EntityKind::Application);
const CLIENT: Option<EntityKind> = Some(EntityKind::Client);
const GATEWAY: Option<EntityKind> = Some(EntityKind::Gateway);
const ORGANIZATION: Option<EntityKind> = Some(EntityKind::Organization);

rights! {
    UserInfo => "RIGHT_USER_INFO", USER;
    UserSettingsBasic => "RIGHT_USER_SETTINGS_BASIC", USER;
    UserSettingsApiKeys => "RIGHT_USER_SETTINGS_API_KEYS", USER;
    UserDelete => "RIGHT_USER_DELETE", USER;
    UserAuthorizedClients => "RIGHT_USER_AUTHORIZED_CLIENTS", USER;
    UserApplicationsList => "RIGHT_USER_APPLICATIONS_LIST", USER;
    UserApplicationsCreate => "RIGHT_USER_APPLICATIONS_CREATE", USER;
    UserGatewaysList => "RIGHT_USER_GATEWAYS_LIST", USER;
    UserGatewaysCreate => "RIGHT_USER_GATEWAYS_CREATE", USER;
    UserClientsList => "RIGHT_USER_CLIENTS_LIST", USER;
    UserClientsCreate => "RIGHT_USER_CLIENTS_CREATE", USER;
    UserOrganizationsList => "RIGHT_USER_ORGANIZATIONS_LIST", USER;
    UserOrganizationsCreate => "RIGHT_USER_ORGANIZATIONS_CREATE", USER;
    UserNotificationsRead => "RIGHT_USER_NOTIFICATIONS_READ", USER;
    UserAll => "RIGHT_USER_ALL", USER;

    ApplicationInfo => "RIGHT_APPLICATION_INFO", APPLICATION;
    ApplicationSettingsBasic => "RIGHT_APPLICATION_SETTINGS_BASIC", APPLICATION;
    ApplicationSettingsApiKeys => "RIGHT_APPLICATION_SETTINGS_API_KEYS", APPLICATION;
    ApplicationSettingsCollaborators => "RIGHT_APPLICATION_SETTINGS_COLLABORATORS", APPLICATION;
    ApplicationSettingsPackages => "RIGHT_APPLICATION_SETTINGS_PACKAGES", APPLICATION;
    ApplicationDelete => "RIGHT_APPLICATION_DELETE", APPLICATION;
    ApplicationDevicesRead => "RIGHT_APPLICATION_DEVICES_READ", APPLICATION;
    ApplicationDevicesReadKeys => "RIGHT_APPLICATION_DEVICES_READ_KEYS", APPLICATION;
    ApplicationDevicesWrite => "RIGHT_APPLICATION_DEVICES_WRITE", APPLICATION;
    ApplicationDevicesWriteKeys => "RIGHT_APPLICATION_DEVICES_WRITE_KEYS", APPLICATION;
    ApplicationTrafficRead => "RIGHT_APPLICATION_TRAFFIC_READ", APPLICATION;
    ApplicationTrafficUpWrite => "RIGHT_APPLICATION_TRAFFIC_UP_WRITE", APPLICATION;
    ApplicationTrafficDownWrite => "RIGHT_APPLICATION_TRAFFIC_DOWN_WRITE", APPLICATION;
    ApplicationLink => "RIGHT_APPLICATION_LINK", APPLICATION;
    ApplicationAll => "RIGHT_APPLICATION_ALL", APPLICATION;

    ClientInfo => "RIGHT_CLIENT_INFO", CLIENT;
    ClientSettingsBasic => "RIGHT_CLIENT_SETTINGS_BASIC", CLIENT;
    ClientSettingsCollaborators => "RIGHT_CLIENT_SETTINGS_COLLABORATORS", CLIENT;
    ClientDelete => "RIGHT_CLIENT_DELETE", CLIENT;
    ClientAll => "RIGHT_CLIENT_ALL", CLIENT;

    GatewayInfo => "RIGHT_GATEWAY_INFO", GATEWAY;
    GatewaySettingsBasic => "RIGHT_GATEWAY_SETTINGS_BASIC", GATEWAY;
    GatewaySettingsApiKeys => "RIGHT_GATEWAY_SETTINGS_API_KEYS", GATEWAY;
    GatewaySettingsCollaborators => "RIGHT_GATEWAY_SETTINGS_COLLABORATORS", GATEWAY;
    GatewayDelete => "RIGHT_GATEWAY_DELETE", GATEWAY;
    GatewayTrafficRead => "RIGHT_GATEWAY_TRAFFIC_READ", GATEWAY;
    GatewayTrafficDownWrite => "RIGHT_GATEWAY_TRAFFIC_DOWN_WRITE", GATEWAY;
    GatewayLink => "RIGHT_GATEWAY_LINK", GATEWAY;
    GatewayStatusRead => "RIGHT_GATEWAY_STATUS_READ", GATEWAY;
    GatewayLocationRead => "RIGHT_GATEWAY_LOCATION_READ", GATEWAY;
    GatewayWriteSecrets => "RIGHT_GATEWAY_WRITE_SECRETS", GATEWAY;
    GatewayReadSecrets => "RIGHT_GATEWAY_READ_SECRETS", GATEWAY;
    GatewayAll => "RIGHT_GATEWAY_ALL", GATEWAY;

    OrganizationInfo => "RIGHT_ORGANIZATION_INFO", ORGANIZATION;
    OrganizationSettingsBasic => "RIGHT_ORGANIZATION_SETTINGS_BASIC", ORGANIZATION;
    OrganizationSettingsApiKeys => "RIGHT_ORGANIZATION_SETTINGS_API_KEYS", ORGANIZATION;
    OrganizationSettingsMembers => "RIGHT_ORGANIZATION_SETTINGS_MEMBERS", ORGANIZATION;
    OrganizationDelete => "RIGHT_ORGANIZATION_DELETE", ORGANIZATION;
    OrganizationAddAsCollaborator => "RIGHT_ORGANIZATION_ADD_AS_COLLABORATOR", ORGANIZATION;
    OrganizationApplicationsCreate => "RIGHT_ORGANIZATION_APPLICATIONS_CREATE", ORGANIZATION;
    OrganizationApplicationsList => "RIGHT_ORGANIZATION_APPLICATIONS_LIST", ORGANIZATION;
    OrganizationGatewaysCreate => "RIGHT_ORGANIZATION_GATEWAYS_CREATE", ORGANIZATION;
    OrganizationGatewaysList => "RIGHT_ORGANIZATION_GATEWAYS_LIST", ORGANIZATION;
    OrganizationClientsCreate => "RIGHT_ORGANIZATION_CLIENTS_CREATE", ORGANIZATION;
    OrganizationClientsList => "RIGHT_ORGANIZATION_CLIENTS_LIST", ORGANIZATION;
    OrganizationAll => "RIGHT_ORGANIZATION_ALL", ORGANIZATION;

    SendInvites => "RIGHT_SEND_INVITES", None;
    All => "RIGHT_ALL", None;
}

impl Right {
    /// The `ALL` marker of a family.
    pub fn all_of(kind: EntityKind) -> Option<Right> {
        match kind {
            EntityKind::User => Some(Right::UserAll),
            EntityKind::Application | EntityKind::EndDevice => Some(Right::ApplicationAll),
            EntityKind::Client => Some(Right::ClientAll),
            EntityKind::Gateway => Some(Right::GatewayAll),
            EntityKind::Organization => Some(Right::OrganizationAll),
        }
    }

    pub fn info(kind: EntityKind) -> Right {
        match kind {
            EntityKind::User => Right::UserInfo,
            EntityKind::Application | EntityKind::EndDevice => Right::ApplicationInfo,
            EntityKind::Client => Right::ClientInfo,
            EntityKind::Gateway => Right::GatewayInfo,
            EntityKind::Organization => Right::OrganizationInfo,
        }
    }

    pub fn settings_basic(kind: EntityKind) -> Right {
        match kind {
            EntityKind::User => Right::UserSettingsBasic,
            EntityKind::Application | EntityKind::EndDevice => Right::ApplicationSettingsBasic,
            EntityKind::Client => Right::ClientSettingsBasic,
            EntityKind::Gateway => Right::GatewaySettingsBasic,
            EntityKind::Organization => Right::OrganizationSettingsBasic,
        }
    }

    pub fn delete(kind: EntityKind) -> Right {
        match kind {
            EntityKind::User => Right::UserDelete,
            EntityKind::Application | EntityKind::EndDevice => Right::ApplicationDelete,
            EntityKind::Client => Right::ClientDelete,
            EntityKind::Gateway => Right::GatewayDelete,
            EntityKind::Organization => Right::OrganizationDelete,
        }
    }

    /// Right to manage API keys. Clients have no API keys.
    pub fn settings_api_keys(kind: EntityKind) -> Option<Right> {
        match kind {
            EntityKind::User => Some(Right::UserSettingsApiKeys),
            EntityKind::Application | EntityKind::EndDevice => {
                Some(Right::ApplicationSettingsApiKeys)
            }
            EntityKind::Gateway => Some(Right::GatewaySettingsApiKeys),
            EntityKind::Organization => Some(Right::OrganizationSettingsApiKeys),
            EntityKind::Client => None,
        }
    }

    /// Right to manage collaborators (members, for organizations).
    pub fn settings_collaborators(kind: EntityKind) -> Option<Right> {
        match kind {
            EntityKind::Application | EntityKind::EndDevice => {
                Some(Right::ApplicationSettingsCollaborators)
            }
            EntityKind::Client => Some(Right::ClientSettingsCollaborators),
            EntityKind::Gateway => Some(Right::GatewaySettingsCollaborators),
            EntityKind::Organization => Some(Right::OrganizationSettingsMembers),
            EntityKind::User => None,
        }
    }

    /// Right an account needs on itself to create an entity of `kind`.
    pub fn create_as(account: EntityKind, kind: EntityKind) -> Option<Right> {
        match (account, kind) {
            (EntityKind::User, EntityKind::Application) => Some(Right::UserApplicationsCreate),
            (EntityKind::User, EntityKind::Client) => Some(Right::UserClientsCreate),
            (EntityKind::User, EntityKind::Gateway) => Some(Right::UserGatewaysCreate),
            (EntityKind::User, EntityKind::Organization) => Some(Right::UserOrganizationsCreate),
            (EntityKind::Organization, EntityKind::Application) => {
                Some(Right::OrganizationApplicationsCreate)
            }
            (EntityKind::Organization, EntityKind::Client) => Some(Right::OrganizationClientsCreate),
            (EntityKind::Organization, EntityKind::Gateway) => {
                Some(Right::OrganizationGatewaysCreate)
            }
            _ => None,
        }
    }

    /// Right an account needs on itself to list its entities of `kind`.
    pub fn list_as(account: EntityKind, kind: EntityKind) -> Option<Right> {
        match (account, kind) {
            (EntityKind::User, EntityKind::Application) => Some(Right::UserApplicationsList),
            (EntityKind::User, EntityKind::Client) => Some(Right::UserClientsList),
            (EntityKind::User, EntityKind::Gateway) => Some(Right::UserGatewaysList),
            (EntityKind::User, EntityKind::Organization) => Some(Right::UserOrganizationsList),
            (EntityKind::Organization, EntityKind::Application) => {
                Some(Right::OrganizationApplicationsList)
            }
            (EntityKind::Organization, EntityKind::Client) => Some(Right::OrganizationClientsList),
            (EntityKind::Organization, EntityKind::Gateway) => {
                Some(Right::OrganizationGatewaysList)
            }
            _ => None,
        }
    }

    /// Rights directly implied by holding `self`.
    fn implications(&self) -> Rights {
        match self {
            Right::All => Rights::all(),
            Right::UserAll => Rights::family(EntityKind::User).union(&Rights::from([
                Right::ApplicationAll,
                Right::ClientAll,
                Right::GatewayAll,
                Right::OrganizationAll,
            ])),
            Right::OrganizationAll => Rights::family(EntityKind::Organization).union(
                &Rights::from([Right::ApplicationAll, Right::ClientAll, Right::GatewayAll]),
            ),
            Right::ApplicationAll => Rights::family(EntityKind::Application),
            Right::ClientAll => Rights::family(EntityKind::Client),
            Right::GatewayAll => Rights::family(EntityKind::Gateway),
            Right::ApplicationDevicesWriteKeys => Rights::from([Right::ApplicationDevicesReadKeys]),
            Right::GatewayWriteSecrets => Rights::from([Right::GatewayReadSecrets]),
            _ => Rights::default(),
        }
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Right {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Right {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An ordered set of rights.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rights(BTreeSet<Right>);

impl Rights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every defined right.
    pub fn all() -> Self {
        Right::VARIANTS.iter().copied().collect()
    }

    /// Every right of one family, including its `ALL` marker.
    pub fn family(kind: EntityKind) -> Self {
        let kind = match kind {
            EntityKind::EndDevice => EntityKind::Application,
            other => other,
        };
        Right::VARIANTS
            .iter()
            .copied()
            .filter(|r| r.family() == Some(kind))
            .collect()
    }

    /// Rights an API key or a membership on an entity of `kind` may carry.
    pub fn assignable_for(kind: EntityKind) -> Self {
        match kind {
            EntityKind::User => Self::all(),
            EntityKind::Organization => Self::family(EntityKind::Organization)
                .union(&Self::family(EntityKind::Application))
                .union(&Self::family(EntityKind::Client))
                .union(&Self::family(EntityKind::Gateway)),
            EntityKind::EndDevice => Self::default(),
            other => Self::family(other),
        }
    }

    /// Rights granted to cluster-internal callers.
    pub fn cluster() -> Self {
        Self::from([
            Right::ApplicationInfo,
            Right::ApplicationLink,
            Right::ApplicationDevicesRead,
            Right::ApplicationDevicesReadKeys,
            Right::ApplicationTrafficRead,
            Right::ApplicationTrafficUpWrite,
            Right::ApplicationTrafficDownWrite,
            Right::GatewayInfo,
            Right::GatewayLink,
            Right::GatewayStatusRead,
            Right::GatewayLocationRead,
            Right::GatewayTrafficRead,
            Right::GatewayTrafficDownWrite,
            Right::GatewayReadSecrets,
        ])
    }

    /// Universal rights of administrators. Device keys and gateway secrets
    /// are excluded, and with them every right implying them.
    pub fn admin() -> Self {
        Self::all().sub(&Self::from([
            Right::All,
            Right::UserAll,
            Right::OrganizationAll,
            Right::ApplicationAll,
            Right::GatewayAll,
            Right::ApplicationDevicesReadKeys,
            Right::ApplicationDevicesWriteKeys,
            Right::GatewayReadSecrets,
            Right::GatewayWriteSecrets,
        ]))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, right: Right) -> bool {
        self.0.contains(&right)
    }

    pub fn insert(&mut self, right: Right) -> bool {
        self.0.insert(right)
    }

    pub fn iter(&self) -> impl Iterator<Item = Right> + '_ {
        self.0.iter().copied()
    }

    pub fn union(&self, other: &Rights) -> Rights {
        Rights(self.0.union(&other.0).copied().collect())
    }

    pub fn intersect(&self, other: &Rights) -> Rights {
        Rights(self.0.intersection(&other.0).copied().collect())
    }

    /// Rights in `self` that are not in `other`.
    pub fn sub(&self, other: &Rights) -> Rights {
        Rights(self.0.difference(&other.0).copied().collect())
    }

    pub fn includes_all(&self, rights: &[Right]) -> bool {
        rights.iter().all(|r| self.0.contains(r))
    }

    pub fn is_superset(&self, other: &Rights) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Rights of `required` not held in `self`.
    pub fn missing(&self, required: &Rights) -> Rights {
        required.sub(self)
    }

    /// The subset applicable to an entity of `kind`.
    pub fn for_kind(&self, kind: EntityKind) -> Rights {
        let kind = match kind {
            EntityKind::EndDevice => EntityKind::Application,
            other => other,
        };
        Rights(
            self.0
                .iter()
                .copied()
                .filter(|r| r.family() == Some(kind))
                .collect(),
        )
    }

    /// Closure of `self` under implication. Idempotent.
    pub fn implied(&self) -> Rights {
        let mut closed = self.clone();
        let mut frontier: Vec<Right> = self.iter().collect();
        while let Some(right) = frontier.pop() {
            for implied in right.implications().iter() {
                if closed.insert(implied) {
                    frontier.push(implied);
                }
            }
        }
        closed
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.iter().map(|r| r.as_str().to_string()).collect()
    }

    /// Parses stored right names, skipping unknown names.
    pub fn from_strings<S: AsRef<str>>(names: &[S]) -> Rights {
        names
            .iter()
            .filter_map(|n| match n.as_ref().parse::<Right>() {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unknown stored right");
                    None
                }
            })
            .collect()
    }
}

impl FromIterator<Right> for Rights {
    fn from_iter<I: IntoIterator<Item = Right>>(iter: I) -> Self {
        Rights(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Right; N]> for Rights {
    fn from(rights: [Right; N]) -> Self {
        rights.into_iter().collect()
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|r| r.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
