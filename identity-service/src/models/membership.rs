//! Memberships of accounts on entities and the chains derived from them.

use serde::{Deserialize, Serialize};

use super::entity::EntityId;
use super::rights::Rights;

/// `account` holds `rights` on `entity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub account: EntityId,
    pub entity: EntityId,
    pub rights: Rights,
}

/// Path by which an account obtains rights on an entity: either directly or
/// through one organization it is a member of.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipChain {
    pub account: EntityId,
    pub account_rights: Rights,
    pub organization: Option<(EntityId, Rights)>,
    pub entity: EntityId,
}

impl MembershipChain {
    pub fn direct(account: EntityId, entity: EntityId, rights: Rights) -> Self {
        Self {
            account,
            account_rights: rights,
            organization: None,
            entity,
        }
    }

    /// `user_rights` are held on the organization, `organization_rights` by
    /// the organization on the entity.
    pub fn indirect(
        user: EntityId,
        user_rights: Rights,
        organization: EntityId,
        organization_rights: Rights,
        entity: EntityId,
    ) -> Self {
        Self {
            account: user,
            account_rights: user_rights,
            organization: Some((organization, organization_rights)),
            entity,
        }
    }

    /// Intersection of the rights at every hop.
    pub fn effective_rights(&self) -> Rights {
        let first = self.account_rights.implied();
        match &self.organization {
            None => first,
            Some((_, org_rights)) => first.intersect(&org_rights.implied()),
        }
    }
}
