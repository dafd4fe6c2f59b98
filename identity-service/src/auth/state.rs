//! Rights restrictions derived from user and client state.

use crate::auth::auth_info::AuthInfo;
use crate::config::AuthConfig;
use crate::models::{Entity, Right, Rights, State, User};
use crate::services::ServiceError;

/// Rights a user in `state` may exercise, or `None` when unrestricted.
pub fn allowed_for_state(state: State) -> Option<Rights> {
    match state {
        State::Requested => Some(Rights::from([
            Right::UserInfo,
            Right::UserSettingsBasic,
            Right::UserDelete,
        ])),
        State::Approved | State::Flagged => None,
        State::Rejected => Some(Rights::from([Right::UserInfo, Right::UserDelete])),
        State::Suspended => Some(Rights::from([Right::UserInfo])),
    }
}

/// Rights of a user whose primary email address is not validated yet.
pub fn allowed_unvalidated() -> Rights {
    Rights::from([Right::UserInfo, Right::UserSettingsBasic, Right::UserDelete])
}

/// Universal rights granted to admins.
pub fn admin_rights(config: &AuthConfig) -> Rights {
    if config.admin_rights.all {
        Rights::all()
    } else {
        Rights::admin()
    }
}

/// Applies state, validation and admin modifiers for the user behind `info`.
pub fn apply_user_modifiers(info: &mut AuthInfo, user: &User, config: &AuthConfig) {
    if let Some(allowed) = allowed_for_state(user.state) {
        info.restrict(&allowed);
    }
    match user.state {
        State::Rejected | State::Suspended => {
            let mut warning = format!("User is {}", user.state);
            if !user.state_description.is_empty() {
                warning.push_str(": ");
                warning.push_str(&user.state_description);
            }
            tracing::info!(user_id = %user.user_id, state = %user.state, "Restricted user authenticated");
            info.warnings.push(warning);
        }
        _ => {}
    }

    if config.validation_required && user.primary_email_address_validated_at.is_none() {
        info.restrict(&allowed_unvalidated());
        info.warnings
            .push("Primary email address is not validated".to_string());
    }

    if user.admin && user.state == State::Approved {
        info.is_admin = true;
        info.universal_rights = admin_rights(config).intersect(&info.rights);
    }
}

/// Rejects credentials issued to rejected or suspended OAuth clients.
pub fn check_client_state(client: &Entity) -> Result<(), ServiceError> {
    match client.client_state() {
        Some((State::Rejected, description)) => Err(ServiceError::ClientRejected {
            description: description.to_string(),
        }),
        Some((State::Suspended, description)) => Err(ServiceError::ClientSuspended {
            description: description.to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth_info::AccessMethod;
    use crate::models::{EntityDetails, EntityId};

    fn session_info(user: &User) -> AuthInfo {
        AuthInfo {
            principal: Some(user.ids()),
            rights: Rights::all().implied(),
            access_method: AccessMethod::SessionToken,
            ..AuthInfo::default()
        }
    }

    fn user(state: State) -> User {
        let mut user = User::new(
            "u1".into(),
            "U1".into(),
            "u1@example.com".into(),
            "hash".into(),
            state,
        );
        user.primary_email_address_validated_at = Some(chrono::Utc::now());
        user
    }

    #[test]
    fn test_suspended_user_keeps_info_only() {
        let mut user = user(State::Suspended);
        user.state_description = "abuse".into();
        let mut info = session_info(&user);
        apply_user_modifiers(&mut info, &user, &AuthConfig::default());
        assert_eq!(info.rights, Rights::from([Right::UserInfo]));
        assert_eq!(info.warnings, vec!["User is suspended: abuse".to_string()]);
    }

    #[test]
    fn test_flagged_user_is_unrestricted() {
        let user = user(State::Flagged);
        let mut info = session_info(&user);
        apply_user_modifiers(&mut info, &user, &AuthConfig::default());
        assert_eq!(info.rights, Rights::all().implied());
        assert!(info.warnings.is_empty());
    }

    #[test]
    fn test_unvalidated_email_restricts_when_required() {
        let mut user = user(State::Approved);
        user.primary_email_address_validated_at = None;
        let config = AuthConfig {
            validation_required: true,
            ..AuthConfig::default()
        };
        let mut info = session_info(&user);
        apply_user_modifiers(&mut info, &user, &config);
        assert_eq!(info.rights, allowed_unvalidated());
    }

    #[test]
    fn test_admin_universal_rights_bounded_by_credential() {
        let mut user = user(State::Approved);
        user.admin = true;
        let mut info = session_info(&user);
        info.rights = Rights::from([Right::ApplicationInfo, Right::UserInfo]);
        apply_user_modifiers(&mut info, &user, &AuthConfig::default());
        assert!(info.is_admin);
        assert_eq!(
            info.universal_rights,
            Rights::from([Right::ApplicationInfo, Right::UserInfo])
        );
    }

    #[test]
    fn test_requested_admin_is_not_admin() {
        let mut user = user(State::Requested);
        user.admin = true;
        let mut info = session_info(&user);
        apply_user_modifiers(&mut info, &user, &AuthConfig::default());
        assert!(!info.is_admin);
        assert!(info.universal_rights.is_empty());
    }

    #[test]
    fn test_client_state_gate() {
        let mut client = Entity::new(EntityId::client("c1"), "C".into(), String::new()).unwrap();
        assert!(check_client_state(&client).is_ok());
        if let EntityDetails::Client {
            state,
            state_description,
            ..
        } = &mut client.details
        {
            *state = State::Suspended;
            *state_description = "spam".into();
        }
        let err = check_client_state(&client).unwrap_err();
        assert_eq!(err.name(), "client_suspended");
        assert_eq!(err.attributes()["description"], "spam");
    }
}
