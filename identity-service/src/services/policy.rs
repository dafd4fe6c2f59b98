//! Input policy: password requirements and entity ID rules.

use crate::config::PasswordRequirements;
use crate::services::ServiceError;

/// Password policy violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    /// Password is too short.
    PasswordTooShort { min_length: usize, actual_length: usize },
    /// Password is too long.
    PasswordTooLong { max_length: usize },
    /// Not enough uppercase letters.
    PasswordMissingUppercase { min: usize },
    /// Not enough digits.
    PasswordMissingDigits { min: usize },
    /// Not enough special characters.
    PasswordMissingSpecial { min: usize },
    /// Password contains the user ID.
    PasswordContainsUserId,
    /// Password is on the common password list.
    PasswordCommon,
}

impl PolicyViolation {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyViolation::PasswordTooShort { .. } => "password_too_short",
            PolicyViolation::PasswordTooLong { .. } => "password_too_long",
            PolicyViolation::PasswordMissingUppercase { .. } => "password_min_uppercase",
            PolicyViolation::PasswordMissingDigits { .. } => "password_min_digits",
            PolicyViolation::PasswordMissingSpecial { .. } => "password_min_special",
            PolicyViolation::PasswordContainsUserId => "password_contains_user_id",
            PolicyViolation::PasswordCommon => "password_common",
        }
    }
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyViolation::PasswordTooShort {
                min_length,
                actual_length,
            } => write!(
                f,
                "Password must be at least {} characters (got {})",
                min_length, actual_length
            ),
            PolicyViolation::PasswordTooLong { max_length } => {
                write!(f, "Password must be at most {} characters", max_length)
            }
            PolicyViolation::PasswordMissingUppercase { min } => {
                write!(f, "Password must contain at least {} uppercase letters", min)
            }
            PolicyViolation::PasswordMissingDigits { min } => {
                write!(f, "Password must contain at least {} digits", min)
            }
            PolicyViolation::PasswordMissingSpecial { min } => {
                write!(f, "Password must contain at least {} special characters", min)
            }
            PolicyViolation::PasswordContainsUserId => {
                write!(f, "Password must not contain the user ID")
            }
            PolicyViolation::PasswordCommon => write!(f, "Password is too common"),
        }
    }
}

impl std::error::Error for PolicyViolation {}

const COMMON_PASSWORDS: &[&str] = &[
    "123456", "12345678", "123456789", "1234567890", "password", "password1", "Password1",
    "qwerty", "qwerty123", "letmein", "welcome", "welcome1", "iloveyou", "admin", "admin123",
    "abc123", "monkey", "dragon", "football", "baseball", "sunshine", "princess", "trustno1",
    "Passw0rd", "P@ssw0rd", "Password123", "changeme", "lorawan", "thethings",
];

/// IDs that would collide with routes or well-known names.
const RESERVED_IDS: &[&str] = &[
    "admin", "administrator", "all", "api", "auth", "default", "everyone", "me", "mine",
    "none", "null", "root", "self", "system", "undefined", "user", "users",
];

pub struct PolicyService;

impl PolicyService {
    /// Validates a password, returning the first violation found.
    pub fn validate_password(
        password: &str,
        user_id: &str,
        requirements: &PasswordRequirements,
    ) -> Result<(), PolicyViolation> {
        match Self::validate_password_all(password, user_id, requirements)
            .into_iter()
            .next()
        {
            Some(violation) => Err(violation),
            None => Ok(()),
        }
    }

    /// Validates a password and returns every violation.
    pub fn validate_password_all(
        password: &str,
        user_id: &str,
        requirements: &PasswordRequirements,
    ) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();
        let length = password.chars().count();

        if length < requirements.min_length {
            violations.push(PolicyViolation::PasswordTooShort {
                min_length: requirements.min_length,
                actual_length: length,
            });
        }
        if length > requirements.max_length {
            violations.push(PolicyViolation::PasswordTooLong {
                max_length: requirements.max_length,
            });
        }

        let uppercase = password.chars().filter(|c| c.is_uppercase()).count();
        if uppercase < requirements.min_uppercase {
            violations.push(PolicyViolation::PasswordMissingUppercase {
                min: requirements.min_uppercase,
            });
        }

        let digits = password.chars().filter(|c| c.is_ascii_digit()).count();
        if digits < requirements.min_digits {
            violations.push(PolicyViolation::PasswordMissingDigits {
                min: requirements.min_digits,
            });
        }

        let special = password
            .chars()
            .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
            .count();
        if special < requirements.min_special {
            violations.push(PolicyViolation::PasswordMissingSpecial {
                min: requirements.min_special,
            });
        }

        if requirements.reject_user_id
            && !user_id.is_empty()
            && password.to_lowercase().contains(&user_id.to_lowercase())
        {
            violations.push(PolicyViolation::PasswordContainsUserId);
        }

        if requirements.reject_common
            && COMMON_PASSWORDS
                .iter()
                .any(|common| common.eq_ignore_ascii_case(password))
        {
            violations.push(PolicyViolation::PasswordCommon);
        }

        violations
    }

    /// Checks `^[a-z0-9](?:[-]?[a-z0-9]){1,35}$` and the reserved ID list.
    pub fn validate_id(id: &str) -> Result<(), ServiceError> {
        let bytes = id.as_bytes();
        let well_formed = (2..=36).contains(&bytes.len())
            && bytes
                .iter()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
            && bytes.first() != Some(&b'-')
            && bytes.last() != Some(&b'-')
            && !id.contains("--");
        if !well_formed {
            return Err(ServiceError::InvalidId { id: id.to_string() });
        }
        if RESERVED_IDS.contains(&id) {
            return Err(ServiceError::ReservedId { id: id.to_string() });
        }
        Ok(())
    }
}
