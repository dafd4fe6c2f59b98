//! Wire format of credentials carried in the `Authorization` header.

use std::fmt;

use crate::services::ServiceError;

/// Kind prefix of a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    ApiKey,
    AccessToken,
    SessionToken,
}

impl TokenKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            TokenKind::ApiKey => "AK",
            TokenKind::AccessToken => "AT",
            TokenKind::SessionToken => "SK",
        }
    }
}

/// Parsed `<kind>.<id>.<secret>` bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub kind: TokenKind,
    pub id: String,
    pub secret: String,
}

impl BearerToken {
    pub fn new(kind: TokenKind, id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            secret: secret.into(),
        }
    }

    pub fn parse(token: &str) -> Result<Self, ServiceError> {
        let parts: Vec<&str> = token.split('.').collect();
        let [kind, id, secret] = parts.as_slice() else {
            return Err(ServiceError::InvalidAuthorization);
        };
        let kind = match *kind {
            "AK" => TokenKind::ApiKey,
            "AT" => TokenKind::AccessToken,
            "SK" => TokenKind::SessionToken,
            _ => return Err(ServiceError::UnsupportedAuthorization),
        };
        if id.is_empty() || secret.is_empty() {
            return Err(ServiceError::InvalidAuthorization);
        }
        Ok(Self::new(kind, *id, *secret))
    }
}

impl fmt::Display for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.kind.prefix(), self.id, self.secret)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken({}.{}.***)", self.kind.prefix(), self.id)
    }
}

/// Credential presented in the `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(BearerToken),
    ClusterKey(String),
}

impl Credential {
    pub fn from_header(value: &str) -> Result<Self, ServiceError> {
        if !value.is_ascii() {
            return Err(ServiceError::InvalidAuthorization);
        }
        let (scheme, rest) = value
            .trim()
            .split_once(' ')
            .ok_or(ServiceError::InvalidAuthorization)?;
        let rest = rest.trim();
        if scheme.eq_ignore_ascii_case("bearer") {
            BearerToken::parse(rest).map(Credential::Bearer)
        } else if scheme.eq_ignore_ascii_case("clusterkey") {
            Ok(Credential::ClusterKey(rest.to_string()))
        } else {
            Err(ServiceError::UnsupportedAuthorization)
        }
    }
}
