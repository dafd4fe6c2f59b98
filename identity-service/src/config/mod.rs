use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    pub smtp: Option<SmtpConfig>,
    pub email_queue_capacity: usize,
    pub base_url: String,
    pub allowed_origins: Vec<String>,
    pub auth: AuthConfig,
    pub auth_cache: AuthCacheConfig,
    pub user_rights: UserRightsConfig,
    pub registration: RegistrationConfig,
    pub session_ttl_seconds: Option<u64>,
    pub access_token_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub from: String,
}

/// Settings of the credential resolver.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Keys accepted with the `ClusterKey` authorization type.
    pub cluster_keys: Vec<String>,
    pub admin_rights: AdminRightsConfig,
    /// Restrict users with an unvalidated primary email.
    pub validation_required: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminRightsConfig {
    /// Grant admins every right, including device keys and gateway secrets.
    pub all: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthCacheConfig {
    pub membership_ttl_seconds: u64,
}

impl Default for AuthCacheConfig {
    fn default() -> Self {
        Self {
            membership_ttl_seconds: 600,
        }
    }
}

impl AuthCacheConfig {
    pub fn membership_ttl(&self) -> Duration {
        Duration::from_secs(self.membership_ttl_seconds)
    }
}

/// Which entity kinds non-admin users may create.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRightsConfig {
    pub create_applications: bool,
    pub create_clients: bool,
    pub create_gateways: bool,
    pub create_organizations: bool,
}

impl Default for UserRightsConfig {
    fn default() -> Self {
        Self {
            create_applications: true,
            create_clients: true,
            create_gateways: true,
            create_organizations: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationConfig {
    pub admin_approval_required: bool,
    pub validation: ValidationConfig,
    pub invitation: InvitationConfig,
    pub password: PasswordRequirements,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    pub required: bool,
    pub token_ttl_seconds: u64,
    pub retry_interval_seconds: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            required: false,
            token_ttl_seconds: 2 * 24 * 3600,
            retry_interval_seconds: 3600,
        }
    }
}

impl ValidationConfig {
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_seconds as i64)
    }

    pub fn retry_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_interval_seconds as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvitationConfig {
    pub required: bool,
    pub token_ttl_seconds: u64,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            required: false,
            token_ttl_seconds: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordRequirements {
    pub min_length: usize,
    pub max_length: usize,
    pub min_uppercase: usize,
    pub min_digits: usize,
    pub min_special: usize,
    pub reject_user_id: bool,
    pub reject_common: bool,
}

impl Default for PasswordRequirements {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 1000,
            min_uppercase: 1,
            min_digits: 1,
            min_special: 0,
            reject_user_id: true,
            reject_common: true,
        }
    }
}

/// Development settings: in-memory store, no cache, no SMTP.
impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "identity-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: None,
            redis: None,
            smtp: None,
            email_queue_capacity: 1024,
            base_url: "http://localhost:8080".to_string(),
            allowed_origins: vec!["http://localhost:3000".to_string()],
            auth: AuthConfig::default(),
            auth_cache: AuthCacheConfig::default(),
            user_rights: UserRightsConfig::default(),
            registration: RegistrationConfig::default(),
            session_ttl_seconds: None,
            access_token_ttl_seconds: 3600,
        }
    }
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let database = match env::var("DATABASE_URL") {
            Ok(url) => Some(DatabaseConfig {
                url,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1")?,
            }),
            Err(_) if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required in production but not set"
                )));
            }
            Err(_) => None,
        };

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) => Some(SmtpConfig {
                host,
                user: get_env("SMTP_USER", None, is_prod)?,
                password: get_env("SMTP_PASSWORD", None, is_prod)?,
                from: get_env("EMAIL_FROM", None, is_prod)?,
            }),
            Err(_) => None,
        };

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database,
            redis: env::var("REDIS_URL").ok().map(|url| RedisConfig { url }),
            smtp,
            email_queue_capacity: parse_env("EMAIL_QUEUE_CAPACITY", "1024")?,
            base_url: get_env("BASE_URL", Some("http://localhost:8080"), is_prod)?,
            allowed_origins: split_list(&get_env(
                "ALLOWED_ORIGINS",
                Some("http://localhost:3000"),
                is_prod,
            )?),
            auth: AuthConfig {
                cluster_keys: split_list(&env::var("CLUSTER_KEYS").unwrap_or_default()),
                admin_rights: AdminRightsConfig {
                    all: parse_env("ADMIN_RIGHTS_ALL", "false")?,
                },
                validation_required: parse_env(
                    "USER_REGISTRATION_CONTACT_INFO_VALIDATION_REQUIRED",
                    "false",
                )?,
            },
            auth_cache: AuthCacheConfig {
                membership_ttl_seconds: parse_env("AUTH_CACHE_MEMBERSHIP_TTL_SECONDS", "600")?,
            },
            user_rights: UserRightsConfig {
                create_applications: parse_env("USER_RIGHTS_CREATE_APPLICATIONS", "true")?,
                create_clients: parse_env("USER_RIGHTS_CREATE_CLIENTS", "true")?,
                create_gateways: parse_env("USER_RIGHTS_CREATE_GATEWAYS", "true")?,
                create_organizations: parse_env("USER_RIGHTS_CREATE_ORGANIZATIONS", "true")?,
            },
            registration: RegistrationConfig {
                admin_approval_required: parse_env(
                    "USER_REGISTRATION_ADMIN_APPROVAL_REQUIRED",
                    "false",
                )?,
                validation: ValidationConfig {
                    required: parse_env(
                        "USER_REGISTRATION_CONTACT_INFO_VALIDATION_REQUIRED",
                        "false",
                    )?,
                    token_ttl_seconds: parse_env(
                        "USER_REGISTRATION_CONTACT_INFO_VALIDATION_TOKEN_TTL_SECONDS",
                        "172800",
                    )?,
                    retry_interval_seconds: parse_env(
                        "USER_REGISTRATION_CONTACT_INFO_VALIDATION_RETRY_INTERVAL_SECONDS",
                        "3600",
                    )?,
                },
                invitation: InvitationConfig {
                    required: parse_env("USER_REGISTRATION_INVITATION_REQUIRED", "false")?,
                    token_ttl_seconds: parse_env(
                        "USER_REGISTRATION_INVITATION_TOKEN_TTL_SECONDS",
                        "604800",
                    )?,
                },
                password: PasswordRequirements {
                    min_length: parse_env("USER_REGISTRATION_PASSWORD_MIN_LENGTH", "8")?,
                    max_length: parse_env("USER_REGISTRATION_PASSWORD_MAX_LENGTH", "1000")?,
                    min_uppercase: parse_env("USER_REGISTRATION_PASSWORD_MIN_UPPERCASE", "1")?,
                    min_digits: parse_env("USER_REGISTRATION_PASSWORD_MIN_DIGITS", "1")?,
                    min_special: parse_env("USER_REGISTRATION_PASSWORD_MIN_SPECIAL", "0")?,
                    reject_user_id: parse_env("USER_REGISTRATION_PASSWORD_REJECT_USER_ID", "true")?,
                    reject_common: parse_env("USER_REGISTRATION_PASSWORD_REJECT_COMMON", "true")?,
                },
            },
            session_ttl_seconds: match env::var("SESSION_TTL_SECONDS") {
                Ok(v) => Some(v.parse().map_err(|e: std::num::ParseIntError| {
                    AppError::ConfigError(anyhow::anyhow!("SESSION_TTL_SECONDS: {}", e))
                })?),
                Err(_) => None,
            },
            access_token_ttl_seconds: parse_env("ACCESS_TOKEN_TTL_SECONDS", "3600")?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.email_queue_capacity == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "EMAIL_QUEUE_CAPACITY must be positive"
            )));
        }

        let password = &self.registration.password;
        if password.min_length > password.max_length {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "USER_REGISTRATION_PASSWORD_MIN_LENGTH exceeds the maximum length"
            )));
        }

        let validation = &self.registration.validation;
        if validation.token_ttl_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Contact info validation token TTL must be positive"
            )));
        }
        if validation.retry_interval_seconds > validation.token_ttl_seconds {
            tracing::warn!(
                "Validation retry interval exceeds the token TTL; expired validations are replaced instead of refreshed"
            );
        }

        if self.environment == Environment::Prod {
            if self.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.auth.cluster_keys.iter().any(|k| k.len() < 32) {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "CLUSTER_KEYS entries must be at least 32 characters in production"
                )));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

/// Reads an optional tuning knob, falling back to `default` in every environment.
fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_skips_blanks() {
        assert_eq!(
            split_list("a, b,,c "),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_validation_durations() {
        let config = ValidationConfig::default();
        assert_eq!(config.token_ttl(), chrono::Duration::days(2));
        assert_eq!(config.retry_interval(), chrono::Duration::hours(1));
    }
}
