//! Domain services of the Identity Server.
//!
//! Each service resolves the caller's rights through the [`Authorizer`]
//! before touching the store, and runs its writes in one store transaction.
//!
//! [`Authorizer`]: crate::auth::Authorizer

mod access;
pub(crate) mod email;
pub mod error;
mod invitation;
mod oauth;
pub(crate) mod policy;
pub mod redis;
mod registry;
mod session;
pub mod store;
pub(crate) mod user;
pub(crate) mod validation;

pub use access::AccessService;
pub use email::{EmailJob, EmailProvider, EmailQueue, EmailService, MockEmailService, SentEmail};
pub use error::ServiceError;
pub use invitation::InvitationService;
pub use oauth::OAuthService;
pub use policy::{PolicyService, PolicyViolation};
pub use redis::{MembershipCache, MockMembershipCache, RedisService};
pub use registry::RegistryService;
pub use session::SessionService;
pub use user::UserService;
pub use validation::ValidationService;
