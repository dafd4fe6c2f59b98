pub mod access_token;
pub mod api_key;
pub mod contact_info;
pub mod email_validation;
pub mod entity;
pub mod invitation;
pub mod membership;
pub mod pagination;
pub mod rights;
pub mod session;
pub mod user;

pub use access_token::AccessToken;
pub use api_key::ApiKey;
pub use contact_info::{ContactInfo, ContactMethod, ContactType, carry_validation};
pub use email_validation::EmailValidation;
pub use entity::{EndDeviceId, Entity, EntityDetails, EntityId, EntityKind, Grant, State};
pub use invitation::Invitation;
pub use membership::{Membership, MembershipChain};
pub use pagination::{Page, Pagination};
pub use rights::{Right, Rights};
pub use session::UserSession;
pub use user::{SanitizedUser, User};
