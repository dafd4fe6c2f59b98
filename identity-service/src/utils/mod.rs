pub mod field_mask;
pub mod password;
pub mod secret;

pub use password::{
    Password, PasswordHashString, hash_password, hash_password_blocking, verify_password,
    verify_password_blocking,
};
pub use secret::{generate_id, generate_secret, hash_secret, hash_token, verify_secret, verify_token};
