pub mod auth;

pub use auth::{request_context_middleware, Caller, WARNING_HEADER};
