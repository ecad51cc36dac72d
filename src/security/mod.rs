// Authorization for tools that require a user grant.

pub mod auth;

pub use auth::{Authorization, AuthorizationManager};
