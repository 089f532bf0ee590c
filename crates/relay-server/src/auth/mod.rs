//! Login credential check and one-time stream tokens.

pub mod credentials;
pub mod tokens;

pub use credentials::{Authenticator, StaticCredentials};
pub use tokens::{Token, TokenStore};
