//! Identity verification.
//!
//! Tokens are issued elsewhere; this module only verifies them and exposes
//! the authenticated identity to handlers.

pub mod claims;
pub mod jwt;

pub use claims::Claims;
pub use jwt::JwtValidator;
