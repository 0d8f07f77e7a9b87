//! JWT claims structure.
//!
//! The `user_id` field is redacted in Debug output to prevent exposure in logs.

use crate::models::{UserId, UserProfile};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Claims carried by identity tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Numeric user identity - redacted in Debug output.
    pub user_id: UserId,

    /// Display name chosen at registration.
    pub username: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("user_id", &"[REDACTED]")
            .field("username", &self.username)
            .field("exp", &self.exp)
            .finish()
    }
}

impl Claims {
    /// Initial display profile for a connection opened with these claims.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.user_id,
            username: self.username.clone(),
            email: String::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_debug_redacts_user_id() {
        let claims = Claims {
            user_id: 987_654,
            username: "ada".to_string(),
            exp: 1_234_567_890,
        };

        let debug_str = format!("{claims:?}");

        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("987654"));
        assert!(debug_str.contains("ada"));
    }

    #[test]
    fn test_profile_from_claims() {
        let claims = Claims {
            user_id: 5,
            username: "grace".to_string(),
            exp: 0,
        };

        let profile = claims.profile();
        assert_eq!(profile.user_id, 5);
        assert_eq!(profile.username, "grace");
        assert!(profile.email.is_empty());
    }
}
