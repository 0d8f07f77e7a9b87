//! JWT validation.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted
//! - Expiration is always validated
//! - Generic error messages prevent information leakage

use crate::auth::claims::Claims;
use crate::errors::QuizError;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

/// Tokens larger than this are rejected without parsing.
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// HS256 validator for identity tokens.
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Create a validator for tokens signed with `secret`.
    pub fn new(secret: &SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }

    /// Validate a JWT and return the claims.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidToken` for all validation failures.
    #[instrument(skip_all)]
    pub fn validate(&self, token: &str) -> Result<Claims, QuizError> {
        if token.len() > MAX_TOKEN_SIZE_BYTES {
            tracing::debug!(target: "quiz.auth.jwt", size = token.len(), "Token exceeds size limit");
            return Err(QuizError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string()));
        }

        let token_data =
            decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
                tracing::debug!(target: "quiz.auth.jwt", error = %e, "Token verification failed");
                QuizError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
            })?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(exp: i64) -> Claims {
        Claims {
            user_id: 11,
            username: "ada".to_string(),
            exp,
        }
    }

    fn validator() -> JwtValidator {
        JwtValidator::new(&SecretString::from("test-secret".to_string()))
    }

    #[test]
    fn test_valid_token() {
        let exp = chrono::Utc::now().timestamp() + 3600;
        let token = sign(&claims(exp), "test-secret");

        let validated = validator().validate(&token).unwrap();
        assert_eq!(validated.user_id, 11);
        assert_eq!(validated.username, "ada");
    }

    #[test]
    fn test_expired_token_rejected() {
        let exp = chrono::Utc::now().timestamp() - 3600;
        let token = sign(&claims(exp), "test-secret");

        let err = validator().validate(&token).unwrap_err();
        assert!(matches!(err, QuizError::InvalidToken(_)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let exp = chrono::Utc::now().timestamp() + 3600;
        let token = sign(&claims(exp), "other-secret");

        assert!(validator().validate(&token).is_err());
    }

    #[test]
    fn test_oversized_token_rejected() {
        let token = "a".repeat(MAX_TOKEN_SIZE_BYTES + 1);
        assert!(validator().validate(&token).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(validator().validate("not.a.jwt").is_err());
    }
}
