use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::AuthConfig;
use crate::error::AppError;

use super::Claims;

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    teacher_role: String,
}

impl JwtValidator {
    pub fn new(config: &AuthConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        let mut validation = Validation::default();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
            teacher_role: config.teacher_role.clone(),
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }

    /// Validate a token and require the teacher role.
    pub fn authorize_teacher(&self, token: &str) -> Result<Claims, AppError> {
        let claims = self.validate(token)?;
        if !claims.has_role(&self.teacher_role) {
            return Err(AppError::Forbidden(format!(
                "Role '{}' required",
                self.teacher_role
            )));
        }
        Ok(claims)
    }
}
