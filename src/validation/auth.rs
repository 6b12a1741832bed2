use garde::Validate;
use serde::Deserialize;

use crate::error::{AppError, Result};

/// Email and password, as sent by the sign-in and sign-up forms.
#[derive(Deserialize, Validate)]
pub struct Credentials {
    #[garde(email, length(max = 255))]
    pub email: String,
    #[garde(length(min = 8, max = 128))]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Normalizes the email and checks both fields.
    pub fn validated(mut self) -> Result<Self> {
        self.email = self.email.trim().to_lowercase();
        self.validate()
            .map_err(|report| AppError::Validation(report.to_string().trim().to_string()))?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(email: &str, password: &str) -> Credentials {
        Credentials {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn valid_credentials_are_normalized() {
        let creds = credentials("  Student@Example.COM ", "password123")
            .validated()
            .unwrap();
        assert_eq!(creds.email, "student@example.com");
    }

    #[test]
    fn malformed_email_is_rejected() {
        assert!(matches!(
            credentials("not-an-email", "password123").validated(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn short_password_is_rejected() {
        assert!(matches!(
            credentials("student@example.com", "short").validated(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn debug_output_hides_the_password() {
        let rendered = format!("{:?}", credentials("student@example.com", "password123"));
        assert!(!rendered.contains("password123"));
    }
}
