//! Configuration for continuation-token encryption.
//!
//! Values are read from `CONTINUATION_TOKEN_`-prefixed environment variables.
//! Loading fails with a descriptive error if a required variable is missing
//! or invalid; validation happens once at startup, never per request.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Validated continuation-token options.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenOptions {
    /// Password for symmetric key derivation. **Required.**
    pub password: String,

    /// Salt for symmetric key derivation; its UTF-8 bytes feed the KDF.
    /// At least eight bytes. **Required.**
    pub salt: String,

    /// PBKDF2 iteration count.
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    /// Name of the deployed environment, bound into every envelope-encrypted
    /// token's encryption context.
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_iterations() -> u32 {
    1 << 12
}

fn default_environment() -> String {
    "production".into()
}

impl TokenOptions {
    /// Load and validate options from `CONTINUATION_TOKEN_*` environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is absent, cannot be parsed,
    /// or fails validation.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix("CONTINUATION_TOKEN"))
            .build()
            .context("failed to build continuation-token configuration from environment")?;

        let options: TokenOptions = cfg
            .try_deserialize()
            .context("failed to deserialise continuation-token configuration")?;

        options.validate()?;
        Ok(options)
    }

    /// Validate all fields, returning a descriptive error on the first
    /// failure.
    fn validate(&self) -> Result<()> {
        if self.password.trim().is_empty() {
            anyhow::bail!("CONTINUATION_TOKEN_PASSWORD is required and must not be empty");
        }
        if self.salt.len() < 8 {
            anyhow::bail!("CONTINUATION_TOKEN_SALT must be at least 8 bytes");
        }
        if self.iterations == 0 {
            anyhow::bail!("CONTINUATION_TOKEN_ITERATIONS must be > 0");
        }
        if self.environment.trim().is_empty() {
            anyhow::bail!("CONTINUATION_TOKEN_ENVIRONMENT must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> TokenOptions {
        TokenOptions {
            password: "correct horse".into(),
            salt: "12345678".into(),
            iterations: default_iterations(),
            environment: default_environment(),
        }
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_iterations(), 4096);
        assert_eq!(default_environment(), "production");
    }

    #[test]
    fn valid_options_pass_validation() {
        assert!(options().validate().is_ok());
    }

    #[test]
    fn empty_password_is_rejected() {
        let mut opts = options();
        opts.password = "  ".into();
        assert!(opts.validate().is_err());
    }

    #[test]
    fn short_salt_is_rejected() {
        let mut opts = options();
        opts.salt = "1234567".into();
        assert!(opts.validate().is_err());
    }

    #[test]
    fn zero_iterations_are_rejected() {
        let mut opts = options();
        opts.iterations = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn empty_environment_is_rejected() {
        let mut opts = options();
        opts.environment = String::new();
        assert!(opts.validate().is_err());
    }
}
