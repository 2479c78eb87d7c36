//! Runtime environment detection.
//!
//! Provides a single source of truth for the runtime environment based on
//! the `POLBRIDGE_ENV` environment variable.
//!
//! # Environment Variable
//!
//! Set `POLBRIDGE_ENV` to one of:
//! - `test` - Test mode
//! - `development` or `dev` - Development mode (verbose script errors)
//! - (anything else or unset) - Production mode

/// Runtime environment for the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment.
    Test,
}

impl Environment {
    /// Detect current environment from `POLBRIDGE_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("POLBRIDGE_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the production environment.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Whether `err` replies for failed scripts include the error text.
    /// Production replies name only the script path.
    #[must_use]
    pub fn verbose_script_errors(self) -> bool {
        !self.is_production()
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}
