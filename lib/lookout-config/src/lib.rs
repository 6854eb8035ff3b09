//! Primitives for working with typed and untyped configuration data.
#![deny(warnings)]
#![deny(missing_docs)]

use std::borrow::Cow;

use figment::{error::Kind, providers::Env, Figment};
use lookout_error::GenericError;
use serde::Deserialize;
use snafu::Snafu;

mod telemetry;
pub use self::telemetry::{EnabledEvents, TelemetryConfiguration};

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// Requested field was missing from the configuration.
    #[snafu(display("Missing field '{}' in configuration.", field))]
    MissingField {
        /// Name of the missing field.
        field: Cow<'static, str>,
    },

    /// Requested field's data type was not the expected data type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Name of the invalid field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Generic configuration error.
    #[snafu(display("Failed to query configuration."))]
    Generic {
        /// Error source.
        source: GenericError,
    },
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        match e.kind {
            Kind::MissingField(field) => Self::MissingField { field },
            Kind::InvalidType(actual_ty, expected_ty) => Self::InvalidFieldType {
                field: e.path.join("."),
                expected_ty,
                actual_ty: actual_ty.to_string(),
            },
            _ => Self::Generic { source: e.into() },
        }
    }
}

/// Untyped configuration data, loaded from the process environment.
///
/// Individual values, or the whole configuration, are deserialized on demand into typed views.
#[derive(Clone)]
pub struct GenericConfiguration {
    inner: Figment,
}

impl GenericConfiguration {
    /// Loads configuration from environment variables with the given prefix.
    ///
    /// The prefix is uppercased and has a trailing underscore appended, so a prefix of `lookout`
    /// matches variables such as `LOOKOUT_BATCH_SIZE`.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error is returned.
    pub fn from_environment(prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = format!("{}_", prefix.to_uppercase());
        Ok(Self {
            inner: Figment::new().merge(Env::prefixed(&prefix)),
        })
    }

    /// Deserializes the entire configuration as `T`.
    ///
    /// # Errors
    ///
    /// If a required field is missing, or a field's value cannot be deserialized, an error is
    /// returned.
    pub fn as_typed<'a, T: Deserialize<'a>>(&self) -> Result<T, ConfigurationError> {
        self.inner.extract().map_err(Into::into)
    }

    /// Gets a typed value from the configuration.
    ///
    /// # Errors
    ///
    /// If the key is missing, or the value cannot be deserialized as `T`, an error is returned.
    pub fn get_typed<'a, T: Deserialize<'a>>(&self, key: &str) -> Result<T, ConfigurationError> {
        self.inner.extract_inner(key).map_err(Into::into)
    }

    /// Gets a typed value from the configuration, if it exists.
    ///
    /// # Errors
    ///
    /// If the key exists but the value cannot be deserialized as `T`, an error is returned.
    /// A missing key resolves to `None`.
    pub fn try_get_typed<'a, T: Deserialize<'a>>(&self, key: &str) -> Result<Option<T>, ConfigurationError> {
        match self.inner.extract_inner(key) {
            Ok(value) => Ok(Some(value)),
            Err(e) => match e.kind {
                Kind::MissingField(_) => Ok(None),
                _ => Err(e.into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prefix_rejected() {
        assert!(matches!(
            GenericConfiguration::from_environment(""),
            Err(ConfigurationError::EmptyPrefix)
        ));
    }

    #[test]
    fn typed_lookup_from_environment() {
        std::env::set_var("LOOKOUT_CFGTEST_BATCH_SIZE", "25");

        let config = GenericConfiguration::from_environment("lookout_cfgtest").unwrap();
        let batch_size: usize = config.get_typed("batch_size").unwrap();
        assert_eq!(batch_size, 25);

        let missing: Option<String> = config.try_get_typed("nonexistent").unwrap();
        assert_eq!(missing, None);
    }
}
