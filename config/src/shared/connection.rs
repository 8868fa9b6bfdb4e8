use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::shared::ValidationError;

/// Session settings applied to every destination connection so values round-trip predictably.
const SESSION_OPTIONS: &[(&str, &str)] = &[
    ("datestyle", "ISO"),
    ("intervalstyle", "postgres"),
    ("extra_float_digits", "3"),
    ("client_encoding", "UTF8"),
    ("timezone", "UTC"),
];

/// Connection settings for the destination Postgres database.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Name of the database holding the replicated tables and the checkpoint table.
    pub name: String,
    pub username: String,
    /// Redacted in debug output.
    pub password: Option<SecretString>,
    #[serde(default)]
    pub tls: TlsConfig,
}

/// TLS settings for destination connections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    /// Returns [`ValidationError::MissingTrustedRootCerts`] if TLS is enabled without certificates.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tls.validate()
    }
}

/// Converts a connection config into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options for the server without selecting a database.
    fn without_db(&self) -> Output;

    /// Options for the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<PgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            PgSslMode::VerifyFull
        } else {
            PgSslMode::Prefer
        };

        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .ssl_mode(ssl_mode)
            .options(SESSION_OPTIONS.iter().copied());

        if self.tls.enabled {
            options = options.ssl_root_cert_from_pem(self.tls.trusted_root_certs.as_bytes().to_vec());
        }

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }

    fn with_db(&self) -> PgConnectOptions {
        let options: PgConnectOptions = self.without_db();
        options.database(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_config() -> PgConnectionConfig {
        PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "warehouse".to_string(),
            username: "replicator".to_string(),
            password: Some(SecretString::new("hunter2".to_string())),
            tls: TlsConfig::default(),
        }
    }

    #[test]
    fn tls_without_certificates_is_rejected() {
        let mut config = connection_config();
        config.tls.enabled = true;

        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingTrustedRootCerts)
        ));
    }

    #[test]
    fn password_is_redacted_in_debug_output() {
        let rendered = format!("{:?}", connection_config());

        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn with_db_selects_the_database() {
        let options: PgConnectOptions = connection_config().with_db();

        assert_eq!(options.get_database(), Some("warehouse"));
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5432);
    }
}
