//! Credential broker - registry tokens held in memory only

use crate::cloud::RegistryApi;
use crate::core::DeployError;
use crate::remote::RemoteSession;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// Short-lived registry credential, never serialized
#[derive(Debug, Clone)]
pub struct RegistryToken {
    username: String,
    password: SecretString,
    expires_at: DateTime<Utc>,
}

impl RegistryToken {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<SecretString>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            expires_at,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_empty(&self) -> bool {
        self.password.expose_secret().is_empty()
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::minutes(EXPIRY_MARGIN_MINUTES) > now
    }
}

/// Registry host part of a repository URI
pub fn registry_host(registry_uri: &str) -> &str {
    registry_uri.split('/').next().unwrap_or(registry_uri)
}

/// Obtains and caches registry tokens
pub struct CredentialBroker {
    registry: Arc<dyn RegistryApi>,
    cached: Mutex<Option<RegistryToken>>,
}

impl CredentialBroker {
    pub fn new(registry: Arc<dyn RegistryApi>) -> Self {
        Self {
            registry,
            cached: Mutex::new(None),
        }
    }

    /// Token for the registry, exchanged once and reused until near expiry
    pub async fn authenticate(&self, registry_uri: &str) -> Result<RegistryToken, DeployError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                debug!("Reusing cached token for {}", registry_host(registry_uri));
                return Ok(token.clone());
            }
        }

        info!("Requesting registry token for {}", registry_host(registry_uri));
        let token = self
            .registry
            .get_token()
            .await
            .map_err(|e| DeployError::Publish(format!("token exchange failed: {}", e)))?;
        if token.is_empty() {
            return Err(DeployError::Publish("registry returned an empty token".to_string()));
        }

        *cached = Some(token.clone());
        Ok(token)
    }

    /// Log the host's container runtime into the registry.
    ///
    /// The password travels on stdin only. Logging in again is harmless.
    pub async fn login_to_registry(
        &self,
        session: &dyn RemoteSession,
        docker: &str,
        registry_uri: &str,
        token: &RegistryToken,
    ) -> Result<(), DeployError> {
        let host = registry_host(registry_uri);
        let command = format!(
            "{} login --username {} --password-stdin {}",
            docker,
            crate::core::shell_quote(token.username()),
            crate::core::shell_quote(host)
        );

        let output = session
            .exec(&command, Some(token.password.expose_secret().as_bytes()))
            .await
            .map_err(|e| DeployError::Connectivity {
                host: session.address().to_string(),
                message: e.to_string(),
            })?;

        if !output.success() {
            return Err(DeployError::Operation {
                host: session.address().to_string(),
                operation: "registry-login".to_string(),
                message: output.failure_detail(),
            });
        }

        info!("{} logged in to {}", session.address(), host);
        Ok(())
    }
}
