use std::{fmt, num::ParseIntError, time::Duration};

use clap::Args;
use garde::Validate;

use crate::{Error, Result};

pub const PUBLIC_CLOUD_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const PUBLIC_CLOUD_RESOURCE_MANAGER: &str = "https://management.azure.com";

/// Service principal used to call the Compute API.
#[derive(Clone, Args, Validate)]
pub struct AzureConfig {
    #[arg(long, env = "AZURE_CLIENTID")]
    #[garde(length(min = 1))]
    pub client_id: String,
    #[arg(long, env = "AZURE_CLIENTSECRET", hide_env_values = true)]
    #[garde(length(min = 1))]
    pub client_secret: String,
    #[arg(long, env = "AZURE_SUBSCRIPTIONID")]
    #[garde(length(min = 1))]
    pub subscription_id: String,
    #[arg(long, env = "AZURE_TENANTID")]
    #[garde(length(min = 1))]
    pub tenant_id: String,
    #[arg(long, env = "AZURE_AUTHORITY_HOST", default_value = PUBLIC_CLOUD_AUTHORITY)]
    #[garde(length(min = 1))]
    pub authority_host: String,
    #[arg(
        long,
        env = "AZURE_RESOURCE_MANAGER_ENDPOINT",
        default_value = PUBLIC_CLOUD_RESOURCE_MANAGER
    )]
    #[garde(length(min = 1))]
    pub resource_manager_endpoint: String,
    /// HTTP timeout for token and Compute API requests, in seconds
    #[arg(long = "request-timeout-secs", value_parser = parse_seconds, default_value = "30")]
    #[garde(skip)]
    pub request_timeout: Duration,
}

impl AzureConfig {
    /// Public cloud configuration for the given service principal.
    pub fn public_cloud(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        subscription_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            subscription_id: subscription_id.into(),
            tenant_id: tenant_id.into(),
            authority_host: PUBLIC_CLOUD_AUTHORITY.to_string(),
            resource_manager_endpoint: PUBLIC_CLOUD_RESOURCE_MANAGER.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Reject configurations with missing credential values.
    pub fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(|report| Error::Credential(format!("invalid Azure configuration: {report}")))?;
        Ok(self)
    }
}

impl fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("authority_host", &self.authority_host)
            .field("resource_manager_endpoint", &self.resource_manager_endpoint)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Args)]
pub struct RemediationConfig {
    /// Deadline for each fetch or update call, in seconds
    #[arg(long = "call-timeout-secs", value_parser = parse_seconds, default_value = "60")]
    pub call_timeout: Duration,
    /// Log the detach instead of submitting it
    #[arg(long)]
    pub dry_run: bool,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            dry_run: false,
        }
    }
}

pub(crate) fn parse_seconds(value: &str) -> Result<Duration, ParseIntError> {
    value.parse().map(Duration::from_secs)
}
