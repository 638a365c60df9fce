//! Compute API client for scale-set virtual machines.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header::IF_MATCH};
use tracing::debug;

use super::{credential::AzureCredential, models::ScaleSetVm};
use crate::{
    Error, Result,
    config::AzureConfig,
    inventory::{InstanceRef, ScaleSetInventory},
};

/// Azure API version for Compute.
const COMPUTE_API_VERSION: &str = "2023-09-01";

pub struct ComputeClient {
    http: Client,
    credential: AzureCredential,
    resource_manager_endpoint: String,
    subscription_id: String,
}

impl ComputeClient {
    /// Build a client for the subscription in `config`.
    ///
    /// # Errors
    /// Returns [`Error::Credential`] if a credential value is missing or the
    /// HTTP client cannot be created.
    pub fn new(config: &AzureConfig) -> Result<Self> {
        let config = config.clone().validated()?;
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Credential(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            credential: AzureCredential::new(http.clone(), &config),
            http,
            resource_manager_endpoint: config
                .resource_manager_endpoint
                .trim_end_matches('/')
                .to_string(),
            subscription_id: config.subscription_id,
        })
    }

    fn instance_url(&self, instance: &InstanceRef) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}/virtualMachines/{}?api-version={}",
            self.resource_manager_endpoint,
            self.subscription_id,
            instance.resource_group,
            instance.scale_set_name,
            instance.instance_id,
            COMPUTE_API_VERSION
        )
    }

    async fn send(&self, request: RequestBuilder, instance: &InstanceRef) -> Result<Response> {
        let token = self.credential.token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::TransientProvider(format!("request for {instance} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(%instance, %status, body = %body, "Compute API returned an error");
        Err(match status {
            StatusCode::NOT_FOUND => Error::NotFound(instance.to_string()),
            StatusCode::PRECONDITION_FAILED => Error::TransientProvider(format!(
                "{instance} changed since it was fetched"
            )),
            _ => Error::TransientProvider(format!("{instance}: {status}: {body}")),
        })
    }
}

#[async_trait]
impl ScaleSetInventory for ComputeClient {
    async fn get_instance(&self, instance: &InstanceRef) -> Result<ScaleSetVm> {
        let url = self.instance_url(instance);
        debug!(url = %url, "GET request");

        let response = self.send(self.http.get(&url), instance).await?;
        response.json().await.map_err(|e| {
            Error::TransientProvider(format!("malformed model for {instance}: {e}"))
        })
    }

    async fn update_instance(&self, instance: &InstanceRef, vm: &ScaleSetVm) -> Result<()> {
        let url = self.instance_url(instance);
        debug!(url = %url, "PUT request");

        let mut request = self.http.put(&url).json(vm);
        if let Some(etag) = &vm.etag {
            request = request.header(IF_MATCH, etag);
        }

        self.send(request, instance).await?;
        Ok(())
    }
}
