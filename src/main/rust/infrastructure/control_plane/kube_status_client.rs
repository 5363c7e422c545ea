use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, Result};
use crate::domain::ports::StatusReporter;
use crate::domain::value_objects::DevicePhase;

const EDGEDEVICE_API: &str = "apis/shifu.edgenesis.io/v1alpha1";
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Where the EdgeDevice resource lives and how to authenticate against it
#[derive(Debug, Clone)]
pub struct ControlPlaneSettings {
    pub api_host: String,
    pub api_port: u16,
    pub namespace: String,
    pub device_name: String,
    pub token_path: PathBuf,
    pub ca_path: PathBuf,
    pub request_timeout: Duration,
}

/// Merge-patch body that touches only the phase field
pub fn phase_patch(phase: DevicePhase) -> Value {
    json!({ "status": { "edgeDevicePhase": phase.as_str() } })
}

/// Reports phases by patching the EdgeDevice status subresource.
///
/// The bearer token is re-read on every call so rotated service-account
/// tokens are picked up without a restart.
pub struct KubeStatusClient {
    client: reqwest::Client,
    device_url: String,
    token_path: PathBuf,
}

impl KubeStatusClient {
    pub fn new(settings: &ControlPlaneSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(settings.request_timeout);

        match std::fs::read(&settings.ca_path) {
            Ok(pem) => {
                let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    DomainError::ControlPlaneReport(format!(
                        "invalid CA bundle {}: {}",
                        settings.ca_path.display(),
                        e
                    ))
                })?;
                builder = builder.add_root_certificate(cert);
            }
            Err(e) => {
                warn!(
                    path = %settings.ca_path.display(),
                    error = %e,
                    "Cluster CA not readable, falling back to system roots"
                );
            }
        }

        let client = builder
            .build()
            .map_err(|e| DomainError::ControlPlaneReport(e.to_string()))?;

        Ok(Self {
            client,
            device_url: device_url(settings),
            token_path: settings.token_path.clone(),
        })
    }

    pub fn status_url(&self) -> String {
        format!("{}/status", self.device_url)
    }

    async fn bearer(&self) -> Result<String> {
        let token = tokio::fs::read_to_string(&self.token_path)
            .await
            .map_err(|e| {
                DomainError::ControlPlaneReport(format!(
                    "cannot read token {}: {}",
                    self.token_path.display(),
                    e
                ))
            })?;
        Ok(format!("Bearer {}", token.trim()))
    }

    /// `spec.address` of the EdgeDevice, if it has one
    pub async fn fetch_device_address(&self) -> Result<Option<String>> {
        let device: Value = self
            .client
            .get(&self.device_url)
            .header(AUTHORIZATION, self.bearer().await?)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| DomainError::ControlPlaneReport(e.to_string()))?
            .json()
            .await
            .map_err(|e| DomainError::ControlPlaneReport(e.to_string()))?;

        Ok(device_address(&device))
    }
}

fn device_url(settings: &ControlPlaneSettings) -> String {
    format!(
        "https://{}:{}/{}/namespaces/{}/edgedevices/{}",
        settings.api_host,
        settings.api_port,
        EDGEDEVICE_API,
        settings.namespace,
        settings.device_name
    )
}

pub fn device_address(device: &Value) -> Option<String> {
    device
        .pointer("/spec/address")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl StatusReporter for KubeStatusClient {
    async fn report_phase(&self, phase: DevicePhase) -> Result<()> {
        let body = serde_json::to_vec(&phase_patch(phase))
            .map_err(|e| DomainError::ControlPlaneReport(e.to_string()))?;

        let response = self
            .client
            .patch(self.status_url())
            .header(AUTHORIZATION, self.bearer().await?)
            .header(CONTENT_TYPE, MERGE_PATCH)
            .body(body)
            .send()
            .await
            .map_err(|e| DomainError::ControlPlaneReport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DomainError::ControlPlaneReport(format!(
                "{} {}",
                status, detail
            )));
        }

        debug!(phase = %phase, "EdgeDevice status patched");
        Ok(())
    }
}
