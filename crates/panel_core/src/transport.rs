use async_trait::async_trait;
use reqwest::Client;
use shared::protocol::{ControlRequest, ControlResponse, DeviceStatus};
use tracing::debug;
use url::Url;

use crate::error::TransportError;

pub const CONTROL_PATH: &str = "control";
pub const STATUS_PATH: &str = "status";

/// The device as seen from the panel: a command sink plus a status source.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn send_command(&self, request: &ControlRequest)
        -> Result<ControlResponse, TransportError>;
    async fn fetch_status(&self) -> Result<DeviceStatus, TransportError>;
}

pub struct HttpDeviceTransport {
    http: Client,
    control_url: Url,
    status_url: Url,
}

impl HttpDeviceTransport {
    pub fn new(base_url: &Url) -> Result<Self, url::ParseError> {
        let mut base = base_url.clone();
        base.set_query(None);
        base.set_fragment(None);
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            control_url: base.join(CONTROL_PATH)?,
            status_url: base.join(STATUS_PATH)?,
        })
    }

    pub fn control_url(&self) -> &Url {
        &self.control_url
    }

    pub fn status_url(&self) -> &Url {
        &self.status_url
    }
}

#[async_trait]
impl DeviceTransport for HttpDeviceTransport {
    async fn send_command(
        &self,
        request: &ControlRequest,
    ) -> Result<ControlResponse, TransportError> {
        debug!(action = request.action(), url = %self.control_url, "posting control command");
        let response = self
            .http
            .post(self.control_url.clone())
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn fetch_status(&self) -> Result<DeviceStatus, TransportError> {
        let response = self
            .http
            .get(self.status_url.clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}
