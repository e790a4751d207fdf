use crate::constants::{api, network, readiness};
use crate::errors::RemoteError;
use crate::managers::readiness::InstanceStatusSource;
use crate::services::config::Config;
use crate::services::logger::Logger;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

const ERROR_PREVIEW_BYTES: usize = 512;

/// Read-only view of the Vast.ai instance API: lifecycle status and the SSH
/// entry point of a rented instance.
#[derive(Clone)]
pub struct VastClient {
    logger: Logger,
    client: Client,
    server_url: String,
    api_key: Option<String>,
}

impl VastClient {
    pub fn new(logger: Logger, config: &Config) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .user_agent(api::USER_AGENT)
            .timeout(Duration::from_millis(network::TIMEOUT_API_REQUEST_MS))
            .build()
            .map_err(|err| RemoteError::internal(format!("Failed to build HTTP client: {}", err)))?;
        Ok(Self {
            logger: logger.child("vast"),
            client,
            server_url: config.server_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn instance_url(&self, instance_id: u64) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&format!(
            "{}{}/instances/{}/",
            self.server_url,
            api::API_PREFIX,
            instance_id
        ))
        .map_err(|err| {
            RemoteError::invalid_params(format!("Invalid server URL {:?}: {}", self.server_url, err))
        })?;
        url.query_pairs_mut().append_pair("owner", "me");
        Ok(url)
    }

    /// `(ssh_host, ssh_port)` of the instance. Fails while the instance has
    /// not been assigned an SSH endpoint yet.
    pub async fn instance_ssh_endpoint(&self, instance_id: u64) -> Result<(String, u16), RemoteError> {
        let body = self.fetch_instance(instance_id).await?;
        ssh_endpoint_from(&body).ok_or_else(|| {
            RemoteError::invalid_params(format!("Instance {} has no SSH endpoint yet", instance_id))
                .with_hint("Wait for the instance to become ready (wait-ready) and retry.")
                .with_detail("instance_id", instance_id)
        })
    }

    async fn fetch_instance(&self, instance_id: u64) -> Result<Value, RemoteError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            RemoteError::invalid_params("Vast API key is not configured")
                .with_hint("Set VAST_API_KEY in the environment.")
        })?;
        let url = self.instance_url(instance_id)?;
        self.logger.debug(
            "Fetching instance",
            Some(&serde_json::json!({ "instance_id": instance_id })),
        );

        let response = self
            .client
            .get(url)
            .bearer_auth(api_key)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let preview = read_error_preview(response).await;
            let err = match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    RemoteError::auth(format!("Vast API rejected the API key (HTTP {})", status))
                }
                _ => RemoteError::connect(format!("Vast API returned HTTP {}", status)),
            };
            return Err(err
                .with_detail("instance_id", instance_id)
                .with_detail("body", preview));
        }
        response.json::<Value>().await.map_err(map_reqwest_error)
    }
}

#[async_trait]
impl InstanceStatusSource for VastClient {
    async fn query_instance_status(&self, instance_id: u64) -> Result<String, RemoteError> {
        let body = self.fetch_instance(instance_id).await?;
        Ok(status_from(&body))
    }
}

fn instance_of(body: &Value) -> Option<&Value> {
    body.get("instances").filter(|v| v.is_object())
}

fn status_from(body: &Value) -> String {
    instance_of(body)
        .and_then(|instance| instance.get("actual_status"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| readiness::STATUS_UNKNOWN.to_string())
}

fn ssh_endpoint_from(body: &Value) -> Option<(String, u16)> {
    let instance = instance_of(body)?;
    let host = instance
        .get("ssh_host")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    let port = instance.get("ssh_port").and_then(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    })?;
    let port = u16::try_from(port).ok().filter(|p| *p > 0)?;
    Some((host.to_string(), port))
}

async fn read_error_preview(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    let mut end = text.len().min(ERROR_PREVIEW_BYTES);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn map_reqwest_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        return RemoteError::timeout("Vast API request timed out");
    }
    RemoteError::connect(format!("Vast API request failed: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RemoteErrorKind;
    use serde_json::json;

    fn client(api_key: Option<&str>) -> VastClient {
        let mut config = Config::default().with_server_url("https://console.example.test/");
        if let Some(key) = api_key {
            config = config.with_api_key(key);
        }
        VastClient::new(Logger::new("test"), &config).expect("client")
    }

    #[test]
    fn instance_url_scopes_to_owner() {
        let url = client(None).instance_url(4242).expect("url");
        assert_eq!(
            url.as_str(),
            "https://console.example.test/api/v0/instances/4242/?owner=me"
        );
    }

    #[test]
    fn status_defaults_to_unknown() {
        assert_eq!(status_from(&json!({"instances": {"actual_status": "loading"}})), "loading");
        assert_eq!(status_from(&json!({"instances": {"actual_status": null}})), "unknown");
        assert_eq!(status_from(&json!({"instances": null})), "unknown");
        assert_eq!(status_from(&json!({})), "unknown");
    }

    #[test]
    fn ssh_endpoint_accepts_numeric_or_string_port() {
        let body = json!({"instances": {"ssh_host": "ssh4.vast.ai", "ssh_port": 31022}});
        assert_eq!(ssh_endpoint_from(&body), Some(("ssh4.vast.ai".to_string(), 31022)));
        let body = json!({"instances": {"ssh_host": "ssh4.vast.ai", "ssh_port": "31022"}});
        assert_eq!(ssh_endpoint_from(&body), Some(("ssh4.vast.ai".to_string(), 31022)));
        let body = json!({"instances": {"ssh_host": "", "ssh_port": 22}});
        assert_eq!(ssh_endpoint_from(&body), None);
        let body = json!({"instances": {"ssh_host": "h", "ssh_port": 70000}});
        assert_eq!(ssh_endpoint_from(&body), None);
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let err = client(None)
            .query_instance_status(1)
            .await
            .expect_err("no key");
        assert_eq!(err.kind, RemoteErrorKind::InvalidParams);
        assert!(err.hint.unwrap_or_default().contains("VAST_API_KEY"));
    }
}
