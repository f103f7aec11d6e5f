use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use super::error::MarketError;
use super::types::{
    ActivityCreated, ActivityRequest, CommandOutput, ExecRequest, Offer, ProviderId,
    SessionCreated, SessionRequest,
};
use super::{Activity, Marketplace};
use crate::config::MarketSettings;

/// Limit for control calls: sessions, offers, agreements.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(120);

/// Limit for file transfers and remote commands. The pipeline timeout is
/// usually shorter and ends them first.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(3600);

/// HTTP client for the marketplace gateway REST API.
pub struct GatewayClient {
    client: Client,
    base_url: String,
    app_key: String,
    session: OnceLock<String>,
}

impl GatewayClient {
    pub fn new(settings: &MarketSettings) -> Result<Self, MarketError> {
        Self::with_base_url(settings.gateway_url.clone(), settings.app_key.clone())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(base_url: String, app_key: String) -> Result<Self, MarketError> {
        Self::build(base_url, app_key, CONTROL_TIMEOUT)
    }

    fn build(base_url: String, app_key: String, control_timeout: Duration) -> Result<Self, MarketError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(control_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_key,
            session: OnceLock::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn session_id(&self) -> Result<&str, MarketError> {
        self.session
            .get()
            .map(String::as_str)
            .ok_or_else(|| MarketError::Session("no open session".into()))
    }
}

async fn check(response: Response) -> Result<Response, MarketError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(MarketError::NotFound(response.url().path().to_string()));
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(MarketError::Api {
        status: status.as_u16(),
        message,
    })
}

impl Marketplace for GatewayClient {
    type Activity = GatewayActivity;

    async fn open(&self, request: &SessionRequest) -> Result<(), MarketError> {
        if self.session.get().is_some() {
            return Err(MarketError::Session("session already open".into()));
        }
        let response = self
            .client
            .post(self.url("sessions"))
            .bearer_auth(&self.app_key)
            .json(request)
            .send()
            .await?;
        let created: SessionCreated = check(response).await?.json().await?;
        tracing::info!(session = %created.session_id, network = %request.network, budget = request.budget, "Marketplace session opened");
        self.session
            .set(created.session_id)
            .map_err(|_| MarketError::Session("session already open".into()))
    }

    async fn offers(&self) -> Result<Vec<Offer>, MarketError> {
        let sid = self.session_id()?;
        let response = self
            .client
            .get(self.url(&format!("sessions/{sid}/offers")))
            .bearer_auth(&self.app_key)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn engage(&self, offer: &Offer) -> Result<Self::Activity, MarketError> {
        let sid = self.session_id()?;
        let response = self
            .client
            .post(self.url(&format!("sessions/{sid}/activities")))
            .bearer_auth(&self.app_key)
            .json(&ActivityRequest {
                provider_id: &offer.provider_id,
            })
            .send()
            .await?;
        let created: ActivityCreated = check(response).await?.json().await?;
        Ok(GatewayActivity {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            app_key: self.app_key.clone(),
            id: created.activity_id,
            provider_id: offer.provider_id.clone(),
        })
    }

    async fn release(&self, activity: Self::Activity) -> Result<(), MarketError> {
        let response = self
            .client
            .delete(activity.url(""))
            .bearer_auth(&self.app_key)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), MarketError> {
        let Some(sid) = self.session.get() else {
            return Ok(());
        };
        let response = self
            .client
            .delete(self.url(&format!("sessions/{sid}")))
            .bearer_auth(&self.app_key)
            .send()
            .await?;
        check(response).await?;
        tracing::info!(session = %sid, "Marketplace session closed");
        Ok(())
    }
}

/// An activity created through the gateway.
pub struct GatewayActivity {
    client: Client,
    base_url: String,
    app_key: String,
    id: String,
    provider_id: ProviderId,
}

impl GatewayActivity {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn url(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("{}/activities/{}", self.base_url, self.id)
        } else {
            format!("{}/activities/{}/{suffix}", self.base_url, self.id)
        }
    }
}

impl Activity for GatewayActivity {
    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), MarketError> {
        let body = tokio::fs::read(local).await?;
        let response = self
            .client
            .put(self.url("files"))
            .bearer_auth(&self.app_key)
            .timeout(TRANSFER_TIMEOUT)
            .query(&[("path", remote)])
            .body(body)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn run(&self, script: &str) -> Result<CommandOutput, MarketError> {
        let response = self
            .client
            .post(self.url("exec"))
            .bearer_auth(&self.app_key)
            .timeout(TRANSFER_TIMEOUT)
            .json(&ExecRequest {
                command: ["/bin/sh", "-c", script],
            })
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), MarketError> {
        let response = self
            .client
            .get(self.url("files"))
            .bearer_auth(&self.app_key)
            .timeout(TRANSFER_TIMEOUT)
            .query(&[("path", remote)])
            .send()
            .await?;
        let bytes = check(response).await?.bytes().await?;
        tokio::fs::write(local, &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::market::types::Pricing;
    use crate::requirement::ComputeRequirement;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_bytes, body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_request() -> SessionRequest {
        SessionRequest {
            job_id: "job-1".into(),
            budget: 10.0,
            network: Network::Mumbai,
            payment_driver: "erc20".into(),
            subnet_tag: "public".into(),
            requirement: ComputeRequirement::new(8, 8, 8).unwrap(),
        }
    }

    fn offer(id: &str) -> Offer {
        Offer {
            provider_id: ProviderId::new(id),
            provider_name: String::new(),
            pricing: Pricing::default(),
        }
    }

    async fn open_session(server: &MockServer) -> GatewayClient {
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"session_id": "s1"})))
            .mount(server)
            .await;
        let client = GatewayClient::with_base_url(server.uri(), "secret".into()).unwrap();
        client.open(&session_request()).await.unwrap();
        client
    }

    async fn engaged(server: &MockServer, client: &GatewayClient) -> GatewayActivity {
        Mock::given(method("POST"))
            .and(path("/sessions/s1/activities"))
            .and(body_json(json!({"provider_id": "0xp1"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"activity_id": "a1"})))
            .mount(server)
            .await;
        client.engage(&offer("0xp1")).await.unwrap()
    }

    #[tokio::test]
    async fn open_then_list_offers() {
        let server = MockServer::start().await;
        let client = open_session(&server).await;
        Mock::given(method("GET"))
            .and(path("/sessions/s1/offers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"provider_id": "0xp1", "provider_name": "a", "pricing": {"fixed": 0.0, "cpu_per_sec": 0.0, "duration_per_sec": 0.0}},
                {"provider_id": "0xp2", "pricing": {"fixed": 0.5, "cpu_per_sec": 0.0, "duration_per_sec": 0.0}}
            ])))
            .mount(&server)
            .await;

        let offers = client.offers().await.unwrap();
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[1].provider_id, ProviderId::new("0xp2"));
        assert_eq!(offers[1].pricing.fixed, 0.5);
    }

    #[tokio::test]
    async fn open_reports_payment_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(402).set_body_string("insufficient funds"))
            .mount(&server)
            .await;
        let client = GatewayClient::with_base_url(server.uri(), "secret".into()).unwrap();
        match client.open(&session_request()).await {
            Err(MarketError::Api { status, message }) => {
                assert_eq!(status, 402);
                assert_eq!(message, "insufficient funds");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn offers_without_session_is_an_error() {
        let client = GatewayClient::with_base_url("http://127.0.0.1:9".into(), String::new()).unwrap();
        assert!(matches!(client.offers().await, Err(MarketError::Session(_))));
    }

    #[tokio::test]
    async fn second_open_is_rejected() {
        let server = MockServer::start().await;
        let client = open_session(&server).await;
        assert!(matches!(
            client.open(&session_request()).await,
            Err(MarketError::Session(_))
        ));
    }

    #[tokio::test]
    async fn engage_upload_run_download() {
        let server = MockServer::start().await;
        let client = open_session(&server).await;
        let activity = engaged(&server, &client).await;
        assert_eq!(activity.id(), "a1");
        assert_eq!(activity.provider_id(), &ProviderId::new("0xp1"));

        Mock::given(method("PUT"))
            .and(path("/activities/a1/files"))
            .and(query_param("path", "/golem/resources/archive.zip"))
            .and(body_bytes(b"ZIPDATA".to_vec()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/activities/a1/exec"))
            .and(body_json(json!({"command": ["/bin/sh", "-c", "echo hi"]})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"exit_code": 0, "stdout": "hi\n", "stderr": ""})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/activities/a1/files"))
            .and(query_param("path", "/golem/output/0007.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PNGDATA".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("archive.zip");
        std::fs::write(&archive, b"ZIPDATA").unwrap();
        activity
            .upload(&archive, "/golem/resources/archive.zip")
            .await
            .unwrap();

        let output = activity.run("echo hi").await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "hi\n");

        let frame = dir.path().join("0007.png");
        activity
            .download("/golem/output/0007.png", &frame)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&frame).unwrap(), b"PNGDATA");
    }

    #[tokio::test]
    async fn missing_output_is_not_found() {
        let server = MockServer::start().await;
        let client = open_session(&server).await;
        let activity = engaged(&server, &client).await;
        Mock::given(method("GET"))
            .and(path("/activities/a1/files"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let local = dir.path().join("0001.png");
        let err = activity
            .download("/golem/output/0001.png", &local)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::NotFound(_)));
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn release_and_close_delete_resources() {
        let server = MockServer::start().await;
        let client = open_session(&server).await;
        let activity = engaged(&server, &client).await;
        Mock::given(method("DELETE"))
            .and(path("/activities/a1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/sessions/s1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client.release(activity).await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn stalled_gateway_call_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"session_id": "s1"}))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;
        let client =
            GatewayClient::build(server.uri(), "secret".into(), Duration::from_millis(200)).unwrap();

        let err = client.open(&session_request()).await.unwrap_err();
        match err {
            MarketError::Network(e) => assert!(e.is_timeout()),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_without_session_is_a_no_op() {
        let client = GatewayClient::with_base_url("http://127.0.0.1:9".into(), String::new()).unwrap();
        assert!(client.close().await.is_ok());
    }
}
