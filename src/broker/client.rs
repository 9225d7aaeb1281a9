use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

use super::Broker;
use super::error::BrokerError;
use super::types::{ApplyRequest, ApplyResponse, BrokerStatus, TaskResultResponse};
use crate::config::BrokerConfig;

/// Broker client for a Flower-style REST gateway in front of the task queue.
///
/// Build one at start-up and share it behind an `Arc`; the underlying
/// reqwest client pools connections.
pub struct HttpBroker {
    client: Client,
    base_url: String,
}

impl HttpBroker {
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(BrokerError::unavailable)?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn describe(response: Response) -> String {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unreadable body".to_string());
    format!("gateway returned {}: {}", status.as_u16(), body.trim())
}

impl Broker for HttpBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        let response = self
            .client
            .get(self.url("/healthcheck"))
            .send()
            .await
            .map_err(BrokerError::unavailable)?;
        if !response.status().is_success() {
            return Err(BrokerError::Unavailable(describe(response).await));
        }
        Ok(())
    }

    async fn enqueue(&self, task: &str, args: Vec<Value>) -> Result<String, BrokerError> {
        let response = self
            .client
            .post(self.url(&format!("/api/task/async-apply/{task}")))
            .json(&ApplyRequest { args })
            .send()
            .await
            .map_err(BrokerError::unavailable)?;

        if !response.status().is_success() {
            return Err(BrokerError::Unavailable(describe(response).await));
        }

        let body = response
            .json::<ApplyResponse>()
            .await
            .map_err(|e| BrokerError::Malformed(e.to_string()))?;
        Ok(body.task_id)
    }

    async fn status(&self, job_id: &str) -> Result<BrokerStatus, BrokerError> {
        let response = self
            .client
            .get(self.url(&format!("/api/task/result/{job_id}")))
            .send()
            .await
            .map_err(BrokerError::transient)?;

        // Flower answers 404 for ids the result store has never seen.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(BrokerStatus::Pending);
        }
        if !response.status().is_success() {
            return Err(BrokerError::TransientQuery(describe(response).await));
        }

        let body = response
            .json::<TaskResultResponse>()
            .await
            .map_err(|e| BrokerError::Malformed(e.to_string()))?;
        body.into_status()
    }

    async fn cancel(&self, job_id: &str) -> Result<(), BrokerError> {
        let response = self
            .client
            .post(self.url(&format!("/api/task/revoke/{job_id}")))
            .query(&[("terminate", "true")])
            .send()
            .await
            .map_err(BrokerError::unavailable)?;
        if !response.status().is_success() {
            return Err(BrokerError::Unavailable(describe(response).await));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn broker_for(server: &MockServer) -> HttpBroker {
        let config = BrokerConfig {
            url: format!("{}/", server.uri()),
            ..BrokerConfig::default()
        };
        HttpBroker::new(&config).unwrap()
    }

    #[tokio::test]
    async fn base_url_drops_trailing_slash() {
        let server = MockServer::start().await;
        let broker = broker_for(&server);
        assert_eq!(broker.base_url(), server.uri());
    }

    #[tokio::test]
    async fn enqueue_posts_args_and_returns_task_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/task/async-apply/convert_pdf_to_markdown"))
            .and(body_json(json!({"args": ["a.pdf", "JVBERg=="]})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"task-id": "task-1", "state": "PENDING"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let broker = broker_for(&server);
        let id = broker
            .enqueue(
                "convert_pdf_to_markdown",
                vec![json!("a.pdf"), json!("JVBERg==")],
            )
            .await
            .unwrap();
        assert_eq!(id, "task-1");
    }

    #[tokio::test]
    async fn enqueue_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("no workers"))
            .mount(&server)
            .await;

        let broker = broker_for(&server);
        let err = broker.enqueue("convert", vec![]).await.unwrap_err();
        assert_eq!(
            err,
            BrokerError::Unavailable("gateway returned 503: no workers".into())
        );
    }

    #[tokio::test]
    async fn status_decodes_success_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/task/result/task-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "task-id": "task-1",
                "state": "SUCCESS",
                "result": {"filename": "a.pdf", "markdown": "# A"}
            })))
            .mount(&server)
            .await;

        let broker = broker_for(&server);
        let status = broker.status("task-1").await.unwrap();
        assert_eq!(
            status,
            BrokerStatus::Success(json!({"filename": "a.pdf", "markdown": "# A"}))
        );
    }

    #[tokio::test]
    async fn status_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let broker = broker_for(&server);
        let err = broker.status("task-1").await.unwrap_err();
        assert!(matches!(err, BrokerError::TransientQuery(_)));
    }

    #[tokio::test]
    async fn status_unknown_id_reads_as_pending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let broker = broker_for(&server);
        assert_eq!(broker.status("nope").await.unwrap(), BrokerStatus::Pending);
    }

    #[tokio::test]
    async fn status_garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let broker = broker_for(&server);
        let err = broker.status("task-1").await.unwrap_err();
        assert!(matches!(err, BrokerError::Malformed(_)));
    }

    #[tokio::test]
    async fn cancel_revokes_with_terminate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/task/revoke/task-1"))
            .and(query_param("terminate", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let broker = broker_for(&server);
        broker.cancel("task-1").await.unwrap();
    }

    #[tokio::test]
    async fn ping_hits_healthcheck() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthcheck"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let broker = broker_for(&server);
        broker.ping().await.unwrap();
    }

    #[tokio::test]
    async fn ping_unreachable_is_unavailable() {
        let config = BrokerConfig {
            url: "http://127.0.0.1:9".into(),
            ..BrokerConfig::default()
        };
        let broker = HttpBroker::new(&config).unwrap();
        let err = broker.ping().await.unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
    }
}
