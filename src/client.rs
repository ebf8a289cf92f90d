use crate::http::SetConfigRequest;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("ошибка запроса к демону: {0}")]
    Request(#[from] reqwest::Error),
    #[error("демон ответил {status}: {message}")]
    Status { status: StatusCode, message: String },
}

pub struct ControlClient {
    http: Client,
    base: String,
}

impl ControlClient {
    pub fn new(addr: &str) -> Result<Self, ClientError> {
        let http = Client::builder()
            .user_agent(concat!("healthcheckd/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(300))
            .build()?;
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        Ok(Self { http, base })
    }

    pub async fn run_all(&self) -> Result<Value, ClientError> {
        self.post("/api/run/all").await
    }

    pub async fn run_check(&self, name: &str) -> Result<Value, ClientError> {
        self.post(&format!("/api/run/check/{name}")).await
    }

    pub async fn run_needed(&self) -> Result<Value, ClientError> {
        self.post("/api/run/needed").await
    }

    pub async fn score(&self) -> Result<Value, ClientError> {
        let response = self.http.get(self.url("/api/score")).send().await?;
        decode(response).await
    }

    pub async fn get_config(&self, path: &str) -> Result<Value, ClientError> {
        let response = self
            .http
            .get(self.url("/api/config"))
            .query(&[("path", path)])
            .send()
            .await?;
        decode(response).await
    }

    pub async fn set_config(&self, path: &str, value: serde_yaml::Value) -> Result<(), ClientError> {
        let request = SetConfigRequest {
            path: path.to_string(),
            value,
        };
        let response = self
            .http
            .put(self.url("/api/config"))
            .json(&request)
            .send()
            .await?;
        decode(response).await.map(|_| ())
    }

    pub async fn quit(&self) -> Result<Value, ClientError> {
        self.post("/api/quit").await
    }

    async fn post(&self, path: &str) -> Result<Value, ClientError> {
        let response = self.http.post(self.url(path)).send().await?;
        decode(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

async fn decode(response: Response) -> Result<Value, ClientError> {
    let status = response.status();
    let text = response.text().await?;
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(text);
        return Err(ClientError::Status { status, message });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigTree;
    use crate::http::{build_router, ControlState};
    use crate::manager::TestManager;
    use crate::metrics::Metrics;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::watch;

    #[tokio::test]
    async fn client_drives_a_live_daemon() {
        let tree = ConfigTree::from_yaml(
            r#"
checks:
  fast:
    command: "echo 20"
    coeff: 2
  slow:
    command: "echo 80"
    coeff: 2
checks_to_perform: [fast, slow]
"#,
            "test.yaml",
        )
        .expect("разбор YAML");
        let manager = TestManager::new(tree).expect("создание менеджера");
        let published = manager.subscribe();
        let (tx, mut rx) = watch::channel(false);
        let router = build_router(ControlState {
            metrics: Metrics::new().expect("инициализация метрик"),
            manager: manager.shared(),
            published,
            shutdown: Arc::new(tx),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("адрес");
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = rx.changed().await;
                })
                .await
        });

        let client = ControlClient::new(&addr.to_string()).expect("клиент");

        let err = client.run_needed().await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status, .. } if status == StatusCode::CONFLICT));

        assert_eq!(client.run_all().await.unwrap()["score"], json!(50.0));
        assert_eq!(client.score().await.unwrap()["ready"], json!(true));

        client
            .set_config("checks/disk_usage/disk_test_path", serde_yaml::Value::from("/tmp"))
            .await
            .unwrap();
        assert_eq!(
            client.get_config("checks/disk_usage/disk_test_path").await.unwrap(),
            json!("/tmp")
        );

        let err = client.run_check("missing").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Status { status, message } if status == StatusCode::NOT_FOUND && message.contains("missing")
        ));

        client.quit().await.unwrap();
        drop(client);
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("сервер остановлен")
            .expect("задача сервера")
            .expect("сервер без ошибок");
    }
}
