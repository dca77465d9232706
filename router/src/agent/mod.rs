//! ノードエージェントクライアント
//!
//! クラスタビューとスケジューラがノードエージェントに対して行う呼び出し。
//! 同じ `reqwest` クライアントをプロキシエンジンとも共有する。

use bytes::Bytes;
use fleet_common::{
    error::{RouterError, RouterResult},
    protocol::{AgentInfo, CreateResponse},
    types::{ContainerConfig, ContainerSummary, ImageSummary},
};
use reqwest::{Client, StatusCode};
use rustls::ClientConfig;
use serde::{de::DeserializeOwned, Deserialize};
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// 一覧取得・変更系呼び出しのタイムアウト（中継やストリーミングには適用しない）
const REQUEST_TIMEOUT_SECS: u64 = 10;
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// ノードエージェントクライアント
#[derive(Clone)]
pub struct AgentClient {
    http_client: Client,
    scheme: &'static str,
}

/// クラスタが保持する `GET /containers/{id}/json` の一部
#[derive(Debug, Deserialize)]
struct InspectExecIds {
    #[serde(rename = "ExecIDs", default)]
    exec_ids: Option<Vec<String>>,
}

impl AgentClient {
    /// クライアントを作成（`tls` 指定時はTLSで接続）
    pub fn new(tls: Option<Arc<ClientConfig>>) -> RouterResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS));
        let scheme = match tls {
            Some(config) => {
                builder = builder.use_preconfigured_tls((*config).clone());
                "https"
            }
            None => "http",
        };
        let http_client = builder
            .build()
            .map_err(|e| RouterError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            scheme,
        })
    }

    /// 内部のHTTPクライアント
    pub fn http(&self) -> &Client {
        &self.http_client
    }

    /// `addr` のエージェント上の `path_and_query` の絶対URL
    pub fn url(&self, addr: &str, path_and_query: &str) -> String {
        format!("{}://{}{}", self.scheme, addr, path_and_query)
    }

    /// `GET /info`
    pub async fn info(&self, addr: &str) -> RouterResult<AgentInfo> {
        self.get_json(addr, "/info").await
    }

    /// `GET /containers/json?all=1`
    pub async fn list_containers(&self, addr: &str) -> RouterResult<Vec<ContainerSummary>> {
        self.get_json(addr, "/containers/json?all=1").await
    }

    /// `GET /images/json`
    pub async fn list_images(&self, addr: &str) -> RouterResult<Vec<ImageSummary>> {
        self.get_json(addr, "/images/json").await
    }

    /// `GET /containers/{id}/json`（ステータスとボディを加工せず返す）
    pub async fn inspect_container_raw(
        &self,
        addr: &str,
        id: &str,
    ) -> RouterResult<(StatusCode, Bytes)> {
        let url = self.url(addr, &format!("/containers/{}/json", id));
        debug!("Inspecting container: {}", url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| upstream(addr, e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| upstream(addr, e))?;
        Ok((status, body))
    }

    /// コンテナのexecインスタンス一覧。エージェントが既に知らなければ `None`
    pub async fn container_exec_ids(
        &self,
        addr: &str,
        id: &str,
    ) -> RouterResult<Option<Vec<String>>> {
        let (status, body) = self.inspect_container_raw(addr, id).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RouterError::Upstream(format!(
                "Failed to inspect container {} on {}: HTTP {}",
                id, addr, status
            )));
        }
        let inspect: InspectExecIds = serde_json::from_slice(&body).map_err(|e| {
            RouterError::Upstream(format!("Malformed inspect response from {}: {}", addr, e))
        })?;
        Ok(Some(inspect.exec_ids.unwrap_or_default()))
    }

    /// `POST /containers/create?name=`
    pub async fn create_container(
        &self,
        addr: &str,
        config: &ContainerConfig,
        name: &str,
    ) -> RouterResult<CreateResponse> {
        let mut request = self
            .http_client
            .post(self.url(addr, "/containers/create"))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(config);
        if !name.is_empty() {
            request = request.query(&[("name", name)]);
        }
        let response = request.send().await.map_err(|e| upstream(addr, e))?;
        let response = error_for_status(addr, response).await?;
        response.json().await.map_err(|e| upstream(addr, e))
    }

    /// `DELETE /containers/{id}?force=`
    pub async fn remove_container(&self, addr: &str, id: &str, force: bool) -> RouterResult<()> {
        let response = self
            .http_client
            .delete(self.url(addr, &format!("/containers/{}", id)))
            .query(&[("force", if force { "1" } else { "0" })])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| upstream(addr, e))?;
        error_for_status(addr, response).await?;
        Ok(())
    }

    /// `GET /events`（開いたままのストリーミングレスポンスを返す）
    pub async fn events(&self, addr: &str) -> RouterResult<reqwest::Response> {
        let response = self
            .http_client
            .get(self.url(addr, "/events"))
            .send()
            .await
            .map_err(|e| upstream(addr, e))?;
        error_for_status(addr, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, addr: &str, path: &str) -> RouterResult<T> {
        let url = self.url(addr, path);
        debug!("Fetching from agent: {}", url);
        let response = self
            .http_client
            .get(&url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| upstream(addr, e))?;
        let response = error_for_status(addr, response).await?;
        response.json().await.map_err(|e| upstream(addr, e))
    }
}

fn upstream(addr: &str, err: reqwest::Error) -> RouterError {
    RouterError::Upstream(format!("Node agent {} request failed: {}", addr, err))
}

/// 2xx以外のエージェント応答を、エージェントのメッセージ付きエラーに変換
async fn error_for_status(
    addr: &str,
    response: reqwest::Response,
) -> RouterResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.to_string()
    } else {
        body.trim().to_string()
    };
    Err(RouterError::Upstream(format!(
        "Node agent {} returned HTTP {}: {}",
        addr,
        status.as_u16(),
        message
    )))
}
