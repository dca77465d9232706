//! プロキシエンジン
//!
//! クライアントのリクエストをノードエージェントへ転送し、応答を中継する。
//! 通常のリクエストは共有の `reqwest` クライアントを通り、attachとexecの
//! セッションは生の接続を使う（[`raw`] と [`hijack`] を参照）。

pub mod hijack;
pub mod raw;
pub mod transport;

use crate::agent::AgentClient;
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, HeaderName, Request, StatusCode},
    response::Response,
};
use fleet_common::error::{RouterError, RouterResult};
use futures::TryStreamExt;
use rustls::ClientConfig;
use std::{io, sync::Arc};
use tracing::debug;
use transport::NodeConnector;

/// 通常の中継でバッファするリクエストボディの上限
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024 * 1024;

/// 接続単位のヘッダー（転送しない）
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// プロキシエンジン
#[derive(Clone)]
pub struct ProxyEngine {
    client: AgentClient,
    connector: NodeConnector,
}

impl ProxyEngine {
    /// 通常の呼び出しは `client` を共有し、双方向セッションは `tls` があれば使う
    pub fn new(client: AgentClient, tls: Option<Arc<ClientConfig>>) -> Self {
        Self {
            client,
            connector: NodeConnector::new(tls),
        }
    }

    /// `request` を `path_and_query` として `addr` のエージェントへ送り、
    /// 応答をストリーミングで返す
    pub async fn forward(
        &self,
        addr: &str,
        request: Request<Body>,
        path_and_query: &str,
    ) -> RouterResult<Response> {
        let (parts, body) = request.into_parts();
        let body = to_bytes(body, MAX_REQUEST_BODY_BYTES)
            .await
            .map_err(|e| RouterError::ClientInput(format!("Failed to read request body: {}", e)))?;

        let url = self.client.url(addr, path_and_query);
        debug!(method = %parts.method, url = %url, "Proxying request");

        let response = self
            .client
            .http()
            .request(parts.method, &url)
            .headers(forwardable_headers(&parts.headers))
            .body(body)
            .send()
            .await
            .map_err(|e| RouterError::Upstream(format!("Failed to proxy to {}: {}", addr, e)))?;

        forward_streaming_response(response)
    }
}

/// 上流へ転送するリクエストヘッダー
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

/// 上流レスポンスを中継（ステータス、エンドツーエンドヘッダー、ストリーミングボディ）
pub(crate) fn forward_streaming_response(response: reqwest::Response) -> RouterResult<Response> {
    let status = response.status();
    let headers = response.headers().clone();
    let stream = response.bytes_stream().map_err(io::Error::other);

    let mut proxied = Response::new(Body::from_stream(stream));
    *proxied.status_mut() = StatusCode::from_u16(status.as_u16())
        .map_err(|e| RouterError::Upstream(format!("Invalid upstream status: {}", e)))?;
    let response_headers = proxied.headers_mut();
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        response_headers.append(name.clone(), value.clone());
    }
    Ok(proxied)
}
