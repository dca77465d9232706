//! 対話セッションの双方向プロキシ
//!
//! 接続受付時にソケットを引き取ったセッションは [`super::raw`] を通る。
//! 他のリクエストを運んだ後の接続で届いたattach / exec startは、ここで専用の
//! HTTP/1.1接続を使って送る。エージェントがプロトコルを切り替えた場合は
//! アップグレード済みの両接続を [`relay`] に渡し、それ以外は通常の
//! レスポンスとしてストリーミングで返す。

use super::{is_hop_by_hop, ProxyEngine};
use axum::{
    body::Body,
    http::{header, HeaderValue, Request, StatusCode},
    response::Response,
};
use fleet_common::error::{RouterError, RouterResult};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// セッションを終了させた側
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// クライアント→エージェント方向が先に終了
    Client,
    /// エージェント→クライアント方向が先に終了
    Upstream,
}

/// リレーセッションの終了結果
#[derive(Debug)]
pub struct RelayOutcome {
    /// 先に終了した方向
    pub closed_by: Side,
    /// その方向に転送したバイト数、または終了原因のエラー
    pub transferred: io::Result<u64>,
}

impl ProxyEngine {
    /// attach / exec startを中継し、エージェントがプロトコルを切り替えたら
    /// 生の双方向ストリームに移行する
    pub async fn hijack(
        &self,
        addr: &str,
        mut request: Request<Body>,
        path_and_query: &str,
    ) -> RouterResult<Response> {
        let client_upgrade = hyper::upgrade::on(&mut request);

        let stream = self.connector.connect(addr).await?;
        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| RouterError::Upstream(format!("Handshake with {} failed: {}", addr, e)))?;
        let conn_addr = addr.to_string();
        tokio::spawn(async move {
            if let Err(err) = connection.with_upgrades().await {
                debug!(addr = %conn_addr, error = %err, "Hijacked connection closed");
            }
        });

        let (parts, body) = request.into_parts();
        let mut upstream_request = Request::builder()
            .method(parts.method)
            .uri(path_and_query)
            .body(body)
            .map_err(|e| RouterError::Internal(format!("Failed to build request: {}", e)))?;
        let headers = upstream_request.headers_mut();
        for (name, value) in parts.headers.iter() {
            // Connection/Upgradeは切り替えの交渉に使うのでエージェントまで届ける
            if name == header::HOST || name == header::CONNECTION || name == header::UPGRADE {
                headers.append(name.clone(), value.clone());
                continue;
            }
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        let host = HeaderValue::from_str(addr)
            .map_err(|e| RouterError::Internal(format!("Invalid agent address: {}", e)))?;
        headers.insert(header::HOST, host);

        debug!(addr = %addr, path = %path_and_query, "Hijacking request");
        let mut upstream_response = sender
            .send_request(upstream_request)
            .await
            .map_err(|e| RouterError::Upstream(format!("Failed to proxy to {}: {}", addr, e)))?;

        if upstream_response.status() != StatusCode::SWITCHING_PROTOCOLS {
            let (parts, body) = upstream_response.into_parts();
            return Ok(Response::from_parts(parts, Body::new(body)));
        }

        let upstream_upgrade = hyper::upgrade::on(&mut upstream_response);
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        *response.headers_mut() = upstream_response.headers().clone();

        let session_addr = addr.to_string();
        tokio::spawn(async move {
            let (client, upstream) = match tokio::try_join!(client_upgrade, upstream_upgrade) {
                Ok(upgraded) => upgraded,
                Err(err) => {
                    warn!(addr = %session_addr, error = %err, "Connection upgrade failed");
                    return;
                }
            };
            let outcome = relay(TokioIo::new(client), TokioIo::new(upstream)).await;
            log_session_end(&session_addr, outcome);
        });

        Ok(response)
    }
}

/// `addr` のエージェントとの双方向セッションの終了をログに出す
pub fn log_session_end(addr: &str, outcome: RelayOutcome) {
    match outcome.transferred {
        Ok(bytes) => info!(
            addr = %addr,
            closed_by = ?outcome.closed_by,
            bytes = bytes,
            "Hijacked session ended"
        ),
        Err(err) => warn!(
            addr = %addr,
            closed_by = ?outcome.closed_by,
            error = %err,
            "Hijacked session torn down"
        ),
    }
}

/// どちらかの方向が終わるまで `client` と `upstream` の間でバイトをコピーし、
/// その後両方の書き込み側をシャットダウンする
pub async fn relay<C, U>(client: C, upstream: U) -> RelayOutcome
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let outcome = tokio::select! {
        result = tokio::io::copy(&mut client_read, &mut upstream_write) => RelayOutcome {
            closed_by: Side::Client,
            transferred: result,
        },
        result = tokio::io::copy(&mut upstream_read, &mut client_write) => RelayOutcome {
            closed_by: Side::Upstream,
            transferred: result,
        },
    };

    if let Err(err) = upstream_write.shutdown().await {
        debug!(error = %err, "Upstream shutdown failed");
    }
    if let Err(err) = client_write.shutdown().await {
        debug!(error = %err, "Client shutdown failed");
    }
    outcome
}
