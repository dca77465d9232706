//! 生ソケットでのattach / exec startセッション
//!
//! このAPI世代のエージェントはattachとexec startに `200 OK` と
//! `Content-Type: application/vnd.docker.raw-stream` で応答し、そのままソケットを
//! 双方向ストリームとして使い続ける。新しいエージェントは `101` で応答する。
//! どちらの応答もここでは解析しない。クライアントのリクエストヘッダーを
//! 所属エージェント向けに書き換えてそのまま書き込み、以降は両ソケットを
//! バイト単位でつなぐ。

use super::{
    hijack::{relay, RelayOutcome},
    transport::NodeStream,
    ProxyEngine,
};
use axum::http::Method;
use bytes::BytesMut;
use fleet_common::error::{RouterError, RouterResult};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// 受け付けるリクエストヘッダーの上限（超えた接続は解析せずHTTPサーバーへ渡す）
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

const HEAD_END: &[u8] = b"\r\n\r\n";

/// `buf` 中でヘッダー終端の空行の直後の位置
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_END.len())
        .position(|window| window == HEAD_END)
        .map(|pos| pos + HEAD_END.len())
}

/// ヘッダー全体がそろうまで `stream` から `buf` へ読み込む
///
/// ヘッダー長を返す。先に相手が閉じた場合、またはヘッダーが [`MAX_HEAD_BYTES`] を
/// 超えた場合は `None`。ヘッダー以降のバイトは `buf` に残る。
pub async fn read_head<S>(stream: &mut S, buf: &mut BytesMut) -> io::Result<Option<usize>>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(end) = find_head_end(buf) {
            return Ok(Some(end));
        }
        if buf.len() >= MAX_HEAD_BYTES {
            return Ok(None);
        }
        if stream.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
}

/// 受け取ったままのHTTP/1.xリクエストヘッダー
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    /// Request method
    pub method: Method,
    /// Request target (path and query)
    pub target: String,
    version: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// 終端の空行を含むヘッダーを解析
    pub fn parse(head: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(head).ok()?;
        let mut lines = text.split("\r\n");

        let mut request_line = lines.next()?.split(' ');
        let method = Method::from_bytes(request_line.next()?.as_bytes()).ok()?;
        let target = request_line.next()?.to_string();
        let version = request_line.next()?.to_string();
        if request_line.next().is_some() || !version.starts_with("HTTP/1.") {
            return None;
        }
        if !target.starts_with('/') {
            return None;
        }

        let mut headers = Vec::new();
        for line in lines.take_while(|line| !line.is_empty()) {
            let (name, value) = line.split_once(':')?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Some(Self {
            method,
            target,
            version,
            headers,
        })
    }

    /// Path component of the target
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// Query component of the target
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// First value of header `name`
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `host` のエージェントへ `path_and_query` を要求するヘッダーのバイト列
    /// （それ以外のヘッダーはそのまま通す）
    pub fn encode_for(&self, path_and_query: &str, host: &str) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, path_and_query, self.version);
        out.push_str(&format!("Host: {}\r\n", host));
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

impl ProxyEngine {
    /// `addr` のエージェントに接続し、`path_and_query` に書き換えた `head` と、
    /// クライアントがヘッダーの後に既に送ったバイトを送る
    pub async fn open_raw(
        &self,
        addr: &str,
        head: &RequestHead,
        path_and_query: &str,
        buffered: &[u8],
    ) -> RouterResult<Box<dyn NodeStream>> {
        let mut upstream = self.connector.connect(addr).await?;
        debug!(addr = %addr, path = %path_and_query, "Hijacking connection");

        let sent = async {
            upstream
                .write_all(&head.encode_for(path_and_query, addr))
                .await?;
            if !buffered.is_empty() {
                upstream.write_all(buffered).await?;
            }
            upstream.flush().await
        };
        sent.await
            .map_err(|e| RouterError::Upstream(format!("Failed to proxy to {}: {}", addr, e)))?;
        Ok(upstream)
    }

    /// 生セッション。リクエストを転送し、どちらかが終わるまで `client` と
    /// エージェントをつなぐ
    pub async fn hijack_raw<C>(
        &self,
        addr: &str,
        head: &RequestHead,
        path_and_query: &str,
        buffered: &[u8],
        client: C,
    ) -> RouterResult<RelayOutcome>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let upstream = self.open_raw(addr, head, path_and_query, buffered).await?;
        Ok(relay(client, upstream).await)
    }
}

/// HTTP処理に到達しなかった接続へのプレーンテキストのエラー応答
pub async fn write_error<W>(
    client: &mut W,
    status: u16,
    reason: &str,
    message: &str,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = format!("{}\n", message);
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    client.write_all(response.as_bytes()).await?;
    client.shutdown().await
}
