//! ノードエージェントへの生の接続
//!
//! HTTPクライアントではなくソケットそのものが必要な双方向プロキシで使う。
//! TLSはエージェントクライアントと同じクライアント設定を使う。

use fleet_common::{
    error::{RouterError, RouterResult},
    types::host_of,
};
use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_rustls::TlsConnector;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// ノードエージェントへのバイトストリーム
pub trait NodeStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> NodeStream for T {}

/// ノードエージェントへの生の接続を開く
#[derive(Clone)]
pub enum NodeConnector {
    /// Plain TCP
    Plain,
    /// TLS over TCP
    Tls(TlsConnector),
}

impl NodeConnector {
    /// エージェントクライアントと同じ方式のコネクタ
    pub fn new(tls: Option<Arc<ClientConfig>>) -> Self {
        match tls {
            Some(config) => Self::Tls(TlsConnector::from(config)),
            None => Self::Plain,
        }
    }

    /// `addr`（`host:port`）のエージェントに接続
    pub async fn connect(&self, addr: &str) -> RouterResult<Box<dyn NodeStream>> {
        let tcp = timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| RouterError::Upstream(format!("Timed out connecting to {}", addr)))?
        .map_err(|e| RouterError::Upstream(format!("Failed to connect to {}: {}", addr, e)))?;
        tcp.set_nodelay(true)
            .map_err(|e| RouterError::Upstream(format!("Failed to configure socket: {}", e)))?;

        match self {
            Self::Plain => Ok(Box::new(tcp)),
            Self::Tls(connector) => {
                let name = ServerName::try_from(host_of(addr).to_string()).map_err(|e| {
                    RouterError::Upstream(format!("Invalid server name {}: {}", addr, e))
                })?;
                let stream = connector.connect(name, tcp).await.map_err(|e| {
                    RouterError::Upstream(format!("TLS handshake with {} failed: {}", addr, e))
                })?;
                Ok(Box::new(stream))
            }
        }
    }
}
