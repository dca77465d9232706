//! 接続受付ループ
//!
//! 各接続の最初のリクエストヘッダーをHTTP処理の前に読む。attachとexec startは
//! ソケットを引き取り、所属エージェントへ生のままつなぐ。それ以外の接続は
//! 読んだ分をhyperに戻してAPIルーターで処理する。

use crate::{
    api::{self, routes::RouteTable, Handler},
    proxy::{
        hijack::{log_session_end, relay},
        raw::{read_head, write_error, RequestHead},
    },
    AppState,
};
use axum::{extract::ConnectInfo, http::Request, Router};
use bytes::{Buf, Bytes, BytesMut};
use fleet_common::error::RouterResult;
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{TcpListener, TcpStream},
    time::{sleep, timeout, Duration},
};
use tower::ServiceExt;
use tracing::{debug, info, warn};

/// 最初のリクエストヘッダーを待つ時間
const HEAD_TIMEOUT_SECS: u64 = 30;

/// `shutdown` が完了するまで `listener` でRemote APIを提供する
///
/// 受付済みの接続はシャットダウン後も継続する。
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> RouterResult<()>
where
    F: Future<Output = ()> + Send,
{
    let routes = Arc::new(api::routes::remote_api()?);
    let app = api::router_with_routes(state.clone(), routes.clone());
    tokio::pin!(shutdown);

    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "Failed to accept connection");
                    sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("Listener shut down");
                return Ok(());
            }
        };

        let connection = Connection {
            state: state.clone(),
            routes: routes.clone(),
            app: app.clone(),
            remote,
        };
        tokio::spawn(connection.run(stream));
    }
}

struct Connection {
    state: AppState,
    routes: Arc<RouteTable>,
    app: Router,
    remote: SocketAddr,
}

impl Connection {
    async fn run(self, mut stream: TcpStream) {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(remote = %self.remote, error = %err, "Failed to set TCP_NODELAY");
        }

        let mut buffer = BytesMut::with_capacity(4096);
        let head_end = match timeout(
            Duration::from_secs(HEAD_TIMEOUT_SECS),
            read_head(&mut stream, &mut buffer),
        )
        .await
        {
            Ok(Ok(end)) => end,
            Ok(Err(err)) => {
                debug!(remote = %self.remote, error = %err, "Failed to read request");
                return;
            }
            Err(_) => {
                debug!(remote = %self.remote, "Timed out waiting for a request");
                return;
            }
        };
        if buffer.is_empty() {
            return;
        }

        if let Some(end) = head_end {
            if let Some(head) = RequestHead::parse(&buffer[..end]) {
                if let Ok((handler, params)) = self.routes.resolve(&head.method, head.path()) {
                    if matches!(handler, Handler::ProxyHijack | Handler::ProxyExecHijack) {
                        let buffered = buffer.split_off(end);
                        info!("{} {}", head.method, head.target);
                        let target =
                            api::proxy::raw_hijack_target(&self.state, handler, &params, &head)
                                .await;
                        self.hijack(stream, target, head, buffered).await;
                        return;
                    }
                }
            }
        }

        self.serve_http(stream, buffer.freeze()).await;
    }

    async fn hijack(
        self,
        mut client: TcpStream,
        target: RouterResult<(String, String)>,
        head: RequestHead,
        buffered: BytesMut,
    ) {
        let opened = match target {
            Ok((addr, path)) => self
                .state
                .proxy
                .open_raw(&addr, &head, &path, &buffered)
                .await
                .map(|upstream| (addr, upstream)),
            Err(err) => Err(err),
        };

        match opened {
            Ok((addr, upstream)) => {
                let outcome = relay(client, upstream).await;
                log_session_end(&addr, outcome);
            }
            Err(err) => {
                let status = api::error_status(&err);
                warn!(status = status.as_u16(), error = %err, "Request failed");
                let reason = status.canonical_reason().unwrap_or("Error");
                if let Err(write_err) =
                    write_error(&mut client, status.as_u16(), reason, &err.to_string()).await
                {
                    debug!(remote = %self.remote, error = %write_err, "Failed to answer client");
                }
            }
        }
    }

    async fn serve_http(self, stream: TcpStream, prefix: Bytes) {
        let remote = self.remote;
        let app = self.app;
        let service = service_fn(move |mut request: Request<Incoming>| {
            request.extensions_mut().insert(ConnectInfo(remote));
            app.clone().oneshot(request)
        });

        let io = TokioIo::new(Rewind::new(prefix, stream));
        if let Err(err) = http1::Builder::new()
            .serve_connection(io, service)
            .with_upgrades()
            .await
        {
            debug!(remote = %remote, error = %err, "Connection closed with error");
        }
    }
}

/// `inner` から読む前に `prefix` を返すストリーム
pub struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewind<S> {
    /// `prefix` を返してから `inner` を読む
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() && buf.remaining() > 0 {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
