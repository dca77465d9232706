//! Remote API
//!
//! 全リクエストは単一のフォールバックハンドラーを通る。ルーティングテーブルを引き、
//! 呼び出しをログに出し、必要ならCORSヘッダーを付ける。

pub mod containers;
pub mod events;
pub mod images;
pub mod proxy;
pub mod routes;
pub mod system;

use crate::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use fleet_common::error::{RouterError, RouterResult};
use routes::{PathParams, RouteTable};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info};

/// ルーティングテーブルが振り分けるエンドポイントの振る舞い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// `GET /_ping`
    Ping,
    /// `GET /events`
    Events,
    /// `GET /info`
    Info,
    /// `GET /version`
    Version,
    /// `GET /images/json`
    ImagesJson,
    /// `GET /containers/json`, `/containers/ps`
    ContainersJson,
    /// `GET /containers/{name}/json`
    ContainerJson,
    /// `POST /containers/create`
    ContainerCreate,
    /// `DELETE /containers/{name}`
    ContainerDelete,
    /// `{name}` を保持するノードへ中継
    ProxyContainer,
    /// `{name}` を保持するノードへ中継し、その後コンテナを再inspect
    ProxyContainerAndForceRefresh,
    /// `{execid}` のコンテナを保持するノードへ中継
    ProxyExec,
    /// ランダムな正常ノードへ中継
    ProxyRandom,
    /// `{name}` を保持するノードへの双方向中継
    ProxyHijack,
    /// `{execid}` のコンテナを保持するノードへの双方向中継
    ProxyExecHijack,
    /// クラスタモードでは未サポート
    NotImplemented,
    /// CORS preflight
    Options,
}

/// ハンドラーから見たリクエスト
pub struct RoutedRequest {
    /// 元のリクエスト
    pub request: Request,
    /// 一致したルートが取得したワイルドカード
    pub params: PathParams,
    /// クライアントアドレス（サーバーが提供する場合）
    pub remote_addr: Option<SocketAddr>,
}

impl RoutedRequest {
    /// Raw query string
    pub fn query(&self) -> Option<&str> {
        self.request.uri().query()
    }

    /// Wildcard `name` of the matched route
    pub fn param(&self, name: &str) -> RouterResult<&str> {
        self.params
            .get(name)
            .ok_or_else(|| RouterError::Internal(format!("Route has no {} parameter", name)))
    }

    /// 上流へ送るパスとクエリ（ワイルドカード `name` を `value` に置換）
    pub fn upstream_path(&self, name: &str, value: &str) -> String {
        let path = self.params.replace(name, value);
        match self.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        }
    }

    /// 受け取ったままのパスとクエリ
    pub fn original_path(&self) -> String {
        self.request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| self.params.path().to_string())
    }
}

impl Handler {
    /// エンドポイントの処理を実行
    pub async fn handle(self, state: &AppState, request: RoutedRequest) -> Response {
        let result = match self {
            Handler::Ping => system::ping().await,
            Handler::Events => events::get_events(state, request).await,
            Handler::Info => system::info(state).await,
            Handler::Version => system::version(state).await,
            Handler::ImagesJson => images::list_images(state, request).await,
            Handler::ContainersJson => containers::list_containers(state, request).await,
            Handler::ContainerJson => containers::inspect_container(state, request).await,
            Handler::ContainerCreate => containers::create_container(state, request).await,
            Handler::ContainerDelete => containers::delete_container(state, request).await,
            Handler::ProxyContainer => proxy::proxy_container(state, request, false).await,
            Handler::ProxyContainerAndForceRefresh => {
                proxy::proxy_container(state, request, true).await
            }
            Handler::ProxyExec => proxy::proxy_exec(state, request).await,
            Handler::ProxyRandom => proxy::proxy_random(state, request).await,
            Handler::ProxyHijack => proxy::hijack_container(state, request).await,
            Handler::ProxyExecHijack => proxy::hijack_exec(state, request).await,
            Handler::NotImplemented => Err(RouterError::Unimplemented),
            Handler::Options => Ok(StatusCode::OK.into_response()),
        };
        result.unwrap_or_else(|err| AppError::from(err).into_response())
    }
}

/// エラーレスポンス（ログに出してからプレーンテキストで返す）
#[derive(Debug)]
pub struct AppError(pub RouterError);

impl From<RouterError> for AppError {
    fn from(err: RouterError) -> Self {
        AppError(err)
    }
}

/// ハンドラーエラーに対するステータスコード
pub fn error_status(err: &RouterError) -> StatusCode {
    match err {
        RouterError::ClientInput(_) | RouterError::Common(_) => StatusCode::BAD_REQUEST,
        RouterError::RouteNotFound
        | RouterError::ContainerNotFound(_)
        | RouterError::ExecNotFound(_)
        | RouterError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        RouterError::NameConflict { .. } => StatusCode::CONFLICT,
        RouterError::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        RouterError::Upstream(_)
        | RouterError::NoHealthyNode
        | RouterError::Config(_)
        | RouterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = error_status(&self.0);

        error!(status = status.as_u16(), error = %self.0, "Request failed");

        let mut response = Response::new(Body::from(format!("{}\n", self.0)));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

#[derive(Clone)]
struct Dispatcher {
    state: AppState,
    routes: Arc<RouteTable>,
}

/// APIルーターを構築
pub fn create_router(state: AppState) -> RouterResult<Router> {
    Ok(router_with_routes(state, Arc::new(routes::remote_api()?)))
}

/// 構築済みのルーティングテーブルでAPIルーターを構築
pub fn router_with_routes(state: AppState, routes: Arc<RouteTable>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(Dispatcher { state, routes })
}

async fn dispatch(State(dispatcher): State<Dispatcher>, request: Request) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    info!("{} {}", method, uri);

    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let mut response = match dispatcher.routes.resolve(&method, uri.path()) {
        Ok((handler, params)) => {
            let routed = RoutedRequest {
                request,
                params,
                remote_addr,
            };
            handler.handle(&dispatcher.state, routed).await
        }
        Err(err) => AppError::from(err).into_response(),
    };

    if dispatcher.state.cors {
        add_cors_headers(response.headers_mut());
    }
    response
}

fn add_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Origin, X-Requested-With, Content-Type, Accept"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, PUT, OPTIONS"),
    );
}
