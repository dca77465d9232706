//! 中継APIハンドラー
//!
//! コンテナ単位の呼び出しは、パス中のコンテナ参照をエンジンIDに置き換えて
//! コンテナを保持するノードへ送る。exec呼び出しはexecインスタンスのコンテナを
//! 保持するノードへ、`auth` とイメージ検索は任意の正常ノードへ送る。

use super::{routes::PathParams, Handler, RoutedRequest};
use crate::{
    balancer::{ContainerTarget, NodeSelector},
    cluster::Cluster,
    proxy::raw::RequestHead,
    AppState,
};
use axum::{body::Body, response::Response};
use fleet_common::error::{RouterError, RouterResult};
use futures::StreamExt;
use tracing::warn;

/// `/containers/{name}/...` を中継する。`force_refresh` 時は中継したレスポンスの
/// 完了後にコンテナを再inspectし、新しいexecインスタンスを中継可能にする
pub async fn proxy_container(
    state: &AppState,
    request: RoutedRequest,
    force_refresh: bool,
) -> RouterResult<Response> {
    let owner = container_owner(state, request.param("name")?).await?;
    let path = request.upstream_path("name", owner.container.id());

    let result = state
        .proxy
        .forward(&owner.target.addr, request.request, &path)
        .await;
    if !force_refresh {
        return result;
    }

    // レスポンスボディのdrop時に実行。転送に失敗した場合は即座に実行
    let refresh = RefreshOnDrop {
        cluster: state.cluster.clone(),
        node_id: owner.container.node_id.clone(),
        container_id: owner.container.id().to_string(),
    };
    result.map(|response| refresh_after_body(response, refresh))
}

/// drop時にコンテナを再inspectする
struct RefreshOnDrop {
    cluster: Cluster,
    node_id: String,
    container_id: String,
}

impl Drop for RefreshOnDrop {
    fn drop(&mut self) {
        let cluster = self.cluster.clone();
        let node_id = std::mem::take(&mut self.node_id);
        let container_id = std::mem::take(&mut self.container_id);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = cluster
                    .force_refresh_container(&node_id, &container_id)
                    .await
                {
                    warn!(
                        container_id = %container_id,
                        error = %err,
                        "Failed to refresh container after proxying"
                    );
                }
            });
        }
    }
}

fn refresh_after_body(response: Response, refresh: RefreshOnDrop) -> Response {
    let (parts, body) = response.into_parts();
    let stream = body.into_data_stream().map(move |chunk| {
        let _refresh = &refresh;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}

/// `/exec/{execid}/...` を中継
pub async fn proxy_exec(state: &AppState, request: RoutedRequest) -> RouterResult<Response> {
    let owner = exec_owner(state, request.param("execid")?).await?;
    let path = request.original_path();
    state
        .proxy
        .forward(&owner.target.addr, request.request, &path)
        .await
}

/// ランダムな正常ノードへ中継
pub async fn proxy_random(state: &AppState, request: RoutedRequest) -> RouterResult<Response> {
    let target = NodeSelector::new(&state.cluster).random_healthy().await?;
    let path = request.original_path();
    state.proxy.forward(&target.addr, request.request, &path).await
}

/// `POST /containers/{name}/attach`
pub async fn hijack_container(state: &AppState, request: RoutedRequest) -> RouterResult<Response> {
    let owner = container_owner(state, request.param("name")?).await?;
    let path = request.upstream_path("name", owner.container.id());
    state
        .proxy
        .hijack(&owner.target.addr, request.request, &path)
        .await
}

/// `POST /exec/{execid}/start`
pub async fn hijack_exec(state: &AppState, request: RoutedRequest) -> RouterResult<Response> {
    let owner = exec_owner(state, request.param("execid")?).await?;
    let path = request.original_path();
    state
        .proxy
        .hijack(&owner.target.addr, request.request, &path)
        .await
}

/// クライアントソケットから直接ヘッダーを読んだattach / exec startセッションの
/// 接続先エージェントと上流パス
pub async fn raw_hijack_target(
    state: &AppState,
    handler: Handler,
    params: &PathParams,
    head: &RequestHead,
) -> RouterResult<(String, String)> {
    match handler {
        Handler::ProxyHijack => {
            let owner = container_owner(state, route_param(params, "name")?).await?;
            let path = params.replace("name", owner.container.id());
            let path = match head.query() {
                Some(query) => format!("{}?{}", path, query),
                None => path,
            };
            Ok((owner.target.addr, path))
        }
        Handler::ProxyExecHijack => {
            let owner = exec_owner(state, route_param(params, "execid")?).await?;
            Ok((owner.target.addr, head.target.clone()))
        }
        other => Err(RouterError::Internal(format!(
            "{:?} is not a duplex route",
            other
        ))),
    }
}

fn route_param<'a>(params: &'a PathParams, name: &str) -> RouterResult<&'a str> {
    params
        .get(name)
        .ok_or_else(|| RouterError::Internal(format!("Route has no {} parameter", name)))
}

async fn container_owner(state: &AppState, name: &str) -> RouterResult<ContainerTarget> {
    NodeSelector::new(&state.cluster).container(name).await
}

async fn exec_owner(state: &AppState, exec_id: &str) -> RouterResult<ContainerTarget> {
    NodeSelector::new(&state.cluster).exec(exec_id).await
}
