//! コンテナAPIハンドラー
//!
//! 一覧とinspectはクラスタビューから応答し、作成と削除はスケジューラを経由する

use super::RoutedRequest;
use crate::{
    aggregate::{inspect::rewrite_inspect_body, merge_containers, ListOptions},
    balancer::NodeSelector,
    AppState,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use fleet_common::{
    error::{RouterError, RouterResult},
    protocol::CreateResponse,
    types::ContainerConfig,
};
use tracing::debug;

/// 作成リクエストボディの上限
const MAX_CREATE_BODY_BYTES: usize = 1024 * 1024;

/// `GET /containers/json`
pub async fn list_containers(state: &AppState, request: RoutedRequest) -> RouterResult<Response> {
    let options = ListOptions::from_query(request.query())?;
    let snapshots = state.cluster.snapshots().await;
    Ok(Json(merge_containers(&snapshots, &options)).into_response())
}

/// `GET /containers/{name}/json`
pub async fn inspect_container(
    state: &AppState,
    request: RoutedRequest,
) -> RouterResult<Response> {
    let name = request.param("name")?;
    let owner = NodeSelector::new(&state.cluster).container(name).await?;

    let (status, raw) = state
        .cluster
        .client()
        .inspect_container_raw(&owner.target.addr, owner.container.id())
        .await?;
    if !status.is_success() {
        debug!(container_id = %owner.container.id(), status = %status, "Relaying inspect failure");
        return Ok((status, raw).into_response());
    }

    let node_json = serde_json::to_vec(&owner.target.node)
        .map_err(|e| RouterError::Internal(format!("Failed to encode node: {}", e)))?;
    let body = rewrite_inspect_body(&raw, &node_json, &owner.target.node.ip);

    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

/// `POST /containers/create?name=`
pub async fn create_container(state: &AppState, request: RoutedRequest) -> RouterResult<Response> {
    let name = query_value(request.query(), "name").unwrap_or_default();
    let body = to_bytes(request.request.into_body(), MAX_CREATE_BODY_BYTES)
        .await
        .map_err(|e| RouterError::ClientInput(format!("Failed to read request body: {}", e)))?;
    let config: ContainerConfig = serde_json::from_slice(&body)
        .map_err(|e| RouterError::ClientInput(format!("Invalid container config: {}", e)))?;

    if !name.is_empty() {
        let existing = state
            .cluster
            .containers()
            .await
            .into_iter()
            .find(|record| record.summary.has_name(&name));
        if let Some(existing) = existing {
            return Err(RouterError::NameConflict {
                name,
                id: existing.summary.id,
            });
        }
    }

    let id = state.scheduler.create_container(&config, &name).await?;
    let created = CreateResponse { id, warnings: None };
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

/// `DELETE /containers/{name}?force=`
pub async fn delete_container(state: &AppState, request: RoutedRequest) -> RouterResult<Response> {
    let name = request.param("name")?;
    let container = state
        .cluster
        .container(name)
        .await
        .ok_or_else(|| RouterError::ContainerNotFound(name.to_string()))?;
    let force = query_value(request.query(), "force")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    state
        .scheduler
        .remove_container(&container, force)
        .await
        .map_err(|e| match e {
            RouterError::Upstream(_) => e,
            other => RouterError::Upstream(other.to_string()),
        })?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// クエリ文字列中の `key` の最初の値
fn query_value(query: Option<&str>, key: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, value)| value.into_owned())
}
