//! イメージAPIハンドラー

use super::RoutedRequest;
use crate::{
    aggregate::{merge_images, ListOptions},
    AppState,
};
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use fleet_common::error::RouterResult;

/// `GET /images/json`
pub async fn list_images(state: &AppState, request: RoutedRequest) -> RouterResult<Response> {
    let options = ListOptions::from_query(request.query())?;
    let snapshots = state.cluster.snapshots().await;
    Ok(Json(merge_images(&snapshots, &options)).into_response())
}
