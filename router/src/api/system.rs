//! システムAPIハンドラー（`/_ping`, `/info`, `/version`）

use crate::AppState;
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use fleet_common::{
    error::RouterResult,
    protocol::{ClusterInfo, VersionInfo, API_VERSION},
};

/// `DriverStatus` のノード一覧の見出し行（バックスペースでエンジンCLIのインデントを打ち消す）
const NODES_STATUS_KEY: &str = "\u{8}Nodes";

/// `GET /_ping`
pub async fn ping() -> RouterResult<Response> {
    Ok("OK".into_response())
}

/// `GET /info`
pub async fn info(state: &AppState) -> RouterResult<Response> {
    let snapshots = state.cluster.snapshots().await;

    let mut driver_status = Vec::with_capacity(snapshots.len() + 1);
    driver_status.push([NODES_STATUS_KEY.to_string(), snapshots.len().to_string()]);
    for snapshot in &snapshots {
        driver_status.push([snapshot.info.name.clone(), snapshot.info.addr.clone()]);
    }

    let info = ClusterInfo {
        containers: snapshots.iter().map(|s| s.containers.len()).sum(),
        driver_status,
        n_events_listener: state.events.size().await,
        debug: state.debug,
    };
    Ok(Json(info).into_response())
}

/// `GET /version`
pub async fn version(state: &AppState) -> RouterResult<Response> {
    let version = VersionInfo {
        version: format!("fleet/{}", state.version),
        api_version: API_VERSION.to_string(),
        go_version: "n/a".to_string(),
        git_commit: "n/a".to_string(),
        os: std::env::consts::OS.to_string(),
        arch: engine_arch(std::env::consts::ARCH).to_string(),
    };
    Ok(Json(version).into_response())
}

/// エンジンが報告する形式のアーキテクチャ名
fn engine_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "arm" => "arm",
        other => other,
    }
}
