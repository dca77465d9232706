//! 一覧の集約
//!
//! ノードごとの一覧を1台のホストと同じ形の一覧にまとめる

pub mod inspect;

use crate::cluster::NodeSnapshot;
use fleet_common::{
    error::{RouterError, RouterResult},
    types::{ContainerSummary, ImageSummary, PENDING_STATUS},
};
use serde_json::Value;

/// 一覧系エンドポイント共通のクエリオプション
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// 停止中のコンテナも含める
    pub all: bool,
    /// 一覧を絞り込むノード名またはID（空なら全ノード）
    pub nodes: Vec<String>,
}

impl ListOptions {
    /// `all`、繰り返しの `node`、`filters` JSONの `"node"` キーを解析
    pub fn from_query(query: Option<&str>) -> RouterResult<Self> {
        let mut options = Self::default();
        let Some(query) = query else {
            return Ok(options);
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "all" => options.all = value == "1" || value.eq_ignore_ascii_case("true"),
                "node" if !value.is_empty() => options.nodes.push(value.into_owned()),
                "filters" if !value.is_empty() => {
                    options.nodes.extend(node_filters(&value)?);
                }
                _ => {}
            }
        }
        Ok(options)
    }

    /// `snapshot` のノードが許可リストに含まれるか
    pub fn admits(&self, snapshot: &NodeSnapshot) -> bool {
        self.nodes.is_empty()
            || self
                .nodes
                .iter()
                .any(|reference| snapshot.info.matches(reference))
    }
}

/// `filters` パラメータ内のノード参照
///
/// `{"node":["a","b"]}` と `{"node":{"a":true}}` の両方を受け付ける。
fn node_filters(raw: &str) -> RouterResult<Vec<String>> {
    let filters: Value = serde_json::from_str(raw)
        .map_err(|e| RouterError::ClientInput(format!("Invalid filters: {}", e)))?;
    let Value::Object(filters) = filters else {
        return Err(RouterError::ClientInput(
            "Invalid filters: expected a JSON object".to_string(),
        ));
    };

    match filters.get("node") {
        None => Ok(Vec::new()),
        Some(Value::Array(values)) => values
            .iter()
            .map(|value| {
                value.as_str().map(str::to_string).ok_or_else(|| {
                    RouterError::ClientInput("Invalid filters: node must be a string".to_string())
                })
            })
            .collect(),
        Some(Value::Object(values)) => Ok(values.keys().cloned().collect()),
        Some(_) => Err(RouterError::ClientInput(
            "Invalid filters: node must be a list".to_string(),
        )),
    }
}

/// クラスタ全体のコンテナ一覧
///
/// `all` でなければ停止中のコンテナは除外する。Unhealthyなノード上のコンテナは
/// `Pending` と報告する。名前にはノード名を前置し、ワイルドカードのポートには
/// ノードIPを入れる。新しい順で、作成時刻が同じなら元の順序を保つ。
pub fn merge_containers(
    snapshots: &[NodeSnapshot],
    options: &ListOptions,
) -> Vec<ContainerSummary> {
    let mut merged = Vec::new();
    for snapshot in snapshots.iter().filter(|s| options.admits(s)) {
        let healthy = snapshot.is_healthy();
        for record in &snapshot.containers {
            if !options.all && !record.summary.is_running() {
                continue;
            }
            let mut summary = record.summary.clone();
            if !healthy {
                summary.status = PENDING_STATUS.to_string();
            }
            summary.names = summary
                .names
                .iter()
                .map(|name| format!("/{}{}", snapshot.info.name, name))
                .collect();
            for port in summary.ports.iter_mut().filter(|port| port.is_wildcard()) {
                port.ip = snapshot.info.ip.clone();
            }
            merged.push(summary);
        }
    }
    merged.sort_by(|a, b| b.created.cmp(&a.created));
    merged
}

/// クラスタ全体のイメージ一覧（ノード順に連結）
pub fn merge_images(snapshots: &[NodeSnapshot], options: &ListOptions) -> Vec<ImageSummary> {
    snapshots
        .iter()
        .filter(|s| options.admits(s))
        .flat_map(|snapshot| snapshot.images.iter().cloned())
        .collect()
}
