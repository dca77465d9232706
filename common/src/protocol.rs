//! 通信プロトコル定義
//!
//! クライアント（`/info`, `/version`, `/events`）およびノードエージェント
//! （`/info`, `/containers/create`）とやり取りするメッセージ

use crate::types::NodeInfo;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// クライアントに報告するRemote APIバージョン
pub const API_VERSION: &str = "1.16";

/// ノードエージェントが返す `GET /info`（クラスタが使うフィールドのみ）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentInfo {
    /// エンジン識別子
    #[serde(rename = "ID", default)]
    pub id: String,
    /// ホスト名
    #[serde(rename = "Name", default)]
    pub name: String,
    /// CPU数
    #[serde(rename = "NCPU", default)]
    pub ncpu: i64,
    /// 総メモリ（バイト）
    #[serde(rename = "MemTotal", default)]
    pub mem_total: i64,
    /// `key=value` 形式のエンジンラベル
    #[serde(rename = "Labels", default)]
    pub labels: Option<Vec<String>>,
}

impl AgentInfo {
    /// `addr` で到達できるエージェントのノード識別情報を組み立てる
    pub fn into_node_info(self, addr: &str) -> NodeInfo {
        let mut info = NodeInfo::placeholder(addr);
        if !self.id.is_empty() {
            info.id = self.id;
        }
        if !self.name.is_empty() {
            info.name = self.name;
        }
        info.cpus = self.ncpu;
        info.memory = self.mem_total;
        info.labels = self
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|label| {
                label
                    .split_once('=')
                    .map(|(key, value)| (key.to_string(), value.to_string()))
            })
            .collect::<BTreeMap<_, _>>();
        info
    }
}

/// クラスタとして返す `GET /info`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterInfo {
    /// 全ノードのコンテナ数
    pub containers: usize,
    /// `["\bNodes", count]` followed by one `[name, addr]` pair per node
    pub driver_status: Vec<[String; 2]>,
    /// 接続中のイベントリスナー数
    #[serde(rename = "NEventsListener")]
    pub n_events_listener: usize,
    /// デバッグモード
    pub debug: bool,
}

/// クラスタとして返す `GET /version`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct VersionInfo {
    /// 製品バージョン（`fleet/x.y.z`）
    pub version: String,
    /// Remote API version
    pub api_version: String,
    /// Toolchain version slot of the engine schema
    pub go_version: String,
    /// Source revision
    pub git_commit: String,
    /// Operating system
    pub os: String,
    /// CPU architecture
    pub arch: String,
}

/// `POST /containers/create` の応答
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateResponse {
    /// 作成されたコンテナのID
    #[serde(rename = "Id")]
    pub id: String,
    /// エンジンからの警告
    #[serde(rename = "Warnings", default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

/// エンジンイベント。発生元ノードを付けて `/events` リスナーへ中継する
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// イベント種別（`create`, `start`, `die` など）
    #[serde(default)]
    pub status: String,
    /// 対象のコンテナ（またはイメージ）
    #[serde(default)]
    pub id: String,
    /// コンテナの作成元イメージ
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
    /// Unixタイムスタンプ
    #[serde(default)]
    pub time: i64,
    /// イベントを発生させたノード
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeInfo>,
    /// 解釈せずにそのまま中継するフィールド
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
