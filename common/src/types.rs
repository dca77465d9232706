//! 共通型定義
//!
//! ノード識別情報、ノードエージェントが報告するコンテナ・イメージ概要。
//! フィールド名はコンテナエンジンのRemote API（PascalCase）に合わせ、
//! クライアントへそのまま中継できるようにする。モデル化していないフィールドは
//! `extra` に保持し、そのままシリアライズし直す。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 全インターフェースで待ち受けるポートバインディングのホストIP
pub const WILDCARD_HOST_IP: &str = "0.0.0.0";

/// ノードに到達できないコンテナに表示するステータス
pub const PENDING_STATUS: &str = "Pending";

/// JSONの `null` をフィールド欠落と同じに扱う
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// クラスタビューから見たノードの状態
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    /// 直近のリフレッシュが成功
    Healthy,
    /// 直近のリフレッシュが失敗、またはまだ応答がない
    Unhealthy,
}

/// ノード識別情報（クライアントには `"Node"` オブジェクトとして見える）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct NodeInfo {
    /// エンジンが割り当てた識別子
    #[serde(rename = "ID")]
    pub id: String,
    /// ワイルドカードのポートバインディングを書き換えるIP
    #[serde(rename = "IP")]
    pub ip: String,
    /// エージェントのアドレス（`host:port`）
    pub addr: String,
    /// ノード名
    pub name: String,
    /// CPU count
    #[serde(default)]
    pub cpus: i64,
    /// Total memory in bytes
    #[serde(default)]
    pub memory: i64,
    /// Engine labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NodeInfo {
    /// エージェントが最初の `/info` に応答するまで使う識別情報
    ///
    /// IDと名前は設定されたアドレス、IPはそのホスト部になる。
    pub fn placeholder(addr: &str) -> Self {
        let host = host_of(addr);
        Self {
            id: addr.to_string(),
            ip: host.to_string(),
            addr: addr.to_string(),
            name: host.to_string(),
            cpus: 0,
            memory: 0,
            labels: BTreeMap::new(),
        }
    }

    /// 許可リストのエントリがこのノードを指すか（名前またはID）
    pub fn matches(&self, reference: &str) -> bool {
        self.name == reference || self.id == reference
    }
}

/// `host:port` のホスト部（IPv6の角括弧は除く）
pub fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if !port.contains(']') => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// コンテナの公開ポート
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Port {
    /// バインド先のホストインターフェース
    #[serde(rename = "IP", default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    /// コンテナ内のポート
    #[serde(rename = "PrivatePort")]
    pub private_port: u16,
    /// ホスト側のポート
    #[serde(rename = "PublicPort", default, skip_serializing_if = "is_zero")]
    pub public_port: u16,
    /// Protocol (`tcp` / `udp`)
    #[serde(rename = "Type")]
    pub kind: String,
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

impl Port {
    /// 全インターフェースで待ち受けているか
    pub fn is_wildcard(&self) -> bool {
        self.ip == WILDCARD_HOST_IP
    }
}

/// `/containers/json` 一覧のコンテナエントリ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    /// エンジンが割り当てた識別子
    pub id: String,
    /// 名前（それぞれ `/` で始まる）
    #[serde(default, deserialize_with = "null_as_default")]
    pub names: Vec<String>,
    /// イメージ参照
    #[serde(default)]
    pub image: String,
    /// コマンドライン
    #[serde(default)]
    pub command: String,
    /// 作成時刻（Unix秒）
    #[serde(default)]
    pub created: i64,
    /// Human readable status (`Up 2 minutes`, `Exited (0) ...`)
    #[serde(default)]
    pub status: String,
    /// ポートバインディング
    #[serde(default, deserialize_with = "null_as_default")]
    pub ports: Vec<Port>,
    /// 解釈せずにそのまま中継するフィールド
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContainerSummary {
    /// エンジンが実行中と報告しているか
    pub fn is_running(&self) -> bool {
        self.status.contains("Up")
    }

    /// `name` がコンテナ名のいずれかと一致するか（先頭の `/` は任意）
    pub fn has_name(&self, name: &str) -> bool {
        let name = name.trim_start_matches('/');
        self.names
            .iter()
            .any(|candidate| candidate.trim_start_matches('/') == name)
    }
}

/// `/images/json` 一覧のイメージエントリ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ImageSummary {
    /// Engine-assigned identifier
    pub id: String,
    /// 親イメージ
    #[serde(default)]
    pub parent_id: String,
    /// リポジトリタグ
    #[serde(default, deserialize_with = "null_as_default")]
    pub repo_tags: Vec<String>,
    /// 作成時刻（Unix秒）
    #[serde(default)]
    pub created: i64,
    /// Layer size
    #[serde(default)]
    pub size: i64,
    /// Size including parents
    #[serde(default)]
    pub virtual_size: i64,
    /// 解釈せずにそのまま中継するフィールド
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `POST /containers/create` のボディ
///
/// ここで解釈するのはイメージのみ。それ以外は受け取ったままノードエージェントへ渡す。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    /// 作成元のイメージ
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// 残りの設定
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
