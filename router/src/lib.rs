//! Fleet Router
//!
//! 複数のコンテナノードエージェントを1台のコンテナホストとして見せるフロントエンド

#![warn(missing_docs)]

/// Remote APIのルーティングテーブルとハンドラー
pub mod api;

/// 一覧の集約とレスポンス書き換え
pub mod aggregate;

/// ノードエージェントHTTPクライアント
pub mod agent;

/// ノード選択（コンテナ所在ノード / 正常ノードからランダム）
pub mod balancer;

/// ノードエージェントのクラスタビュー
pub mod cluster;

/// `/events` リスナーへのイベント配信
pub mod events;

/// 定期的なノードリフレッシュ
pub mod health;

/// リクエスト転送と双方向リレー
pub mod proxy;

/// 接続受付ループ（attach / exec startは生ソケット、それ以外はHTTP）
pub mod server;

/// コンテナの配置と削除
pub mod scheduler;

/// ロギング初期化ユーティリティ
pub mod logging;

/// Configuration management (environment variable helpers)
pub mod config;

/// TLSクライアント設定
pub mod tls;

/// CLI interface
pub mod cli;

/// 全リクエストハンドラーで共有するアプリケーション状態
#[derive(Clone)]
pub struct AppState {
    /// クラスタビュー
    pub cluster: cluster::Cluster,
    /// 作成・削除の配置担当
    pub scheduler: scheduler::Scheduler,
    /// イベントリスナー
    pub events: events::EventsHub,
    /// ノードエージェントへの転送
    pub proxy: proxy::ProxyEngine,
    /// デバッグモード（`/info` で報告）
    pub debug: bool,
    /// 緩いCORSヘッダーを付与するか
    pub cors: bool,
    /// 報告する製品バージョン
    pub version: String,
}
