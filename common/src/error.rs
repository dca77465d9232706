//! エラー型定義
//!
//! 統一エラー型（thiserror使用）

use thiserror::Error;

/// Common layer error type
#[derive(Debug, Error)]
pub enum CommonError {
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Router error type
#[derive(Debug, Error)]
pub enum RouterError {
    /// Common layer error
    #[error(transparent)]
    Common(#[from] CommonError),

    /// リクエストボディまたはクエリが不正
    #[error("{0}")]
    ClientInput(String),

    /// No route for method and path
    #[error("404 page not found")]
    RouteNotFound,

    /// Unknown container
    #[error("No such container: {0}")]
    ContainerNotFound(String),

    /// Unknown exec instance
    #[error("Exec {0} not found")]
    ExecNotFound(String),

    /// Unknown node
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// コンテナ名がクラスタ内で既に使用されている
    #[error("Conflict, The name {name} is already assigned to {id}. You have to delete (or rename) that container to be able to assign {name} to a container again.")]
    NameConflict {
        /// 要求された名前
        name: String,
        /// その名前を保持しているコンテナ
        id: String,
    },

    /// ノードエージェントへの接続失敗、不正な上流レスポンス、スケジューラ失敗
    #[error("{0}")]
    Upstream(String),

    /// クラスタモードでは中継も集約もしない操作
    #[error("Not supported in clustering mode.")]
    Unimplemented,

    /// 正常ノードが1台もない状態でのランダム選択
    #[error("No healthy node available in the cluster")]
    NoHealthyNode,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias (Common)
pub type CommonResult<T> = Result<T, CommonError>;

/// Result type alias (Router)
pub type RouterResult<T> = Result<T, RouterError>;
