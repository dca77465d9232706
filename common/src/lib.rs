//! Fleet Common Library
//!
//! 共通型定義、ワイヤーペイロード、エラー型を提供

#![warn(missing_docs)]

/// ノード・コンテナ・イメージの型定義
pub mod types;

/// クライアント・ノードエージェントとの通信ペイロード
pub mod protocol;

/// エラー型定義
pub mod error;
