//! 統合テスト用の共通ヘルパー

pub mod agent;
pub mod fleet;
pub mod http;
pub mod raw_agent;
