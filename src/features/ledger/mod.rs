/// 台帳機能モジュール
///
/// 共有経費サービス（Splitwise互換API）との通信を提供します：
/// - 経費・コメントの取得
/// - コメントの投稿・削除
/// - 経費の通貨・負担額の書き戻し
pub mod client;
pub mod models;

// 公開インターフェース
pub use client::{LedgerClient, SplitwiseClient};
pub use models::{
    CurrentUser, ExpenseUpdate, ParticipantShare, RemoteComment, RemoteExpense, RemoteShare,
};
