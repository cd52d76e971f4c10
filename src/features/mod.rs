/// 機能別モジュール
///
/// 各機能モジュールは、その機能に関連するモデル・データベース操作・外部API連携を
/// 含む自己完結型のユニットです。
// 機能モジュールの宣言
pub mod conversion;
pub mod ledger;
pub mod rates;
pub mod users;
