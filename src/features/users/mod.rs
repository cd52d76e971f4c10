/// ユーザー機能モジュール
///
/// このモジュールは台帳アカウントの管理機能を提供します：
/// - アクセストークンの登録
/// - 台帳側ユーザーIDの紐付けと重複ユーザーの統合
/// - 一括換算日時の記録
/// - ユーザー単位の一括換算ロック
pub mod lock;
pub mod models;
pub mod repository;
pub mod service;

// 公開インターフェース
pub use lock::{acquire_user_lock, UserBatchLock};
pub use models::{CreateUserDto, User};
pub use repository::{
    create, find_all, find_by_access_token, find_by_id, find_by_ledger_user_id,
    link_ledger_identity, mark_updated,
};
pub use service::verify_identity;
