use crate::features::ledger::LedgerClient;
use crate::features::users::models::User;
use crate::features::users::repository;
use crate::shared::errors::AppResult;
use log::info;
use rusqlite::Connection;

/// 台帳APIに問い合わせてユーザーの台帳IDを確認・記録する
///
/// 同じ台帳ユーザーが既に登録されている場合は既存ユーザーに統合する
///
/// # 引数
/// * `conn` - データベース接続
/// * `ledger` - 確認対象ユーザーの認証情報で作成した台帳クライアント
/// * `user_id` - ローカルのユーザーID
///
/// # 戻り値
/// 紐付け後のユーザー
pub fn verify_identity<L: LedgerClient + ?Sized>(
    conn: &Connection,
    ledger: &L,
    user_id: i64,
) -> AppResult<User> {
    let current = ledger.current_user()?;
    info!(
        "台帳ユーザーを確認しました: user_id={user_id}, ledger_user_id={}, default_currency={:?}",
        current.id, current.default_currency
    );

    repository::link_ledger_identity(conn, user_id, current.id)
}
