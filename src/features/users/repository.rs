use crate::features::users::models::{CreateUserDto, User};
use crate::shared::database::timestamp_from_column;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::now_utc;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const USER_COLUMNS: &str = "id, ledger_user_id, access_token, token_type, last_update, created_at";

/// 行データからユーザーを組み立てる
fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let last_update: Option<String> = row.get(4)?;
    let created_at: String = row.get(5)?;

    Ok(User {
        id: row.get(0)?,
        ledger_user_id: row.get(1)?,
        access_token: row.get(2)?,
        token_type: row.get(3)?,
        last_update: last_update
            .map(|value| timestamp_from_column(&value, 4, "last_update"))
            .transpose()?,
        created_at: timestamp_from_column(&created_at, 5, "created_at")?,
    })
}

/// ユーザーを登録する
///
/// 同じトークンが既に登録されている場合は既存ユーザーを返す
///
/// # 引数
/// * `conn` - データベース接続
/// * `dto` - ユーザー登録用DTO
///
/// # 戻り値
/// 登録されたユーザー、または失敗時はエラー
pub fn create(conn: &Connection, dto: CreateUserDto) -> AppResult<User> {
    let access_token = dto.access_token.trim().to_string();
    if access_token.is_empty() {
        return Err(AppError::validation("アクセストークンは必須項目です"));
    }

    if let Some(existing) = find_by_access_token(conn, &access_token)? {
        log::info!("登録済みのトークンです: user_id={}", existing.id);
        return Ok(existing);
    }

    let token_type = dto
        .token_type
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Bearer".to_string());
    let now = now_utc().to_rfc3339();

    conn.execute(
        "INSERT INTO users (ledger_user_id, access_token, token_type, last_update, created_at)
         VALUES (NULL, ?1, ?2, NULL, ?3)",
        params![access_token, token_type, now],
    )?;

    let id = conn.last_insert_rowid();
    log::info!("ユーザーを登録しました: user_id={id}");
    find_by_id(conn, id)
}

/// IDでユーザーを取得する
pub fn find_by_id(conn: &Connection, id: i64) -> AppResult<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        map_user,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::not_found("ユーザー"),
        _ => AppError::from(e),
    })
}

/// アクセストークンでユーザーを取得する
pub fn find_by_access_token(conn: &Connection, access_token: &str) -> AppResult<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE access_token = ?1"),
            params![access_token],
            map_user,
        )
        .optional()?;
    Ok(user)
}

/// 台帳側のユーザーIDでユーザーを取得する
pub fn find_by_ledger_user_id(conn: &Connection, ledger_user_id: i64) -> AppResult<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE ledger_user_id = ?1 ORDER BY id LIMIT 1"),
            params![ledger_user_id],
            map_user,
        )
        .optional()?;
    Ok(user)
}

/// 全ユーザーを取得する
pub fn find_all(conn: &Connection) -> AppResult<Vec<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
    let users = stmt.query_map([], map_user)?;
    users.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
}

/// 一括換算の完了日時を記録する
///
/// # 引数
/// * `conn` - データベース接続
/// * `id` - ユーザーID
/// * `when` - 完了日時
pub fn mark_updated(conn: &Connection, id: i64, when: &DateTime<Utc>) -> AppResult<User> {
    let affected_rows = conn.execute(
        "UPDATE users SET last_update = ?1 WHERE id = ?2",
        params![when.to_rfc3339(), id],
    )?;

    if affected_rows == 0 {
        return Err(AppError::not_found("ユーザー"));
    }

    find_by_id(conn, id)
}

/// 台帳側のユーザーIDを紐付ける
///
/// 同じ台帳ユーザーが別のローカルユーザーとして既に存在する場合は、
/// 新しいトークンを既存ユーザーへ移し、重複したユーザーを削除する
///
/// # 引数
/// * `conn` - データベース接続
/// * `id` - 紐付け対象のローカルユーザーID
/// * `ledger_user_id` - 台帳側のユーザーID
///
/// # 戻り値
/// 紐付け後のユーザー（統合された場合は既存ユーザー）
pub fn link_ledger_identity(conn: &Connection, id: i64, ledger_user_id: i64) -> AppResult<User> {
    let user = find_by_id(conn, id)?;

    match find_by_ledger_user_id(conn, ledger_user_id)? {
        Some(other) if other.id != user.id => {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM users WHERE id = ?1", params![user.id])?;
            tx.execute(
                "UPDATE users SET access_token = ?1, token_type = ?2 WHERE id = ?3",
                params![user.access_token, user.token_type, other.id],
            )?;
            tx.commit()?;

            log::info!(
                "重複ユーザーを統合しました: removed={}, kept={}, ledger_user_id={ledger_user_id}",
                user.id,
                other.id
            );
            find_by_id(conn, other.id)
        }
        _ => {
            conn.execute(
                "UPDATE users SET ledger_user_id = ?1 WHERE id = ?2",
                params![ledger_user_id, user.id],
            )?;
            log::info!("台帳ユーザーを紐付けました: user_id={}, ledger_user_id={ledger_user_id}", user.id);
            find_by_id(conn, user.id)
        }
    }
}
