use crate::shared::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;

/// 旧バージョンのスキーマに後から追加されたカラム
///
/// (テーブル名, カラム名, カラム定義)
const ADDED_COLUMNS: &[(&str, &str, &str)] = &[
    ("tracked_expenses", "original_rate", "REAL"),
    ("tracked_expenses", "updated_for", "INTEGER"),
    ("tracked_expenses", "comment_id", "INTEGER"),
    ("users", "token_type", "TEXT NOT NULL DEFAULT 'Bearer'"),
];

/// データベース接続を初期化し、マイグレーションを実行する
///
/// # 引数
/// * `database_path` - データベースファイルのパス
///
/// # 戻り値
/// データベース接続、または失敗時はエラー
///
/// # 処理内容
/// 1. 親ディレクトリの確保
/// 2. データベース接続の開設
/// 3. テーブル作成とマイグレーションの実行
pub fn initialize_database(database_path: &Path) -> AppResult<Connection> {
    if let Some(parent) = database_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::configuration(format!("データディレクトリの作成に失敗: {e}"))
            })?;
            log::info!("データディレクトリを作成: {parent:?}");
        }
    }

    let conn = Connection::open(database_path)?;

    create_tables(&conn)?;

    log::info!("データベースを初期化しました: {database_path:?}");

    Ok(conn)
}

/// データベーステーブルを作成する
///
/// # 引数
/// * `conn` - データベース接続
///
/// # 戻り値
/// 成功時はOk(())、失敗時はエラー
pub fn create_tables(conn: &Connection) -> AppResult<()> {
    let existing_tables: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table'
         AND name IN ('users', 'tracked_expenses')",
        [],
        |row| row.get(0),
    )?;

    if existing_tables == 0 {
        log::info!("新規データベースを作成します");
    } else {
        log::debug!("既存のデータベースを確認中...");
    }

    create_users_table(conn)?;
    create_tracked_expenses_table(conn)?;
    migrate_existing_tables(conn)?;
    create_indexes(conn)?;

    Ok(())
}

/// ユーザーテーブルを作成する
fn create_users_table(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ledger_user_id INTEGER,
            access_token TEXT NOT NULL UNIQUE,
            token_type TEXT NOT NULL DEFAULT 'Bearer',
            last_update TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

/// 換算済み経費の追跡テーブルを作成する
///
/// idは台帳側の経費IDをそのまま使う
fn create_tracked_expenses_table(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tracked_expenses (
            id INTEGER PRIMARY KEY,
            last_seen_update TEXT NOT NULL,
            original_currency TEXT NOT NULL,
            original_value REAL NOT NULL,
            original_rate REAL,
            updated_for INTEGER,
            comment_id INTEGER
        )",
        [],
    )?;

    Ok(())
}

/// 既存テーブルのマイグレーションを実行する
///
/// 旧スキーマで作成されたデータベースに不足カラムを追加する
fn migrate_existing_tables(conn: &Connection) -> AppResult<()> {
    for (table, column, definition) in ADDED_COLUMNS {
        if !check_column_exists(conn, table, column) {
            log::info!("{table}.{column}カラムを追加します...");
            conn.execute(
                &format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"),
                [],
            )?;
        }
    }

    Ok(())
}

/// インデックスを作成する
fn create_indexes(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_ledger_user_id ON users(ledger_user_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tracked_expenses_updated_for ON tracked_expenses(updated_for)",
        [],
    )?;

    Ok(())
}

/// テーブルに指定されたカラムが存在するかチェックする
///
/// # 戻り値
/// カラムが存在する場合はtrue、存在しないかエラーの場合はfalse
fn check_column_exists(conn: &Connection, table_name: &str, column_name: &str) -> bool {
    let query = format!("PRAGMA table_info({table_name})");

    match conn.prepare(&query) {
        Ok(mut stmt) => match stmt.query_map([], |row| row.get::<_, String>(1)) {
            Ok(rows) => rows.flatten().any(|name| name == column_name),
            Err(_) => false,
        },
        Err(_) => false,
    }
}

/// RFC3339形式で保存された日時カラムを読み込む
///
/// # 引数
/// * `value` - カラムの文字列値
/// * `index` - カラム位置（エラー報告用）
/// * `name` - カラム名（エラー報告用）
pub fn timestamp_from_column(
    value: &str,
    index: usize,
    name: &str,
) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_e| {
            rusqlite::Error::InvalidColumnType(index, name.to_string(), rusqlite::types::Type::Text)
        })
}
