use crate::features::conversion::models::TrackedExpense;
use crate::shared::database::timestamp_from_column;
use crate::shared::errors::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

const TRACKED_COLUMNS: &str = "id, last_seen_update, original_currency, original_value, \
                               original_rate, updated_for, comment_id";

fn map_tracked(row: &Row<'_>) -> rusqlite::Result<TrackedExpense> {
    let last_seen_update: String = row.get(1)?;

    Ok(TrackedExpense {
        id: row.get(0)?,
        last_seen_update: timestamp_from_column(&last_seen_update, 1, "last_seen_update")?,
        original_currency: row.get(2)?,
        original_value: row.get(3)?,
        original_rate: row.get(4)?,
        updated_for: row.get(5)?,
        comment_id: row.get(6)?,
    })
}

/// 経費IDで追跡情報を取得する
///
/// # 戻り値
/// 追跡情報（未登録の場合はNone）、または失敗時はエラー
pub fn find_by_id(conn: &Connection, id: i64) -> AppResult<Option<TrackedExpense>> {
    let tracked = conn
        .query_row(
            &format!("SELECT {TRACKED_COLUMNS} FROM tracked_expenses WHERE id = ?1"),
            params![id],
            map_tracked,
        )
        .optional()?;
    Ok(tracked)
}

/// 追跡情報を保存する（存在しなければ作成、存在すれば上書き）
///
/// 追跡情報は削除しない
pub fn save(conn: &Connection, tracked: &TrackedExpense) -> AppResult<()> {
    conn.execute(
        "INSERT INTO tracked_expenses
            (id, last_seen_update, original_currency, original_value, original_rate, updated_for, comment_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            last_seen_update = excluded.last_seen_update,
            original_currency = excluded.original_currency,
            original_value = excluded.original_value,
            original_rate = excluded.original_rate,
            updated_for = excluded.updated_for,
            comment_id = excluded.comment_id",
        params![
            tracked.id,
            tracked.last_seen_update.to_rfc3339(),
            tracked.original_currency,
            tracked.original_value,
            tracked.original_rate,
            tracked.updated_for,
            tracked.comment_id,
        ],
    )?;

    log::debug!(
        "追跡情報を保存しました: expense_id={}, original={} {:.2}, rate={:?}, updated_for={:?}, comment_id={:?}",
        tracked.id,
        tracked.original_currency,
        tracked.original_value,
        tracked.original_rate,
        tracked.updated_for,
        tracked.comment_id
    );
    Ok(())
}

/// メタデータコメントの参照を外す
///
/// コメントを台帳から削除した直後に呼ぶ
pub fn clear_comment(conn: &Connection, id: i64) -> AppResult<()> {
    let affected_rows = conn.execute(
        "UPDATE tracked_expenses SET comment_id = NULL WHERE id = ?1",
        params![id],
    )?;

    if affected_rows == 0 {
        return Err(AppError::not_found("追跡中の経費"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::database::create_tables;
    use chrono::{TimeZone, Utc};

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn sample(id: i64) -> TrackedExpense {
        TrackedExpense {
            id,
            last_seen_update: Utc.with_ymd_and_hms(2017, 3, 2, 8, 0, 0).unwrap(),
            original_currency: "USD".to_string(),
            original_value: 9.0,
            original_rate: None,
            updated_for: None,
            comment_id: None,
        }
    }

    #[test]
    fn test_save_and_find() {
        let conn = create_test_db();
        assert!(find_by_id(&conn, 1001).unwrap().is_none());

        let tracked = sample(1001);
        save(&conn, &tracked).unwrap();

        let found = find_by_id(&conn, 1001).unwrap().unwrap();
        assert_eq!(found, tracked);
    }

    #[test]
    fn test_save_overwrites_existing_row() {
        let conn = create_test_db();
        let mut tracked = sample(1001);
        save(&conn, &tracked).unwrap();

        tracked.original_rate = Some(0.8);
        tracked.updated_for = Some(1001);
        tracked.comment_id = Some(55);
        save(&conn, &tracked).unwrap();

        let found = find_by_id(&conn, 1001).unwrap().unwrap();
        assert_eq!(found.original_rate, Some(0.8));
        assert_eq!(found.updated_for, Some(1001));
        assert_eq!(found.comment_id, Some(55));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM tracked_expenses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_clear_comment() {
        let conn = create_test_db();
        let mut tracked = sample(1001);
        tracked.comment_id = Some(55);
        save(&conn, &tracked).unwrap();

        clear_comment(&conn, 1001).unwrap();
        assert_eq!(find_by_id(&conn, 1001).unwrap().unwrap().comment_id, None);

        let result = clear_comment(&conn, 999);
        assert!(matches!(result.unwrap_err(), AppError::NotFound(_)));
    }
}
