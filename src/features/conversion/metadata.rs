// コメント欄に保存された換算メタデータの読み取り

use crate::features::conversion::models::ConversionMetadata;
use crate::features::ledger::RemoteComment;

/// 削除済みを除いたコメントを新しい順に並べる
///
/// 作成日時が同じ場合はIDの大きい方を新しいとみなす
fn live_newest_first(comments: &[RemoteComment]) -> Vec<&RemoteComment> {
    let mut live: Vec<&RemoteComment> = comments.iter().filter(|c| !c.is_deleted()).collect();
    live.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    live
}

/// 最新のメタデータコメントを探す
///
/// # 戻り値
/// (コメントID, メタデータ)。メタデータを含むコメントが無い場合はNone
pub fn latest_metadata(comments: &[RemoteComment]) -> Option<(i64, ConversionMetadata)> {
    live_newest_first(comments)
        .into_iter()
        .find_map(|comment| ConversionMetadata::parse(&comment.content).map(|m| (comment.id, m)))
}

/// 削除されていないメタデータコメントのIDを新しい順に返す
pub fn live_metadata_comment_ids(comments: &[RemoteComment]) -> Vec<i64> {
    live_newest_first(comments)
        .into_iter()
        .filter(|comment| ConversionMetadata::parse(&comment.content).is_some())
        .map(|comment| comment.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn comment(id: i64, hour: u32, content: &str, deleted: bool) -> RemoteComment {
        RemoteComment {
            id,
            content: content.to_string(),
            created_at: Utc.with_ymd_and_hms(2017, 3, 2, hour, 0, 0).unwrap(),
            deleted_at: deleted.then(|| Utc.with_ymd_and_hms(2017, 3, 3, 0, 0, 0).unwrap()),
        }
    }

    const OLD: &str = r#"{"original_currency": "USD", "original_value": "9.00", "updated_for": 1, "conversion_rate": 0.9}"#;
    const NEW: &str = r#"{"original_currency": "USD", "original_value": "9.00", "updated_for": 1, "conversion_rate": 0.8}"#;

    #[test]
    fn test_latest_metadata_prefers_newest() {
        let comments = vec![
            comment(1, 8, OLD, false),
            comment(2, 10, "Paid in cash", false),
            comment(3, 9, NEW, false),
        ];

        let (id, metadata) = latest_metadata(&comments).unwrap();
        assert_eq!(id, 3);
        assert_eq!(metadata.conversion_rate, Some(0.8));
    }

    #[test]
    fn test_latest_metadata_skips_deleted_comments() {
        let comments = vec![comment(1, 8, OLD, false), comment(3, 9, NEW, true)];

        let (id, metadata) = latest_metadata(&comments).unwrap();
        assert_eq!(id, 1);
        assert_eq!(metadata.conversion_rate, Some(0.9));
    }

    #[test]
    fn test_latest_metadata_none_for_plain_thread() {
        let comments = vec![comment(1, 8, "hello", false), comment(2, 9, "bye", false)];
        assert!(latest_metadata(&comments).is_none());
        assert!(live_metadata_comment_ids(&comments).is_empty());
    }

    #[test]
    fn test_live_metadata_comment_ids() {
        let comments = vec![
            comment(1, 8, OLD, false),
            comment(2, 8, NEW, false),
            comment(3, 9, "note", false),
            comment(4, 10, NEW, true),
        ];

        assert_eq!(live_metadata_comment_ids(&comments), vec![2, 1]);
    }
}
