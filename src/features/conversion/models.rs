use crate::features::ledger::{ExpenseUpdate, RemoteExpense};
use crate::shared::errors::AppResult;
use crate::shared::utils::{format_minor_units, to_minor_units, validate_currency_code};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 台帳上の経費1件について、換算の履歴をローカルに記録したもの
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedExpense {
    /// 台帳側の経費ID
    pub id: i64,
    /// 最後にコメントを読み込んだ時点の経費更新日時
    pub last_seen_update: DateTime<Utc>,
    /// 換算前の通貨（復元点）
    pub original_currency: String,
    /// 換算前の金額（復元点）
    pub original_value: f64,
    /// 直近の換算に使ったレート（Noneは未換算）
    pub original_rate: Option<f64>,
    /// このメタデータが記述している経費ID
    pub updated_for: Option<i64>,
    /// メタデータを保持しているコメントID
    pub comment_id: Option<i64>,
}

impl TrackedExpense {
    /// 台帳上の現在値を復元点として新規作成する
    pub fn seeded_from(expense: &RemoteExpense) -> AppResult<Self> {
        Ok(Self {
            id: expense.id,
            last_seen_update: expense.updated_at,
            original_currency: expense.currency_code.clone(),
            original_value: expense.cost_value()?,
            original_rate: None,
            updated_for: None,
            comment_id: None,
        })
    }

    /// 記録済みの換算が別の経費について書かれたものか
    ///
    /// trueの場合は再換算が必要
    pub fn is_superseded(&self) -> bool {
        self.updated_for.is_some_and(|id| id != self.id)
    }

    /// コメントから読み込んだメタデータで上書きする
    pub fn absorb_metadata(&mut self, metadata: &ConversionMetadata, comment_id: i64) {
        self.original_currency = metadata.original_currency.clone();
        self.original_value = metadata.original_value;
        self.original_rate = metadata.conversion_rate;
        self.updated_for = Some(metadata.updated_for);
        self.comment_id = Some(comment_id);
    }
}

/// 換算の由来を記録するコメント本文
///
/// ローカルDBが空の状態でも状態を復元できる唯一の手段のため、
/// 未知のフィールドは無視し、conversion_rate の欠落も受け付ける
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionMetadata {
    pub original_currency: String,
    #[serde(
        serialize_with = "serialize_amount",
        deserialize_with = "deserialize_amount"
    )]
    pub original_value: f64,
    pub updated_for: i64,
    #[serde(default)]
    pub conversion_rate: Option<f64>,
}

impl ConversionMetadata {
    /// コメント本文を解析する
    ///
    /// メタデータでないコメント（通常の会話など）はNone
    pub fn parse(content: &str) -> Option<Self> {
        let metadata: Self = serde_json::from_str(content.trim()).ok()?;
        validate_currency_code(&metadata.original_currency).ok()?;
        if !metadata.original_value.is_finite() {
            return None;
        }
        Some(metadata)
    }

    /// コメント本文としてシリアライズする
    pub fn to_comment_body(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// 金額は台帳APIと同じく "9.00" 形式の文字列で書き出す
fn serialize_amount<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_minor_units(to_minor_units(*value)))
}

/// 文字列・数値のどちらで書かれた金額も受け付ける
fn deserialize_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
    }

    match Amount::deserialize(deserializer)? {
        Amount::Number(value) => Ok(value),
        Amount::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("金額の形式が不正です: {text} ({e})"))),
    }
}

/// 換算が必要と判定された経費
#[derive(Debug, Clone, Serialize)]
pub struct Discrepancy {
    pub expense_id: i64,
    pub description: String,
    /// 経費の作成日（為替レートの基準日）
    pub created_on: NaiveDate,
    /// 台帳上の現在の金額
    pub live_value: f64,
    /// 台帳上の現在の通貨
    pub live_currency: String,
    /// 換算の基準となる金額
    pub original_value: f64,
    /// 換算の基準となる通貨
    pub original_currency: String,
    pub target_currency: String,
    /// 換算後の金額（換算できない場合はNone）
    pub converted_value: Option<f64>,
    /// 換算できない理由
    pub note: Option<String>,
    /// 使用するレート（Noneは一括換算の対象外）
    pub rate: Option<f64>,
    /// 既存の換算が無効になったために検出されたか
    pub superseded: bool,
}

impl Discrepancy {
    /// 表示用の換算後金額
    pub fn converted_display(&self) -> String {
        match (self.converted_value, &self.note) {
            (Some(value), _) => format!("{value:.2} {}", self.target_currency),
            (None, Some(note)) => note.clone(),
            (None, None) => "-".to_string(),
        }
    }
}

/// 台帳への書き戻し内容
#[derive(Debug, Clone, PartialEq)]
pub struct WritePayload {
    /// 経費本体の更新内容
    pub update: ExpenseUpdate,
    /// コメントとして投稿するメタデータ
    pub metadata: ConversionMetadata,
}

/// 1件の換算結果
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    pub expense_id: i64,
    pub description: String,
    pub from_currency: String,
    pub to_currency: String,
    pub new_total: f64,
    pub rate: f64,
    pub comment_id: i64,
    /// 削除した古いメタデータコメントの数
    pub removed_comments: usize,
}

/// 一括換算の結果
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub user_id: i64,
    pub target_currency: String,
    pub converted: Vec<ConversionOutcome>,
    /// レートが無いため換算しなかった経費
    pub skipped: Vec<Discrepancy>,
}

/// 全ユーザー同期の結果
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub reports: Vec<BatchReport>,
    /// 台帳ユーザーIDが未確認のため処理しなかったユーザー
    pub skipped_users: Vec<i64>,
    /// 失敗したユーザーとエラー内容
    pub failed_users: Vec<(i64, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_round_trip_format() {
        let metadata = ConversionMetadata {
            original_currency: "USD".to_string(),
            original_value: 9.0,
            updated_for: 1001,
            conversion_rate: Some(0.8),
        };

        let body = metadata.to_comment_body().unwrap();
        assert!(body.contains("\"original_value\":\"9.00\""));
        assert!(body.contains("\"updated_for\":1001"));
        assert!(body.contains("\"conversion_rate\":0.8"));

        assert_eq!(ConversionMetadata::parse(&body), Some(metadata));
    }

    #[test]
    fn test_parse_legacy_metadata_without_rate() {
        // 換算レートを記録していなかった頃のコメント
        let body = r#"{"original_currency": "EUR", "original_value": "12.5", "updated_for": 77}"#;
        let metadata = ConversionMetadata::parse(body).unwrap();
        assert_eq!(metadata.original_value, 12.5);
        assert_eq!(metadata.conversion_rate, None);
    }

    #[test]
    fn test_parse_accepts_numeric_value_and_unknown_fields() {
        let body = r#"{"original_currency": "EUR", "original_value": 3.2, "updated_for": 1,
                       "conversion_rate": 1.1, "schema": 3}"#;
        let metadata = ConversionMetadata::parse(body).unwrap();
        assert_eq!(metadata.original_value, 3.2);
        assert_eq!(metadata.conversion_rate, Some(1.1));
    }

    #[test]
    fn test_parse_rejects_ordinary_comments() {
        assert_eq!(ConversionMetadata::parse("Thanks for dinner!"), None);
        assert_eq!(ConversionMetadata::parse("{\"foo\": 1}"), None);
        assert_eq!(ConversionMetadata::parse("[1, 2, 3]"), None);
        assert_eq!(
            ConversionMetadata::parse(
                r#"{"original_currency": "usd", "original_value": "1", "updated_for": 1}"#
            ),
            None
        );
    }

    #[test]
    fn test_tracked_expense_superseded() {
        let mut tracked = TrackedExpense {
            id: 10,
            last_seen_update: Utc::now(),
            original_currency: "USD".to_string(),
            original_value: 9.0,
            original_rate: None,
            updated_for: None,
            comment_id: None,
        };
        assert!(!tracked.is_superseded());

        tracked.updated_for = Some(10);
        assert!(!tracked.is_superseded());

        tracked.updated_for = Some(11);
        assert!(tracked.is_superseded());
    }

    #[test]
    fn test_discrepancy_display() {
        let mut discrepancy = Discrepancy {
            expense_id: 1,
            description: "Dinner".to_string(),
            created_on: NaiveDate::from_ymd_opt(2017, 3, 1).unwrap(),
            live_value: 9.0,
            live_currency: "USD".to_string(),
            original_value: 9.0,
            original_currency: "USD".to_string(),
            target_currency: "GBP".to_string(),
            converted_value: Some(11.25),
            note: None,
            rate: Some(0.8),
            superseded: false,
        };
        assert_eq!(discrepancy.converted_display(), "11.25 GBP");

        discrepancy.converted_value = None;
        discrepancy.rate = None;
        discrepancy.note = Some("Can't convert XYZ".to_string());
        assert_eq!(discrepancy.converted_display(), "Can't convert XYZ");
    }
}
