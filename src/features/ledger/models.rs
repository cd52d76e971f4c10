use crate::shared::errors::AppResult;
use crate::shared::utils::{format_minor_units, from_minor_units, parse_amount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 台帳APIの現在ユーザー
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: i64,
    #[serde(default)]
    pub default_currency: Option<String>,
}

/// 台帳上の経費
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteExpense {
    pub id: i64,
    #[serde(default)]
    pub description: Option<String>,
    pub currency_code: String,
    /// 合計金額（台帳APIは文字列で返す）
    pub cost: String,
    #[serde(default)]
    pub users: Vec<RemoteShare>,
    #[serde(default)]
    pub comments_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RemoteExpense {
    /// 合計金額を数値で取得する
    pub fn cost_value(&self) -> AppResult<f64> {
        parse_amount(&self.cost, "合計金額")
    }

    /// 表示用の説明文
    pub fn description_or_default(&self) -> &str {
        self.description.as_deref().unwrap_or("(説明なし)")
    }
}

/// 経費の参加者ごとの支払額・負担額
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteShare {
    pub user_id: i64,
    pub paid_share: String,
    pub owed_share: String,
}

impl RemoteShare {
    /// 支払額を数値で取得する
    pub fn paid_value(&self) -> AppResult<f64> {
        parse_amount(&self.paid_share, "支払額")
    }

    /// 負担額を数値で取得する
    pub fn owed_value(&self) -> AppResult<f64> {
        parse_amount(&self.owed_share, "負担額")
    }
}

/// 経費に付いたコメント
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteComment {
    pub id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RemoteComment {
    /// 削除済みコメントかどうか
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// 参加者1人分の換算後の支払額・負担額（最小通貨単位）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantShare {
    pub user_id: i64,
    pub paid_share_minor: i64,
    pub owed_share_minor: i64,
}

/// 経費の書き戻し内容
///
/// 台帳APIは参加者配列の部分更新を受け付けないため、全参加者を必ず含める
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseUpdate {
    pub currency_code: String,
    pub cost_minor: i64,
    pub users: Vec<ParticipantShare>,
}

impl ExpenseUpdate {
    pub fn cost(&self) -> f64 {
        from_minor_units(self.cost_minor)
    }

    /// 負担額の合計（最小通貨単位）
    pub fn owed_total_minor(&self) -> i64 {
        self.users.iter().map(|u| u.owed_share_minor).sum()
    }

    /// 台帳APIのフォーム形式（users__{i}__*）に展開する
    pub fn to_form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("currency_code".to_string(), self.currency_code.clone()),
            ("cost".to_string(), format_minor_units(self.cost_minor)),
        ];

        for (idx, user) in self.users.iter().enumerate() {
            fields.push((format!("users__{idx}__user_id"), user.user_id.to_string()));
            fields.push((
                format!("users__{idx}__paid_share"),
                format_minor_units(user.paid_share_minor),
            ));
            fields.push((
                format!("users__{idx}__owed_share"),
                format_minor_units(user.owed_share_minor),
            ));
        }

        fields
    }
}
