use crate::shared::utils::humanize_since;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 台帳アカウント1件分のユーザー情報
#[derive(Clone, Serialize, Deserialize)]
pub struct User {
    /// ローカルのユーザーID
    pub id: i64,
    /// 台帳側のユーザーID（本人確認が済むまではNone）
    pub ledger_user_id: Option<i64>,
    /// アクセストークン
    #[serde(skip_serializing)]
    pub access_token: String,
    /// トークン種別（通常は "Bearer"）
    pub token_type: String,
    /// 最後に一括換算が成功した日時（Noneは未実行）
    pub last_update: Option<DateTime<Utc>>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
}

impl User {
    /// 台帳APIへ送るAuthorizationヘッダー値
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// 経費一覧の取得範囲（この日付以降に更新されたもの）
    ///
    /// Noneの場合は全履歴を対象にする
    pub fn expenses_updated_after(&self) -> Option<NaiveDate> {
        self.last_update.map(|ts| ts.date_naive())
    }

    /// 最終更新日時を人が読める形式で返す
    pub fn pretty_update(&self, now: &DateTime<Utc>) -> String {
        match &self.last_update {
            Some(last_update) => humanize_since(last_update, now),
            None => "never".to_string(),
        }
    }
}

// トークンをログに出さないためDebugは手動実装
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked = format!("{}****", self.access_token.chars().take(4).collect::<String>());
        f.debug_struct("User")
            .field("id", &self.id)
            .field("ledger_user_id", &self.ledger_user_id)
            .field("access_token", &masked)
            .field("token_type", &self.token_type)
            .field("last_update", &self.last_update)
            .finish()
    }
}

/// ユーザー登録用DTO
#[derive(Debug, Deserialize)]
pub struct CreateUserDto {
    pub access_token: String,
    pub token_type: Option<String>,
}
