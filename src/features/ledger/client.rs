use crate::features::ledger::models::{CurrentUser, ExpenseUpdate, RemoteComment, RemoteExpense};
use crate::features::users::User;
use crate::shared::config::LedgerApiConfig;
use crate::shared::errors::{AppError, AppResult};
use chrono::NaiveDate;
use log::{debug, info, warn};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const SERVICE_NAME: &str = "台帳API";

/// 台帳（共有経費サービス）へのアクセス
///
/// 1インスタンスは1ユーザーの認証情報に紐付く
pub trait LedgerClient {
    /// 認証済みユーザーの情報を取得する
    fn current_user(&self) -> AppResult<CurrentUser>;

    /// 経費一覧を取得する（Noneの場合は全履歴）
    fn list_expenses(&self, updated_after: Option<NaiveDate>) -> AppResult<Vec<RemoteExpense>>;

    /// 経費を1件取得する
    fn get_expense(&self, expense_id: i64) -> AppResult<RemoteExpense>;

    /// 経費のコメント一覧を取得する
    fn list_comments(&self, expense_id: i64) -> AppResult<Vec<RemoteComment>>;

    /// 経費にコメントを投稿する
    fn create_comment(&self, expense_id: i64, content: &str) -> AppResult<RemoteComment>;

    /// コメントを削除する
    fn delete_comment(&self, comment_id: i64) -> AppResult<()>;

    /// 経費の通貨・合計・全参加者の負担額を置き換える
    fn update_expense(&self, expense_id: i64, update: &ExpenseUpdate) -> AppResult<()>;
}

#[derive(Debug, Deserialize)]
struct CurrentUserEnvelope {
    user: CurrentUser,
}

#[derive(Debug, Deserialize)]
struct ExpensesEnvelope {
    expenses: Vec<RemoteExpense>,
}

#[derive(Debug, Deserialize)]
struct ExpenseEnvelope {
    expense: RemoteExpense,
}

#[derive(Debug, Deserialize)]
struct CommentsEnvelope {
    comments: Vec<RemoteComment>,
}

#[derive(Debug, Deserialize)]
struct CommentEnvelope {
    comment: RemoteComment,
}

/// コメント削除のレスポンス
///
/// 台帳APIは削除したコメントを `{"comment": {...}}` で返す。
/// `success` を返す実装もあるため、明示的な false のみ失敗とみなす
#[derive(Debug, Deserialize)]
struct DeleteEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

impl DeleteEnvelope {
    fn is_rejected(&self) -> bool {
        has_remote_errors(&self.errors) || self.success == Some(false)
    }
}

/// 書き込み系レスポンスの errors フィールド
///
/// 台帳APIは検証エラーでも200を返すことがある
#[derive(Debug, Deserialize)]
struct WriteEnvelope {
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

/// errors フィールドに中身があるかどうか
fn has_remote_errors(errors: &Option<serde_json::Value>) -> bool {
    match errors {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Object(map)) => !map.is_empty(),
        Some(serde_json::Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

/// Splitwise互換の台帳APIクライアント
///
/// 通信はすべて同期で行い、失敗時の再試行は行わない
pub struct SplitwiseClient {
    client: Client,
    config: LedgerApiConfig,
    authorization: String,
}

impl SplitwiseClient {
    /// ユーザーの認証情報でクライアントを作成する
    pub fn new(config: LedgerApiConfig, user: &User) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::configuration(format!("HTTPクライアント初期化失敗: {e}")))?;

        Ok(Self {
            client,
            config,
            authorization: user.authorization_header(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.config.base_url)
    }

    fn get(&self, endpoint: &str) -> RequestBuilder {
        self.client
            .get(self.url(endpoint))
            .header("Authorization", &self.authorization)
    }

    fn post(&self, endpoint: &str) -> RequestBuilder {
        self.client
            .post(self.url(endpoint))
            .header("Authorization", &self.authorization)
    }

    /// リクエストを送信し、成功時はJSONを解析する
    fn send<T>(&self, request: RequestBuilder, method: &str, endpoint: &str) -> AppResult<T>
    where
        T: DeserializeOwned,
    {
        debug!("{method}リクエスト送信: endpoint={endpoint}");

        let response = request.send().map_err(|e| {
            AppError::external_service(SERVICE_NAME, format!("接続に失敗しました: {e}"))
        })?;

        if !response.status().is_success() {
            return Err(self.handle_error_response(response, method, endpoint));
        }

        let body = response.json::<T>().map_err(|e| {
            AppError::external_service(SERVICE_NAME, format!("レスポンス解析エラー: {e}"))
        })?;

        debug!("{method}リクエスト成功: endpoint={endpoint}");
        Ok(body)
    }

    /// エラーレスポンスをAppErrorに変換する
    fn handle_error_response(&self, response: Response, method: &str, endpoint: &str) -> AppError {
        let status = response.status();
        let body = response
            .text()
            .unwrap_or_else(|_| "レスポンス読み取り失敗".to_string());

        let reason = match status.as_u16() {
            401 => "認証に失敗しました。トークンを再登録してください",
            403 => "この操作を実行する権限がありません",
            404 => "指定されたリソースが見つかりません",
            429 => "リクエストが多すぎます",
            500..=599 => "台帳サービス側でエラーが発生しました",
            _ => "リクエストが拒否されました",
        };

        warn!("{method} {endpoint} 失敗: status={status}, body={body}");
        AppError::external_service(SERVICE_NAME, format!("{reason} (HTTP {status}): {body}"))
    }
}

impl LedgerClient for SplitwiseClient {
    fn current_user(&self) -> AppResult<CurrentUser> {
        let envelope: CurrentUserEnvelope =
            self.send(self.get("get_current_user"), "GET", "get_current_user")?;
        Ok(envelope.user)
    }

    fn list_expenses(&self, updated_after: Option<NaiveDate>) -> AppResult<Vec<RemoteExpense>> {
        let request = match updated_after {
            Some(date) => self
                .get("get_expenses")
                .query(&[("updated_after", date.format("%Y-%m-%d").to_string())]),
            None => self.get("get_expenses").query(&[("limit", "0")]),
        };

        let envelope: ExpensesEnvelope = self.send(request, "GET", "get_expenses")?;
        let total = envelope.expenses.len();

        // 削除済みの経費は換算対象にしない
        let expenses: Vec<RemoteExpense> = envelope
            .expenses
            .into_iter()
            .filter(|expense| expense.deleted_at.is_none())
            .collect();

        info!(
            "経費一覧を取得しました: 件数={}, 削除済み除外={}",
            expenses.len(),
            total - expenses.len()
        );
        Ok(expenses)
    }

    fn get_expense(&self, expense_id: i64) -> AppResult<RemoteExpense> {
        let endpoint = format!("get_expense/{expense_id}");
        let envelope: ExpenseEnvelope = self.send(self.get(&endpoint), "GET", &endpoint)?;
        Ok(envelope.expense)
    }

    fn list_comments(&self, expense_id: i64) -> AppResult<Vec<RemoteComment>> {
        let request = self
            .get("get_comments")
            .query(&[("expense_id", expense_id.to_string())]);
        let envelope: CommentsEnvelope = self.send(request, "GET", "get_comments")?;
        Ok(envelope.comments)
    }

    fn create_comment(&self, expense_id: i64, content: &str) -> AppResult<RemoteComment> {
        let mut form = HashMap::new();
        form.insert("expense_id", expense_id.to_string());
        form.insert("content", content.to_string());

        let envelope: CommentEnvelope =
            self.send(self.post("create_comment").form(&form), "POST", "create_comment")?;
        info!(
            "コメントを投稿しました: expense_id={expense_id}, comment_id={}",
            envelope.comment.id
        );
        Ok(envelope.comment)
    }

    fn delete_comment(&self, comment_id: i64) -> AppResult<()> {
        let endpoint = format!("delete_comment/{comment_id}");
        let envelope: DeleteEnvelope = self.send(self.post(&endpoint), "POST", &endpoint)?;

        if envelope.is_rejected() {
            return Err(AppError::external_service(
                SERVICE_NAME,
                format!(
                    "コメントの削除に失敗しました: comment_id={comment_id}, errors={:?}",
                    envelope.errors
                ),
            ));
        }

        info!("コメントを削除しました: comment_id={comment_id}");
        Ok(())
    }

    fn update_expense(&self, expense_id: i64, update: &ExpenseUpdate) -> AppResult<()> {
        let endpoint = format!("update_expense/{expense_id}");
        let fields = update.to_form_fields();
        let envelope: WriteEnvelope =
            self.send(self.post(&endpoint).form(&fields), "POST", &endpoint)?;

        if has_remote_errors(&envelope.errors) {
            return Err(AppError::external_service(
                SERVICE_NAME,
                format!(
                    "経費の更新が拒否されました: expense_id={expense_id}, errors={:?}",
                    envelope.errors
                ),
            ));
        }

        info!(
            "経費を更新しました: expense_id={expense_id}, currency={}, cost={:.2}",
            update.currency_code,
            update.cost()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_has_remote_errors() {
        assert!(!has_remote_errors(&None));
        assert!(!has_remote_errors(&Some(serde_json::Value::Null)));
        assert!(!has_remote_errors(&Some(json!({}))));
        assert!(!has_remote_errors(&Some(json!([]))));
        assert!(has_remote_errors(&Some(json!({"base": ["invalid cost"]}))));
        assert!(has_remote_errors(&Some(json!("failure"))));
    }

    #[test]
    fn test_envelopes_deserialize() {
        let user: CurrentUserEnvelope =
            serde_json::from_value(json!({"user": {"id": 7, "default_currency": "GBP"}})).unwrap();
        assert_eq!(user.user.id, 7);
        assert_eq!(user.user.default_currency.as_deref(), Some("GBP"));

        let user: CurrentUserEnvelope =
            serde_json::from_value(json!({"user": {"id": 7, "default_currency": null}})).unwrap();
        assert!(user.user.default_currency.is_none());

        let write: WriteEnvelope =
            serde_json::from_value(json!({"expenses": [], "errors": {}})).unwrap();
        assert!(!has_remote_errors(&write.errors));
    }

    #[test]
    fn test_delete_envelope_accepts_returned_comment() {
        let deleted: DeleteEnvelope = serde_json::from_value(json!({
            "comment": {
                "id": 5,
                "content": "{\"original_currency\": \"USD\"}",
                "created_at": "2017-03-01T10:00:00Z",
                "deleted_at": "2017-03-02T10:00:00Z"
            }
        }))
        .unwrap();
        assert!(!deleted.is_rejected());

        let success: DeleteEnvelope = serde_json::from_value(json!({"success": true})).unwrap();
        assert!(!success.is_rejected());
    }

    #[test]
    fn test_delete_envelope_rejections() {
        let refused: DeleteEnvelope =
            serde_json::from_value(json!({"success": false, "errors": {}})).unwrap();
        assert!(refused.is_rejected());

        let invalid: DeleteEnvelope =
            serde_json::from_value(json!({"errors": {"base": ["comment not found"]}})).unwrap();
        assert!(invalid.is_rejected());
    }
}
