// 換算処理のテスト用の台帳・為替レートの代替実装

use crate::features::conversion::models::ConversionMetadata;
use crate::features::ledger::{
    CurrentUser, ExpenseUpdate, LedgerClient, RemoteComment, RemoteExpense, RemoteShare,
};
use crate::features::rates::{RateLookup, RateSource};
use crate::features::users::{self, CreateUserDto, User};
use crate::shared::database::create_tables;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::format_minor_units;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// テスト用DBと台帳IDを紐付け済みのユーザーを作成する
pub fn setup() -> (Connection, User) {
    let conn = Connection::open_in_memory().unwrap();
    create_tables(&conn).unwrap();
    let user = users::create(
        &conn,
        CreateUserDto {
            access_token: "test-token".to_string(),
            token_type: None,
        },
    )
    .unwrap();
    let user = users::link_ledger_identity(&conn, user.id, 42).unwrap();
    (conn, user)
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 3, 1, 10, 0, 0).unwrap()
}

/// 台帳上の経費を作成する
///
/// `shares` は (user_id, paid_share, owed_share)
pub fn remote_expense(
    id: i64,
    currency: &str,
    cost: &str,
    shares: &[(i64, &str, &str)],
) -> RemoteExpense {
    RemoteExpense {
        id,
        description: Some(format!("Expense {id}")),
        currency_code: currency.to_string(),
        cost: cost.to_string(),
        users: shares
            .iter()
            .map(|(user_id, paid, owed)| RemoteShare {
                user_id: *user_id,
                paid_share: paid.to_string(),
                owed_share: owed.to_string(),
            })
            .collect(),
        comments_count: 0,
        created_at: base_time(),
        updated_at: base_time(),
        deleted_at: None,
    }
}

/// メタデータコメントの本文を作成する
pub fn metadata_body(
    original_currency: &str,
    original_value: &str,
    updated_for: i64,
    conversion_rate: Option<f64>,
) -> String {
    ConversionMetadata {
        original_currency: original_currency.to_string(),
        original_value: original_value.parse().unwrap(),
        updated_for,
        conversion_rate,
    }
    .to_comment_body()
    .unwrap()
}

#[derive(Default)]
struct LedgerState {
    expenses: Vec<RemoteExpense>,
    comments: HashMap<i64, Vec<RemoteComment>>,
    next_comment_id: i64,
    clock: i64,
}

impl LedgerState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        base_time() + Duration::minutes(self.clock)
    }

    fn expense_mut(&mut self, expense_id: i64) -> AppResult<&mut RemoteExpense> {
        self.expenses
            .iter_mut()
            .find(|e| e.id == expense_id)
            .ok_or_else(|| AppError::external_service("台帳API", format!("HTTP 404: {expense_id}")))
    }
}

/// メモリ上で動作する台帳
pub struct FakeLedger {
    state: RefCell<LedgerState>,
    default_currency: Option<String>,
    ledger_user_id: i64,
    fail_updates: Cell<bool>,
    fail_comments: Cell<bool>,
    comment_fetches: Cell<usize>,
    expense_writes: Cell<usize>,
}

impl FakeLedger {
    pub fn new(expenses: Vec<RemoteExpense>) -> Self {
        Self {
            state: RefCell::new(LedgerState {
                expenses,
                next_comment_id: 500,
                ..LedgerState::default()
            }),
            default_currency: Some("GBP".to_string()),
            ledger_user_id: 42,
            fail_updates: Cell::new(false),
            fail_comments: Cell::new(false),
            comment_fetches: Cell::new(0),
            expense_writes: Cell::new(0),
        }
    }

    pub fn with_default_currency(mut self, currency: Option<&str>) -> Self {
        self.default_currency = currency.map(str::to_string);
        self
    }

    pub fn with_ledger_user_id(mut self, ledger_user_id: i64) -> Self {
        self.ledger_user_id = ledger_user_id;
        self
    }

    /// 以降の経費更新を失敗させる
    pub fn fail_updates(&self) {
        self.fail_updates.set(true);
    }

    /// 以降のコメント投稿を失敗させる
    pub fn fail_comments(&self) {
        self.fail_comments.set(true);
    }

    /// 他の利用者が書いたコメントを追加する
    pub fn add_comment(&self, expense_id: i64, content: &str) -> i64 {
        let mut state = self.state.borrow_mut();
        let created_at = state.tick();
        state.next_comment_id += 1;
        let id = state.next_comment_id;
        state.comments.entry(expense_id).or_default().push(RemoteComment {
            id,
            content: content.to_string(),
            created_at,
            deleted_at: None,
        });
        if let Ok(expense) = state.expense_mut(expense_id) {
            expense.comments_count += 1;
        }
        id
    }

    pub fn expense(&self, expense_id: i64) -> RemoteExpense {
        self.get_expense(expense_id).unwrap()
    }

    /// 削除されていないコメント
    pub fn live_comments(&self, expense_id: i64) -> Vec<RemoteComment> {
        self.state
            .borrow()
            .comments
            .get(&expense_id)
            .map(|comments| comments.iter().filter(|c| !c.is_deleted()).cloned().collect())
            .unwrap_or_default()
    }

    pub fn comment_fetches(&self) -> usize {
        self.comment_fetches.get()
    }

    pub fn expense_writes(&self) -> usize {
        self.expense_writes.get()
    }
}

impl LedgerClient for FakeLedger {
    fn current_user(&self) -> AppResult<CurrentUser> {
        Ok(CurrentUser {
            id: self.ledger_user_id,
            default_currency: self.default_currency.clone(),
        })
    }

    fn list_expenses(&self, updated_after: Option<NaiveDate>) -> AppResult<Vec<RemoteExpense>> {
        Ok(self
            .state
            .borrow()
            .expenses
            .iter()
            .filter(|e| updated_after.map_or(true, |date| e.updated_at.date_naive() >= date))
            .cloned()
            .collect())
    }

    fn get_expense(&self, expense_id: i64) -> AppResult<RemoteExpense> {
        self.state.borrow_mut().expense_mut(expense_id).map(|e| e.clone())
    }

    fn list_comments(&self, expense_id: i64) -> AppResult<Vec<RemoteComment>> {
        self.comment_fetches.set(self.comment_fetches.get() + 1);
        Ok(self
            .state
            .borrow()
            .comments
            .get(&expense_id)
            .cloned()
            .unwrap_or_default())
    }

    fn create_comment(&self, expense_id: i64, content: &str) -> AppResult<RemoteComment> {
        if self.fail_comments.get() {
            return Err(AppError::external_service("台帳API", "HTTP 503: unavailable"));
        }

        let id = self.add_comment(expense_id, content);
        let state = self.state.borrow();
        state
            .comments
            .get(&expense_id)
            .and_then(|comments| comments.iter().find(|c| c.id == id))
            .cloned()
            .ok_or_else(|| AppError::external_service("台帳API", "comment not stored"))
    }

    fn delete_comment(&self, comment_id: i64) -> AppResult<()> {
        let mut state = self.state.borrow_mut();
        let deleted_at = state.tick();
        let comment = state
            .comments
            .values_mut()
            .flat_map(|comments| comments.iter_mut())
            .find(|c| c.id == comment_id)
            .ok_or_else(|| AppError::external_service("台帳API", format!("HTTP 404: {comment_id}")))?;
        comment.deleted_at = Some(deleted_at);
        Ok(())
    }

    fn update_expense(&self, expense_id: i64, update: &ExpenseUpdate) -> AppResult<()> {
        if self.fail_updates.get() {
            return Err(AppError::external_service("台帳API", "HTTP 500: unavailable"));
        }

        let mut state = self.state.borrow_mut();
        let updated_at = state.tick();
        let expense = state.expense_mut(expense_id)?;
        expense.currency_code = update.currency_code.clone();
        expense.cost = format_minor_units(update.cost_minor);
        expense.users = update
            .users
            .iter()
            .map(|u| RemoteShare {
                user_id: u.user_id,
                paid_share: format_minor_units(u.paid_share_minor),
                owed_share: format_minor_units(u.owed_share_minor),
            })
            .collect();
        expense.updated_at = updated_at;
        self.expense_writes.set(self.expense_writes.get() + 1);
        Ok(())
    }
}

/// 固定の為替レート表
pub struct FakeRates {
    rates: HashMap<(String, String), f64>,
    failing: bool,
    calls: Cell<usize>,
}

impl FakeRates {
    /// `rates` は (base, symbol, rate)
    pub fn new(rates: &[(&str, &str, f64)]) -> Self {
        Self {
            rates: rates
                .iter()
                .map(|(base, symbol, rate)| ((base.to_string(), symbol.to_string()), *rate))
                .collect(),
            failing: false,
            calls: Cell::new(0),
        }
    }

    /// 常に通信失敗するレート表
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new(&[])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl RateSource for FakeRates {
    fn historical_rate(&self, _date: NaiveDate, base: &str, symbol: &str) -> AppResult<RateLookup> {
        self.calls.set(self.calls.get() + 1);
        if self.failing {
            return Err(AppError::external_service("為替レートAPI", "接続に失敗しました"));
        }
        Ok(self
            .rates
            .get(&(base.to_string(), symbol.to_string()))
            .map_or(RateLookup::Unsupported, |rate| RateLookup::Found(*rate)))
    }
}
