use crate::features::conversion::metadata::latest_metadata;
use crate::features::conversion::models::{Discrepancy, TrackedExpense};
use crate::features::conversion::reallocator::effective_original;
use crate::features::conversion::repository;
use crate::features::ledger::{LedgerClient, RemoteComment, RemoteExpense};
use crate::features::rates::{RateLookup, RateSource};
use crate::features::users::User;
use crate::shared::errors::AppResult;
use crate::shared::utils::{is_zero_decimal_currency, round_to_minor, to_rate_date};
use log::{debug, info, warn};
use rusqlite::Connection;

/// コメント欄を読み直す必要があるか
///
/// 未追跡、または前回読み込み以降に経費が更新されている場合
pub fn needs_comment_refresh(expense: &RemoteExpense, tracked: Option<&TrackedExpense>) -> bool {
    match tracked {
        None => true,
        Some(tracked) => expense.updated_at > tracked.last_seen_update,
    }
}

/// 読み込んだコメント欄の内容を追跡情報に反映する
///
/// 追跡情報が無ければ台帳上の現在値から作成する。
/// 最新のメタデータコメントがあれば復元点をそれで上書きする
pub fn absorb_comment_thread(
    expense: &RemoteExpense,
    tracked: Option<TrackedExpense>,
    comments: &[RemoteComment],
) -> AppResult<TrackedExpense> {
    let mut tracked = match tracked {
        Some(tracked) => tracked,
        None => TrackedExpense::seeded_from(expense)?,
    };
    tracked.last_seen_update = expense.updated_at;

    if let Some((comment_id, metadata)) = latest_metadata(comments) {
        debug!(
            "メタデータコメントを読み込みました: expense_id={}, comment_id={comment_id}, updated_for={}",
            expense.id, metadata.updated_for
        );
        tracked.absorb_metadata(&metadata, comment_id);
    }

    Ok(tracked)
}

/// 必要であればコメント欄を取得して追跡情報を更新する
fn refresh_tracked<L: LedgerClient + ?Sized>(
    conn: &Connection,
    ledger: &L,
    expense: &RemoteExpense,
) -> AppResult<Option<TrackedExpense>> {
    let tracked = repository::find_by_id(conn, expense.id)?;

    if expense.comments_count == 0 || !needs_comment_refresh(expense, tracked.as_ref()) {
        return Ok(tracked);
    }

    let comments = ledger.list_comments(expense.id)?;
    let tracked = absorb_comment_thread(expense, tracked, &comments)?;
    repository::save(conn, &tracked)?;
    Ok(Some(tracked))
}

/// 換算できない通貨の場合の理由
fn unconvertible_note(original_currency: &str, target_currency: &str) -> Option<String> {
    [original_currency, target_currency]
        .into_iter()
        .find(|code| is_zero_decimal_currency(code))
        .map(|code| format!("Can't convert zero-decimal currency {code}"))
}

/// ユーザーの経費を走査し、換算が必要なものを列挙する
///
/// 通貨が換算先と異なる経費と、記録済みの換算が別の経費について書かれた経費を検出する。
/// 為替レートが無い通貨も結果に含める（rateはNone）
///
/// # 引数
/// * `conn` - データベース接続
/// * `ledger` - ユーザーの台帳クライアント
/// * `rates` - 為替レートの提供元
/// * `user` - 対象ユーザー（last_update以降に更新された経費のみ走査）
/// * `target_currency` - 換算先の通貨
///
/// # 戻り値
/// 台帳の返却順に並んだ換算対象の一覧。通信失敗時はエラー
pub fn scan<L, R>(
    conn: &Connection,
    ledger: &L,
    rates: &R,
    user: &User,
    target_currency: &str,
) -> AppResult<Vec<Discrepancy>>
where
    L: LedgerClient + ?Sized,
    R: RateSource + ?Sized,
{
    let updated_after = user.expenses_updated_after();
    let expenses = ledger.list_expenses(updated_after)?;
    info!(
        "経費の走査を開始します: user_id={}, 件数={}, updated_after={updated_after:?}, target={target_currency}",
        user.id,
        expenses.len()
    );

    let mut discrepancies = Vec::new();

    for expense in &expenses {
        let tracked = refresh_tracked(conn, ledger, expense)?;
        let (original_currency, original_value) = effective_original(expense, tracked.as_ref())?;
        let superseded = tracked.as_ref().is_some_and(TrackedExpense::is_superseded);

        if expense.currency_code == target_currency && !superseded {
            continue;
        }

        let (rate, note) = match unconvertible_note(&original_currency, target_currency) {
            Some(note) => (None, Some(note)),
            None if original_currency == target_currency => (Some(1.0), None),
            None => {
                let date = to_rate_date(&expense.created_at);
                match rates.historical_rate(date, target_currency, &original_currency)? {
                    RateLookup::Found(rate) => (Some(rate), None),
                    RateLookup::Unsupported => {
                        (None, Some(format!("Can't convert {original_currency}")))
                    }
                }
            }
        };

        if let Some(note) = &note {
            warn!("換算できない経費です: expense_id={}, {note}", expense.id);
        }

        discrepancies.push(Discrepancy {
            expense_id: expense.id,
            description: expense.description_or_default().to_string(),
            created_on: to_rate_date(&expense.created_at),
            live_value: expense.cost_value()?,
            live_currency: expense.currency_code.clone(),
            converted_value: rate.map(|rate| round_to_minor(original_value / rate)),
            original_value,
            original_currency,
            target_currency: target_currency.to_string(),
            note,
            rate,
            superseded,
        });
    }

    info!(
        "経費の走査が完了しました: user_id={}, 換算対象={}件",
        user.id,
        discrepancies.len()
    );
    Ok(discrepancies)
}
