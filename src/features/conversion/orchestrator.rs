use crate::features::conversion::metadata::live_metadata_comment_ids;
use crate::features::conversion::models::{BatchReport, ConversionOutcome, SyncSummary};
use crate::features::conversion::reallocator::reallocate;
use crate::features::conversion::repository;
use crate::features::conversion::scanner::{absorb_comment_thread, needs_comment_refresh, scan};
use crate::features::ledger::LedgerClient;
use crate::features::rates::RateSource;
use crate::features::users::{self, acquire_user_lock, User};
use crate::shared::config::ConversionConfig;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::{now_utc, validate_currency_code};
use log::{debug, error, info, warn};
use rusqlite::Connection;

/// 換算先の通貨を決定する
///
/// 台帳に登録された既定通貨を優先し、未設定なら `fallback` を使う
pub fn resolve_target_currency<L: LedgerClient + ?Sized>(
    ledger: &L,
    fallback: &str,
) -> AppResult<String> {
    let current = ledger.current_user()?;

    match current
        .default_currency
        .map(|code| code.trim().to_uppercase())
        .filter(|code| !code.is_empty())
    {
        Some(code) => {
            validate_currency_code(&code)?;
            Ok(code)
        }
        None => {
            debug!(
                "既定通貨が未設定のため代替通貨を使用します: ledger_user_id={}, fallback={fallback}",
                current.id
            );
            Ok(fallback.to_string())
        }
    }
}

/// 経費1件を指定レートで換算し、台帳に書き戻す
///
/// # 処理順序
/// 1. 台帳から経費とコメントを取得し、追跡情報を作成または更新
/// 2. 書き戻し内容を計算（端数エラーの場合は台帳を変更せずに失敗）
/// 3. 既存のメタデータコメントをすべて削除
/// 4. 経費の通貨・合計・全参加者の負担額を更新
/// 5. 新しいメタデータコメントを投稿
/// 6. 追跡情報に換算結果を記録
///
/// 台帳への書き込みが失敗した場合、追跡情報には換算結果を記録しない
///
/// # 引数
/// * `conn` - データベース接続
/// * `ledger` - 台帳クライアント
/// * `expense_id` - 台帳側の経費ID
/// * `target_currency` - 換算先の通貨
/// * `rate` - 換算先通貨1単位あたりの元通貨量
pub fn apply<L: LedgerClient + ?Sized>(
    conn: &Connection,
    ledger: &L,
    expense_id: i64,
    target_currency: &str,
    rate: f64,
) -> AppResult<ConversionOutcome> {
    let expense = ledger.get_expense(expense_id)?;
    if expense.deleted_at.is_some() {
        return Err(AppError::validation(format!(
            "削除済みの経費は換算できません: {expense_id}"
        )));
    }

    let comments = ledger.list_comments(expense_id)?;
    let mut tracked = match repository::find_by_id(conn, expense_id)? {
        Some(tracked) if !needs_comment_refresh(&expense, Some(&tracked)) => tracked,
        tracked => absorb_comment_thread(&expense, tracked, &comments)?,
    };
    repository::save(conn, &tracked)?;

    let payload = reallocate(&expense, Some(&tracked), target_currency, rate)?;

    let stale_comments = live_metadata_comment_ids(&comments);
    for comment_id in &stale_comments {
        ledger.delete_comment(*comment_id)?;
        info!("古いメタデータコメントを削除しました: expense_id={expense_id}, comment_id={comment_id}");
    }
    if tracked
        .comment_id
        .is_some_and(|id| stale_comments.contains(&id))
    {
        repository::clear_comment(conn, expense_id)?;
        tracked.comment_id = None;
    }

    ledger.update_expense(expense_id, &payload.update)?;
    info!(
        "経費を換算しました: expense_id={expense_id}, {} {:.2} -> {} {:.2}, rate={rate}",
        payload.metadata.original_currency,
        payload.metadata.original_value,
        payload.update.currency_code,
        payload.update.cost()
    );

    let comment = ledger.create_comment(expense_id, &payload.metadata.to_comment_body()?)?;

    tracked.original_currency = payload.metadata.original_currency.clone();
    tracked.original_value = payload.metadata.original_value;
    tracked.original_rate = Some(rate);
    tracked.updated_for = Some(expense_id);
    tracked.comment_id = Some(comment.id);
    repository::save(conn, &tracked)?;

    Ok(ConversionOutcome {
        expense_id,
        description: expense.description_or_default().to_string(),
        from_currency: payload.metadata.original_currency,
        to_currency: payload.update.currency_code.clone(),
        new_total: payload.update.cost(),
        rate,
        comment_id: comment.id,
        removed_comments: stale_comments.len(),
    })
}

/// ユーザーの換算対象をすべて換算する
///
/// レートが無い経費は飛ばす。途中で失敗した場合はそこで止まり、
/// それまでの換算は取り消さない。完了後にユーザーの最終更新日時を記録する
///
/// # 戻り値
/// 換算結果とスキップした経費の一覧。別プロセスが同じユーザーを処理中の場合は
/// AppError::Concurrency
pub fn apply_all<L, R>(
    conn: &Connection,
    ledger: &L,
    rates: &R,
    user: &User,
    config: &ConversionConfig,
) -> AppResult<BatchReport>
where
    L: LedgerClient + ?Sized,
    R: RateSource + ?Sized,
{
    let _lock = acquire_user_lock(&config.lock_dir, user.id)?;

    let target_currency = resolve_target_currency(ledger, &config.fallback_currency)?;
    let discrepancies = scan(conn, ledger, rates, user, &target_currency)?;

    let mut converted = Vec::new();
    let mut skipped = Vec::new();

    for discrepancy in discrepancies {
        match discrepancy.rate {
            Some(rate) => {
                converted.push(apply(
                    conn,
                    ledger,
                    discrepancy.expense_id,
                    &target_currency,
                    rate,
                )?);
            }
            None => {
                warn!(
                    "レートが無いため換算しません: expense_id={}, {}",
                    discrepancy.expense_id,
                    discrepancy.converted_display()
                );
                skipped.push(discrepancy);
            }
        }
    }

    users::mark_updated(conn, user.id, &now_utc())?;
    info!(
        "一括換算が完了しました: user_id={}, 換算={}件, スキップ={}件",
        user.id,
        converted.len(),
        skipped.len()
    );

    Ok(BatchReport {
        user_id: user.id,
        target_currency,
        converted,
        skipped,
    })
}

/// 登録済みの全ユーザーについて一括換算を行う
///
/// 台帳ユーザーIDが未確認のユーザーは飛ばす。
/// 1ユーザーの失敗はログに残し、次のユーザーへ進む
///
/// # 引数
/// * `ledger_for` - ユーザーごとの台帳クライアントを作成する関数
pub fn sync_all_users<F, L, R>(
    conn: &Connection,
    rates: &R,
    config: &ConversionConfig,
    mut ledger_for: F,
) -> AppResult<SyncSummary>
where
    F: FnMut(&User) -> AppResult<L>,
    L: LedgerClient,
    R: RateSource + ?Sized,
{
    let mut summary = SyncSummary::default();

    for user in users::find_all(conn)? {
        if user.ledger_user_id.is_none() {
            warn!("台帳ユーザーIDが未確認のためスキップします: user_id={}", user.id);
            summary.skipped_users.push(user.id);
            continue;
        }

        let result = ledger_for(&user).and_then(|ledger| apply_all(conn, &ledger, rates, &user, config));
        match result {
            Ok(report) => summary.reports.push(report),
            Err(e) => {
                error!("ユーザーの同期に失敗しました: user_id={}, error={e}", user.id);
                summary.failed_users.push((user.id, e.details()));
            }
        }
    }

    Ok(summary)
}
