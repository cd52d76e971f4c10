use crate::features::conversion::models::{ConversionMetadata, TrackedExpense, WritePayload};
use crate::features::ledger::{ExpenseUpdate, ParticipantShare, RemoteExpense};
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::{
    from_minor_units, is_zero_decimal_currency, round_to_minor, to_minor_units,
    validate_currency_code, validate_rate,
};

/// 換算の基準となる通貨と金額
///
/// 追跡情報があればその復元点、無ければ台帳上の現在値
pub fn effective_original(
    expense: &RemoteExpense,
    tracked: Option<&TrackedExpense>,
) -> AppResult<(String, f64)> {
    match tracked {
        Some(tracked) => Ok((tracked.original_currency.clone(), tracked.original_value)),
        None => Ok((expense.currency_code.clone(), expense.cost_value()?)),
    }
}

/// 現在の負担額を元の通貨に戻すための倍率
///
/// 台帳上の通貨が復元点と同じ場合はNone。
/// 記録済みのレートが無い古いメタデータの場合は、復元点と現在の合計から推定する
fn unconversion_factor(
    expense: &RemoteExpense,
    original_currency: &str,
    original_value: f64,
    tracked: Option<&TrackedExpense>,
) -> AppResult<Option<f64>> {
    if expense.currency_code == original_currency {
        return Ok(None);
    }

    if let Some(previous_rate) = tracked.and_then(|t| t.original_rate) {
        return Ok(Some(previous_rate));
    }

    let live_cost = expense.cost_value()?;
    if live_cost == 0.0 {
        return Err(AppError::validation(format!(
            "経費 {} の換算前レートを復元できません（合計が0です）",
            expense.id
        )));
    }
    Ok(Some(original_value / live_cost))
}

/// 端数を寄せる参加者の位置
///
/// 多すぎる場合は最大の参加者、少なすぎる場合は最小の参加者。同額なら先頭
fn extremal_index(shares: &[i64], surplus: bool) -> Option<usize> {
    if surplus {
        // max_by_key は同値で最後の要素を返すため逆順に走査する
        shares
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|(_, share)| **share)
            .map(|(idx, _)| idx)
    } else {
        shares
            .iter()
            .enumerate()
            .min_by_key(|(_, share)| **share)
            .map(|(idx, _)| idx)
    }
}

/// 負担額の端数を合計に合わせる
///
/// 差が1最小単位の場合のみ補正する。多すぎる場合は最大の参加者から、
/// 少なすぎる場合は最小の参加者へ。同額の場合は先頭の参加者が対象
pub fn correct_rounding(shares: &mut [i64], total_minor: i64) -> AppResult<()> {
    let sum: i64 = shares.iter().sum();
    let difference = sum - total_minor;

    if difference == 0 {
        return Ok(());
    }

    let inconsistency = AppError::RoundingInconsistency {
        difference_minor: difference,
        total_minor,
        owed_minor: sum,
    };

    if difference.abs() != 1 {
        return Err(inconsistency);
    }

    match extremal_index(shares, difference > 0) {
        Some(idx) => {
            shares[idx] -= difference;
            Ok(())
        }
        None => Err(inconsistency),
    }
}

/// 金額の並びを1最小単位ずつ補正して合計に合わせる
///
/// 差が `tolerance` を超える場合は何もせずfalseを返す
pub fn rebalance(shares: &mut [i64], total_minor: i64, tolerance: i64) -> bool {
    let mut difference: i64 = shares.iter().sum::<i64>() - total_minor;
    if difference.abs() > tolerance {
        return false;
    }

    while difference != 0 {
        let Some(idx) = extremal_index(shares, difference > 0) else {
            return false;
        };
        let step = difference.signum();
        shares[idx] -= step;
        difference -= step;
    }
    true
}

/// 参加者ごとの端数補正で許容する差（参加者1人につき1最小単位）
fn rounding_tolerance(participants: usize) -> i64 {
    i64::try_from(participants.max(1)).unwrap_or(i64::MAX)
}

/// 台帳上の金額を復元点の通貨の最小単位に戻す
///
/// 前回の換算で生じた端数を持ち越さないよう、戻した金額を復元点の合計に合わせる
fn restore_original_shares(
    live: &[i64],
    factor: Option<f64>,
    original_minor: i64,
) -> Vec<i64> {
    let Some(factor) = factor else {
        return live.to_vec();
    };

    let mut restored: Vec<i64> = live
        .iter()
        .map(|share| to_minor_units(from_minor_units(*share) * factor))
        .collect();
    rebalance(&mut restored, original_minor, rounding_tolerance(live.len()));
    restored
}

/// 復元点の通貨の金額を換算先の最小単位に変換する
fn convert_shares(shares: &[i64], rate: f64) -> Vec<i64> {
    shares
        .iter()
        .map(|share| to_minor_units(from_minor_units(*share) / rate))
        .collect()
}

/// 経費1件を指定レートで換算した書き戻し内容を計算する
///
/// 換算済みの経費は一度元の通貨に戻し、復元点の合計に揃えてから新しいレートで
/// 換算するため、何度換算し直しても誤差が累積しない。
/// 負担額の差は1最小単位までしか補正しないが、支払額は参加者数までの差を
/// 1最小単位ずつ補正する
///
/// # 引数
/// * `expense` - 台帳上の現在の経費
/// * `tracked` - 追跡情報（初回はNone）
/// * `target_currency` - 換算先の通貨
/// * `rate` - 換算先通貨1単位あたりの元通貨量
///
/// # 戻り値
/// 書き戻し内容、または負担額を補正できない場合はAppError::RoundingInconsistency
pub fn reallocate(
    expense: &RemoteExpense,
    tracked: Option<&TrackedExpense>,
    target_currency: &str,
    rate: f64,
) -> AppResult<WritePayload> {
    validate_currency_code(target_currency)?;
    validate_rate(rate)?;

    let (original_currency, original_value) = effective_original(expense, tracked)?;

    for code in [target_currency, original_currency.as_str(), expense.currency_code.as_str()] {
        if is_zero_decimal_currency(code) {
            return Err(AppError::validation(format!(
                "小数部を持たない通貨は換算できません: {code}"
            )));
        }
    }

    let factor = unconversion_factor(expense, &original_currency, original_value, tracked)?;
    let original_minor = to_minor_units(original_value);
    let total_minor = to_minor_units(original_value / rate);

    let mut live_paid = Vec::with_capacity(expense.users.len());
    let mut live_owed = Vec::with_capacity(expense.users.len());
    for share in &expense.users {
        live_paid.push(to_minor_units(share.paid_value()?));
        live_owed.push(to_minor_units(share.owed_value()?));
    }

    let mut owed = convert_shares(
        &restore_original_shares(&live_owed, factor, original_minor),
        rate,
    );
    let mut paid = convert_shares(
        &restore_original_shares(&live_paid, factor, original_minor),
        rate,
    );

    correct_rounding(&mut owed, total_minor)?;
    let paid_tolerance = rounding_tolerance(paid.len());
    if !rebalance(&mut paid, total_minor, paid_tolerance) {
        return Err(AppError::validation(format!(
            "経費 {} の支払額の合計 {} が合計金額 {} と一致しません",
            expense.id,
            paid.iter().sum::<i64>(),
            total_minor
        )));
    }

    let users = expense
        .users
        .iter()
        .zip(paid.into_iter().zip(owed))
        .map(|(share, (paid_share_minor, owed_share_minor))| ParticipantShare {
            user_id: share.user_id,
            paid_share_minor,
            owed_share_minor,
        })
        .collect();

    Ok(WritePayload {
        update: ExpenseUpdate {
            currency_code: target_currency.to_string(),
            cost_minor: total_minor,
            users,
        },
        metadata: ConversionMetadata {
            original_currency,
            original_value: round_to_minor(original_value),
            updated_for: expense.id,
            conversion_rate: Some(rate),
        },
    })
}
