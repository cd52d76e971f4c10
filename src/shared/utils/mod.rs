use crate::shared::errors::{AppError, AppResult};
use chrono::{DateTime, NaiveDate, Utc};

/// 1単位あたりの最小通貨単位数（2桁小数の通貨のみを扱う）
pub const MINOR_UNITS_PER_UNIT: f64 = 100.0;

/// 小数部を持たない（最小通貨単位が1の）ISO 4217通貨
///
/// これらの通貨は2桁丸めの前提が成り立たないため換算対象外とする
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "ISK", "JPY", "KMF", "KRW", "PYG", "RWF", "UGX", "UYI", "VND",
    "VUV", "XAF", "XOF", "XPF",
];

/// 金額を最小通貨単位（セント）の整数に丸める
///
/// 0.5は0から遠い方向に丸める（5.625 -> 563）
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * MINOR_UNITS_PER_UNIT).round() as i64
}

/// 最小通貨単位の整数を金額に戻す
pub fn from_minor_units(minor: i64) -> f64 {
    minor as f64 / MINOR_UNITS_PER_UNIT
}

/// 金額を小数点以下2桁に丸める
pub fn round_to_minor(amount: f64) -> f64 {
    from_minor_units(to_minor_units(amount))
}

/// 最小通貨単位の整数を "12.34" 形式の文字列にする
///
/// 台帳APIへの送信値として使用する
pub fn format_minor_units(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// 台帳APIの金額文字列（"9.0" や "4.50"）を数値に変換する
///
/// # 引数
/// * `value` - 金額文字列
/// * `field_name` - フィールド名（エラーメッセージ用）
pub fn parse_amount(value: &str, field_name: &str) -> AppResult<f64> {
    let amount = value.trim().parse::<f64>().map_err(|_| {
        AppError::validation(format!("{field_name}の金額形式が不正です: {value}"))
    })?;

    if !amount.is_finite() {
        return Err(AppError::validation(format!("{field_name}が無効な金額です")));
    }

    Ok(amount)
}

/// 通貨コードのバリデーション
///
/// # バリデーション規則
/// - 英字3文字であること
/// - 大文字であること
pub fn validate_currency_code(code: &str) -> AppResult<()> {
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(AppError::validation(format!(
            "通貨コードは大文字3文字で指定してください: {code}"
        )));
    }
    Ok(())
}

/// 為替レートのバリデーション
pub fn validate_rate(rate: f64) -> AppResult<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(AppError::validation(format!(
            "為替レートは正の数値である必要があります: {rate}"
        )));
    }
    Ok(())
}

/// 小数部を持たない通貨かどうかを判定する
pub fn is_zero_decimal_currency(code: &str) -> bool {
    ZERO_DECIMAL_CURRENCIES.contains(&code)
}

/// 現在時刻をUTCで取得
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// RFC3339文字列をUTCのDateTimeに変換する
pub fn parse_timestamp(value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::validation(format!("日時の形式が正しくありません: {value} ({e})")))
}

/// DateTimeから日付部分を取り出す（為替レート照会用）
pub fn to_rate_date(timestamp: &DateTime<Utc>) -> NaiveDate {
    timestamp.date_naive()
}

/// 経過時間を人が読める形式にする
///
/// # 戻り値
/// "just now" / "5 minutes ago" / "3 hours ago" / "2 days ago" 形式の文字列
pub fn humanize_since(then: &DateTime<Utc>, now: &DateTime<Utc>) -> String {
    let seconds = (*now - *then).num_seconds();

    if seconds < 60 {
        return "just now".to_string();
    }

    let (value, unit) = if seconds < 3_600 {
        (seconds / 60, "minute")
    } else if seconds < 86_400 {
        (seconds / 3_600, "hour")
    } else if seconds < 86_400 * 30 {
        (seconds / 86_400, "day")
    } else if seconds < 86_400 * 365 {
        (seconds / (86_400 * 30), "month")
    } else {
        (seconds / (86_400 * 365), "year")
    };

    if value == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{value} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_to_minor_units_rounds_half_away_from_zero() {
        assert_eq!(to_minor_units(4.50 / 0.80), 563);
        assert_eq!(to_minor_units(9.00 / 0.80), 1125);
        assert_eq!(to_minor_units(-0.005), -1);
        assert_eq!(to_minor_units(0.0), 0);
    }

    #[test]
    fn test_round_to_minor() {
        assert_eq!(round_to_minor(11.254), 11.25);
        assert_eq!(round_to_minor(3.333_333), 3.33);
    }

    #[test]
    fn test_format_minor_units() {
        assert_eq!(format_minor_units(1125), "11.25");
        assert_eq!(format_minor_units(5), "0.05");
        assert_eq!(format_minor_units(0), "0.00");
        assert_eq!(format_minor_units(-101), "-1.01");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("9.0", "合計").unwrap(), 9.0);
        assert_eq!(parse_amount(" 4.50 ", "負担額").unwrap(), 4.5);
        assert!(matches!(
            parse_amount("abc", "合計").unwrap_err(),
            AppError::Validation(_)
        ));
        assert!(parse_amount("inf", "合計").is_err());
    }

    #[test]
    fn test_validate_currency_code() {
        assert!(validate_currency_code("GBP").is_ok());
        assert!(validate_currency_code("gbp").is_err());
        assert!(validate_currency_code("GB").is_err());
        assert!(validate_currency_code("GBPX").is_err());
    }

    #[test]
    fn test_validate_rate() {
        assert!(validate_rate(0.8).is_ok());
        assert!(validate_rate(0.0).is_err());
        assert!(validate_rate(-1.2).is_err());
        assert!(validate_rate(f64::NAN).is_err());
    }

    #[test]
    fn test_zero_decimal_currency() {
        assert!(is_zero_decimal_currency("JPY"));
        assert!(is_zero_decimal_currency("KRW"));
        assert!(!is_zero_decimal_currency("USD"));
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2017-03-01T10:20:30Z").unwrap();
        assert_eq!(to_rate_date(&ts).to_string(), "2017-03-01");
        assert!(parse_timestamp("2017-03-01").is_err());
    }

    #[test]
    fn test_humanize_since() {
        let now = now_utc();
        assert_eq!(humanize_since(&now, &now), "just now");
        assert_eq!(
            humanize_since(&(now - Duration::minutes(1)), &now),
            "1 minute ago"
        );
        assert_eq!(
            humanize_since(&(now - Duration::hours(3)), &now),
            "3 hours ago"
        );
        assert_eq!(
            humanize_since(&(now - Duration::days(2)), &now),
            "2 days ago"
        );
    }
}
