use crate::features::rates::models::{RateLookup, RatesResponse};
use crate::shared::config::RateApiConfig;
use crate::shared::errors::{AppError, AppResult};
use chrono::NaiveDate;
use log::{debug, warn};
use reqwest::blocking::Client;
use std::time::Duration;

const SERVICE_NAME: &str = "為替レートAPI";

/// 過去日付の為替レートの提供元
pub trait RateSource {
    /// `date` 時点で基準通貨 `base` 1単位あたりの `symbol` の量を返す
    ///
    /// 通信失敗はエラー、扱えない通貨は `RateLookup::Unsupported`
    fn historical_rate(&self, date: NaiveDate, base: &str, symbol: &str) -> AppResult<RateLookup>;
}

/// fixer互換の為替レートAPIクライアント
pub struct FixerRateClient {
    client: Client,
    config: RateApiConfig,
}

impl FixerRateClient {
    /// 設定を指定してクライアントを作成する
    pub fn new(config: RateApiConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::configuration(format!("HTTPクライアント初期化失敗: {e}")))?;

        Ok(Self { client, config })
    }
}

/// レスポンスから対象通貨のレートを取り出す
fn interpret_response(response: RatesResponse, symbol: &str) -> AppResult<RateLookup> {
    if response.success == Some(false) {
        return match response.error {
            Some(error) if error.is_unsupported_symbol() => Ok(RateLookup::Unsupported),
            Some(error) => Err(AppError::external_service(
                SERVICE_NAME,
                format!(
                    "エラー応答: code={:?}, type={:?}, info={:?}",
                    error.code, error.error_type, error.info
                ),
            )),
            None => Err(AppError::external_service(
                SERVICE_NAME,
                "success=false が返されました",
            )),
        };
    }

    match response.rates.get(symbol) {
        Some(rate) if rate.is_finite() && *rate > 0.0 => Ok(RateLookup::Found(*rate)),
        Some(rate) => Err(AppError::external_service(
            SERVICE_NAME,
            format!("不正なレートが返されました: {symbol}={rate}"),
        )),
        None => Ok(RateLookup::Unsupported),
    }
}

/// 成功以外のHTTPステータスを解釈する
///
/// frankfurter は扱えない通貨を 404/422 と `{"message": "not found"}` で返す。
/// それ以外の失敗は通信エラーとして扱う
fn interpret_error_status(status: u16, body: &str) -> AppResult<RateLookup> {
    if matches!(status, 404 | 422) {
        if let Ok(response) = serde_json::from_str::<RatesResponse>(body) {
            if response.is_not_found_message() {
                return Ok(RateLookup::Unsupported);
            }
        }
    }

    Err(AppError::external_service(
        SERVICE_NAME,
        format!("HTTP {status}: {body}"),
    ))
}

impl RateSource for FixerRateClient {
    fn historical_rate(&self, date: NaiveDate, base: &str, symbol: &str) -> AppResult<RateLookup> {
        let url = format!("{}/{}", self.config.base_url, date.format("%Y-%m-%d"));
        let mut query = vec![("base", base.to_string()), ("symbols", symbol.to_string())];
        if let Some(access_key) = &self.config.access_key {
            query.push(("access_key", access_key.clone()));
        }

        debug!("為替レート照会: date={date}, base={base}, symbol={symbol}");

        let response = self.client.get(&url).query(&query).send().map_err(|e| {
            AppError::external_service(SERVICE_NAME, format!("接続に失敗しました: {e}"))
        })?;

        let status = response.status();
        let lookup = if status.is_success() {
            let body: RatesResponse = response.json().map_err(|e| {
                AppError::external_service(SERVICE_NAME, format!("レスポンス解析エラー: {e}"))
            })?;
            interpret_response(body, symbol)?
        } else {
            let body = response.text().unwrap_or_default();
            warn!("為替レート照会失敗: status={status}, body={body}");
            interpret_error_status(status.as_u16(), &body)?
        };

        if lookup == RateLookup::Unsupported {
            warn!("為替レートが提供されていない通貨です: date={date}, base={base}, symbol={symbol}");
        }
        Ok(lookup)
    }
}
