use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 為替レート照会の結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLookup {
    /// 基準通貨1単位あたりの対象通貨量
    Found(f64),
    /// 対象通貨をレート提供元が扱っていない
    Unsupported,
}

/// fixer互換APIのレスポンス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesResponse {
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub rates: HashMap<String, f64>,
    /// fixer.io はエラー時も200で success=false を返す
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<RatesErrorDetail>,
    /// frankfurter はエラー時に message のみを返す
    #[serde(default)]
    pub message: Option<String>,
}

impl RatesResponse {
    /// 通貨が見つからないことを示すメッセージかどうか
    pub fn is_not_found_message(&self) -> bool {
        self.message
            .as_deref()
            .is_some_and(|m| m.to_lowercase().contains("not found"))
    }
}

/// fixer互換APIのエラー詳細
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesErrorDetail {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
}

impl RatesErrorDetail {
    /// 通貨コードが扱えないことを示すエラーかどうか
    pub fn is_unsupported_symbol(&self) -> bool {
        self.code == Some(202)
            || self
                .error_type
                .as_deref()
                .is_some_and(|t| t == "invalid_currency_codes" || t == "invalid_base_currency")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_response_deserialization() {
        let json = r#"{"base": "GBP", "date": "2017-03-01", "rates": {"USD": 1.2345}}"#;
        let response: RatesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.rates.get("USD"), Some(&1.2345));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_fixer_error_response() {
        let json = r#"{
            "success": false,
            "error": {"code": 202, "type": "invalid_currency_codes", "info": "bad symbol"}
        }"#;
        let response: RatesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.success, Some(false));
        assert!(response.rates.is_empty());
        assert!(response.error.unwrap().is_unsupported_symbol());
    }

    #[test]
    fn test_frankfurter_not_found_message() {
        let response: RatesResponse = serde_json::from_str(r#"{"message": "not found"}"#).unwrap();
        assert!(response.is_not_found_message());
        assert!(response.rates.is_empty());

        let response: RatesResponse =
            serde_json::from_str(r#"{"message": "rate limit exceeded"}"#).unwrap();
        assert!(!response.is_not_found_message());
    }
}
