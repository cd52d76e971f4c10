/// 為替レート機能モジュール
///
/// fixer互換APIから過去日付の為替レートを取得します
pub mod client;
pub mod models;

pub use client::{FixerRateClient, RateSource};
pub use models::RateLookup;
