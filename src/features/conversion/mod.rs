/// 通貨換算機能モジュール
///
/// このモジュールは経費の通貨統一に関する機能を提供します：
/// - 換算が必要な経費の検出（scanner）
/// - 換算後の合計・負担額の計算と端数補正（reallocator）
/// - 台帳への書き戻しと一括換算（orchestrator）
/// - 換算履歴のローカル記録（repository）
pub mod metadata;
pub mod models;
pub mod orchestrator;
pub mod reallocator;
pub mod repository;
pub mod scanner;

#[cfg(test)]
pub mod test_support;

// 公開インターフェース
pub use models::{
    BatchReport, ConversionMetadata, ConversionOutcome, Discrepancy, SyncSummary,
    TrackedExpense, WritePayload,
};
pub use orchestrator::{apply, apply_all, resolve_target_currency, sync_all_users};
pub use reallocator::reallocate;
pub use scanner::scan;
