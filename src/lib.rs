//! 共有経費台帳の多通貨換算ツール
//!
//! 台帳上の経費をユーザーの既定通貨へ換算し、参加者の負担額の合計が
//! 経費の合計と常に一致するように書き戻します。

pub mod cli;
pub mod features;
pub mod shared;
