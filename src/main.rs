use ledger_fx_normalizer_lib::shared::ErrorSeverity;
use log::{error, warn};

fn main() {
    if let Err(e) = ledger_fx_normalizer_lib::cli::run() {
        match e.severity() {
            ErrorSeverity::Low => warn!("{}", e.details()),
            _ => error!("{}", e.details()),
        }
        eprintln!("error: {}", e.user_message());
        std::process::exit(1);
    }
}
