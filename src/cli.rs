use crate::features::conversion::{self, BatchReport, Discrepancy};
use crate::features::ledger::SplitwiseClient;
use crate::features::rates::FixerRateClient;
use crate::features::users::{self, CreateUserDto, User};
use crate::shared::config::{
    initialize_logging_system, load_environment_variables, ConversionConfig, LedgerApiConfig,
    RateApiConfig,
};
use crate::shared::database::initialize_database;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::{now_utc, validate_currency_code, validate_rate};
use clap::{Args, Parser, Subcommand};
use log::info;
use rusqlite::Connection;

#[derive(Parser)]
#[command(
    name = "ledger-fx-normalizer",
    version,
    about = "Convert shared ledger expenses into each user's preferred currency"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    User(UserArgs),
    Scan(ScanArgs),
    Apply(ApplyArgs),
    ApplyAll(ApplyAllArgs),
    Sync,
}

#[derive(Args)]
struct UserArgs {
    #[command(subcommand)]
    command: UserCommand,
}

#[derive(Subcommand)]
enum UserCommand {
    Add(UserAddArgs),
    Verify(UserVerifyArgs),
    List,
}

#[derive(Args)]
struct UserAddArgs {
    #[arg(long, value_name = "TOKEN")]
    token: String,
    #[arg(long = "token-type", value_name = "TYPE")]
    token_type: Option<String>,
}

#[derive(Args)]
struct UserVerifyArgs {
    #[arg(long, value_name = "ID")]
    user: i64,
}

#[derive(Args)]
struct ScanArgs {
    #[arg(long, value_name = "ID")]
    user: i64,
    #[arg(long, value_name = "CUR", help = "Target currency (defaults to the ledger's).")]
    currency: Option<String>,
}

#[derive(Args)]
struct ApplyArgs {
    #[arg(long, value_name = "ID")]
    user: i64,
    #[arg(long, value_name = "ID")]
    expense: i64,
    #[arg(long, value_name = "RATE", help = "Units of the original currency per target unit.")]
    rate: f64,
    #[arg(long, value_name = "CUR")]
    currency: Option<String>,
}

#[derive(Args)]
struct ApplyAllArgs {
    #[arg(long, value_name = "ID")]
    user: i64,
}

/// コマンドライン引数を解析して実行する
pub fn run() -> AppResult<()> {
    let cli = Cli::parse();

    load_environment_variables();
    initialize_logging_system();

    let config = ConversionConfig::from_env()?;
    let conn = initialize_database(&config.database_path)?;

    match cli.command {
        Commands::User(args) => run_user(args, &conn),
        Commands::Scan(args) => run_scan(args, &conn, &config),
        Commands::Apply(args) => run_apply(args, &conn, &config),
        Commands::ApplyAll(args) => run_apply_all(args, &conn, &config),
        Commands::Sync => run_sync(&conn, &config),
    }
}

fn run_user(args: UserArgs, conn: &Connection) -> AppResult<()> {
    match args.command {
        UserCommand::Add(add_args) => run_user_add(add_args, conn),
        UserCommand::Verify(verify_args) => run_user_verify(verify_args, conn),
        UserCommand::List => run_user_list(conn),
    }
}

fn run_user_add(args: UserAddArgs, conn: &Connection) -> AppResult<()> {
    let user = users::create(
        conn,
        CreateUserDto {
            access_token: args.token,
            token_type: args.token_type,
        },
    )?;
    println!("user {} registered (run `user verify --user {}` next)", user.id, user.id);
    Ok(())
}

fn run_user_verify(args: UserVerifyArgs, conn: &Connection) -> AppResult<()> {
    let user = users::find_by_id(conn, args.user)?;
    let ledger = SplitwiseClient::new(LedgerApiConfig::from_env()?, &user)?;
    let verified = users::verify_identity(conn, &ledger, user.id)?;

    if verified.id != user.id {
        println!("user {} merged into existing user {}", user.id, verified.id);
    }
    println!(
        "user {} is ledger user {}",
        verified.id,
        verified
            .ledger_user_id
            .map_or_else(|| "?".to_string(), |id| id.to_string())
    );
    Ok(())
}

fn run_user_list(conn: &Connection) -> AppResult<()> {
    let now = now_utc();
    for user in users::find_all(conn)? {
        let ledger_id = user
            .ledger_user_id
            .map_or_else(|| "unverified".to_string(), |id| id.to_string());
        println!(
            "{:>4}  ledger={:<12} last update: {}",
            user.id,
            ledger_id,
            user.pretty_update(&now)
        );
    }
    Ok(())
}

/// 通貨指定を正規化する。未指定なら台帳の既定通貨を使う
fn target_currency_for(
    requested: Option<String>,
    ledger: &SplitwiseClient,
    config: &ConversionConfig,
) -> AppResult<String> {
    match requested {
        Some(code) => {
            let code = code.trim().to_uppercase();
            validate_currency_code(&code)?;
            Ok(code)
        }
        None => conversion::resolve_target_currency(ledger, &config.fallback_currency),
    }
}

fn ledger_for(user: &User) -> AppResult<SplitwiseClient> {
    SplitwiseClient::new(LedgerApiConfig::from_env()?, user)
}

fn run_scan(args: ScanArgs, conn: &Connection, config: &ConversionConfig) -> AppResult<()> {
    let user = users::find_by_id(conn, args.user)?;
    let ledger = ledger_for(&user)?;
    let rates = FixerRateClient::new(RateApiConfig::from_env()?)?;
    let target_currency = target_currency_for(args.currency, &ledger, config)?;

    let discrepancies = conversion::scan(conn, &ledger, &rates, &user, &target_currency)?;
    if discrepancies.is_empty() {
        println!("all expenses are already in {target_currency}");
    }
    for discrepancy in &discrepancies {
        print_discrepancy(discrepancy);
    }
    Ok(())
}

fn print_discrepancy(discrepancy: &Discrepancy) {
    let rate = discrepancy
        .rate
        .map_or_else(|| "-".to_string(), |rate| rate.to_string());
    println!(
        "{:>10}  {}  {:<30} {:>10.2} {} -> {}  (rate {rate}{})",
        discrepancy.expense_id,
        discrepancy.created_on,
        discrepancy.description,
        discrepancy.live_value,
        discrepancy.live_currency,
        discrepancy.converted_display(),
        if discrepancy.superseded { ", superseded" } else { "" }
    );
}

fn run_apply(args: ApplyArgs, conn: &Connection, config: &ConversionConfig) -> AppResult<()> {
    validate_rate(args.rate)?;
    let user = users::find_by_id(conn, args.user)?;
    let ledger = ledger_for(&user)?;
    let target_currency = target_currency_for(args.currency, &ledger, config)?;

    let outcome = conversion::apply(conn, &ledger, args.expense, &target_currency, args.rate)?;
    println!(
        "{} \"{}\": {} -> {:.2} {} (rate {}, comment {})",
        outcome.expense_id,
        outcome.description,
        outcome.from_currency,
        outcome.new_total,
        outcome.to_currency,
        outcome.rate,
        outcome.comment_id
    );
    Ok(())
}

fn run_apply_all(args: ApplyAllArgs, conn: &Connection, config: &ConversionConfig) -> AppResult<()> {
    let user = users::find_by_id(conn, args.user)?;
    let ledger = ledger_for(&user)?;
    let rates = FixerRateClient::new(RateApiConfig::from_env()?)?;

    let report = conversion::apply_all(conn, &ledger, &rates, &user, config)?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &BatchReport) {
    println!(
        "user {}: {} converted to {}, {} skipped",
        report.user_id,
        report.converted.len(),
        report.target_currency,
        report.skipped.len()
    );
    for outcome in &report.converted {
        println!(
            "  converted {:>10}  {} -> {:.2} {}",
            outcome.expense_id, outcome.from_currency, outcome.new_total, outcome.to_currency
        );
    }
    for discrepancy in &report.skipped {
        println!(
            "  skipped   {:>10}  {}",
            discrepancy.expense_id,
            discrepancy.converted_display()
        );
    }
}

fn run_sync(conn: &Connection, config: &ConversionConfig) -> AppResult<()> {
    let rates = FixerRateClient::new(RateApiConfig::from_env()?)?;
    let summary = conversion::sync_all_users(conn, &rates, config, ledger_for)?;

    for report in &summary.reports {
        print_report(report);
    }
    for user_id in &summary.skipped_users {
        println!("user {user_id}: skipped (unverified)");
    }
    for (user_id, message) in &summary.failed_users {
        println!("user {user_id}: failed ({message})");
    }
    info!(
        "全ユーザーの同期が完了しました: 成功={}, スキップ={}, 失敗={}",
        summary.reports.len(),
        summary.skipped_users.len(),
        summary.failed_users.len()
    );

    if summary.failed_users.is_empty() {
        Ok(())
    } else {
        Err(AppError::external_service(
            "同期",
            format!("{}人のユーザーで失敗しました", summary.failed_users.len()),
        ))
    }
}
