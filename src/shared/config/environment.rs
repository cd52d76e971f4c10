use crate::shared::errors::{AppError, AppResult};
use std::path::PathBuf;

/// アプリケーションのデータディレクトリ名
const APP_DIR_NAME: &str = "ledger-fx-normalizer";

/// 台帳APIのデフォルトURL
const DEFAULT_LEDGER_API_BASE_URL: &str = "https://secure.splitwise.com/api/v3.0";

/// 為替レートAPIのデフォルトURL（fixer互換）
const DEFAULT_RATE_API_BASE_URL: &str = "https://api.frankfurter.app";

/// アプリケーションの実行環境を表す列挙型
#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    /// 開発環境
    Development,
    /// プロダクション環境
    Production,
}

/// 環境設定を管理する構造体
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// 実行環境
    pub environment: String,
    /// デバッグモードの有効/無効
    pub debug_mode: bool,
    /// ログレベル
    pub log_level: String,
}

impl EnvironmentConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Self {
        let environment = get_environment();
        let debug_mode = environment == Environment::Development;
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
            if debug_mode {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

        Self {
            environment: format!("{environment:?}").to_lowercase(),
            debug_mode,
            log_level,
        }
    }

    /// プロダクション環境かどうかを判定
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// 現在の実行環境を判定する
///
/// # 判定ロジック
/// 1. 実行時環境変数 ENVIRONMENT を確認
/// 2. デバッグビルドの場合は Development
/// 3. リリースビルドの場合は Production
pub fn get_environment() -> Environment {
    if let Ok(env_var) = std::env::var("ENVIRONMENT") {
        let env = match env_var.as_str() {
            "production" => Environment::Production,
            _ => Environment::Development,
        };
        log::debug!("環境判定: 実行時環境変数を使用 -> {env_var} -> {env:?}");
        return env;
    }

    let env = if cfg!(debug_assertions) {
        Environment::Development
    } else {
        Environment::Production
    };
    log::debug!(
        "環境判定: ビルド設定を使用 -> debug_assertions={} -> {env:?}",
        cfg!(debug_assertions)
    );
    env
}

/// 環境に応じたデータベースファイル名を取得する
///
/// # ファイル名の規則
/// - 開発環境: "dev_conversions.db"
/// - プロダクション環境: "conversions.db"
pub fn get_database_filename(env: Environment) -> &'static str {
    match env {
        Environment::Development => "dev_conversions.db",
        Environment::Production => "conversions.db",
    }
}

/// 環境に応じた.envファイルを読み込む
pub fn load_environment_variables() {
    let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

    let env_file = match environment.as_str() {
        "production" => ".env.production",
        _ => ".env",
    };

    match dotenv::from_filename(env_file) {
        Ok(_) => {
            log::info!("{env_file}ファイルを読み込みました");
        }
        Err(_) => {
            if env_file != ".env" && dotenv::dotenv().is_ok() {
                log::warn!("{env_file}が見つからないため、デフォルトの.envファイルを読み込みました");
            } else {
                log::warn!("環境変数ファイルが見つかりません。直接設定された環境変数を使用します。");
            }
        }
    }
}

/// ログシステムを初期化する
///
/// # 処理内容
/// 1. 環境設定を取得
/// 2. ログレベルを設定
/// 3. env_loggerを初期化
pub fn initialize_logging_system() {
    let env_config = EnvironmentConfig::from_env();

    let log_level = match env_config.log_level.to_lowercase().as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };

    // 二重初期化はテストなどで起こり得るため無視する
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_secs()
        .format_module_path(false)
        .format_target(false)
        .try_init();

    log::info!(
        "ログシステムを初期化しました: level={}, environment={}",
        env_config.log_level,
        env_config.environment
    );
}

/// コンパイル時埋め込み値を優先して設定値を読み込む
fn read_setting(embedded: Option<&'static str>, key: &str) -> Option<String> {
    embedded
        .map(|value| value.to_string())
        .or_else(|| std::env::var(key).ok())
        .filter(|value| !value.trim().is_empty())
}

/// URLとして妥当か検証し、末尾のスラッシュを取り除く
fn validate_base_url(key: &str, value: String) -> AppResult<String> {
    url::Url::parse(&value)
        .map_err(|e| AppError::configuration(format!("{key} が不正なURLです: {e}")))?;
    Ok(value.trim_end_matches('/').to_string())
}

/// HTTPタイムアウト秒数を読み込む
fn read_timeout_seconds() -> AppResult<u64> {
    match std::env::var("HTTP_TIMEOUT_SECONDS") {
        Ok(value) => value.parse::<u64>().map_err(|e| {
            AppError::configuration(format!("HTTP_TIMEOUT_SECONDS が不正です: {value} ({e})"))
        }),
        Err(_) => Ok(30),
    }
}

/// 台帳API（Splitwise互換）の設定
#[derive(Debug, Clone)]
pub struct LedgerApiConfig {
    /// APIのベースURL
    pub base_url: String,
    /// タイムアウト（秒）
    pub timeout_seconds: u64,
}

impl LedgerApiConfig {
    /// 環境変数から台帳API設定を読み込む
    pub fn from_env() -> AppResult<Self> {
        let base_url = read_setting(option_env!("EMBEDDED_LEDGER_API_BASE_URL"), "LEDGER_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_LEDGER_API_BASE_URL.to_string());

        Ok(Self {
            base_url: validate_base_url("LEDGER_API_BASE_URL", base_url)?,
            timeout_seconds: read_timeout_seconds()?,
        })
    }
}

/// 為替レートAPI（fixer互換）の設定
#[derive(Debug, Clone)]
pub struct RateApiConfig {
    /// APIのベースURL
    pub base_url: String,
    /// アクセスキー（fixer.ioなど必要なサービスのみ）
    pub access_key: Option<String>,
    /// タイムアウト（秒）
    pub timeout_seconds: u64,
}

impl RateApiConfig {
    /// 環境変数から為替レートAPI設定を読み込む
    pub fn from_env() -> AppResult<Self> {
        let base_url = read_setting(option_env!("EMBEDDED_RATE_API_BASE_URL"), "RATE_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_RATE_API_BASE_URL.to_string());
        let access_key =
            read_setting(option_env!("EMBEDDED_RATE_API_ACCESS_KEY"), "RATE_API_ACCESS_KEY");

        Ok(Self {
            base_url: validate_base_url("RATE_API_BASE_URL", base_url)?,
            access_key,
            timeout_seconds: read_timeout_seconds()?,
        })
    }
}

/// 換算処理全体の設定
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// 台帳側に既定通貨が無い場合に使う通貨
    pub fallback_currency: String,
    /// ローカルデータベースのパス
    pub database_path: PathBuf,
    /// ロックファイルを置くディレクトリ
    pub lock_dir: PathBuf,
}

impl ConversionConfig {
    /// 環境変数から換算設定を読み込む
    pub fn from_env() -> AppResult<Self> {
        let fallback_currency = std::env::var("FALLBACK_CURRENCY")
            .unwrap_or_else(|_| "GBP".to_string())
            .trim()
            .to_uppercase();
        if fallback_currency.len() != 3 || !fallback_currency.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(AppError::configuration(format!(
                "FALLBACK_CURRENCY はISO 4217の3文字コードである必要があります: {fallback_currency}"
            )));
        }

        let database_path = match std::env::var("DATABASE_PATH") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => app_data_dir()?.join(get_database_filename(get_environment())),
        };

        let lock_dir = database_path
            .parent()
            .map(|parent| parent.join("locks"))
            .unwrap_or_else(|| PathBuf::from("locks"));

        Ok(Self {
            fallback_currency,
            database_path,
            lock_dir,
        })
    }
}

/// アプリケーションデータディレクトリを取得する
fn app_data_dir() -> AppResult<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| AppError::configuration("アプリデータディレクトリの取得に失敗しました"))
}
