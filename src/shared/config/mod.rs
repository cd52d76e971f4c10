/// 環境判定・.env読み込み・ログ初期化・接続先設定
pub mod environment;

pub use environment::{
    get_database_filename, get_environment, initialize_logging_system,
    load_environment_variables, ConversionConfig, Environment, EnvironmentConfig,
    LedgerApiConfig, RateApiConfig,
};
