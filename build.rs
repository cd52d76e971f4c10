use std::env;

fn main() {
    // 環境変数をコンパイル時に埋め込み
    // ENVIRONMENT環境変数に基づいて適切な.envファイルを読み込み
    let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

    let env_file = match environment.as_str() {
        "production" => ".env.production",
        _ => ".env",
    };

    println!("cargo:rerun-if-env-changed=ENVIRONMENT");
    println!("cargo:rerun-if-changed={env_file}");

    // 環境変数ファイルを読み込み
    if dotenv::from_filename(env_file).is_ok() {
        println!("cargo:warning={env_file}ファイルを読み込みました");

        // 接続先の設定をコンパイル時定数として埋め込み
        if let Ok(base_url) = env::var("LEDGER_API_BASE_URL") {
            println!("cargo:rustc-env=EMBEDDED_LEDGER_API_BASE_URL={base_url}");
        }
        if let Ok(base_url) = env::var("RATE_API_BASE_URL") {
            println!("cargo:rustc-env=EMBEDDED_RATE_API_BASE_URL={base_url}");
        }
        if let Ok(access_key) = env::var("RATE_API_ACCESS_KEY") {
            println!("cargo:rustc-env=EMBEDDED_RATE_API_ACCESS_KEY={access_key}");
        }
    } else {
        println!("cargo:warning={env_file}ファイルが見つかりません");
    }
}
