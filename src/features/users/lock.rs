// ユーザー単位の一括換算ロック

use crate::shared::errors::{AppError, AppResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// 一括換算中に保持する排他ロック
///
/// ドロップ時にOSがロックを解放する
#[derive(Debug)]
pub struct UserBatchLock {
    _file: File,
    path: PathBuf,
}

impl UserBatchLock {
    /// ロックファイルのパス
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// ロックファイルのパスを決定する
pub fn user_lock_path(lock_dir: &Path, user_id: i64) -> PathBuf {
    lock_dir.join(format!("user-{user_id}.lock"))
}

/// ユーザーの一括換算ロックを取得する
///
/// 別プロセスが同じユーザーを処理中の場合は待たずに失敗する
///
/// # 引数
/// * `lock_dir` - ロックファイルを置くディレクトリ
/// * `user_id` - ローカルのユーザーID
///
/// # 戻り値
/// ロックガード、または取得失敗時はAppError::Concurrency
pub fn acquire_user_lock(lock_dir: &Path, user_id: i64) -> AppResult<UserBatchLock> {
    fs::create_dir_all(lock_dir)?;

    let path = user_lock_path(lock_dir, user_id);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)?;

    file.try_lock_exclusive().map_err(|_| {
        AppError::concurrency(format!(
            "user_id={user_id} は別のプロセスで換算処理中です"
        ))
    })?;

    log::debug!("ユーザーロックを取得しました: {path:?}");
    Ok(UserBatchLock { _file: file, path })
}
