//! 以「暫存檔 + rename」方式原子性地取代檔案內容。
//!
//! 暫存檔建立於目標檔案所在目錄，確保 rename 不會跨越檔案系統；
//! 在成功 [`AtomicFile::commit`] 之前，目標檔案永遠不會看到中間狀態。

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::{Builder, NamedTempFile};
use thiserror::Error;

/// 原子寫入過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum AtomicWriteError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Path has no file name: {0}")]
    NoFileName(PathBuf),
}

pub type Result<T> = std::result::Result<T, AtomicWriteError>;

/// 尚未提交的檔案替換。
///
/// 寫入的內容先進入同目錄下的暫存檔；呼叫 [`commit`](Self::commit) 時才 rename
/// 至目標路徑。若未提交即被丟棄（包含錯誤提早返回），暫存檔會被刪除。
#[derive(Debug)]
pub struct AtomicFile {
    tmp: NamedTempFile,
    dest: PathBuf,
}

impl AtomicFile {
    /// 為 `dest` 建立暫存檔。
    ///
    /// 若 `dest` 已存在，暫存檔沿用其權限位元；否則使用 `default_mode`。
    pub fn create<P: AsRef<Path>>(dest: P, default_mode: u32) -> Result<Self> {
        let dest = dest.as_ref().to_path_buf();
        let file_name = dest
            .file_name()
            .ok_or_else(|| AtomicWriteError::NoFileName(dest.clone()))?;
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let prefix = format!("{}.", file_name.to_string_lossy());
        let tmp = Builder::new().prefix(&prefix).tempfile_in(&dir)?;
        Self::apply_permissions(&tmp, &dest, default_mode)?;

        Ok(Self { tmp, dest })
    }

    #[cfg(unix)]
    fn apply_permissions(tmp: &NamedTempFile, dest: &Path, default_mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let permissions = match fs::symlink_metadata(dest) {
            Ok(meta) => meta.permissions(),
            Err(_) => fs::Permissions::from_mode(default_mode),
        };
        tmp.as_file().set_permissions(permissions)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn apply_permissions(tmp: &NamedTempFile, dest: &Path, _default_mode: u32) -> Result<()> {
        if let Ok(meta) = fs::metadata(dest) {
            tmp.as_file().set_permissions(meta.permissions())?;
        }
        Ok(())
    }

    /// 暫存檔路徑，主要供測試與除錯使用。
    pub fn temp_path(&self) -> &Path {
        self.tmp.path()
    }

    /// 寫入完成後將暫存檔 rename 至目標路徑。
    pub fn commit(mut self) -> Result<()> {
        self.tmp.flush()?;
        self.tmp.as_file().sync_all()?;
        self.tmp
            .persist(&self.dest)
            .map_err(|e| AtomicWriteError::Io(e.error))?;
        Ok(())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tmp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}

/// 在作用域內替換 `dest` 的內容。
///
/// `write` 回傳錯誤時目標檔案保持原狀，暫存檔亦會被移除。
///
/// # 範例
///
/// ```no_run
/// use std::io::Write;
/// use acme_acct::atomic::{replace_with, AtomicWriteError};
///
/// replace_with("/tmp/account.pem", 0o600, |w| {
///     w.write_all(b"data")?;
///     Ok::<_, AtomicWriteError>(())
/// })?;
/// # Ok::<(), AtomicWriteError>(())
/// ```
pub fn replace_with<P, F, E>(dest: P, default_mode: u32, write: F) -> std::result::Result<(), E>
where
    P: AsRef<Path>,
    F: FnOnce(&mut AtomicFile) -> std::result::Result<(), E>,
    E: From<AtomicWriteError>,
{
    let mut file = AtomicFile::create(dest, default_mode)?;
    write(&mut file)?;
    file.commit()?;
    Ok(())
}
