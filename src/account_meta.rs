//! 帳戶資料與金鑰存放在同一個檔案中。
//!
//! 金鑰檔案由兩部分組成：PEM 私鑰（以及任何其他文字）與尾端的帳戶資料行，
//! 每行格式為 `## acme.<key>: <json>`。OpenSSL 解析 PEM 時會忽略這些行，
//! 本模組則只解析這些行，其餘內容在儲存時逐位元組保留。

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::atomic::{self, AtomicWriteError};

/// 帳戶 URL（由 CA 指派的帳戶資源位址）。
pub const ACC_URL: &str = "acc.url";
/// 帳戶聯絡 URI，例如 `mailto:admin@example.com`。
pub const ACC_CONTACT: &str = "acc.contact";

const MARKER_PREFIX: &str = "## acme.";

/// 帳戶資料讀寫可能發生的錯誤。
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid JSON value for key {key}: {source}")]
    InvalidValue {
        key: String,
        source: serde_json::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Atomic write error: {0}")]
    Atomic(#[from] AtomicWriteError),
}

pub type Result<T> = std::result::Result<T, MetaError>;

/// 解析單行帳戶資料，回傳 `(key, json 文字)`；非帳戶資料行回傳 `None`。
fn parse_marker(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix(MARKER_PREFIX)?;
    let (key, value) = rest.split_once(": ")?;
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return None;
    }
    Some((key, value.trim_end()))
}

/// 取出金鑰檔案中帳戶資料行以外的內容（保留原本的換行）。
pub fn split_trailer(text: &str) -> String {
    text.split_inclusive('\n')
        .filter(|line| parse_marker(line).is_none())
        .collect()
}

/// 與金鑰檔案共存的帳戶資料，依插入順序保存。
///
/// 值為 `null` 的項目在儲存時會被省略，等同刪除。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountMeta {
    entries: Map<String, Value>,
}

impl AccountMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// 從金鑰檔案讀取帳戶資料。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// 解析文字中的帳戶資料行，其他行皆忽略；同一 key 出現多次時以最後一次為準。
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Map::new();
        for line in text.lines() {
            let Some((key, raw)) = parse_marker(line) else {
                continue;
            };
            let value = serde_json::from_str(raw).map_err(|source| MetaError::InvalidValue {
                key: key.to_string(),
                source,
            })?;
            entries.insert(key.to_string(), value);
        }
        Ok(Self { entries })
    }

    /// 將帳戶資料寫回金鑰檔案。
    ///
    /// 既有檔案中非帳戶資料的行原樣保留，確保以換行結尾後，
    /// 再逐行附加每個非 `null` 的項目。整個檔案以原子方式替換。
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let original = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let rendered = self.render(&original)?;

        atomic::replace_with(path, 0o600, |w| {
            w.write_all(rendered.as_bytes())
                .map_err(AtomicWriteError::from)?;
            Ok::<_, MetaError>(())
        })
    }

    /// 產生 `original` 加上目前帳戶資料後的完整檔案內容。
    pub fn render(&self, original: &str) -> Result<String> {
        let mut out = split_trailer(original);
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        for (key, value) in &self.entries {
            if value.is_null() {
                continue;
            }
            out.push_str(&format!(
                "{}{}: {}\n",
                MARKER_PREFIX,
                key,
                serde_json::to_string(value)?
            ));
        }
        Ok(out)
    }

    /// 取得項目；值為 `null` 時視為不存在。
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).filter(|v| !v.is_null())
    }

    /// 設定項目；設為 [`Value::Null`] 代表下次儲存時刪除。
    pub fn set<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.entries.insert(key.to_string(), value.into());
    }

    /// 自記憶體中移除項目。已存在於檔案中的行在下次儲存時一併消失。
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// 依插入順序走訪非 `null` 的項目。
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().filter(|(_, v)| !v.is_null())
    }

    /// 是否沒有任何非 `null` 的項目。
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// `acc.url` 的字串值。
    pub fn url(&self) -> Option<&str> {
        self.get(ACC_URL).and_then(Value::as_str)
    }

    /// `acc.contact` 的字串值。
    pub fn contact(&self) -> Option<&str> {
        self.get(ACC_CONTACT).and_then(Value::as_str)
    }

    /// 設定帳戶 URL；`None` 代表刪除。
    pub fn set_url(&mut self, url: Option<&str>) {
        self.set(ACC_URL, url.map_or(Value::Null, Value::from));
    }

    /// 設定聯絡 URI；`None` 代表刪除。
    pub fn set_contact(&mut self, contact: Option<&str>) {
        self.set(ACC_CONTACT, contact.map_or(Value::Null, Value::from));
    }
}
