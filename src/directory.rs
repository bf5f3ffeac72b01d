use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::http::{HttpResponse, HttpTransport};

/// 處理目錄操作時可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// 目錄請求失敗或未回傳 200。
    #[error("Directory request failed: {0}")]
    Unavailable(Box<HttpResponse>),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Directory document is not a JSON object")]
    NotAnObject,
    #[error("No Replay-Nonce header found in response")]
    NoNonceHeader,
    #[error("Unknown directory resource: {0}")]
    UnknownResource(String),
}

type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// ACME 目錄：邏輯資源名稱（如 `new-reg`、`key-change`）對應的絕對 URL，
/// 以及取得目錄時一併拿到的下一個可用 nonce。
///
/// nonce 只能使用一次，因此每個需要新 nonce 的請求都會重新取得目錄。
/// 回應缺少 `Replay-Nonce` 時仍可解析，直到呼叫 [`Directory::nonce`] 才回報錯誤。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    resources: HashMap<String, String>,
    nonce: Option<String>,
}

impl Directory {
    pub const NONCE_HEADER: &'static str = "Replay-Nonce";

    /// 以 GET 取得並解析目錄，必須回傳 200。
    pub fn fetch<T: HttpTransport + ?Sized>(transport: &T, url: &str) -> DirectoryResult<Self> {
        debug!(url, "sending acme-directory request");
        let response = transport.get(url);
        if response.code != Some(200) {
            return Err(DirectoryError::Unavailable(Box::new(response)));
        }
        Self::from_response(&response)
    }

    /// 從目錄回應中解析資源對應與 `Replay-Nonce`。
    ///
    /// 非字串值（例如 `meta` 物件）不視為資源。
    pub fn from_response(response: &HttpResponse) -> DirectoryResult<Self> {
        let document: Value = serde_json::from_slice(&response.body)?;
        let resources = document
            .as_object()
            .ok_or(DirectoryError::NotAnObject)?
            .iter()
            .filter_map(|(name, url)| url.as_str().map(|url| (name.clone(), url.to_string())))
            .collect();
        let nonce = response.header(Self::NONCE_HEADER).map(str::to_string);

        Ok(Self { resources, nonce })
    }

    /// 取得目錄時拿到的 nonce；回應未帶 `Replay-Nonce` 時回傳
    /// [`DirectoryError::NoNonceHeader`]。
    pub fn nonce(&self) -> DirectoryResult<&str> {
        self.nonce.as_deref().ok_or(DirectoryError::NoNonceHeader)
    }

    /// 取得邏輯資源名稱對應的絕對 URL。
    pub fn url_for(&self, name: &str) -> DirectoryResult<&str> {
        self.resources
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| DirectoryError::UnknownResource(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockTransport;

    const DIRECTORY_JSON: &str = r#"{
        "new-reg": "https://ca.example/acme/new-reg",
        "key-change": "https://ca.example/acme/key-change",
        "meta": {"terms-of-service": "https://ca.example/terms"}
    }"#;

    #[test]
    fn test_fetch_directory() -> DirectoryResult<()> {
        let mock = MockTransport::new();
        mock.push_response(
            HttpResponse::new(200)
                .with_header("Replay-Nonce", "nonce-1")
                .with_body(DIRECTORY_JSON),
        );

        let dir = Directory::fetch(&mock, "https://ca.example/directory")?;
        assert_eq!(dir.nonce()?, "nonce-1");
        assert_eq!(dir.url_for("new-reg")?, "https://ca.example/acme/new-reg");
        assert_eq!(
            dir.url_for("key-change")?,
            "https://ca.example/acme/key-change"
        );
        assert!(matches!(
            dir.url_for("meta"),
            Err(DirectoryError::UnknownResource(_))
        ));
        assert_eq!(mock.requests()[0].method, "GET");
        Ok(())
    }

    #[test]
    fn test_non_200_is_unavailable() {
        let mock = MockTransport::new();
        mock.push_response(HttpResponse::new(503).with_body("down"));

        match Directory::fetch(&mock, "https://ca.example/directory") {
            Err(DirectoryError::Unavailable(response)) => {
                assert_eq!(response.code, Some(503));
                assert_eq!(response.body, b"down");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_transport_failure_is_unavailable() {
        let mock = MockTransport::new();
        assert!(matches!(
            Directory::fetch(&mock, "https://ca.example/directory"),
            Err(DirectoryError::Unavailable(_))
        ));
    }

    #[test]
    fn test_missing_nonce() -> DirectoryResult<()> {
        let response = HttpResponse::new(200).with_body(DIRECTORY_JSON);
        let dir = Directory::from_response(&response)?;
        assert_eq!(dir.url_for("new-reg")?, "https://ca.example/acme/new-reg");
        assert!(matches!(dir.nonce(), Err(DirectoryError::NoNonceHeader)));
        Ok(())
    }

    #[test]
    fn test_not_an_object() {
        let response = HttpResponse::new(200)
            .with_header("Replay-Nonce", "n")
            .with_body("[1, 2]");
        assert!(matches!(
            Directory::from_response(&response),
            Err(DirectoryError::NotAnObject)
        ));
    }
}
