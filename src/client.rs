//! 與 ACME CA 交換簽名請求的客戶端。
//!
//! 每次 [`AcmeClient::send`] 只嘗試一次：不重試、不退避。nonce 僅能使用一次，
//! 呼叫端若要重試必須重新取得 nonce（不提供 nonce 時客戶端會自行取得）。

use thiserror::Error;
use tracing::debug;

use crate::{
    directory::{Directory, DirectoryError},
    http::{HttpResponse, HttpTransport, ReqwestTransport},
    jws::{self, JwsError},
    key_pair::KeyPair,
    payload::Payload,
};

/// 發送簽名請求時可能發生的錯誤。HTTP 狀態碼本身不會成為錯誤。
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Unknown ACME service shortcut: {0}")]
    UnknownService(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Let's Encrypt 正式環境目錄。
pub const LETSENCRYPT_DIRECTORY: &str = "https://acme-v01.api.letsencrypt.org/directory";
/// Let's Encrypt 測試環境目錄。
pub const LETSENCRYPT_STAGING_DIRECTORY: &str =
    "https://acme-staging.api.letsencrypt.org/directory";

/// 請求本文的 Content-Type。
pub const JOSE_CONTENT_TYPE: &str = "application/jose+json";

/// 固定的 User-Agent。
pub const USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
    " (+",
    env!("CARGO_PKG_REPOSITORY"),
    ")"
);

/// CA 簡稱對應的目錄 URL。
pub fn ca_shortcut(name: &str) -> Option<&'static str> {
    match name.replace('_', "-").as_str() {
        "le" => Some(LETSENCRYPT_DIRECTORY),
        "le-staging" => Some(LETSENCRYPT_STAGING_DIRECTORY),
        _ => None,
    }
}

/// 將 CA 簡稱（`le`、`le-staging`）解析為目錄 URL；已是 URL 時原樣回傳。
pub fn resolve_service(url_or_name: &str) -> Result<String> {
    if url_or_name.contains(':') {
        return Ok(url_or_name.to_string());
    }
    ca_shortcut(url_or_name)
        .map(str::to_string)
        .ok_or_else(|| ClientError::UnknownService(url_or_name.to_string()))
}

/// [`AcmeClient::send`] 的選用參數。
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions<'a> {
    pub nonce: Option<&'a str>,
    pub resource_hint: Option<&'a str>,
    pub kid: Option<&'a str>,
}

impl<'a> SendOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nonce(mut self, nonce: &'a str) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn resource_hint(mut self, resource: &'a str) -> Self {
        self.resource_hint = Some(resource);
        self
    }

    pub fn kid(mut self, kid: &'a str) -> Self {
        self.kid = Some(kid);
        self
    }
}

/// ACME 協議客戶端。
#[derive(Debug)]
pub struct AcmeClient<T = ReqwestTransport> {
    transport: T,
    directory_url: String,
    user_agent: String,
    force_jwk: bool,
}

impl AcmeClient<ReqwestTransport> {
    /// 使用預設設定與 `reqwest` 傳輸建立客戶端。
    pub fn new(directory_url: &str) -> Self {
        AcmeClientBuilder::new()
            .directory_url(directory_url)
            .build()
    }

    pub fn builder() -> AcmeClientBuilder {
        AcmeClientBuilder::new()
    }
}

impl<T: HttpTransport> AcmeClient<T> {
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    /// 取得目錄與新的 nonce。
    pub fn fetch_directory(&self) -> Result<Directory> {
        Ok(Directory::fetch(&self.transport, &self.directory_url)?)
    }

    /// 簽署並 POST 一個 ACME 請求。
    ///
    /// `target` 不含 `://` 時視為目錄中的邏輯名稱（如 `new-reg`）。目標為邏輯名稱
    /// 或未提供 nonce 時，會先取得目錄以解析 URL 與 nonce；邏輯名稱同時作為預設的
    /// `resource` 提示。
    ///
    /// CA 回傳的任何狀態碼（包括錯誤）與傳輸失敗都以 [`HttpResponse`] 回傳。
    pub fn send(
        &self,
        key: &KeyPair,
        target: &str,
        payload: impl Into<Payload>,
        options: SendOptions<'_>,
    ) -> Result<HttpResponse> {
        let is_url = target.contains("://");
        let directory = if !is_url || options.nonce.is_none() {
            Some(self.fetch_directory()?)
        } else {
            None
        };

        let url = match &directory {
            Some(dir) if !is_url => dir.url_for(target)?,
            _ => target,
        };
        let nonce = match (options.nonce, &directory) {
            (Some(nonce), _) => Some(nonce),
            (None, Some(dir)) => Some(dir.nonce()?),
            (None, None) => None,
        };
        let resource_hint = options
            .resource_hint
            .or(if is_url { None } else { Some(target) });
        let kid = match options.kid {
            Some(kid) if self.force_jwk => {
                debug!(kid, "embedding jwk instead of kid");
                None
            }
            kid => kid,
        };

        let body = jws::build_envelope(key, payload, url, nonce, kid, resource_hint)?.to_bytes()?;

        debug!(url, key = %key.fingerprint(), "sending signed request");
        let response = self.transport.post(
            url,
            &[
                ("Content-Type", JOSE_CONTENT_TYPE),
                ("User-Agent", &self.user_agent),
            ],
            &body,
        );
        debug!(
            code = ?response.code,
            reason = %response.reason,
            "received response"
        );
        Ok(response)
    }
}

/// 用於構建 [`AcmeClient`] 的構造器。
///
/// 預設值：
/// - 目錄 URL：Let's Encrypt 測試環境
/// - User-Agent：[`USER_AGENT`]
/// - `force_jwk`：`true`，目前的 CA 即使在 `kid` 可用時仍要求 `jwk`，
///   因此呼叫端提供的 `kid` 會被捨棄
#[derive(Debug, Clone)]
pub struct AcmeClientBuilder {
    directory_url: String,
    user_agent: String,
    force_jwk: bool,
}

impl Default for AcmeClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AcmeClientBuilder {
    pub fn new() -> Self {
        AcmeClientBuilder {
            directory_url: LETSENCRYPT_STAGING_DIRECTORY.to_string(),
            user_agent: USER_AGENT.to_string(),
            force_jwk: true,
        }
    }

    pub fn directory_url(mut self, directory_url: &str) -> Self {
        self.directory_url = directory_url.to_string();
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    /// 是否一律在保護標頭中帶入 `jwk`。
    pub fn force_jwk(mut self, force_jwk: bool) -> Self {
        self.force_jwk = force_jwk;
        self
    }

    pub fn build(self) -> AcmeClient<ReqwestTransport> {
        self.build_with(ReqwestTransport::new())
    }

    /// 使用自訂傳輸建立客戶端。
    pub fn build_with<T: HttpTransport>(self, transport: T) -> AcmeClient<T> {
        AcmeClient {
            transport,
            directory_url: self.directory_url,
            user_agent: self.user_agent,
            force_jwk: self.force_jwk,
        }
    }
}
