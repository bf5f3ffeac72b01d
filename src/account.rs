//! 模塊提供 ACME 帳戶生命週期的操作：註冊、金鑰輪替、更新聯絡資訊、停用與查詢。
//!
//! 每個操作都只發送一次請求，成功後立即把帳戶資料寫回金鑰檔案。

use std::{
    fs::OpenOptions,
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    account_meta::{AccountMeta, MetaError},
    client::{AcmeClient, ClientError, SendOptions},
    directory::DirectoryError,
    http::{HttpResponse, HttpTransport},
    jws::{self, JwsError},
    key_pair::{KeyError, KeyPair, KeyType},
    payload::{contact_uri, KeyChange, NewRegistration, PayloadT, RegistrationUpdate},
};

/// 錯誤類型，用於描述在處理 ACME 帳戶相關操作時可能發生的各類錯誤。
#[derive(Debug, Error)]
pub enum AccountError {
    /// CA 回傳了不接受的狀態碼（或傳輸失敗）。
    #[error("ACME {operation} request failed, server response: {response}")]
    Protocol {
        operation: &'static str,
        response: Box<HttpResponse>,
    },
    #[error("ACME {operation} response has no Location header: {response}")]
    MissingLocation {
        operation: &'static str,
        response: Box<HttpResponse>,
    },
    #[error("Account key has no registered account URL: {}", .0.display())]
    NotRegistered(PathBuf),
    /// 金鑰檔案無法寫入，帳戶 URL 將無處保存。
    #[error("Account key file is not writable: {}: {source}", .path.display())]
    KeyFileNotWritable { path: PathBuf, source: io::Error },
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Account metadata error: {0}")]
    Meta(#[from] MetaError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 結果類型，當操作成功返回 `T`，失敗則返回 [`AccountError`]。
pub type Result<T> = std::result::Result<T, AccountError>;

/// 註冊請求的結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// 201：建立了新帳戶。
    Created,
    /// 409：此金鑰已註冊過，CA 回傳既有帳戶的 URL。
    AlreadyRegistered,
}

/// 帳戶金鑰檔案：私鑰、同檔案中的帳戶資料，以及檔案路徑。
#[derive(Debug)]
pub struct AccountKey {
    path: PathBuf,
    key: KeyPair,
    meta: AccountMeta,
}

impl AccountKey {
    /// 載入既有的金鑰檔案與其中的帳戶資料。
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let key = KeyPair::load(path)?;
        let meta = AccountMeta::load(path)?;
        Ok(Self::from_parts(path, key, meta))
    }

    /// 產生新金鑰並寫入 `path`，此時尚無帳戶資料。
    pub fn generate<P: AsRef<Path>>(path: P, key_type: KeyType) -> Result<Self> {
        let path = path.as_ref();
        let key = KeyPair::generate(path, key_type)?;
        Ok(Self::from_parts(path, key, AccountMeta::new()))
    }

    /// `path` 存在時載入，否則產生新金鑰。
    pub fn open_or_generate<P: AsRef<Path>>(path: P, key_type: KeyType) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::generate(path, key_type)
        }
    }

    /// 由已載入的金鑰與帳戶資料組合，不讀寫檔案。
    pub fn from_parts<P: AsRef<Path>>(path: P, key: KeyPair, meta: AccountMeta) -> Self {
        let account = AccountKey {
            path: path.as_ref().to_path_buf(),
            key,
            meta,
        };
        debug!(
            key_type = %account.key.key_type(),
            fingerprint = %account.key.fingerprint(),
            url = ?account.meta.url(),
            "using account key"
        );
        account
    }

    /// 金鑰檔案路徑，帳戶資料也寫回此處。
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 帳戶私鑰。
    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    /// 記憶體中的帳戶資料，可能包含尚未儲存的變更。
    pub fn meta(&self) -> &AccountMeta {
        &self.meta
    }

    /// 可修改的帳戶資料；需呼叫 [`save_meta`](Self::save_meta) 才會寫回檔案。
    pub fn meta_mut(&mut self) -> &mut AccountMeta {
        &mut self.meta
    }

    /// 已儲存的帳戶 URL。
    pub fn url(&self) -> Option<&str> {
        self.meta.url()
    }

    /// 已儲存的聯絡 URI。
    pub fn contact(&self) -> Option<&str> {
        self.meta.contact()
    }

    /// 將帳戶資料寫回金鑰檔案。
    pub fn save_meta(&self) -> Result<()> {
        Ok(self.meta.save(&self.path)?)
    }

    /// 以附加模式開啟金鑰檔案，確認之後能寫回帳戶資料。
    fn ensure_writable(&self) -> Result<()> {
        OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map(drop)
            .map_err(|source| AccountError::KeyFileNotWritable {
                path: self.path.clone(),
                source,
            })
    }

    fn require_url(&self) -> Result<String> {
        self.url()
            .map(str::to_string)
            .ok_or_else(|| AccountError::NotRegistered(self.path.clone()))
    }
}

fn expect_status(
    operation: &'static str,
    response: HttpResponse,
    accepted: &[u16],
) -> Result<HttpResponse> {
    if response.is_one_of(accepted) {
        Ok(response)
    } else {
        Err(AccountError::Protocol {
            operation,
            response: Box::new(response),
        })
    }
}

fn location(operation: &'static str, response: &HttpResponse) -> Result<String> {
    response
        .header("Location")
        .map(str::to_string)
        .ok_or_else(|| AccountError::MissingLocation {
            operation,
            response: Box::new(response.clone()),
        })
}

const NEW_REG: &str = "new-reg";
const KEY_CHANGE: &str = "key-change";
const REGISTRATION_CODES: &[u16] = &[201, 409];
const UPDATE_CODES: &[u16] = &[200, 201, 202];

impl<T: HttpTransport> AcmeClient<T> {
    /// 以 `account` 的金鑰註冊帳戶。
    ///
    /// 201 與 409 皆視為成功，回應的 `Location` 存為帳戶 URL；
    /// 只有 201 時才記錄 `contact`（電子郵件或 `mailto:` URI）。
    /// 金鑰檔案無法寫入時不發送請求，回傳 [`AccountError::KeyFileNotWritable`]。
    pub fn register(
        &self,
        account: &mut AccountKey,
        contact: Option<&str>,
    ) -> Result<RegistrationOutcome> {
        if let Some(url) = account.url() {
            warn!(
                url,
                "account key already marked as registered, proceeding regardless"
            );
        }
        account.ensure_writable()?;

        let contact = contact.map(contact_uri);
        let payload = NewRegistration::new(contact.as_deref()).to_payload()?;
        let response = self.send(account.key(), NEW_REG, payload, SendOptions::new())?;
        let response = expect_status(NEW_REG, response, REGISTRATION_CODES)?;
        debug!(
            code = ?response.code,
            reason = %response.reason,
            "account registration status"
        );

        let url = location(NEW_REG, &response)?;
        account.meta.set_url(Some(&url));
        let outcome = if response.code == Some(201) {
            account.meta.set_contact(contact.as_deref());
            RegistrationOutcome::Created
        } else {
            RegistrationOutcome::AlreadyRegistered
        };
        account.save_meta()?;
        Ok(outcome)
    }

    /// 尚未儲存帳戶 URL（或 `force` 為真）時才註冊；未發送請求時回傳 `None`。
    pub fn ensure_registered(
        &self,
        account: &mut AccountKey,
        contact: Option<&str>,
        force: bool,
    ) -> Result<Option<RegistrationOutcome>> {
        if account.url().is_some() && !force {
            return Ok(None);
        }
        self.register(account, contact).map(Some)
    }

    /// 以註冊請求查詢 `key` 對應的帳戶 URL，不寫入任何檔案。
    pub fn probe_account_url(&self, key: &KeyPair) -> Result<String> {
        let payload = NewRegistration::new(None).to_payload()?;
        let response = self.send(key, NEW_REG, payload, SendOptions::new())?;
        let response = expect_status(NEW_REG, response, REGISTRATION_CODES)?;
        location(NEW_REG, &response)
    }

    /// 將帳戶從 `old` 金鑰輪替到 `new` 金鑰。
    ///
    /// 內層 JWS 由新金鑰簽署（不帶 nonce），原封不動地作為外層 JWS 的負載，
    /// 外層由舊金鑰簽署。內外兩層使用同一個 `key-change` URL。
    /// 成功後帳戶 URL 與聯絡資訊移到新金鑰的檔案，並從舊金鑰的檔案移除。
    ///
    /// 新金鑰檔案無法寫入時不發送任何請求。CA 接受輪替之後，清除舊金鑰檔案
    /// 失敗只記錄警告，不視為錯誤：此時帳戶已改由新金鑰控制。
    pub fn change_key(&self, new: &mut AccountKey, old: &mut AccountKey) -> Result<()> {
        new.ensure_writable()?;
        let account_url = match old.url() {
            Some(url) => url.to_string(),
            None => {
                debug!(
                    path = %old.path().display(),
                    "old key has no registration URL, fetching it via new-reg request"
                );
                self.probe_account_url(old.key())?
            }
        };

        let directory = self.fetch_directory()?;
        let url = directory.url_for(KEY_CHANGE)?;
        let inner = jws::build_envelope(
            new.key(),
            KeyChange {
                account: account_url.clone(),
                new_key: new.key().to_jwk(),
            }
            .to_payload()?,
            url,
            None,
            None,
            None,
        )?;
        let response = self.send(
            old.key(),
            url,
            &inner,
            SendOptions::new().nonce(directory.nonce()?),
        )?;
        expect_status(KEY_CHANGE, response, UPDATE_CODES)?;
        debug!(
            old = %old.key().fingerprint(),
            new = %new.key().fingerprint(),
            "account key-change success"
        );

        let contact = old.contact().map(str::to_string);
        new.meta.set_url(Some(&account_url));
        new.meta.set_contact(contact.as_deref());
        new.save_meta()?;

        old.meta.set_url(None);
        old.meta.set_contact(None);
        if let Err(e) = old.save_meta() {
            warn!(
                path = %old.path().display(),
                error = %e,
                "failed to clear account data from old key file"
            );
        }
        Ok(())
    }

    /// 更新帳戶聯絡資訊；與已儲存的相同時不發送請求並回傳 `false`。
    pub fn update_contact(&self, account: &mut AccountKey, contact: &str) -> Result<bool> {
        let contact = contact_uri(contact);
        if account.contact() == Some(contact.as_str()) {
            return Ok(false);
        }

        let url = account.require_url()?;
        let response = self.send(
            account.key(),
            &url,
            RegistrationUpdate::contact(&contact).to_payload()?,
            SendOptions::new().kid(&url),
        )?;
        expect_status("contact update", response, UPDATE_CODES)?;
        debug!(old = ?account.contact(), new = %contact, "account contact info updated");

        account.meta.set_contact(Some(&contact));
        account.save_meta()?;
        Ok(true)
    }

    /// 停用帳戶，僅接受 200。帳戶資料保持不變。
    pub fn deactivate(&self, account: &AccountKey) -> Result<HttpResponse> {
        let url = account.require_url()?;
        let response = self.send(
            account.key(),
            &url,
            RegistrationUpdate::deactivate().to_payload()?,
            SendOptions::new().kid(&url),
        )?;
        expect_status("account deactivation", response, &[200])
    }

    /// 查詢帳戶資訊，回傳 CA 的回應（本文為帳戶物件）。
    pub fn account_info(&self, account: &AccountKey) -> Result<HttpResponse> {
        let url = account.require_url()?;
        let response = self.send(
            account.key(),
            &url,
            RegistrationUpdate::query().to_payload()?,
            SendOptions::new().kid(&url),
        )?;
        expect_status("account info", response, UPDATE_CODES)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::{json, Value};
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::{
        client::AcmeClientBuilder,
        http::{MockTransport, RecordedRequest},
        jws::Jws,
    };

    const RSA4096_PEM: &str = include_str!("testdata/rsa4096.pem");
    const EC384_PEM: &str = include_str!("testdata/ec384.pem");
    const DIRECTORY_URL: &str = "https://ca.example/directory";
    const NEW_REG_URL: &str = "https://ca.example/acme/new-reg";
    const KEY_CHANGE_URL: &str = "https://ca.example/acme/key-change";
    const ACCOUNT_URL: &str = "https://ca.example/acme/reg/42";

    fn directory_response(nonce: &str) -> HttpResponse {
        HttpResponse::new(200)
            .with_header("Replay-Nonce", nonce)
            .with_body(format!(
                r#"{{"new-reg": "{}", "key-change": "{}"}}"#,
                NEW_REG_URL, KEY_CHANGE_URL
            ))
    }

    fn client() -> AcmeClient<MockTransport> {
        AcmeClientBuilder::new()
            .directory_url(DIRECTORY_URL)
            .build_with(MockTransport::new())
    }

    fn key_file(dir: &TempDir, name: &str, pem: &str, trailer: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, format!("{}{}", pem, trailer)).unwrap();
        path
    }

    fn registered_trailer(contact: Option<&str>) -> String {
        let mut trailer = format!("## acme.acc.url: \"{}\"\n", ACCOUNT_URL);
        if let Some(contact) = contact {
            trailer.push_str(&format!("## acme.acc.contact: \"{}\"\n", contact));
        }
        trailer
    }

    fn decode(request: &RecordedRequest) -> (Jws, Value, Value) {
        let jws: Jws = serde_json::from_slice(&request.body).unwrap();
        let protected = jws.decode_protected().unwrap();
        let payload = serde_json::from_slice(&jws.decode_payload().unwrap()).unwrap();
        (jws, protected, payload)
    }

    #[test]
    fn test_register_conflict_persists_location() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = key_file(&dir, "account.pem", EC384_PEM, "");
        let mut account = AccountKey::open(&path)?;
        let client = client();
        client
            .transport()
            .push_response(directory_response("n1"))
            .push_response(HttpResponse::new(409).with_header("Location", ACCOUNT_URL));

        let outcome = client.register(&mut account, Some("a@example.com"))?;
        assert_eq!(outcome, RegistrationOutcome::AlreadyRegistered);
        assert_eq!(account.url(), Some(ACCOUNT_URL));
        assert_eq!(account.contact(), None);

        let reloaded = AccountMeta::load(&path)?;
        assert_eq!(reloaded.url(), Some(ACCOUNT_URL));
        assert_eq!(reloaded.contact(), None);
        assert_eq!(KeyPair::load(&path)?.fingerprint(), "JBEG_pzc");

        let requests = client.transport().requests();
        assert_eq!(requests[1].url, NEW_REG_URL);
        let (_, protected, payload) = decode(&requests[1]);
        assert_eq!(protected["nonce"], "n1");
        assert_eq!(
            payload,
            json!({
                "terms-of-service-agreed": true,
                "contact": ["mailto:a@example.com"],
                "resource": "new-reg",
            })
        );
        Ok(())
    }

    #[test]
    fn test_register_created_records_contact() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = key_file(&dir, "account.pem", EC384_PEM, "");
        let mut account = AccountKey::open(&path)?;
        let client = client();
        client
            .transport()
            .push_response(directory_response("n1"))
            .push_response(HttpResponse::new(201).with_header("Location", ACCOUNT_URL));

        let outcome = client.register(&mut account, Some("mailto:a@example.com"))?;
        assert_eq!(outcome, RegistrationOutcome::Created);

        let reloaded = AccountKey::open(&path)?;
        assert_eq!(reloaded.url(), Some(ACCOUNT_URL));
        assert_eq!(reloaded.contact(), Some("mailto:a@example.com"));
        Ok(())
    }

    #[test]
    fn test_register_failure_leaves_file_untouched() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = key_file(&dir, "account.pem", EC384_PEM, "");
        let mut account = AccountKey::open(&path)?;
        let client = client();
        client
            .transport()
            .push_response(directory_response("n1"))
            .push_response(HttpResponse::new(500).with_body("{\"detail\":\"boom\"}"));

        match client.register(&mut account, None) {
            Err(AccountError::Protocol {
                operation,
                response,
            }) => {
                assert_eq!(operation, "new-reg");
                assert_eq!(response.code, Some(500));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), EC384_PEM);
        assert_eq!(account.url(), None);
        Ok(())
    }

    #[test]
    fn test_register_error_display_includes_response() {
        let error = AccountError::Protocol {
            operation: "new-reg",
            response: Box::new(HttpResponse::new(400).with_body("bad nonce")),
        };
        assert_eq!(
            error.to_string(),
            "ACME new-reg request failed, server response: 400 Bad Request\n  bad nonce"
        );
    }

    #[test]
    fn test_register_without_location() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = key_file(&dir, "account.pem", EC384_PEM, "");
        let mut account = AccountKey::open(&path)?;
        let client = client();
        client
            .transport()
            .push_response(directory_response("n1"))
            .push_response(HttpResponse::new(201));

        assert!(matches!(
            client.register(&mut account, None),
            Err(AccountError::MissingLocation { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), EC384_PEM);
        Ok(())
    }

    #[test]
    fn test_register_refuses_unwritable_key_file() {
        let dir = tempdir().unwrap();
        let key = KeyPair::from_pem(EC384_PEM.as_bytes()).unwrap();
        let mut account = AccountKey::from_parts(dir.path(), key, AccountMeta::new());
        let client = client();
        client
            .transport()
            .push_response(directory_response("n1"))
            .push_response(HttpResponse::new(201).with_header("Location", ACCOUNT_URL));

        assert!(matches!(
            client.register(&mut account, None),
            Err(AccountError::KeyFileNotWritable { ref path, .. }) if path == dir.path()
        ));
        assert!(client.transport().requests().is_empty());
        assert_eq!(account.url(), None);
    }

    #[test]
    fn test_register_directory_failure() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = key_file(&dir, "account.pem", EC384_PEM, "");
        let mut account = AccountKey::open(&path)?;
        let client = client();

        assert!(matches!(
            client.register(&mut account, None),
            Err(AccountError::Client(ClientError::Directory(
                DirectoryError::Unavailable(_)
            )))
        ));
        Ok(())
    }

    #[test]
    fn test_ensure_registered_skips_known_account() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = key_file(&dir, "account.pem", EC384_PEM, &registered_trailer(None));
        let mut account = AccountKey::open(&path)?;
        let client = client();

        assert_eq!(client.ensure_registered(&mut account, None, false)?, None);
        assert!(client.transport().requests().is_empty());

        client
            .transport()
            .push_response(directory_response("n1"))
            .push_response(HttpResponse::new(409).with_header("Location", ACCOUNT_URL));
        assert_eq!(
            client.ensure_registered(&mut account, None, true)?,
            Some(RegistrationOutcome::AlreadyRegistered)
        );
        Ok(())
    }

    #[test]
    fn test_change_key_with_cached_url() -> Result<()> {
        let dir = tempdir().unwrap();
        let old_path = key_file(
            &dir,
            "old.pem",
            RSA4096_PEM,
            &registered_trailer(Some("mailto:a@example.com")),
        );
        let new_path = key_file(&dir, "new.pem", EC384_PEM, "");
        let mut old = AccountKey::open(&old_path)?;
        let mut new = AccountKey::open(&new_path)?;

        let client = client();
        client
            .transport()
            .push_response(directory_response("kc-nonce"))
            .push_response(HttpResponse::new(200));
        client.change_key(&mut new, &mut old)?;

        let requests = client.transport().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].url, KEY_CHANGE_URL);

        let (outer, outer_protected, outer_payload) = decode(&requests[1]);
        assert!(outer.verify(old.key())?);
        assert_eq!(outer_protected["nonce"], "kc-nonce");
        assert_eq!(outer_protected["url"], KEY_CHANGE_URL);
        assert_eq!(outer_protected["alg"], "RS256");
        assert!(outer_payload.get("resource").is_none());

        let inner: Jws = serde_json::from_value(outer_payload)?;
        assert!(inner.verify(new.key())?);
        let inner_protected = inner.decode_protected()?;
        assert!(inner_protected.get("nonce").is_none());
        assert_eq!(inner_protected["url"], KEY_CHANGE_URL);
        assert_eq!(inner_protected["alg"], "ES384");
        let inner_payload: Value = serde_json::from_slice(&inner.decode_payload()?)?;
        assert_eq!(
            inner_payload,
            json!({
                "account": ACCOUNT_URL,
                "newKey": serde_json::to_value(new.key().jwk())?,
            })
        );

        let new_meta = AccountMeta::load(&new_path)?;
        assert_eq!(new_meta.url(), Some(ACCOUNT_URL));
        assert_eq!(new_meta.contact(), Some("mailto:a@example.com"));
        assert!(AccountMeta::load(&old_path)?.is_empty());
        assert_eq!(fs::read_to_string(&old_path).unwrap(), RSA4096_PEM);
        Ok(())
    }

    #[test]
    fn test_change_key_probes_missing_url() -> Result<()> {
        let dir = tempdir().unwrap();
        let old_path = key_file(&dir, "old.pem", RSA4096_PEM, "");
        let new_path = key_file(&dir, "new.pem", EC384_PEM, "");
        let mut old = AccountKey::open(&old_path)?;
        let mut new = AccountKey::open(&new_path)?;

        let client = client();
        client
            .transport()
            .push_response(directory_response("probe"))
            .push_response(HttpResponse::new(409).with_header("Location", ACCOUNT_URL))
            .push_response(directory_response("kc"))
            .push_response(HttpResponse::new(202));
        client.change_key(&mut new, &mut old)?;

        let requests = client.transport().requests();
        assert_eq!(requests.len(), 4);
        let (probe, _, probe_payload) = decode(&requests[1]);
        assert!(probe.verify(old.key())?);
        assert_eq!(
            probe_payload,
            json!({"terms-of-service-agreed": true, "resource": "new-reg"})
        );

        let (_, outer_protected, outer_payload) = decode(&requests[3]);
        assert_eq!(outer_protected["nonce"], "kc");
        let inner: Jws = serde_json::from_value(outer_payload)?;
        let inner_payload: Value = serde_json::from_slice(&inner.decode_payload()?)?;
        assert_eq!(inner_payload["account"], ACCOUNT_URL);

        assert_eq!(new.url(), Some(ACCOUNT_URL));
        assert_eq!(AccountMeta::load(&new_path)?.contact(), None);
        Ok(())
    }

    #[test]
    fn test_change_key_refuses_unwritable_new_key_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let old_path = key_file(&dir, "old.pem", RSA4096_PEM, &registered_trailer(None));
        let mut old = AccountKey::open(&old_path)?;
        let new_key = KeyPair::from_pem(EC384_PEM.as_bytes())?;
        let mut new = AccountKey::from_parts(
            dir.path().join("missing/new.pem"),
            new_key,
            AccountMeta::new(),
        );
        let client = client();

        assert!(matches!(
            client.change_key(&mut new, &mut old),
            Err(AccountError::KeyFileNotWritable { .. })
        ));
        assert!(client.transport().requests().is_empty());
        assert_eq!(AccountMeta::load(&old_path)?.url(), Some(ACCOUNT_URL));
        Ok(())
    }

    #[test]
    fn test_change_key_succeeds_when_old_file_cleanup_fails() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut old_meta = AccountMeta::new();
        old_meta.set_url(Some(ACCOUNT_URL));
        let old_key = KeyPair::from_pem(RSA4096_PEM.as_bytes())?;
        let mut old =
            AccountKey::from_parts(dir.path().join("missing/old.pem"), old_key, old_meta);
        let new_path = key_file(&dir, "new.pem", EC384_PEM, "");
        let mut new = AccountKey::open(&new_path)?;

        let client = client();
        client
            .transport()
            .push_response(directory_response("kc"))
            .push_response(HttpResponse::new(200));
        client.change_key(&mut new, &mut old)?;

        assert_eq!(AccountMeta::load(&new_path)?.url(), Some(ACCOUNT_URL));
        assert_eq!(old.url(), None);
        assert!(!old.path().exists());
        Ok(())
    }

    #[test]
    fn test_change_key_rejected() -> Result<()> {
        let dir = tempdir().unwrap();
        let old_trailer = registered_trailer(None);
        let old_path = key_file(&dir, "old.pem", RSA4096_PEM, &old_trailer);
        let new_path = key_file(&dir, "new.pem", EC384_PEM, "");
        let mut old = AccountKey::open(&old_path)?;
        let mut new = AccountKey::open(&new_path)?;

        let client = client();
        client
            .transport()
            .push_response(directory_response("kc"))
            .push_response(HttpResponse::new(403));

        assert!(matches!(
            client.change_key(&mut new, &mut old),
            Err(AccountError::Protocol {
                operation: "key-change",
                ..
            })
        ));
        assert_eq!(
            fs::read_to_string(&old_path).unwrap(),
            format!("{}{}", RSA4096_PEM, old_trailer)
        );
        assert_eq!(fs::read_to_string(&new_path).unwrap(), EC384_PEM);
        Ok(())
    }

    #[test]
    fn test_update_contact() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = key_file(
            &dir,
            "account.pem",
            EC384_PEM,
            &registered_trailer(Some("mailto:a@example.com")),
        );
        let mut account = AccountKey::open(&path)?;
        let client = client();

        assert!(!client.update_contact(&mut account, "a@example.com")?);
        assert!(client.transport().requests().is_empty());

        client
            .transport()
            .push_response(directory_response("n2"))
            .push_response(HttpResponse::new(202));
        assert!(client.update_contact(&mut account, "b@example.com")?);

        let requests = client.transport().requests();
        assert_eq!(requests[1].url, ACCOUNT_URL);
        let (_, protected, payload) = decode(&requests[1]);
        assert!(protected.get("kid").is_none());
        assert!(protected.get("jwk").is_some());
        assert_eq!(
            payload,
            json!({"resource": "reg", "contact": ["mailto:b@example.com"]})
        );
        assert_eq!(
            AccountMeta::load(&path)?.contact(),
            Some("mailto:b@example.com")
        );
        Ok(())
    }

    #[test]
    fn test_deactivate_requires_200() -> Result<()> {
        let dir = tempdir().unwrap();
        let trailer = registered_trailer(None);
        let path = key_file(&dir, "account.pem", EC384_PEM, &trailer);
        let account = AccountKey::open(&path)?;
        let client = AcmeClientBuilder::new()
            .directory_url(DIRECTORY_URL)
            .force_jwk(false)
            .build_with(MockTransport::new());

        client
            .transport()
            .push_response(directory_response("n1"))
            .push_response(HttpResponse::new(200).with_body("{\"status\":\"deactivated\"}"));
        let response = client.deactivate(&account)?;
        assert_eq!(response.body_text(), "{\"status\":\"deactivated\"}");

        let (_, protected, payload) = decode(&client.transport().requests()[1]);
        assert_eq!(protected["kid"], ACCOUNT_URL);
        assert!(protected.get("jwk").is_none());
        assert_eq!(payload, json!({"resource": "reg", "status": "deactivated"}));

        client
            .transport()
            .push_response(directory_response("n2"))
            .push_response(HttpResponse::new(202));
        assert!(matches!(
            client.deactivate(&account),
            Err(AccountError::Protocol { .. })
        ));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{}{}", EC384_PEM, trailer)
        );
        Ok(())
    }

    #[test]
    fn test_account_info() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = key_file(&dir, "account.pem", EC384_PEM, &registered_trailer(None));
        let account = AccountKey::open(&path)?;
        let client = client();
        client
            .transport()
            .push_response(directory_response("n1"))
            .push_response(HttpResponse::new(202).with_body("{\"status\":\"valid\"}"));

        let response = client.account_info(&account)?;
        assert_eq!(response.code, Some(202));
        let (_, _, payload) = decode(&client.transport().requests()[1]);
        assert_eq!(payload, json!({"resource": "reg"}));
        Ok(())
    }

    #[test]
    fn test_operations_require_registration() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = key_file(&dir, "account.pem", EC384_PEM, "");
        let mut account = AccountKey::open(&path)?;
        let client = client();

        assert!(matches!(
            client.account_info(&account),
            Err(AccountError::NotRegistered(ref p)) if p == &path
        ));
        assert!(matches!(
            client.update_contact(&mut account, "a@example.com"),
            Err(AccountError::NotRegistered(_))
        ));
        assert!(client.transport().requests().is_empty());
        Ok(())
    }

    #[test]
    fn test_open_or_generate() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys/account.pem");

        let generated = AccountKey::open_or_generate(&path, KeyType::Ec384)?;
        assert!(generated.meta().is_empty());
        let reopened = AccountKey::open_or_generate(&path, KeyType::Rsa4096)?;
        assert_eq!(reopened.key().key_type(), KeyType::Ec384);
        assert_eq!(reopened.key().fingerprint(), generated.key().fingerprint());
        Ok(())
    }
}
