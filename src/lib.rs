//! # ACME Account Client Library
//!
//! 本庫負責 ACME 帳戶端的工作：管理長期使用的帳戶金鑰、為協議請求建立 JWS 簽名，
//! 並對 CA 的 nonce 保護 HTTP API 執行帳戶生命週期操作。
//!
//! - **金鑰**（`key_pair`、`jwk`、`signature`）：產生或載入 RSA-4096 與 EC P-384 金鑰，
//!   導出 JWK、簽章演算法與本地指紋。
//! - **編碼**（`codec`）：JOSE 使用的 Base64 URL、無號整數編碼，以及 ECDSA 簽章的 DER 轉換。
//! - **帳戶資料**（`account_meta`、`atomic`）：帳戶 URL 與聯絡資訊以尾端註解行的形式
//!   存放在金鑰檔案中，並以原子替換方式寫回。
//! - **協議**（`http`、`directory`、`jws`、`payload`、`client`、`account`）：目錄與 nonce 解析、
//!   簽名請求，以及註冊、金鑰輪替、聯絡資訊更新、停用與帳戶查詢。
//!
//! 網域驗證與憑證簽發不在本庫的範圍內。本庫只透過 `tracing` 發出日誌，不會安裝 subscriber。
//!
//! ## 示例
//!
//! ```rust,no_run
//! use acme_acct::{
//!     account::AccountKey,
//!     client::{AcmeClient, LETSENCRYPT_STAGING_DIRECTORY},
//!     key_pair::KeyType,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AcmeClient::new(LETSENCRYPT_STAGING_DIRECTORY);
//!
//!     // 1. 載入或建立帳戶金鑰
//!     let mut account = AccountKey::open_or_generate("account.pem", KeyType::Ec384)?;
//!
//!     // 2. 尚未註冊時註冊帳戶，帳戶 URL 會寫回金鑰檔案
//!     client.ensure_registered(&mut account, Some("admin@example.com"), false)?;
//!
//!     // 3. 查詢帳戶資訊
//!     let response = client.account_info(&account)?;
//!     println!("{}", response.body_text());
//!
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod account_meta;
pub mod atomic;
pub mod client;
pub mod codec;
pub mod directory;
pub mod http;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod payload;
pub mod signature;
