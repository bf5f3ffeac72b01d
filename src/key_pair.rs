use std::{
    fmt, fs,
    io::{self, Write},
    path::Path,
    str::FromStr,
};

use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Private},
    rsa::Rsa,
    sha::sha256,
};
use thiserror::Error;
use tracing::debug;

use crate::{
    account_meta,
    atomic::{self, AtomicWriteError},
    codec,
    jwk::{Jwk, JwkError},
    signature::{SignatureError, SigningAlgorithm},
};

/// 金鑰相關操作的錯誤列舉。
#[derive(Debug, Error)]
pub enum KeyError {
    /// 金鑰類型不在 RSA-4096 與 EC P-384 之列。
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Atomic write error: {0}")]
    Atomic(#[from] AtomicWriteError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
}

type Result<T> = std::result::Result<T, KeyError>;

/// 支援的帳戶金鑰類型。
///
/// ACME 帳戶金鑰刻意只接受這兩種；其他合法金鑰（例如 2048 位元 RSA）
/// 在載入時一律拒絕。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// RSA，模數 4096 位元，公開指數 65537。
    Rsa4096,
    /// NIST P-384（secp384r1）。
    Ec384,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Rsa4096 => "rsa-4096",
            KeyType::Ec384 => "ec-384",
        }
    }

    /// 此類型金鑰使用的 JWS 演算法（RSA 為 RS256，EC 為 ES384）。
    pub fn signing_algorithm(&self) -> SigningAlgorithm {
        match self {
            KeyType::Rsa4096 => SigningAlgorithm::Rs256,
            KeyType::Ec384 => SigningAlgorithm::Es384,
        }
    }
}

impl FromStr for KeyType {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rsa-4096" => Ok(KeyType::Rsa4096),
            "ec-384" => Ok(KeyType::Ec384),
            other => Err(KeyError::UnsupportedKeyType(other.to_string())),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ACME 帳戶金鑰。
///
/// 由私鑰導出 JWK、簽章演算法與指紋後即不再變動。
pub struct KeyPair {
    key_type: KeyType,
    pri_key: PKey<Private>,
    jwk: Jwk,
    fingerprint: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_type", &self.key_type)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// 新建金鑰檔案時使用的權限。
    pub const DEFAULT_FILE_MODE: u32 = 0o600;
    const FINGERPRINT_LEN: usize = 8;

    /// 產生新的私鑰，不寫入任何檔案。
    pub fn generate_in_memory(key_type: KeyType) -> Result<Self> {
        let pri_key = match key_type {
            KeyType::Rsa4096 => PKey::from_rsa(Rsa::generate(4096)?)?,
            KeyType::Ec384 => {
                let group = EcGroup::from_curve_name(Nid::SECP384R1)?;
                PKey::from_ec_key(EcKey::generate(&group)?)?
            }
        };
        Self::with_type(key_type, pri_key)
    }

    /// 產生新的私鑰並以未加密的 PKCS8 PEM 原子性地寫入 `path`，
    /// 必要時建立上層目錄。既有檔案（連同其中的帳戶資料）會被取代。
    pub fn generate<P: AsRef<Path>>(path: P, key_type: KeyType) -> Result<Self> {
        let path = path.as_ref();
        let key_pair = Self::generate_in_memory(key_type)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let pem = key_pair.to_pem()?;
        atomic::replace_with(path, Self::DEFAULT_FILE_MODE, |w| {
            w.write_all(&pem).map_err(AtomicWriteError::from)?;
            Ok::<_, KeyError>(())
        })?;

        debug!(
            key_type = %key_type,
            fingerprint = %key_pair.fingerprint,
            path = %path.display(),
            "generated account key"
        );
        Ok(key_pair)
    }

    /// 若 `path` 不存在則產生新金鑰，否則載入既有金鑰。
    pub fn open_or_generate<P: AsRef<Path>>(path: P, key_type: KeyType) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Self::generate(path, key_type)
        }
    }

    /// 從金鑰檔案載入私鑰。
    ///
    /// 檔案尾端的帳戶資料行會先被分離，僅剩餘的 PEM 內容交給 OpenSSL 解析。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_pem(account_meta::split_trailer(&text).as_bytes())
    }

    /// 解析 PKCS1 或 PKCS8 PEM 私鑰。
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        Self::from_private_key(PKey::private_key_from_pem(pem)?)
    }

    /// 將私鑰分類為支援的類型；不符時回傳 [`KeyError::UnsupportedKeyType`]。
    pub fn from_private_key(pri_key: PKey<Private>) -> Result<Self> {
        let key_type = match pri_key.id() {
            Id::RSA if pri_key.bits() == 4096 => KeyType::Rsa4096,
            Id::EC if pri_key.ec_key()?.group().curve_name() == Some(Nid::SECP384R1) => {
                KeyType::Ec384
            }
            id => {
                return Err(KeyError::UnsupportedKeyType(format!(
                    "{:?} key with {} bits",
                    id,
                    pri_key.bits()
                )))
            }
        };
        Self::with_type(key_type, pri_key)
    }

    fn with_type(key_type: KeyType, pri_key: PKey<Private>) -> Result<Self> {
        let jwk = Jwk::from_private_key(key_type, &pri_key)?;
        let fingerprint = Self::compute_fingerprint(key_type, &jwk);
        Ok(Self {
            key_type,
            pri_key,
            jwk,
            fingerprint,
        })
    }

    /// 指紋僅用於本地識別與日誌關聯，與協議授權無關。
    fn compute_fingerprint(key_type: KeyType, jwk: &Jwk) -> String {
        let mut parts = vec![key_type.as_str()];
        for (name, value) in jwk.fields() {
            parts.push(name);
            parts.push(value);
        }
        let digest = sha256(parts.join("\0").as_bytes());
        let mut encoded = codec::encode_base64_url(digest);
        encoded.truncate(Self::FINGERPRINT_LEN);
        encoded
    }

    /// 金鑰類型。
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// 公鑰的 JWK，放入保護標頭或金鑰輪替負載。
    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// 複製一份 JWK。
    pub fn to_jwk(&self) -> Jwk {
        self.jwk.clone()
    }

    /// 簽章演算法，由金鑰類型決定。
    pub fn signing_algorithm(&self) -> SigningAlgorithm {
        self.key_type.signing_algorithm()
    }

    /// 8 字元的本地指紋，用於日誌中辨識金鑰。
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// 底層的 OpenSSL 私鑰。
    pub fn private_key(&self) -> &PKey<Private> {
        &self.pri_key
    }

    /// 以金鑰對應的 JWS 演算法簽章。
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signing_algorithm().sign(&self.pri_key, data)?)
    }

    /// 驗證此金鑰產生的簽章。
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        Ok(self
            .signing_algorithm()
            .verify(&self.pri_key, data, signature)?)
    }

    /// 未加密的 PKCS8 PEM。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }
}
