use std::collections::BTreeMap;

use openssl::{
    bn::{BigNum, BigNumContext},
    error::ErrorStack,
    pkey::{PKey, Private},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    codec::{self, CodecError},
    key_pair::KeyType,
};

/// JWK 產生過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum JwkError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Failed to encode key parameter: {0}")]
    Codec(#[from] CodecError),
}

/// P-384 座標的固定位元組寬度。
pub const P384_COORDINATE_LEN: usize = 48;

/// 帳戶公鑰的 JSON Web Key 表示（RFC 7517 / RFC 7518）。
///
/// 序列化時 `kty` 位於最前，其餘欄位依結構順序輸出；
/// 僅在計算指紋時才使用依欄位名稱排序的形式（見 [`Jwk::fields`]）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
    #[serde(rename = "EC")]
    Ec(EcJwk),
}

/// RSA 公鑰參數，`n` 與 `e` 皆為最短無號大端形式的 Base64 URL 編碼。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    pub n: String,
    pub e: String,
}

/// EC 公鑰參數，`x` 與 `y` 固定為曲線寬度（P-384 為 48 位元組）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub crv: String,
    pub x: String,
    pub y: String,
}

impl Jwk {
    /// 由已分類的私鑰導出公鑰的 JWK。
    pub fn from_private_key(key_type: KeyType, pri_key: &PKey<Private>) -> Result<Self, JwkError> {
        match key_type {
            KeyType::Rsa4096 => {
                let rsa = pri_key.rsa()?;
                Ok(Jwk::Rsa(RsaJwk {
                    n: codec::encode_unsigned_int(&rsa.n().to_vec(), None)?,
                    e: codec::encode_unsigned_int(&rsa.e().to_vec(), None)?,
                }))
            }
            KeyType::Ec384 => {
                let ec = pri_key.ec_key()?;
                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec.public_key()
                    .affine_coordinates_gfp(ec.group(), &mut x, &mut y, &mut ctx)?;

                Ok(Jwk::Ec(EcJwk {
                    crv: "P-384".to_string(),
                    x: codec::encode_unsigned_int(&x.to_vec(), Some(P384_COORDINATE_LEN))?,
                    y: codec::encode_unsigned_int(&y.to_vec(), Some(P384_COORDINATE_LEN))?,
                }))
            }
        }
    }

    /// 依欄位名稱排序的 `(名稱, 值)` 對，包含 `kty`。
    pub fn fields(&self) -> BTreeMap<&'static str, &str> {
        match self {
            Jwk::Rsa(jwk) => BTreeMap::from([
                ("kty", "RSA"),
                ("n", jwk.n.as_str()),
                ("e", jwk.e.as_str()),
            ]),
            Jwk::Ec(jwk) => BTreeMap::from([
                ("kty", "EC"),
                ("crv", jwk.crv.as_str()),
                ("x", jwk.x.as_str()),
                ("y", jwk.y.as_str()),
            ]),
        }
    }

    pub fn kty(&self) -> &'static str {
        match self {
            Jwk::Rsa(_) => "RSA",
            Jwk::Ec(_) => "EC",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
