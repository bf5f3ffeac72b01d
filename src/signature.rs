use openssl::{
    bn::BigNum,
    ecdsa::EcdsaSig,
    error::ErrorStack,
    hash::MessageDigest,
    pkey::{HasPublic, PKey, PKeyRef, Private},
    sign::{Signer, Verifier},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    codec::{self, CodecError},
    jwk::P384_COORDINATE_LEN,
};

/// 簽章操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signing error: {0}")]
    Signing(#[from] ErrorStack),
    #[error("Signature transcoding error: {0}")]
    Codec(#[from] CodecError),
    #[error("Raw ECDSA signature must be {expected} bytes, got {actual}")]
    InvalidRawLength { expected: usize, actual: usize },
}

type Result<T> = std::result::Result<T, SignatureError>;

/// JWS 簽章演算法（RFC 7518 §3.1）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSASSA-PKCS1-v1_5 搭配 SHA-256。
    #[serde(rename = "RS256")]
    Rs256,
    /// ECDSA P-384 搭配 SHA-384，簽章為 `r || s` 原始串接。
    #[serde(rename = "ES384")]
    Es384,
}

impl SigningAlgorithm {
    /// JWS `alg` 標頭中使用的名稱。
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::Rs256 => "RS256",
            SigningAlgorithm::Es384 => "ES384",
        }
    }

    fn digest(&self) -> MessageDigest {
        match self {
            SigningAlgorithm::Rs256 => MessageDigest::sha256(),
            SigningAlgorithm::Es384 => MessageDigest::sha384(),
        }
    }

    /// 使用私鑰對資料簽章。
    ///
    /// OpenSSL 產生的 ECDSA 簽章為 DER 格式，而 ACME 伺服器只接受 `r || s`，
    /// 因此 ES384 會經過 [`codec::ecdsa_der_to_raw`] 轉換。
    pub fn sign(&self, pri_key: &PKey<Private>, data: &[u8]) -> Result<Vec<u8>> {
        let mut signer = Signer::new(self.digest(), pri_key)?;
        signer.update(data)?;
        let signature = signer.sign_to_vec()?;

        match self {
            SigningAlgorithm::Rs256 => Ok(signature),
            SigningAlgorithm::Es384 => Ok(codec::ecdsa_der_to_raw(
                &signature,
                P384_COORDINATE_LEN,
            )?),
        }
    }

    /// 驗證以 [`sign`](Self::sign) 產生的 JWS 簽章。
    pub fn verify<T: HasPublic>(
        &self,
        key: &PKeyRef<T>,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        let der;
        let signature = match self {
            SigningAlgorithm::Rs256 => signature,
            SigningAlgorithm::Es384 => {
                der = raw_to_der(signature, P384_COORDINATE_LEN)?;
                &der[..]
            }
        };

        let mut verifier = Verifier::new(self.digest(), key)?;
        verifier.update(data)?;
        Ok(verifier.verify(signature)?)
    }
}

fn raw_to_der(raw: &[u8], width: usize) -> Result<Vec<u8>> {
    if raw.len() != width * 2 {
        return Err(SignatureError::InvalidRawLength {
            expected: width * 2,
            actual: raw.len(),
        });
    }
    let r = BigNum::from_slice(&raw[..width])?;
    let s = BigNum::from_slice(&raw[width..])?;
    Ok(EcdsaSig::from_private_components(r, s)?.to_der()?)
}
