//! 此模組提供 ACME 請求所用的 JSON Web Signature (JWS) 結構。
//!
//! 建立 JWS（[`build_envelope`]）與序列化為傳輸位元組（[`Jws::to_bytes`]）
//! 是兩個獨立步驟；金鑰輪替時內層 JWS 不序列化，而是直接作為外層的負載。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::{
    codec::{self, CodecError},
    jwk::Jwk,
    key_pair::{KeyError, KeyPair},
    payload::Payload,
    signature::SigningAlgorithm,
};

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Base64 decode error: {0}")]
    Codec(#[from] CodecError),
}

type Result<T> = std::result::Result<T, JwsError>;

/// JWS 的保護標頭。
///
/// 未提供 `kid` 時帶入 `jwk`；`nonce` 僅在提供時出現。
#[derive(Debug, Serialize)]
pub struct ProtectedHeader<'a> {
    alg: SigningAlgorithm,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<&'a Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
}

impl<'a> ProtectedHeader<'a> {
    pub fn new(
        key: &'a KeyPair,
        url: &'a str,
        nonce: Option<&'a str>,
        kid: Option<&'a str>,
    ) -> Self {
        Self {
            alg: key.signing_algorithm(),
            url,
            jwk: if kid.is_none() { Some(key.jwk()) } else { None },
            kid,
            nonce,
        }
    }

    pub fn to_base64(&self) -> Result<String> {
        Ok(codec::encode_base64_url(serde_json::to_string(self)?))
    }
}

/// 一個 JSON Web Signature，三個欄位皆為 Base64 URL 字串。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// 建立並簽署一個 JWS。
///
/// - `nonce`：由 CA 取得的 replay nonce，僅使用一次；
/// - `kid`：帳戶 URL，提供時取代 `jwk`；
/// - `resource_hint`：負載為 JSON 物件且缺少 `resource` 時補上的值。
///
/// 簽章輸入為 `protected + "." + payload`，使用金鑰對應的演算法
/// （EC 金鑰會轉為 `r || s` 格式）。
pub fn build_envelope(
    key: &KeyPair,
    payload: impl Into<Payload>,
    url: &str,
    nonce: Option<&str>,
    kid: Option<&str>,
    resource_hint: Option<&str>,
) -> Result<Jws> {
    let protected = ProtectedHeader::new(key, url, nonce, kid).to_base64()?;
    let payload = payload.into().with_resource(resource_hint).encode()?;
    let signature = key.sign(format!("{}.{}", protected, payload).as_bytes())?;

    Ok(Jws {
        protected,
        payload,
        signature: codec::encode_base64_url(signature),
    })
}

impl Jws {
    /// 序列化為 JSON 字串。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 序列化為 HTTP 請求本文。
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "protected": self.protected,
            "payload": self.payload,
            "signature": self.signature,
        })
    }

    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.protected, self.payload)
    }

    /// 解碼後的保護標頭。
    pub fn decode_protected(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&codec::decode_base64_url(
            &self.protected,
        )?)?)
    }

    /// 解碼後的負載位元組。
    pub fn decode_payload(&self) -> Result<Vec<u8>> {
        Ok(codec::decode_base64_url(&self.payload)?)
    }

    /// 以 `key` 驗證簽章。
    pub fn verify(&self, key: &KeyPair) -> Result<bool> {
        let signature = codec::decode_base64_url(&self.signature)?;
        Ok(key.verify(self.signing_input().as_bytes(), &signature)?)
    }
}
