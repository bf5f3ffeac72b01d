use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{codec, jwk::Jwk, jws::Jws};

/// JWS 的負載內容。
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// JSON 值，簽章前序列化後再以 Base64 URL 編碼。
    Json(Value),
    /// 原始位元組，直接以 Base64 URL 編碼。
    Bytes(Vec<u8>),
    /// 已經過 Base64 URL 編碼的字串，原樣放入 JWS。
    Encoded(String),
}

impl Payload {
    /// 若負載為 JSON 物件且缺少 `resource` 欄位，則補上 `hint`。
    ///
    /// 部分 CA 的舊版 API 要求每個請求都帶有 `resource`。
    pub fn with_resource(mut self, hint: Option<&str>) -> Self {
        if let (Some(hint), Payload::Json(Value::Object(map))) = (hint, &mut self) {
            if !map.contains_key("resource") {
                map.insert("resource".to_string(), Value::from(hint));
            }
        }
        self
    }

    /// 轉為 JWS `payload` 欄位的 Base64 URL 字串。
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Payload::Json(value) => Ok(codec::encode_base64_url(serde_json::to_string(value)?)),
            Payload::Bytes(bytes) => Ok(codec::encode_base64_url(bytes)),
            Payload::Encoded(encoded) => Ok(encoded.clone()),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<&Jws> for Payload {
    /// 以完整 JWS 作為另一個 JWS 的負載（金鑰輪替的內層簽章）。
    fn from(jws: &Jws) -> Self {
        Payload::Json(jws.to_value())
    }
}

/// ACME 請求的負載結構需實作的功能。
pub trait PayloadT: Serialize {
    fn to_payload(&self) -> Result<Payload, serde_json::Error> {
        Ok(Payload::Json(serde_json::to_value(self)?))
    }
}

/// 將電子郵件轉為聯絡 URI，已帶有 `mailto:` 前綴時不重複補充。
pub fn contact_uri(email: &str) -> String {
    if email.starts_with("mailto:") {
        email.to_string()
    } else {
        format!("mailto:{}", email)
    }
}

/// 新帳戶註冊請求。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewRegistration {
    #[serde(rename = "terms-of-service-agreed")]
    pub terms_of_service_agreed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<String>>,
}

impl NewRegistration {
    pub fn new(contact: Option<&str>) -> Self {
        NewRegistration {
            terms_of_service_agreed: true,
            contact: contact.map(|c| vec![c.to_string()]),
        }
    }
}

impl PayloadT for NewRegistration {}

/// 對既有帳戶資源（`reg`）的請求：查詢、更新聯絡資訊或停用。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationUpdate {
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl RegistrationUpdate {
    const RESOURCE: &'static str = "reg";

    pub fn query() -> Self {
        RegistrationUpdate {
            resource: Self::RESOURCE.to_string(),
            contact: None,
            status: None,
        }
    }

    pub fn contact(contact: &str) -> Self {
        RegistrationUpdate {
            contact: Some(vec![contact.to_string()]),
            ..Self::query()
        }
    }

    pub fn deactivate() -> Self {
        RegistrationUpdate {
            status: Some("deactivated".to_string()),
            ..Self::query()
        }
    }
}

impl PayloadT for RegistrationUpdate {}

/// 金鑰輪替的內層負載，由新金鑰簽章。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyChange {
    pub account: String,
    #[serde(rename = "newKey")]
    pub new_key: Jwk,
}

impl PayloadT for KeyChange {}
