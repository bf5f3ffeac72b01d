//! HTTP 傳輸層。
//!
//! 所有請求結果都正規化為 [`HttpResponse`]：CA 回傳錯誤狀態碼或連線失敗
//! 都不會以錯誤拋出，而是以記錄的形式交給呼叫端判斷。

use std::{
    borrow::Cow,
    cell::RefCell,
    collections::{HashMap, VecDeque},
    fmt,
};

use reqwest::{blocking::Client, StatusCode};
use tracing::debug;

/// 一次 HTTP 交換的結果。
///
/// `code` 為 `None` 表示傳輸層失敗（DNS、連線等），此時 `reason` 描述失敗原因。
/// 標頭名稱一律為小寫。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub code: Option<u16>,
    pub reason: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// 建立帶有狀態碼的回應，`reason` 使用標準原因片語。
    pub fn new(code: u16) -> Self {
        let reason = StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            code: Some(code),
            reason,
            ..Default::default()
        }
    }

    /// 建立代表傳輸失敗的回應。
    pub fn transport_failure(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Default::default()
        }
    }

    /// 加入標頭，名稱轉為小寫儲存。
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// 設定回應本文。
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// 不分大小寫取得標頭值。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// 以 UTF-8 解讀本文，無效位元組以替代字元取代。
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// 狀態碼是否為 `codes` 其中之一；傳輸失敗時恆為 `false`。
    pub fn is_one_of(&self, codes: &[u16]) -> bool {
        self.code.is_some_and(|code| codes.contains(&code))
    }
}

impl fmt::Display for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} {}", code, self.reason)?,
            None => write!(f, "- {}", self.reason)?,
        }
        for line in self.body_text().lines() {
            write!(f, "\n  {}", line)?;
        }
        Ok(())
    }
}

/// 發送 HTTP 請求的介面。
///
/// 實作不得因 HTTP 層面的失敗回傳錯誤；所有結果都以 [`HttpResponse`] 表示。
pub trait HttpTransport {
    fn get(&self, url: &str) -> HttpResponse;

    fn post(&self, url: &str, headers: &[(&str, &str)], body: &[u8]) -> HttpResponse;
}

/// 基於 `reqwest` 阻塞客戶端的傳輸實作。
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn record(result: reqwest::Result<reqwest::blocking::Response>) -> HttpResponse {
        let response = match result {
            Ok(response) => response,
            Err(e) => return HttpResponse::transport_failure(e.to_string()),
        };

        let status = response.status();
        let mut record = HttpResponse::new(status.as_u16());
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes());
            record
                .headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert_with(|| value.into_owned());
        }

        match response.bytes() {
            Ok(body) => record.body = body.to_vec(),
            Err(e) => record.reason = format!("{} (failed to read body: {})", record.reason, e),
        }
        record
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str) -> HttpResponse {
        Self::record(self.client.get(url).send())
    }

    fn post(&self, url: &str, headers: &[(&str, &str)], body: &[u8]) -> HttpResponse {
        let mut request = self.client.post(url).body(body.to_vec());
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = Self::record(request.send());
        if response.code.is_none() {
            debug!(url, reason = %response.reason, "transport failure");
        }
        response
    }
}

/// 測試用的請求紀錄。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// 依序回傳預先排定回應的模擬傳輸，通常用於測試環境。
///
/// 排定的回應用完後，後續請求一律視為傳輸失敗。
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: RefCell<VecDeque<HttpResponse>>,
    requests: RefCell<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 排入下一個回應。
    pub fn push_response(&self, response: HttpResponse) -> &Self {
        self.responses.borrow_mut().push_back(response);
        self
    }

    /// 目前為止收到的所有請求。
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }

    fn respond(&self, request: RecordedRequest) -> HttpResponse {
        self.requests.borrow_mut().push(request);
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| HttpResponse::transport_failure("no scripted response"))
    }
}

impl HttpTransport for MockTransport {
    fn get(&self, url: &str) -> HttpResponse {
        self.respond(RecordedRequest {
            method: "GET",
            url: url.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        })
    }

    fn post(&self, url: &str, headers: &[(&str, &str)], body: &[u8]) -> HttpResponse {
        self.respond(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: body.to_vec(),
        })
    }
}
