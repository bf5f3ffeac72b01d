//! JOSE 所需的二進位與文字轉換：無填充的 Base64 URL 編碼、
//! 無號大端整數編碼，以及 ECDSA 簽章由 DER 轉為 `r || s` 原始格式。

use thiserror::Error;

/// 編解碼過程中可能發生的錯誤。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// DER 簽章結構不符合 `SEQUENCE { INTEGER r, INTEGER s }`。
    #[error("Malformed signature: {0}")]
    MalformedSignature(&'static str),
    /// 整數超過指定的固定寬度。
    #[error("Integer does not fit into {0} bytes")]
    IntegerTooWide(usize),
    /// Base64 URL 字串中出現無效字符。
    #[error("Invalid character: {0}")]
    InvalidCharacter(u8),
    /// Base64 URL 字串長度不可能由任何輸入產生。
    #[error("Invalid length")]
    InvalidLength,
}

pub type Result<T> = std::result::Result<T, CodecError>;

// URL 安全的 Base64 字符表（RFC 4648 §5）。
const BASE64_URL_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

const DER_SEQUENCE: u8 = 0x30;
const DER_INTEGER: u8 = 0x02;

/// 以 URL 安全且不帶 `=` 填充的 Base64 編碼輸入資料。
///
/// ```
/// use acme_acct::codec::encode_base64_url;
/// assert_eq!(encode_base64_url("Hello, World!"), "SGVsbG8sIFdvcmxkIQ");
/// ```
pub fn encode_base64_url<T: AsRef<[u8]>>(input: T) -> String {
    let bytes = input.as_ref();
    let mut output = String::with_capacity((bytes.len() * 4).div_ceil(3));

    for chunk in bytes.chunks(3) {
        let b1 = chunk[0];
        let b2 = chunk.get(1).copied().unwrap_or(0);
        let b3 = chunk.get(2).copied().unwrap_or(0);

        output.push(BASE64_URL_CHARS[(b1 >> 2) as usize] as char);
        output.push(BASE64_URL_CHARS[((b1 & 0x03) << 4 | (b2 >> 4)) as usize] as char);
        if chunk.len() > 1 {
            output.push(BASE64_URL_CHARS[((b2 & 0x0F) << 2 | (b3 >> 6)) as usize] as char);
        }
        if chunk.len() > 2 {
            output.push(BASE64_URL_CHARS[(b3 & 0x3F) as usize] as char);
        }
    }

    output
}

/// 將無填充的 Base64 URL 字串解碼為原始位元組。
///
/// 尾端若帶有 `=` 亦可接受。
///
/// # 錯誤
///
/// 遇到字符表以外的字符時回傳 [`CodecError::InvalidCharacter`]，
/// 長度除以 4 餘 1 時回傳 [`CodecError::InvalidLength`]。
pub fn decode_base64_url(input: &str) -> Result<Vec<u8>> {
    let encoded = input.trim_end_matches('=').as_bytes();
    if encoded.len() % 4 == 1 {
        return Err(CodecError::InvalidLength);
    }

    let mut buffer = Vec::with_capacity(encoded.len() / 4 * 3 + 2);
    for chunk in encoded.chunks(4) {
        let mut group = 0u32;
        for (i, &c) in chunk.iter().enumerate() {
            group |= (decode_char(c)? as u32) << (18 - 6 * i);
        }

        buffer.push((group >> 16) as u8);
        if chunk.len() > 2 {
            buffer.push((group >> 8 & 0xFF) as u8);
        }
        if chunk.len() > 3 {
            buffer.push((group & 0xFF) as u8);
        }
    }

    Ok(buffer)
}

fn decode_char(c: u8) -> Result<u8> {
    match c {
        b'A'..=b'Z' => Ok(c - b'A'),
        b'a'..=b'z' => Ok(c - b'a' + 26),
        b'0'..=b'9' => Ok(c - b'0' + 52),
        b'-' => Ok(62),
        b'_' => Ok(63),
        _ => Err(CodecError::InvalidCharacter(c)),
    }
}

/// 將無號大端整數編碼為 JOSE 使用的 Base64 URL 字串。
///
/// `be_bytes` 的前導零會先被移除取得最短形式（數值 0 視為單一 `0x00`）。
/// 若指定 `length`，則左側補零至固定寬度，例如 EC 座標需固定為曲線寬度。
///
/// # 錯誤
///
/// 數值超過 `length` 位元組時回傳 [`CodecError::IntegerTooWide`]。
pub fn encode_unsigned_int(be_bytes: &[u8], length: Option<usize>) -> Result<String> {
    let start = be_bytes
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(be_bytes.len());
    let minimal = match &be_bytes[start..] {
        [] => &[0u8][..],
        digits => digits,
    };

    match length {
        None => Ok(encode_base64_url(minimal)),
        Some(width) => Ok(encode_base64_url(left_pad(minimal, width)?)),
    }
}

fn left_pad(value: &[u8], width: usize) -> Result<Vec<u8>> {
    if value.len() > width {
        return Err(CodecError::IntegerTooWide(width));
    }
    let mut padded = vec![0u8; width - value.len()];
    padded.extend_from_slice(value);
    Ok(padded)
}

/// 將 DER 編碼的 ECDSA 簽章轉為 JWS 要求的 `r || s` 原始串接格式。
///
/// DER 結構為 `0x30 len (0x02 rlen r) (0x02 slen s)`。整數以有號形式編碼，
/// 最高位為 1 時會多出一個前導 `0x00`，此處移除後再左側補零至 `width`
/// （P-384 為 48），因此輸出固定為 `2 * width` 位元組。
///
/// # 錯誤
///
/// 標籤錯誤、長度不一致、資料截斷或整數寬於 `width` 時回傳
/// [`CodecError::MalformedSignature`]。
pub fn ecdsa_der_to_raw(der: &[u8], width: usize) -> Result<Vec<u8>> {
    if der.first() != Some(&DER_SEQUENCE) {
        return Err(CodecError::MalformedSignature("expected SEQUENCE tag"));
    }
    let (body_len, header_len) = read_length(der, 1)?;
    if header_len + body_len != der.len() {
        return Err(CodecError::MalformedSignature(
            "SEQUENCE length does not match buffer",
        ));
    }

    let (r, pos) = read_integer(der, header_len)?;
    let (s, pos) = read_integer(der, pos)?;
    if pos != der.len() {
        return Err(CodecError::MalformedSignature(
            "trailing bytes after INTEGER pair",
        ));
    }

    let mut raw = Vec::with_capacity(width * 2);
    for component in [r, s] {
        let component = match component {
            [0, rest @ ..] if !rest.is_empty() => rest,
            other => other,
        };
        let padded = left_pad(component, width)
            .map_err(|_| CodecError::MalformedSignature("INTEGER wider than curve"))?;
        raw.extend_from_slice(&padded);
    }

    Ok(raw)
}

/// 讀取位於 `pos` 的 DER 長度欄位，回傳 `(長度, 讀取後的位置)`。
fn read_length(der: &[u8], pos: usize) -> Result<(usize, usize)> {
    match der.get(pos) {
        None => Err(CodecError::MalformedSignature("truncated length")),
        Some(&len) if len < 0x80 => Ok((len as usize, pos + 1)),
        Some(&0x81) => match der.get(pos + 1) {
            Some(&len) if len >= 0x80 => Ok((len as usize, pos + 2)),
            Some(_) => Err(CodecError::MalformedSignature("non-minimal length")),
            None => Err(CodecError::MalformedSignature("truncated length")),
        },
        Some(_) => Err(CodecError::MalformedSignature("unsupported length form")),
    }
}

fn read_integer(der: &[u8], pos: usize) -> Result<(&[u8], usize)> {
    match der.get(pos) {
        Some(&DER_INTEGER) => {}
        Some(_) => return Err(CodecError::MalformedSignature("expected INTEGER tag")),
        None => return Err(CodecError::MalformedSignature("truncated INTEGER")),
    }
    let (len, start) = read_length(der, pos + 1)?;
    if len == 0 {
        return Err(CodecError::MalformedSignature("empty INTEGER"));
    }
    let end = start + len;
    let value = der
        .get(start..end)
        .ok_or(CodecError::MalformedSignature("truncated INTEGER"))?;
    Ok((value, end))
}
