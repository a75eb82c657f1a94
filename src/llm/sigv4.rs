//! AWS Signature Version 4
//!
//! Bedrock Runtimeへのリクエストに付ける`Authorization`ヘッダーを計算する。
//! 署名対象のヘッダーは`content-type`、`host`、`x-amz-date`（一時認証情報の場合は
//! `x-amz-security-token`も）に固定している。

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::formatter::percent_encode;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// 署名に使う認証情報
pub(crate) struct Credentials<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: Option<&'a str>,
}

/// 署名対象のリクエスト
pub(crate) struct SigningRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    /// URLに使うエンコード済みのパス
    pub path: &'a str,
    pub content_type: &'a str,
    pub payload: &'a [u8],
    pub region: &'a str,
    pub service: &'a str,
}

/// 署名結果（リクエストに付けるヘッダー値）
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Signature {
    pub authorization: String,
    pub amz_date: String,
}

/// リクエストに署名する
pub(crate) fn sign(
    request: &SigningRequest<'_>,
    credentials: &Credentials<'_>,
    now: DateTime<Utc>,
) -> Result<Signature, String> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let mut headers = vec![
        ("content-type", request.content_type.trim()),
        ("host", request.host),
        ("x-amz-date", amz_date.as_str()),
    ];
    if let Some(token) = credentials.session_token {
        headers.push(("x-amz-security-token", token));
    }
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        request.method,
        canonical_uri(request.path),
        canonical_headers,
        signed_headers,
        hex::encode(Sha256::digest(request.payload))
    );

    let scope = format!("{}/{}/{}/aws4_request", date, request.region, request.service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(
        credentials.secret_access_key,
        &date,
        request.region,
        request.service,
    )?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    Ok(Signature {
        authorization: format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, credentials.access_key_id, scope, signed_headers, signature
        ),
        amz_date,
    })
}

/// 正規化URI（S3以外のサービスでは各セグメントをもう一度エンコードする）
fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(percent_encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// 署名キーの導出
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>, String> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, String> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| format!("invalid signing key: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
