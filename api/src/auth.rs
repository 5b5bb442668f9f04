//! Provider authenticators: bearer tokens parsed from the provider's
//! credential blob, and the vendor request-signature scheme built from a
//! canonical-request hash and a date-scoped HMAC chain.

use aog_client::Request;
use aog_protocol::entity::AuthType;
use chrono::DateTime;
use chrono::Utc;
use hmac::Hmac;
use hmac::Mac;
use http::HeaderValue;
use http::header::AUTHORIZATION;
use http::header::CONTENT_TYPE;
use serde::Deserialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to parse auth credentials: {0}")]
    Parse(String),
    #[error("failed to compute signature: {0}")]
    Compute(String),
}

#[derive(Debug, Deserialize)]
struct ApiKeyBlob {
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SignBlob {
    secret_id: String,
    secret_key: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    version: String,
}

const SIGN_ALGORITHM: &str = "TC3-HMAC-SHA256";
const SIGN_SCOPE_SUFFIX: &str = "tc3_request";
const SIGNED_HEADERS: &str = "content-type;host";

/// Compute and attach authorization headers for the given auth type.
/// Purely computational; no I/O.
pub fn apply_auth(auth_type: AuthType, auth_key: &str, req: &mut Request) -> Result<(), AuthError> {
    match auth_type {
        AuthType::None => Ok(()),
        AuthType::Apikey | AuthType::Token => apply_bearer(auth_key, req),
        AuthType::Sign => apply_signature(auth_key, req, Utc::now()),
    }
}

fn apply_bearer(auth_key: &str, req: &mut Request) -> Result<(), AuthError> {
    let blob: ApiKeyBlob =
        serde_json::from_str(auth_key).map_err(|err| AuthError::Parse(err.to_string()))?;
    let value = HeaderValue::from_str(&format!("Bearer {}", blob.api_key))
        .map_err(|err| AuthError::Parse(err.to_string()))?;
    req.headers.insert(AUTHORIZATION, value);
    Ok(())
}

/// Vendor signature: hash a canonical view of the request, derive a
/// string-to-sign from the date and scope, chain HMACs date -> service ->
/// "tc3_request" -> signature, and emit `Authorization` plus the vendor
/// timestamp/version/region/action headers. The service name is the first
/// label of the provider host.
fn apply_signature(
    auth_key: &str,
    req: &mut Request,
    now: DateTime<Utc>,
) -> Result<(), AuthError> {
    let blob: SignBlob =
        serde_json::from_str(auth_key).map_err(|err| AuthError::Parse(err.to_string()))?;
    let url = Url::parse(&req.url).map_err(|err| AuthError::Compute(err.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| AuthError::Compute("request url has no host".to_string()))?
        .to_string();
    let service = host.split('.').next().unwrap_or_default().to_string();

    let content_type = req
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json");
    let body = req.body.as_deref().unwrap_or_default();

    let canonical_headers = format!("content-type:{content_type}\nhost:{host}\n");
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method,
        url.path(),
        url.query().unwrap_or_default(),
        canonical_headers,
        SIGNED_HEADERS,
        hex(&Sha256::digest(body)),
    );

    let timestamp = now.timestamp();
    let date = now.format("%Y-%m-%d").to_string();
    let scope = format!("{date}/{service}/{SIGN_SCOPE_SUFFIX}");
    let string_to_sign = format!(
        "{SIGN_ALGORITHM}\n{timestamp}\n{scope}\n{}",
        hex(&Sha256::digest(canonical_request.as_bytes())),
    );

    let k_date = hmac_sha256(format!("TC3{}", blob.secret_key).as_bytes(), date.as_bytes())?;
    let k_service = hmac_sha256(&k_date, service.as_bytes())?;
    let k_signing = hmac_sha256(&k_service, SIGN_SCOPE_SUFFIX.as_bytes())?;
    let signature = hex(&hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{SIGN_ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        blob.secret_id,
    );
    insert_header(req, AUTHORIZATION.as_str(), &authorization)?;
    insert_header(req, "X-TC-Timestamp", &timestamp.to_string())?;
    if !blob.version.is_empty() {
        insert_header(req, "X-TC-Version", &blob.version)?;
    }
    if !blob.region.is_empty() {
        insert_header(req, "X-TC-Region", &blob.region)?;
    }
    if !blob.action.is_empty() {
        insert_header(req, "X-TC-Action", &blob.action)?;
    }
    Ok(())
}

fn insert_header(req: &mut Request, name: &str, value: &str) -> Result<(), AuthError> {
    let name: http::HeaderName = name
        .parse()
        .map_err(|_| AuthError::Compute(format!("invalid header name {name}")))?;
    let value =
        HeaderValue::from_str(value).map_err(|err| AuthError::Compute(err.to_string()))?;
    req.headers.insert(name, value);
    Ok(())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, AuthError> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|err| AuthError::Compute(err.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
