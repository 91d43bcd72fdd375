// src/provider.rs
//
// Minimal client for the payment gateway's invoice API.
// Auth: X-Api-Key header.

use std::fmt;
use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::models::PaymentOutcome;

const DEFAULT_API_BASE: &str = "https://gate.payhub.dev";

/// Provider name recorded on orders created through this client.
pub const PROVIDER_NAME: &str = "payhub";

/// Bounded timeout for the verify-by-reference call; a slow gateway
/// must surface an error rather than hang the request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn api_base() -> String {
    std::env::var("PROVIDER_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string())
}

#[derive(Debug)]
pub enum ProviderError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    InvalidResponse(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Http(e) => write!(f, "http error: {e}"),
            ProviderError::Api { status, body } => {
                write!(f, "provider api error status={status} body={body}")
            }
            ProviderError::InvalidResponse(e) => write!(f, "invalid response: {e}"),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

#[derive(Debug, Serialize)]
pub struct CreateInvoiceRequest {
    #[serde(rename = "amountMinor")]
    pub amount_minor: i64,
    pub currency: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceResponse {
    pub id: String,
    pub status: String,

    #[serde(rename = "paymentUrl")]
    pub payment_url: Option<String>,
}

fn client() -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

pub async fn create_invoice(
    api_key: &str,
    req: CreateInvoiceRequest,
) -> Result<InvoiceResponse, ProviderError> {
    let resp = client()?
        .post(format!("{}/api/v1/invoice", api_base()))
        .header("X-Api-Key", api_key)
        .json(&req)
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(ProviderError::Api {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str::<InvoiceResponse>(&body)
        .map_err(|e| ProviderError::InvalidResponse(format!("{e}; body={body}")))
}

/// Voids an invoice that will never be paid, so a charge whose local
/// recording was rejected does not stay payable at the gateway.
pub async fn cancel_invoice(api_key: &str, reference: &str) -> Result<(), ProviderError> {
    let resp = client()?
        .post(format!("{}/api/v1/invoice/{reference}/cancel", api_base()))
        .header("X-Api-Key", api_key)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await?;
        return Err(ProviderError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}

/// Verify-by-reference used by the manual verify channel.
pub async fn fetch_invoice(
    api_key: &str,
    reference: &str,
) -> Result<InvoiceResponse, ProviderError> {
    let resp = client()?
        .get(format!("{}/api/v1/invoice/{reference}", api_base()))
        .header("X-Api-Key", api_key)
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(ProviderError::Api {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str::<InvoiceResponse>(&body)
        .map_err(|e| ProviderError::InvalidResponse(format!("{e}; body={body}")))
}

/// Maps a gateway invoice status onto a normalized outcome.
/// `None` = still pending, nothing to report yet.
pub fn map_invoice_status(status: &str) -> Option<PaymentOutcome> {
    match status {
        "completed" | "succeeded" | "success" | "paid" => Some(PaymentOutcome::Success),
        "failed" | "fail" | "error" => Some(PaymentOutcome::Failed),
        "cancelled" | "canceled" => Some(PaymentOutcome::Cancelled),
        _ => None,
    }
}

/// HMAC-SHA256 in hex; used to sign/check the reference carried by the
/// client return-redirect.
pub fn sign_hmac_sha256_hex(secret: &str, data: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    let result = mac.finalize().into_bytes();
    hex::encode(result)
}

/// Checks a hex signature against the HMAC of `data` in constant time.
/// Rejects anything that is not valid hex.
pub fn verify_hmac_sha256_hex(secret: &str, data: &str, signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    mac.verify_slice(&signature).is_ok()
}
