//! Daraja (M-Pesa Express) STK push client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{PaymentGateway, StkPushAccepted, StkPushRequest};
use crate::error::PaymentError;

/// Daraja sandbox host.
pub const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";

const TOKEN_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";
const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";

/// Tokens are refreshed this long before the provider says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Timestamps are rendered in East Africa Time (UTC+3).
const PROVIDER_UTC_OFFSET_HOURS: i64 = 3;

/// Credentials and endpoints for the Daraja API.
#[derive(Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Paybill / till number, sent as `BusinessShortCode` and `PartyB`.
    pub shortcode: String,
    pub passkey: String,
    /// Where the provider posts the payment result.
    pub callback_url: String,
    /// Bound on every outbound request.
    pub timeout: Duration,
}

impl std::fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpesaConfig")
            .field("base_url", &self.base_url)
            .field("shortcode", &self.shortcode)
            .field("callback_url", &self.callback_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// [`PaymentGateway`] backed by the Daraja HTTP API.
pub struct MpesaGateway {
    client: reqwest::Client,
    config: MpesaConfig,
    token: Mutex<Option<CachedToken>>,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::GatewayUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Returns a cached access token, fetching a new one when it is close to
    /// expiry.
    async fn access_token(&self) -> Result<String, PaymentError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        let response = self
            .client
            .get(self.url(TOKEN_PATH))
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| {
                PaymentError::GatewayUnavailable(format!("token request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::AuthError(format!("{status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::AuthError(format!("invalid token response: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in.seconds());
        let refresh_at = Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN);
        tracing::debug!(expires_in = lifetime.as_secs(), "fetched provider access token");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at,
        });
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    fn push_body(&self, request: &StkPushRequest, now: DateTime<Utc>) -> StkPushBody {
        let timestamp = provider_timestamp(now);
        StkPushBody {
            business_short_code: self.config.shortcode.clone(),
            password: stk_password(&self.config.shortcode, &self.config.passkey, &timestamp),
            timestamp,
            transaction_type: TRANSACTION_TYPE.to_string(),
            amount: request.amount,
            party_a: request.phone_number.as_str().to_string(),
            party_b: self.config.shortcode.clone(),
            phone_number: request.phone_number.as_str().to_string(),
            callback_url: self.config.callback_url.clone(),
            account_reference: request.account_reference.clone(),
            transaction_desc: request.description.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    #[tracing::instrument(skip(self, request), fields(amount = request.amount))]
    async fn initiate_stk_push(
        &self,
        request: &StkPushRequest,
    ) -> Result<StkPushAccepted, PaymentError> {
        let token = self.access_token().await?;
        let body = self.push_body(request, Utc::now());

        let response = self
            .client
            .post(self.url(STK_PUSH_PATH))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                };
                PaymentError::GatewayUnavailable(reason)
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
            return Err(PaymentError::AuthError(
                "access token rejected by provider".to_string(),
            ));
        }

        let text = response
            .text()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.to_string()))?;

        if !status.is_success() {
            let reason = serde_json::from_str::<ProviderError>(&text)
                .map(|err| err.error_message)
                .unwrap_or(text);
            return Err(PaymentError::GatewayUnavailable(format!("{status}: {reason}")));
        }

        let accepted: StkPushResponse = serde_json::from_str(&text).map_err(|e| {
            PaymentError::GatewayUnavailable(format!("invalid push response: {e}"))
        })?;
        accepted.into_accepted()
    }
}

/// `Password` field: base64 of shortcode, passkey and timestamp concatenated.
fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}

/// `YYYYMMDDHHMMSS` in provider local time.
fn provider_timestamp(now: DateTime<Utc>) -> String {
    (now + TimeDelta::hours(PROVIDER_UTC_OFFSET_HOURS))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushBody {
    business_short_code: String,
    password: String,
    timestamp: String,
    transaction_type: String,
    amount: u64,
    party_a: String,
    party_b: String,
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    callback_url: String,
    account_reference: String,
    transaction_desc: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: ExpiresIn,
}

/// The provider sends `expires_in` as a string; accept a number too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Number(u64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> u64 {
        match self {
            ExpiresIn::Number(n) => *n,
            ExpiresIn::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    response_code: Option<String>,
    response_description: Option<String>,
    customer_message: Option<String>,
}

impl StkPushResponse {
    fn into_accepted(self) -> Result<StkPushAccepted, PaymentError> {
        if self.response_code.as_deref() != Some("0") {
            return Err(PaymentError::GatewayUnavailable(format!(
                "push rejected: {}",
                self.response_description
                    .unwrap_or_else(|| "no response description".to_string())
            )));
        }

        let checkout_request_id = self
            .checkout_request_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                PaymentError::GatewayUnavailable("push accepted without CheckoutRequestID".into())
            })?;

        Ok(StkPushAccepted {
            checkout_request_id,
            merchant_request_id: self.merchant_request_id,
            customer_message: self.customer_message,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderError {
    error_message: String,
}
