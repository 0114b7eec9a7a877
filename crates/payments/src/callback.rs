//! Parsing of the provider's asynchronous STK callback.
//!
//! Expected shape:
//!
//! ```json
//! {"Body": {"stkCallback": {
//!     "MerchantRequestID": "29115-34620561-1",
//!     "CheckoutRequestID": "ws_CO_191220191020363925",
//!     "ResultCode": 0,
//!     "ResultDesc": "The service request is processed successfully.",
//!     "CallbackMetadata": {"Item": [
//!         {"Name": "Amount", "Value": 300},
//!         {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
//!         {"Name": "TransactionDate", "Value": 20191219102115},
//!         {"Name": "PhoneNumber", "Value": 254708374149}
//!     ]}
//! }}}
//! ```

use chrono::NaiveDateTime;
use domain::{Money, PhoneNumber, SuccessDetails};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CallbackError;

const TRANSACTION_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

/// Result reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    Success(SuccessDetails),
    Failure { result_code: i64 },
}

/// A validated callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCallback {
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub result_desc: Option<String>,
    pub result: CallbackResult,
}

impl ParsedCallback {
    pub fn is_success(&self) -> bool {
        matches!(self.result, CallbackResult::Success(_))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Body")]
    body: Body,
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    result_code: Option<Value>,
    result_desc: Option<String>,
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallbackMetadata {
    #[serde(default)]
    item: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataItem {
    name: String,
    value: Option<Value>,
}

impl CallbackMetadata {
    fn get(&self, name: &str) -> Option<&Value> {
        self.item
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
    }
}

/// Parses and validates a raw callback body.
pub fn parse_callback(payload: &[u8]) -> Result<ParsedCallback, CallbackError> {
    let envelope: Envelope = serde_json::from_slice(payload)
        .map_err(|e| CallbackError::MalformedCallback(e.to_string()))?;
    let callback = envelope.body.stk_callback;

    let checkout_request_id = callback
        .checkout_request_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| malformed("missing CheckoutRequestID"))?;

    let result_code = callback
        .result_code
        .as_ref()
        .and_then(integer)
        .ok_or_else(|| malformed("missing or non-numeric ResultCode"))?;

    let result = if result_code == 0 {
        let metadata = callback
            .callback_metadata
            .as_ref()
            .ok_or_else(|| malformed("successful callback without CallbackMetadata"))?;
        CallbackResult::Success(success_details(metadata)?)
    } else {
        CallbackResult::Failure { result_code }
    };

    Ok(ParsedCallback {
        checkout_request_id,
        merchant_request_id: callback.merchant_request_id,
        result_desc: callback.result_desc,
        result,
    })
}

fn success_details(metadata: &CallbackMetadata) -> Result<SuccessDetails, CallbackError> {
    let amount = metadata
        .get("Amount")
        .and_then(money)
        .ok_or_else(|| malformed("missing or invalid Amount"))?;

    let receipt_number = metadata
        .get("MpesaReceiptNumber")
        .and_then(text)
        .filter(|receipt| !receipt.is_empty())
        .ok_or_else(|| malformed("missing MpesaReceiptNumber"))?;

    let raw_phone = metadata
        .get("PhoneNumber")
        .and_then(text)
        .ok_or_else(|| malformed("missing PhoneNumber"))?;
    let phone_number = match PhoneNumber::parse(&raw_phone) {
        Ok(phone) => Some(phone),
        Err(err) => {
            tracing::warn!(error = %err, "callback phone number not recognised");
            None
        }
    };

    let transaction_date = metadata.get("TransactionDate").and_then(|value| {
        let raw = text(value)?;
        match NaiveDateTime::parse_from_str(&raw, TRANSACTION_DATE_FORMAT) {
            Ok(date) => Some(date),
            Err(err) => {
                tracing::warn!(raw = %raw, error = %err, "unparseable TransactionDate");
                None
            }
        }
    });

    Ok(SuccessDetails {
        receipt_number,
        amount,
        phone_number,
        transaction_date,
    })
}

fn malformed(reason: &str) -> CallbackError {
    CallbackError::MalformedCallback(reason.to_string())
}

/// Integer from a JSON number or a numeric string.
fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Amount from an integer or decimal, as JSON number or string.
fn money(value: &Value) -> Option<Money> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    Some(Money::from_cents((amount * 100.0).round() as i64))
}

/// String form of a scalar; numbers are rendered without a fraction.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => match n.as_u64() {
            Some(u) => Some(u.to_string()),
            None => Some(n.to_string()),
        },
        _ => None,
    }
}
