//! Payment attempts and their settlement rules.

use chrono::{DateTime, NaiveDateTime, Utc};
use common::{OrderId, PaymentId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::UnknownVariant;
use crate::order::Money;

/// Status of a single payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Push request accepted, waiting for the provider's callback.
    #[default]
    Pending,

    /// The provider confirmed the payment.
    Success,

    /// The provider reported the payment as failed or cancelled.
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Returns true if a success callback may still be applied.
    ///
    /// A failed attempt can still turn successful: the provider's word on
    /// money received wins over an earlier failure report.
    pub fn can_succeed(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Failed)
    }

    /// Returns true if a failure callback may still be applied.
    pub fn can_fail(&self) -> bool {
        matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

/// A payment attempt cannot move to the requested status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Payment {payment_id} is already {status}")]
pub struct PaymentStatusError {
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
}

/// Phone number could not be turned into an MSISDN.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid phone number: {0}")]
pub struct InvalidPhone(pub String);

/// Payer phone number in international MSISDN form (`2547XXXXXXXX`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    const COUNTRY_CODE: &'static str = "254";

    /// Normalizes local (`07…`, `01…`), `+254…` and `254…` forms.
    ///
    /// Spaces and dashes are ignored.
    pub fn parse(raw: &str) -> Result<Self, InvalidPhone> {
        let compact: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();
        let digits = compact.strip_prefix('+').unwrap_or(&compact);

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(InvalidPhone(raw.to_string()));
        }

        let msisdn = if let Some(local) = digits.strip_prefix('0') {
            format!("{}{}", Self::COUNTRY_CODE, local)
        } else if digits.len() == 9 {
            format!("{}{}", Self::COUNTRY_CODE, digits)
        } else {
            digits.to_string()
        };

        if msisdn.len() != 12 || !msisdn.starts_with(Self::COUNTRY_CODE) {
            return Err(InvalidPhone(raw.to_string()));
        }

        Ok(Self(msisdn))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the provider reports about a completed payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessDetails {
    pub receipt_number: String,
    pub amount: Money,
    pub phone_number: Option<PhoneNumber>,
    pub transaction_date: Option<NaiveDateTime>,
}

/// A single attempt to collect payment for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub phone_number: PhoneNumber,
    pub amount: Money,

    /// Correlation id issued by the provider when it accepted the push.
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,

    /// Provider receipt, set once the payment succeeds.
    pub receipt_number: Option<String>,

    /// Provider-side completion time (provider local time).
    pub transaction_date: Option<NaiveDateTime>,

    /// Last result description reported by the provider.
    pub result_desc: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Records a push request the provider has accepted.
    pub fn pending(
        order_id: OrderId,
        phone_number: PhoneNumber,
        amount: Money,
        checkout_request_id: impl Into<String>,
        merchant_request_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            order_id,
            phone_number,
            amount,
            checkout_request_id: checkout_request_id.into(),
            merchant_request_id,
            receipt_number: None,
            transaction_date: None,
            result_desc: None,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Marks the attempt successful with the provider's details.
    pub fn record_success(
        &mut self,
        details: SuccessDetails,
        result_desc: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentStatusError> {
        if !self.status.can_succeed() {
            return Err(self.status_error());
        }

        self.receipt_number = Some(details.receipt_number);
        self.amount = details.amount;
        if let Some(phone) = details.phone_number {
            self.phone_number = phone;
        }
        self.transaction_date = details.transaction_date;
        self.result_desc = result_desc;
        self.status = PaymentStatus::Success;
        self.updated_at = now;
        Ok(())
    }

    /// Marks the attempt failed.
    pub fn record_failure(
        &mut self,
        result_desc: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentStatusError> {
        if !self.status.can_fail() {
            return Err(self.status_error());
        }

        self.result_desc = Some(result_desc.into());
        self.status = PaymentStatus::Failed;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_success(&self) -> bool {
        self.status == PaymentStatus::Success
    }

    fn status_error(&self) -> PaymentStatusError {
        PaymentStatusError {
            payment_id: self.id,
            status: self.status,
        }
    }
}
