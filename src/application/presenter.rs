use crate::domain::appointment::AppointmentId;
use crate::domain::instrument::PaymentMethod;
use crate::domain::payment::{PaymentId, PaymentRecord, PaymentStatus};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// User-facing projection of a payment record at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub payment_id: PaymentId,
    pub appointment_id: AppointmentId,
    pub status: PaymentStatus,
    pub status_label: &'static str,
    pub amount: Decimal,
    pub base_price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_fee: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    pub installments: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_at: Option<DateTime<Utc>>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_release_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_until_auto_release: Option<String>,
    pub is_mock: bool,
}

pub fn status_label(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "Awaiting payment",
        PaymentStatus::PaidHeld => "Payment held",
        PaymentStatus::Released => "Payment released",
        PaymentStatus::Refunded => "Refunded",
    }
}

/// Formats a non-negative span as `"<h>h <m>m"`, or `"<m>m"` under an hour.
///
/// Partial minutes are dropped; anything at or below zero is `"0m"`.
pub fn format_remaining(remaining: Duration) -> String {
    let minutes = remaining.num_minutes().max(0);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

pub fn present(record: &PaymentRecord, now: DateTime<Utc>) -> StatusView {
    let breakdown = record.breakdown();
    StatusView {
        payment_id: record.payment_id,
        appointment_id: record.appointment_id,
        status: record.status(),
        status_label: status_label(record.status()),
        amount: record.total_amount,
        base_price: record.base_price,
        platform_fee: breakdown
            .has_platform_fee()
            .then_some(breakdown.platform_fee),
        payment_method: record.payment_method,
        installments: record.installments,
        hold_reference: record.hold_reference.clone(),
        payment_reference: record.payment_reference.clone(),
        held_at: record.held_at,
        scheduled_at: record.scheduled_at,
        auto_release_at: record.auto_release_deadline,
        time_until_auto_release: record
            .auto_release_deadline
            .map(|deadline| format_remaining(deadline - now)),
        is_mock: record.is_mock,
    }
}
