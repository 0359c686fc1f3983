use crate::error::{EscrowError, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on credit card installments accepted by the processor.
pub const MAX_INSTALLMENTS: u32 = 12;

const CARD_NUMBER_DIGITS: usize = 16;
const MIN_HOLDER_NAME_LEN: usize = 3;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    Pix,
}

impl PaymentMethod {
    pub fn is_card(&self) -> bool {
        matches!(self, PaymentMethod::CreditCard | PaymentMethod::DebitCard)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::Pix => "pix",
        };
        f.write_str(name)
    }
}

/// A single field-level validation failure.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Raw instrument fields as submitted by the payer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstrumentDetails {
    pub card_number: Option<String>,
    pub card_name: Option<String>,
    pub card_expiry: Option<String>,
    pub card_cvv: Option<String>,
}

/// Card data that passed local format validation.
///
/// Only ever handed to the gateway for tokenization; never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct CardDetails {
    pub number: String,
    pub holder: String,
    pub expiry_month: u32,
    pub expiry_year: i32,
    pub cvv: String,
}

impl CardDetails {
    pub fn last4(&self) -> &str {
        &self.number[self.number.len() - 4..]
    }
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field("last4", &self.last4())
            .field("expiry_month", &self.expiry_month)
            .field("expiry_year", &self.expiry_year)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instrument {
    Card {
        method: PaymentMethod,
        card: CardDetails,
    },
    Pix,
}

impl Instrument {
    pub fn method(&self) -> PaymentMethod {
        match self {
            Instrument::Card { method, .. } => *method,
            Instrument::Pix => PaymentMethod::Pix,
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Checks the installment count against the payment method.
pub fn check_installments(method: Option<PaymentMethod>, installments: u32) -> Option<FieldError> {
    if installments == 0 {
        return Some(FieldError::new("installments", "must be at least 1"));
    }
    match method {
        Some(PaymentMethod::CreditCard) | None if installments > MAX_INSTALLMENTS => Some(
            FieldError::new("installments", format!("must be at most {MAX_INSTALLMENTS}")),
        ),
        Some(PaymentMethod::DebitCard | PaymentMethod::Pix) if installments != 1 => Some(
            FieldError::new("installments", "only credit card payments can be split"),
        ),
        _ => None,
    }
}

fn parse_card_number(raw: &str) -> std::result::Result<String, &'static str> {
    let mut digits = String::with_capacity(CARD_NUMBER_DIGITS);
    for c in raw.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' => {}
            _ => return Err("must contain only digits"),
        }
    }
    if digits.len() != CARD_NUMBER_DIGITS {
        return Err("must have exactly 16 digits");
    }
    Ok(digits)
}

/// Parses `MM/YY` or `MM/YYYY` and requires the month not to have passed.
fn parse_expiry(raw: &str, now: DateTime<Utc>) -> std::result::Result<(u32, i32), &'static str> {
    let (month, year) = raw.split_once('/').ok_or("expected MM/YY")?;
    let month: u32 = month.trim().parse().map_err(|_| "expected MM/YY")?;
    let year_part = year.trim();
    let year: i32 = match year_part.len() {
        2 => 2000 + year_part.parse::<i32>().map_err(|_| "expected MM/YY")?,
        4 => year_part.parse().map_err(|_| "expected MM/YY")?,
        _ => return Err("expected MM/YY"),
    };
    if !(1..=12).contains(&month) {
        return Err("month must be between 01 and 12");
    }
    if (year, month) < (now.year(), now.month()) {
        return Err("card is expired");
    }
    Ok((month, year))
}

/// Validates the instrument shape for `method`.
///
/// All failing fields are reported together so the payer can fix them in one
/// pass.
pub fn validate(
    method: PaymentMethod,
    details: &InstrumentDetails,
    installments: u32,
    now: DateTime<Utc>,
) -> Result<Instrument> {
    let mut errors = Vec::new();
    if let Some(err) = check_installments(Some(method), installments) {
        errors.push(err);
    }

    let instrument = if method.is_card() {
        let number = match present(&details.card_number) {
            Some(raw) => parse_card_number(raw)
                .map_err(|reason| errors.push(FieldError::new("card_number", reason)))
                .ok(),
            None => {
                errors.push(FieldError::new("card_number", "is required"));
                None
            }
        };
        let holder = match present(&details.card_name) {
            Some(name) if name.chars().count() >= MIN_HOLDER_NAME_LEN => Some(name.to_string()),
            Some(_) => {
                errors.push(FieldError::new("card_name", "must have at least 3 characters"));
                None
            }
            None => {
                errors.push(FieldError::new("card_name", "is required"));
                None
            }
        };
        let expiry = match present(&details.card_expiry) {
            Some(raw) => parse_expiry(raw, now)
                .map_err(|reason| errors.push(FieldError::new("card_expiry", reason)))
                .ok(),
            None => {
                errors.push(FieldError::new("card_expiry", "is required"));
                None
            }
        };
        let cvv = match present(&details.card_cvv) {
            Some(cvv) if (3..=4).contains(&cvv.len()) && cvv.bytes().all(|b| b.is_ascii_digit()) => {
                Some(cvv.to_string())
            }
            Some(_) => {
                errors.push(FieldError::new("card_cvv", "must be 3 or 4 digits"));
                None
            }
            None => {
                errors.push(FieldError::new("card_cvv", "is required"));
                None
            }
        };

        match (number, holder, expiry, cvv) {
            (Some(number), Some(holder), Some((expiry_month, expiry_year)), Some(cvv)) => {
                Some(Instrument::Card {
                    method,
                    card: CardDetails {
                        number,
                        holder,
                        expiry_month,
                        expiry_year,
                        cvv,
                    },
                })
            }
            _ => None,
        }
    } else {
        let card_fields = [
            ("card_number", &details.card_number),
            ("card_name", &details.card_name),
            ("card_expiry", &details.card_expiry),
            ("card_cvv", &details.card_cvv),
        ];
        for (field, value) in card_fields {
            if present(value).is_some() {
                errors.push(FieldError::new(field, "must be empty for pix"));
            }
        }
        Some(Instrument::Pix)
    };

    match instrument {
        Some(instrument) if errors.is_empty() => Ok(instrument),
        _ => Err(EscrowError::InvalidInstrument(errors)),
    }
}
