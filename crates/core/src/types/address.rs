//! Postal addresses captured at checkout.
//!
//! The address book itself lives outside the engine. Checkout receives an
//! [`AddressInput`], validates it field by field, and the order keeps the
//! resulting [`Address`] as an immutable snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::email::Email;

const MAX_FIELD_LENGTH: usize = 255;

/// Which role an address plays on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "address_kind", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Shipping,
    Billing,
}

/// Field-level validation failures, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("invalid address: {}", summary(.fields))]
pub struct AddressError {
    pub fields: BTreeMap<String, Vec<String>>,
}

fn summary(fields: &BTreeMap<String, Vec<String>>) -> String {
    fields.keys().cloned().collect::<Vec<_>>().join(", ")
}

impl AddressError {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_owned())
            .or_default()
            .push(message.into());
    }

    /// Prefix every field with `prefix.` (e.g. `shipping_address.city`).
    #[must_use]
    pub fn prefixed(self, prefix: &str) -> Self {
        Self {
            fields: self
                .fields
                .into_iter()
                .map(|(k, v)| (format!("{prefix}.{k}"), v))
                .collect(),
        }
    }
}

/// Address as submitted by the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressInput {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    pub phone: Option<String>,
    #[serde(default, alias = "address_line_1")]
    pub line1: String,
    #[serde(alias = "address_line_2")]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub country: String,
}

/// A validated address snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub email: Email,
    pub phone: Option<String>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2, uppercase.
    pub country: String,
}

impl AddressInput {
    /// Validate every field, collecting all failures.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] listing each invalid field.
    pub fn validate(&self) -> Result<Address, AddressError> {
        let mut errors = AddressError::default();

        let first_name = required(&mut errors, "first_name", &self.first_name);
        let last_name = required(&mut errors, "last_name", &self.last_name);
        let line1 = required(&mut errors, "line1", &self.line1);
        let city = required(&mut errors, "city", &self.city);
        let state = required(&mut errors, "state", &self.state);
        let postal_code = required(&mut errors, "postal_code", &self.postal_code);

        let country = self.country.trim().to_ascii_uppercase();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            errors.push("country", "must be a two-letter country code");
        }

        let email = match Email::parse(&self.email) {
            Ok(email) => Some(email),
            Err(e) => {
                errors.push("email", e.to_string());
                None
            }
        };

        let phone = optional(&mut errors, "phone", self.phone.as_deref());
        let line2 = optional(&mut errors, "line2", self.line2.as_deref());

        match email {
            Some(email) if errors.fields.is_empty() => Ok(Address {
                first_name,
                last_name,
                email,
                phone,
                line1,
                line2,
                city,
                state,
                postal_code,
                country,
            }),
            _ => Err(errors),
        }
    }
}

fn required(errors: &mut AddressError, field: &str, value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        errors.push(field, "is required");
    } else if value.len() > MAX_FIELD_LENGTH {
        errors.push(field, format!("must be at most {MAX_FIELD_LENGTH} characters"));
    }
    value.to_owned()
}

fn optional(errors: &mut AddressError, field: &str, value: Option<&str>) -> Option<String> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    if value.len() > MAX_FIELD_LENGTH {
        errors.push(field, format!("must be at most {MAX_FIELD_LENGTH} characters"));
    }
    Some(value.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> AddressInput {
        AddressInput {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            phone: Some("  ".into()),
            line1: "1 Analytical Way".into(),
            line2: None,
            city: "London".into(),
            state: "LDN".into(),
            postal_code: "N1 9GU".into(),
            country: "gb".into(),
        }
    }

    #[test]
    fn test_valid_address_is_normalized() {
        let address = input().validate();
        assert!(address.is_ok());
        if let Ok(address) = address {
            assert_eq!(address.country, "GB");
            assert_eq!(address.phone, None);
        }
    }

    #[test]
    fn test_collects_all_field_errors() {
        let mut bad = input();
        bad.first_name = String::new();
        bad.email = "nope".into();
        bad.country = "GBR".into();

        let err = bad.validate().err().unwrap_or_default();
        assert!(err.fields.contains_key("first_name"));
        assert!(err.fields.contains_key("email"));
        assert!(err.fields.contains_key("country"));
        assert_eq!(err.fields.len(), 3);
    }

    #[test]
    fn test_prefixed_field_names() {
        let mut bad = input();
        bad.city = String::new();
        let err = bad.validate().err().unwrap_or_default().prefixed("billing_address");
        assert!(err.fields.contains_key("billing_address.city"));
    }
}
