use bigdecimal::BigDecimal;
use std::fmt;

pub const CURRENCY_LEN: usize = 3;
pub const REFERENCE_MAX_LEN: usize = 100;
pub const EMAIL_MAX_LEN: usize = 254;
pub const DESCRIPTION_MAX_LEN: usize = 500;
pub const AMOUNT_MAX_SCALE: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| ch.is_whitespace() || !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_amount(amount: &BigDecimal) -> ValidationResult {
    if *amount <= BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    let (_, scale) = amount.normalized().as_bigint_and_exponent();
    if scale > AMOUNT_MAX_SCALE {
        return Err(ValidationError::new(
            "amount",
            format!("must have at most {} decimal places", AMOUNT_MAX_SCALE),
        ));
    }

    Ok(())
}

pub fn validate_currency(currency: &str) -> ValidationResult {
    validate_required("currency", currency)?;

    if currency.len() != CURRENCY_LEN || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ValidationError::new(
            "currency",
            "must be a three-letter uppercase code",
        ));
    }

    Ok(())
}

pub fn validate_email(email: &str) -> ValidationResult {
    validate_required("email", email)?;
    validate_max_len("email", email, EMAIL_MAX_LEN)?;

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => Ok(()),
        _ => Err(ValidationError::new("email", "must be a valid email address")),
    }
}

/// References travel in URLs, so they are restricted to URL-safe characters.
pub fn validate_reference(reference: &str) -> ValidationResult {
    validate_required("reference", reference)?;
    validate_max_len("reference", reference, REFERENCE_MAX_LEN)?;

    if !reference
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '='))
    {
        return Err(ValidationError::new(
            "reference",
            "may contain only letters, digits, '-', '_', '.' and '='",
        ));
    }

    Ok(())
}
