//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (bit widths, delays, weights)
//! - Detect duplicate providers and keys
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use chrono::Utc;
use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::idgen::settings::{
    DEFAULT_BITS_MACHINE_ID, DEFAULT_BITS_SEQUENCE, MAX_FIELD_BITS, MIN_BITS_TIME,
};

/// One semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_observability(config, &mut errors);
    validate_retry(config, &mut errors);
    validate_id_generator(config, &mut errors);
    validate_providers(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_observability(config: &GuardConfig, errors: &mut Vec<ValidationError>) {
    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", obs.metrics_address),
        ));
    }
}

fn validate_retry(config: &GuardConfig, errors: &mut Vec<ValidationError>) {
    let retry = &config.retry;
    if !(retry.multiplier.is_finite() && retry.multiplier > 0.0) {
        errors.push(ValidationError::new(
            "retry.multiplier",
            "must be a positive number",
        ));
    }
    if !(retry.jitter_percent > 0.0 && retry.jitter_percent <= 1.0) {
        errors.push(ValidationError::new(
            "retry.jitter_percent",
            "must be in (0, 1]",
        ));
    }
    if retry.attempt_timeout_ms == Some(0) {
        errors.push(ValidationError::new(
            "retry.attempt_timeout_ms",
            "must be greater than 0",
        ));
    }
    if retry.notify_queue_capacity == 0 {
        errors.push(ValidationError::new(
            "retry.notify_queue_capacity",
            "must be greater than 0",
        ));
    }
}

fn validate_id_generator(config: &GuardConfig, errors: &mut Vec<ValidationError>) {
    let idgen = &config.id_generator;
    let bits_sequence = idgen.bits_sequence.unwrap_or(DEFAULT_BITS_SEQUENCE);
    let bits_machine = idgen.bits_machine_id.unwrap_or(DEFAULT_BITS_MACHINE_ID);

    if bits_sequence > MAX_FIELD_BITS {
        errors.push(ValidationError::new(
            "id_generator.bits_sequence",
            format!("must be at most {}", MAX_FIELD_BITS),
        ));
    }
    if bits_machine > MAX_FIELD_BITS {
        errors.push(ValidationError::new(
            "id_generator.bits_machine_id",
            format!("must be at most {}", MAX_FIELD_BITS),
        ));
    }
    let bits_time = 63i32 - i32::from(bits_sequence) - i32::from(bits_machine);
    if bits_time < i32::from(MIN_BITS_TIME) {
        errors.push(ValidationError::new(
            "id_generator",
            format!(
                "bits_sequence + bits_machine_id leaves {} time bits, need at least {}",
                bits_time, MIN_BITS_TIME
            ),
        ));
    }
    if idgen.time_unit_ms == Some(0) {
        errors.push(ValidationError::new(
            "id_generator.time_unit_ms",
            "must be at least 1",
        ));
    }
    if let Some(start) = idgen.start_time {
        if start > Utc::now() {
            errors.push(ValidationError::new(
                "id_generator.start_time",
                "must not be in the future",
            ));
        }
    }
    if let Some(machine_id) = idgen.machine_id {
        if bits_machine <= MAX_FIELD_BITS && u64::from(machine_id) >= 1u64 << bits_machine {
            errors.push(ValidationError::new(
                "id_generator.machine_id",
                format!("does not fit in {} bits", bits_machine),
            ));
        }
    }
}

fn validate_providers(config: &GuardConfig, errors: &mut Vec<ValidationError>) {
    let mut names = HashSet::new();
    for (i, provider) in config.providers.iter().enumerate() {
        let field = format!("providers[{}]", i);
        if provider.name.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                "must not be empty",
            ));
        } else if !names.insert(provider.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate provider '{}'", provider.name),
            ));
        }

        let mut keys = HashSet::new();
        for (j, key) in provider.keys.iter().enumerate() {
            let key_field = format!("{}.keys[{}]", field, j);
            if key.key.is_empty() {
                errors.push(ValidationError::new(
                    format!("{}.key", key_field),
                    "must not be empty",
                ));
            } else if !keys.insert(key.key.as_str()) {
                errors.push(ValidationError::new(
                    format!("{}.key", key_field),
                    "duplicate key",
                ));
            }
            if key.weight == 0 {
                errors.push(ValidationError::new(
                    format!("{}.weight", key_field),
                    "must be greater than 0",
                ));
            }
        }
    }
}
