//! Generator settings.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::idgen::FlakeError;

pub const DEFAULT_BITS_SEQUENCE: u8 = 8;
pub const DEFAULT_BITS_MACHINE_ID: u8 = 16;
pub const DEFAULT_TIME_UNIT: Duration = Duration::from_millis(10);

/// Upper bound for both the sequence and machine id widths.
pub const MAX_FIELD_BITS: u8 = 30;
pub const MIN_BITS_TIME: u8 = 32;

/// 2025-01-01T00:00:00Z
const DEFAULT_START_UNIX_SECS: i64 = 1_735_689_600;

/// Supplies the machine id at construction time.
pub type MachineIdResolver = Arc<dyn Fn() -> Result<u32, FlakeError> + Send + Sync>;

/// Extra validation applied to the resolved machine id.
pub type MachineIdCheck = Arc<dyn Fn(u32) -> bool + Send + Sync>;

pub fn default_start_time() -> DateTime<Utc> {
    Utc.timestamp_opt(DEFAULT_START_UNIX_SECS, 0)
        .single()
        .unwrap_or_default()
}

/// Construction parameters for a [`Flake`](crate::idgen::Flake).
///
/// Every `None` selects the documented default. When `machine_id` is unset
/// the lower 16 bits of a private IPv4 address of this host are used.
#[derive(Clone, Default)]
pub struct Settings {
    pub bits_sequence: Option<u8>,
    pub bits_machine_id: Option<u8>,
    pub time_unit: Option<Duration>,
    pub start_time: Option<DateTime<Utc>>,
    pub machine_id: Option<MachineIdResolver>,
    pub check_machine_id: Option<MachineIdCheck>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bits_sequence(mut self, bits: u8) -> Self {
        self.bits_sequence = Some(bits);
        self
    }

    pub fn with_bits_machine_id(mut self, bits: u8) -> Self {
        self.bits_machine_id = Some(bits);
        self
    }

    pub fn with_time_unit(mut self, unit: Duration) -> Self {
        self.time_unit = Some(unit);
        self
    }

    pub fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn with_machine_id<F>(mut self, resolver: F) -> Self
    where
        F: Fn() -> Result<u32, FlakeError> + Send + Sync + 'static,
    {
        self.machine_id = Some(Arc::new(resolver));
        self
    }

    pub fn with_check_machine_id<F>(mut self, check: F) -> Self
    where
        F: Fn(u32) -> bool + Send + Sync + 'static,
    {
        self.check_machine_id = Some(Arc::new(check));
        self
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("bits_sequence", &self.bits_sequence)
            .field("bits_machine_id", &self.bits_machine_id)
            .field("time_unit", &self.time_unit)
            .field("start_time", &self.start_time)
            .field("machine_id", &self.machine_id.as_ref().map(|_| "<resolver>"))
            .field(
                "check_machine_id",
                &self.check_machine_id.as_ref().map(|_| "<check>"),
            )
            .finish()
    }
}
