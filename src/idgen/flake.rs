//! Snowflake-style generator.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::idgen::machine;
use crate::idgen::settings::{
    default_start_time, Settings, DEFAULT_BITS_MACHINE_ID, DEFAULT_BITS_SEQUENCE,
    DEFAULT_TIME_UNIT, MAX_FIELD_BITS, MIN_BITS_TIME,
};
use crate::idgen::FlakeError;
use crate::observability::metrics;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Fields unpacked from an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decomposed {
    pub id: u64,
    /// Elapsed time units since the generator's start time.
    pub time: u64,
    pub sequence: u32,
    pub machine_id: u32,
}

#[derive(Debug)]
struct FlakeState {
    elapsed_time: i64,
    sequence: u32,
}

/// Time-ordered unique id generator.
pub struct Flake {
    bits_time: u8,
    bits_sequence: u8,
    bits_machine: u8,
    time_unit: i64,
    start_time: i64,
    machine_id: u32,
    state: Mutex<FlakeState>,
    clock: Clock,
}

impl fmt::Debug for Flake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flake")
            .field("bits_time", &self.bits_time)
            .field("bits_sequence", &self.bits_sequence)
            .field("bits_machine", &self.bits_machine)
            .field("time_unit_ns", &self.time_unit)
            .field("machine_id", &self.machine_id)
            .finish()
    }
}

impl Flake {
    /// Validate `settings` and build a generator.
    pub fn new(settings: Settings) -> Result<Self, FlakeError> {
        Self::with_clock(settings, Arc::new(Utc::now))
    }

    pub(crate) fn with_clock(settings: Settings, clock: Clock) -> Result<Self, FlakeError> {
        let bits_sequence = settings.bits_sequence.unwrap_or(DEFAULT_BITS_SEQUENCE);
        if bits_sequence > MAX_FIELD_BITS {
            return Err(FlakeError::InvalidBitsSequence);
        }

        let bits_machine = settings.bits_machine_id.unwrap_or(DEFAULT_BITS_MACHINE_ID);
        if bits_machine > MAX_FIELD_BITS {
            return Err(FlakeError::InvalidBitsMachineId);
        }

        let bits_time = 63 - bits_sequence - bits_machine;
        if bits_time < MIN_BITS_TIME {
            return Err(FlakeError::InvalidBitsTime);
        }

        let time_unit = settings.time_unit.unwrap_or(DEFAULT_TIME_UNIT);
        if time_unit < Duration::from_millis(1) {
            return Err(FlakeError::InvalidTimeUnit);
        }
        let time_unit =
            i64::try_from(time_unit.as_nanos()).map_err(|_| FlakeError::InvalidTimeUnit)?;

        let start = settings.start_time.unwrap_or_else(default_start_time);
        if start > clock() {
            return Err(FlakeError::StartTimeAhead);
        }

        let machine_id = match &settings.machine_id {
            Some(resolve) => resolve()?,
            None => machine::default_machine_id()?,
        };
        if u64::from(machine_id) >= 1u64 << bits_machine {
            return Err(FlakeError::InvalidMachineId);
        }
        if let Some(check) = &settings.check_machine_id {
            if !check(machine_id) {
                return Err(FlakeError::InvalidMachineId);
            }
        }

        tracing::debug!(
            bits_time,
            bits_sequence,
            bits_machine,
            time_unit_ns = time_unit,
            machine_id,
            "ID generator initialised"
        );

        Ok(Self {
            bits_time,
            bits_sequence,
            bits_machine,
            time_unit,
            start_time: to_units(start, time_unit),
            machine_id,
            state: Mutex::new(FlakeState {
                elapsed_time: 0,
                sequence: sequence_mask(bits_sequence),
            }),
            clock,
        })
    }

    /// Generate the next id.
    ///
    /// When the current time unit's sequence space is used up, this blocks
    /// the calling thread until the next unit begins (at most one unit).
    pub fn id(&self) -> Result<u64, FlakeError> {
        let mask = sequence_mask(self.bits_sequence);

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.current_elapsed_time();
        if state.elapsed_time < current {
            state.elapsed_time = current;
            state.sequence = 0;
        } else {
            state.sequence = (state.sequence + 1) & mask;
            if state.sequence == 0 {
                state.elapsed_time += 1;
                let overtime = state.elapsed_time - current;
                metrics::record_id_backpressure();
                self.sleep(overtime);
            }
        }

        let id = self.to_id(state.elapsed_time, state.sequence)?;
        metrics::record_id_generated();
        Ok(id)
    }

    /// Human-readable, sortable request identifier:
    /// UTC `YYYYMMDDHHMMSS`, the id as 16 hex digits, then 2 random bytes in hex.
    pub fn request_id(&self) -> Result<String, FlakeError> {
        let id = self.id()?;
        let mut salt = [0u8; 2];
        OsRng.fill_bytes(&mut salt);
        Ok(format!(
            "{}{:016x}{:02x}{:02x}",
            (self.clock)().format("%Y%m%d%H%M%S"),
            id,
            salt[0],
            salt[1]
        ))
    }

    /// Pack an externally supplied time, sequence and machine id.
    pub fn compose(
        &self,
        time: DateTime<Utc>,
        sequence: u32,
        machine_id: u32,
    ) -> Result<u64, FlakeError> {
        let elapsed = to_units(time, self.time_unit) - self.start_time;
        if elapsed < 0 {
            return Err(FlakeError::StartTimeAhead);
        }
        if sequence > sequence_mask(self.bits_sequence) {
            return Err(FlakeError::InvalidSequence);
        }
        if u64::from(machine_id) >= 1u64 << self.bits_machine {
            return Err(FlakeError::InvalidMachineId);
        }
        self.pack(elapsed, sequence, machine_id)
    }

    /// Unpack an id into its fields.
    pub fn decompose(&self, id: u64) -> Decomposed {
        let time = id >> (self.bits_sequence + self.bits_machine);
        let sequence = (id >> self.bits_machine) & u64::from(sequence_mask(self.bits_sequence));
        let machine_id = id & ((1u64 << self.bits_machine) - 1);
        Decomposed {
            id,
            time,
            sequence: sequence as u32,
            machine_id: machine_id as u32,
        }
    }

    /// Wall-clock start of the time unit encoded in `id`.
    pub fn to_time(&self, id: u64) -> Option<DateTime<Utc>> {
        let units = i128::from(self.start_time) + i128::from(self.decompose(id).time);
        let nanos = units * i128::from(self.time_unit);
        let secs = i64::try_from(nanos.div_euclid(NANOS_PER_SEC)).ok()?;
        let subsec = nanos.rem_euclid(NANOS_PER_SEC) as u32;
        DateTime::from_timestamp(secs, subsec)
    }

    pub fn machine_id(&self) -> u32 {
        self.machine_id
    }

    pub fn bits_time(&self) -> u8 {
        self.bits_time
    }

    pub fn bits_sequence(&self) -> u8 {
        self.bits_sequence
    }

    pub fn bits_machine_id(&self) -> u8 {
        self.bits_machine
    }

    pub fn time_unit(&self) -> Duration {
        Duration::from_nanos(self.time_unit as u64)
    }

    fn current_elapsed_time(&self) -> i64 {
        to_units((self.clock)(), self.time_unit) - self.start_time
    }

    fn sleep(&self, overtime: i64) {
        let now = to_nanos((self.clock)());
        let unit = i128::from(self.time_unit);
        let wait = i128::from(overtime) * unit - now.rem_euclid(unit);
        if wait > 0 {
            std::thread::sleep(Duration::from_nanos(wait as u64));
        }
    }

    fn to_id(&self, elapsed: i64, sequence: u32) -> Result<u64, FlakeError> {
        self.pack(elapsed, sequence, self.machine_id)
    }

    fn pack(&self, elapsed: i64, sequence: u32, machine_id: u32) -> Result<u64, FlakeError> {
        let elapsed = elapsed as u64;
        if elapsed >= 1u64 << self.bits_time {
            return Err(FlakeError::OverTimeLimit);
        }
        Ok(elapsed << (self.bits_sequence + self.bits_machine)
            | u64::from(sequence) << self.bits_machine
            | u64::from(machine_id))
    }
}

fn sequence_mask(bits: u8) -> u32 {
    (1u32 << bits) - 1
}

fn to_nanos(t: DateTime<Utc>) -> i128 {
    i128::from(t.timestamp()) * NANOS_PER_SEC + i128::from(t.timestamp_subsec_nanos())
}

fn to_units(t: DateTime<Utc>, unit: i64) -> i64 {
    to_nanos(t).div_euclid(i128::from(unit)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn frozen_clock(at: DateTime<Utc>) -> Clock {
        Arc::new(move || at)
    }

    fn settings() -> Settings {
        Settings::new().with_machine_id(|| Ok(0x1234))
    }

    #[test]
    fn test_defaults() {
        let flake = Flake::new(settings()).unwrap();
        assert_eq!(flake.bits_sequence(), 8);
        assert_eq!(flake.bits_machine_id(), 16);
        assert_eq!(flake.bits_time(), 39);
        assert_eq!(flake.time_unit(), Duration::from_millis(10));
        assert_eq!(flake.machine_id(), 0x1234);
    }

    #[test]
    fn test_invalid_settings() {
        let err = |s: Settings| Flake::new(s).unwrap_err();

        assert_eq!(err(settings().with_bits_sequence(31)), FlakeError::InvalidBitsSequence);
        assert_eq!(err(settings().with_bits_machine_id(31)), FlakeError::InvalidBitsMachineId);
        assert_eq!(
            err(settings().with_bits_sequence(16).with_bits_machine_id(16)),
            FlakeError::InvalidBitsTime
        );
        assert_eq!(
            err(settings().with_time_unit(Duration::from_micros(999))),
            FlakeError::InvalidTimeUnit
        );
        assert_eq!(
            err(settings().with_start_time(Utc::now() + chrono::Duration::hours(1))),
            FlakeError::StartTimeAhead
        );
        assert_eq!(
            err(settings().with_bits_machine_id(8).with_machine_id(|| Ok(256))),
            FlakeError::InvalidMachineId
        );
        assert_eq!(
            err(settings().with_check_machine_id(|id| id != 0x1234)),
            FlakeError::InvalidMachineId
        );
        assert_eq!(
            err(Settings::new().with_machine_id(|| Err(FlakeError::NoPrivateAddress))),
            FlakeError::NoPrivateAddress
        );
    }

    #[test]
    fn test_sequence_rolls_over_within_one_unit() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let now = start + chrono::Duration::milliseconds(1_000);
        let flake = Flake::with_clock(
            settings().with_time_unit(Duration::from_millis(10)),
            frozen_clock(now),
        )
        .unwrap();

        let ids: Vec<u64> = (0..300).map(|_| flake.id().unwrap()).collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 300);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let first = flake.decompose(ids[0]);
        assert_eq!(first.time, 100);
        assert_eq!(first.sequence, 0);
        assert_eq!(first.machine_id, 0x1234);

        let last_of_unit = flake.decompose(ids[255]);
        assert_eq!((last_of_unit.time, last_of_unit.sequence), (100, 255));

        let rolled = flake.decompose(ids[256]);
        assert_eq!((rolled.time, rolled.sequence), (101, 0));
        assert_eq!(flake.decompose(ids[299]).sequence, 43);
    }

    #[test]
    fn test_over_time_limit() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        // 2^32 units of 1ms is roughly 49.7 days.
        let now = start + chrono::Duration::days(50);
        let flake = Flake::with_clock(
            settings()
                .with_bits_sequence(15)
                .with_bits_machine_id(16)
                .with_time_unit(Duration::from_millis(1))
                .with_start_time(start),
            frozen_clock(now),
        )
        .unwrap();

        assert_eq!(flake.id(), Err(FlakeError::OverTimeLimit));
    }

    #[test]
    fn test_compose_rejects_out_of_range() {
        let flake = Flake::new(settings()).unwrap();
        let start = default_start_time();

        assert_eq!(
            flake.compose(start - chrono::Duration::seconds(1), 0, 0),
            Err(FlakeError::StartTimeAhead)
        );
        assert_eq!(flake.compose(start, 256, 0), Err(FlakeError::InvalidSequence));
        assert_eq!(flake.compose(start, 0, 1 << 16), Err(FlakeError::InvalidMachineId));
    }

    #[test]
    fn test_to_time() {
        let flake = Flake::new(settings()).unwrap();
        let at = default_start_time() + chrono::Duration::milliseconds(12_340);
        let id = flake.compose(at, 3, 9).unwrap();
        assert_eq!(flake.to_time(id), Some(at));
    }

    #[test]
    fn test_request_id_shape() {
        let flake = Flake::new(settings()).unwrap();
        let rid = flake.request_id().unwrap();
        assert_eq!(rid.len(), 34);
        assert!(rid.chars().all(|c| c.is_ascii_hexdigit()));

        let id = u64::from_str_radix(&rid[14..30], 16).unwrap();
        assert_eq!(flake.decompose(id).machine_id, 0x1234);
    }

    proptest! {
        #[test]
        fn prop_compose_decompose_inverse(
            bits_sequence in 0u8..=30,
            bits_machine in 0u8..=30,
            units in 0u64..(1u64 << 32),
            seq_seed in any::<u32>(),
            machine_seed in any::<u32>(),
        ) {
            prop_assume!(63 - bits_sequence - bits_machine >= 32);

            let flake = Flake::new(
                Settings::new()
                    .with_bits_sequence(bits_sequence)
                    .with_bits_machine_id(bits_machine)
                    .with_time_unit(Duration::from_millis(1))
                    .with_machine_id(|| Ok(0)),
            )
            .unwrap();

            let time = default_start_time() + chrono::Duration::milliseconds(units as i64);
            let sequence = seq_seed & sequence_mask(bits_sequence);
            let machine_id = machine_seed & ((1u64 << bits_machine) - 1) as u32;

            let id = flake.compose(time, sequence, machine_id).unwrap();
            let parts = flake.decompose(id);
            prop_assert_eq!(parts.time, units);
            prop_assert_eq!(parts.sequence, sequence);
            prop_assert_eq!(parts.machine_id, machine_id);
        }
    }
}
