//! Module for working with snowflake IDs.
//!
//! Layout, from the most significant bit: 42 bits of milliseconds since the
//! epoch, 5 bits worker id, 5 bits process id, 12 bits increment.
//!
//! See <https://discord.com/developers/docs/reference#snowflakes>

use derive_where::derive_where;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
};
use thiserror::Error;
use time::{Duration, UtcDateTime};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
struct Field {
    offset: u32,
    len: u32,
}

impl Field {
    const fn max(self) -> u64 {
        (1 << self.len) - 1
    }

    const fn extract(self, snowflake: u64) -> u64 {
        (snowflake >> self.offset) & self.max()
    }

    const fn place(self, value: u64) -> u64 {
        (value & self.max()) << self.offset
    }
}

const TIMESTAMP: Field = Field {
    offset: 22,
    len: 42,
};
const WORKER_ID: Field = Field {
    offset: 17,
    len: 5,
};
const PROCESS_ID: Field = Field {
    offset: 12,
    len: 5,
};
const INCREMENT: Field = Field { offset: 0, len: 12 };

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum SnowflakeTimestampError {
    #[error("Specified time was before the snowflake epoch.")]
    TimeBeforeEpoch,
    #[error("Resulting timestamp uses too many bits.")]
    TimestampTooLarge,
}

pub trait Epoch {
    const EPOCH_TIME: UtcDateTime;
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Snowflake part was out of range: {0}")]
pub struct SnowflakePartOutOfRangeError(u64);

macro_rules! snowflake_part {
    ($name:ident: $repr:ty = $field:ident) => {
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name($repr);

        impl $name {
            #[must_use]
            pub fn new(value: $repr) -> Option<Self> {
                (u64::from(value) <= $field.max()).then_some(Self(value))
            }

            #[must_use]
            pub fn get(self) -> $repr {
                self.0
            }
        }

        impl TryFrom<$repr> for $name {
            type Error = SnowflakePartOutOfRangeError;

            fn try_from(value: $repr) -> Result<Self, Self::Error> {
                Self::new(value).ok_or(SnowflakePartOutOfRangeError(value.into()))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let inner = <$repr>::deserialize(deserializer)?;
                Self::new(inner).ok_or_else(|| {
                    Error::invalid_value(Unexpected::Unsigned(inner.into()), &stringify!($name))
                })
            }
        }
    };
}

snowflake_part!(WorkerId: u8 = WORKER_ID);
snowflake_part!(ProcessId: u8 = PROCESS_ID);
snowflake_part!(SnowflakeIncrement: u16 = INCREMENT);

impl SnowflakeIncrement {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn next(self) -> Self {
        Self(((u64::from(self.0) + 1) & INCREMENT.max()) as u16)
    }
}

/// Milliseconds since `SnowflakeEpoch::EPOCH_TIME`.
#[derive_where(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct SnowflakeTimestamp<SnowflakeEpoch>(u64, PhantomData<SnowflakeEpoch>);

impl<SnowflakeEpoch> SnowflakeTimestamp<SnowflakeEpoch> {
    #[must_use]
    pub fn from_millis(millis: u64) -> Option<Self> {
        (millis <= TIMESTAMP.max()).then_some(Self(millis, PhantomData))
    }

    #[must_use]
    pub fn millis(self) -> u64 {
        self.0
    }
}

impl<SnowflakeEpoch: Epoch> TryFrom<UtcDateTime> for SnowflakeTimestamp<SnowflakeEpoch> {
    type Error = SnowflakeTimestampError;

    fn try_from(value: UtcDateTime) -> Result<Self, Self::Error> {
        let millis = (value - SnowflakeEpoch::EPOCH_TIME).whole_milliseconds();
        let millis = u64::try_from(millis).map_err(|_| {
            if millis < 0 {
                Self::Error::TimeBeforeEpoch
            } else {
                Self::Error::TimestampTooLarge
            }
        })?;

        Self::from_millis(millis).ok_or(Self::Error::TimestampTooLarge)
    }
}

impl<SnowflakeEpoch: Epoch> From<SnowflakeTimestamp<SnowflakeEpoch>> for UtcDateTime {
    fn from(value: SnowflakeTimestamp<SnowflakeEpoch>) -> Self {
        // 42 bits of milliseconds always fit into an i64.
        #[allow(clippy::cast_possible_wrap)]
        let millis = value.0 as i64;
        SnowflakeEpoch::EPOCH_TIME + Duration::milliseconds(millis)
    }
}

#[derive_where(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Debug,
    Default,
    Hash,
    Serialize,
    Deserialize
)]
#[serde(transparent)]
pub struct Snowflake<SnowflakeEpoch>(u64, #[serde(skip)] PhantomData<SnowflakeEpoch>);

impl<SnowflakeEpoch> Snowflake<SnowflakeEpoch> {
    #[must_use]
    pub fn new(inner: u64) -> Self {
        Self(inner, PhantomData)
    }

    #[must_use]
    pub fn from_parts(
        timestamp: SnowflakeTimestamp<SnowflakeEpoch>,
        worker_id: WorkerId,
        process_id: ProcessId,
        increment: SnowflakeIncrement,
    ) -> Self {
        Self::new(
            TIMESTAMP.place(timestamp.millis())
                | WORKER_ID.place(worker_id.get().into())
                | PROCESS_ID.place(process_id.get().into())
                | INCREMENT.place(increment.get().into()),
        )
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn timestamp(self) -> SnowflakeTimestamp<SnowflakeEpoch> {
        SnowflakeTimestamp(TIMESTAMP.extract(self.0), PhantomData)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn worker_id(self) -> WorkerId {
        WorkerId(WORKER_ID.extract(self.0) as u8)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn process_id(self) -> ProcessId {
        ProcessId(PROCESS_ID.extract(self.0) as u8)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn increment(self) -> SnowflakeIncrement {
        SnowflakeIncrement(INCREMENT.extract(self.0) as u16)
    }

    #[must_use]
    pub fn created_at(self) -> UtcDateTime
    where
        SnowflakeEpoch: Epoch,
    {
        self.timestamp().into()
    }
}

impl<SnowflakeEpoch> Display for Snowflake<SnowflakeEpoch> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<SnowflakeEpoch> From<u64> for Snowflake<SnowflakeEpoch> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl<SnowflakeEpoch> From<Snowflake<SnowflakeEpoch>> for u64 {
    fn from(value: Snowflake<SnowflakeEpoch>) -> Self {
        value.get()
    }
}

/// Hands out unique snowflakes for one worker/process pair.
///
/// Timestamps never go backwards. When all increments of a millisecond are
/// used up, the generator moves on to the next millisecond instead of
/// repeating ids.
#[derive_where(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct SnowflakeGenerator<SnowflakeEpoch> {
    worker_id: WorkerId,
    process_id: ProcessId,
    last_millis: u64,
    next_increment: SnowflakeIncrement,
    phantom_data: PhantomData<SnowflakeEpoch>,
}

impl<SnowflakeEpoch> SnowflakeGenerator<SnowflakeEpoch> {
    #[must_use]
    pub fn new(worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self {
            worker_id,
            process_id,
            last_millis: 0,
            next_increment: SnowflakeIncrement::default(),
            phantom_data: PhantomData,
        }
    }

    #[must_use]
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    #[must_use]
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    pub fn generate_at(
        &mut self,
        time: UtcDateTime,
    ) -> Result<Snowflake<SnowflakeEpoch>, SnowflakeTimestampError>
    where
        SnowflakeEpoch: Epoch,
    {
        let requested = SnowflakeTimestamp::<SnowflakeEpoch>::try_from(time)?.millis();

        if requested > self.last_millis {
            self.last_millis = requested;
            self.next_increment = SnowflakeIncrement::default();
        }

        let increment = self.next_increment;
        self.next_increment = increment.next();
        if self.next_increment == SnowflakeIncrement::default() {
            self.last_millis += 1;
        }

        let timestamp = SnowflakeTimestamp::from_millis(self.last_millis)
            .ok_or(SnowflakeTimestampError::TimestampTooLarge)?;

        Ok(Snowflake::from_parts(
            timestamp,
            self.worker_id,
            self.process_id,
            increment,
        ))
    }

    pub fn generate(&mut self) -> Result<Snowflake<SnowflakeEpoch>, SnowflakeTimestampError>
    where
        SnowflakeEpoch: Epoch,
    {
        self.generate_at(UtcDateTime::now())
    }
}

#[cfg(test)]
mod tests {
    use crate::snowflake::{
        Epoch, ProcessId, Snowflake, SnowflakeGenerator, SnowflakeIncrement, SnowflakeTimestamp,
        SnowflakeTimestampError, WorkerId,
    };
    use std::collections::HashSet;
    use time::{Duration, UtcDateTime, macros::utc_datetime};

    struct MillennialEpoch;
    impl Epoch for MillennialEpoch {
        const EPOCH_TIME: UtcDateTime = utc_datetime!(2000-01-01 00:00);
    }

    #[test]
    fn part_ranges() {
        for legal in [0, 0xD, 0x1F] {
            assert!(WorkerId::new(legal).is_some());
            assert!(ProcessId::new(legal).is_some());
        }
        for illegal in [0x20, 0xF0, u8::MAX] {
            assert!(WorkerId::new(illegal).is_none());
            assert!(ProcessId::try_from(illegal).is_err());
        }

        assert!(SnowflakeIncrement::new(0xFFF).is_some());
        assert!(SnowflakeIncrement::new(0x1000).is_none());

        assert!(SnowflakeTimestamp::<MillennialEpoch>::from_millis(0x03FF_FFFF_FFFF).is_some());
        assert!(SnowflakeTimestamp::<MillennialEpoch>::from_millis(0x0400_0000_0000).is_none());
    }

    #[test]
    fn timestamp_from_time() {
        let time = utc_datetime!(2025-10-24 10:00);
        let timestamp = SnowflakeTimestamp::<MillennialEpoch>::try_from(time).unwrap();
        assert_eq!(UtcDateTime::from(timestamp), time);

        assert_eq!(
            SnowflakeTimestamp::<MillennialEpoch>::try_from(
                MillennialEpoch::EPOCH_TIME - Duration::milliseconds(1)
            ),
            Err(SnowflakeTimestampError::TimeBeforeEpoch)
        );
        assert_eq!(
            SnowflakeTimestamp::<MillennialEpoch>::try_from(
                MillennialEpoch::EPOCH_TIME + Duration::milliseconds(0x0400_0000_0000)
            ),
            Err(SnowflakeTimestampError::TimestampTooLarge)
        );
    }

    #[test]
    fn increment_wraps() {
        assert_eq!(
            SnowflakeIncrement::new(0xFFE).unwrap().next(),
            SnowflakeIncrement::new(0xFFF).unwrap()
        );
        assert_eq!(
            SnowflakeIncrement::new(0xFFF).unwrap().next(),
            SnowflakeIncrement::default()
        );
    }

    #[test]
    fn parts_survive_packing() {
        let timestamp =
            SnowflakeTimestamp::try_from(utc_datetime!(2025-10-24 10:30)).unwrap();
        let worker_id = WorkerId::new(0b10101).unwrap();
        let process_id = ProcessId::new(0b10001).unwrap();
        let increment = SnowflakeIncrement::new(100).unwrap();

        let snowflake =
            Snowflake::<MillennialEpoch>::from_parts(timestamp, worker_id, process_id, increment);

        assert_eq!(snowflake.timestamp(), timestamp);
        assert_eq!(snowflake.worker_id(), worker_id);
        assert_eq!(snowflake.process_id(), process_id);
        assert_eq!(snowflake.increment(), increment);
        assert_eq!(snowflake.created_at(), utc_datetime!(2025-10-24 10:30));
    }

    #[test]
    fn generator_is_unique_within_one_millisecond() {
        let time = utc_datetime!(2025-10-24 10:55);
        let mut generator = SnowflakeGenerator::<MillennialEpoch>::new(
            WorkerId::new(10).unwrap(),
            ProcessId::new(0).unwrap(),
        );

        let snowflakes: HashSet<_> = (0..5000)
            .map(|_| generator.generate_at(time).unwrap())
            .collect();
        assert_eq!(snowflakes.len(), 5000);

        let first = generator.generate_at(time).unwrap();
        let second = generator.generate_at(time).unwrap();
        assert!(second > first);
    }

    #[test]
    fn generator_never_goes_backwards() {
        let mut generator = SnowflakeGenerator::<MillennialEpoch>::new(
            WorkerId::new(1).unwrap(),
            ProcessId::new(1).unwrap(),
        );

        let later = generator.generate_at(utc_datetime!(2025-10-24 11:00)).unwrap();
        let earlier = generator.generate_at(utc_datetime!(2025-10-24 10:00)).unwrap();
        assert!(earlier > later);

        assert_eq!(
            generator.generate_at(utc_datetime!(1999-12-31 23:59)),
            Err(SnowflakeTimestampError::TimeBeforeEpoch)
        );
    }
}
