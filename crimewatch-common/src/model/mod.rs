/// Declares a fieldless enum that is stored and transmitted as a fixed
/// upper-case string, e.g. `PostStatus::Pending` <-> `"PENDING"`.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$variant_meta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        pub enum $name {
            $($(#[$variant_meta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::model::UnknownVariantError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err($crate::model::UnknownVariantError {
                        type_name: stringify!($name),
                        value: s.to_owned(),
                    }),
                }
            }
        }
    };
}

pub mod auth;
pub mod comment;
pub mod moderation;
pub mod post;
pub mod report;
pub mod user;
pub mod vote;

use crate::{
    model::auth::InvalidAuthTokenHashError,
    snowflake::{Epoch, Snowflake, SnowflakeGenerator},
    util::{InvalidLengthError, NonPositiveDurationError},
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, marker::PhantomData};
use thiserror::Error;
use time::{UtcDateTime, macros::utc_datetime};

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
#[error("Unknown {type_name} value: {value:?}")]
pub struct UnknownVariantError {
    pub type_name: &'static str,
    pub value: String,
}

/// Raised when a stored value does not satisfy the model's invariants.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    Length(#[from] InvalidLengthError),
    #[error(transparent)]
    NonPositiveDuration(#[from] NonPositiveDurationError),
    #[error(transparent)]
    TokenHash(#[from] InvalidAuthTokenHashError),
    #[error(transparent)]
    UnknownVariant(#[from] UnknownVariantError),
    #[error("Counter value out of range: {0}")]
    CounterOutOfRange(i64),
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CrimewatchEpoch;
impl Epoch for CrimewatchEpoch {
    const EPOCH_TIME: UtcDateTime = utc_datetime!(2025-01-01 00:00);
}

pub type CrimewatchSnowflake = Snowflake<CrimewatchEpoch>;
pub type CrimewatchSnowflakeGenerator = SnowflakeGenerator<CrimewatchEpoch>;

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id<Marker>(CrimewatchSnowflake, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(snowflake: CrimewatchSnowflake) -> Self {
        Self(snowflake, PhantomData)
    }

    #[must_use]
    pub fn snowflake(self) -> CrimewatchSnowflake {
        self.0
    }

    /// The id as stored in a postgres `BIGINT` column.
    #[must_use]
    pub fn as_db(self) -> i64 {
        self.0.get().cast_signed()
    }

    #[must_use]
    pub fn from_db(value: i64) -> Self {
        value.cast_unsigned().into()
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> From<CrimewatchSnowflake> for Id<Marker> {
    fn from(value: CrimewatchSnowflake) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Id::new(CrimewatchSnowflake::new(value))
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.snowflake().get()
    }
}

/// Converts a postgres `BIGINT` count into an unsigned counter.
pub fn counter(value: i64) -> Result<u32, ModelValidationError> {
    u32::try_from(value).map_err(|_| ModelValidationError::CounterOutOfRange(value))
}
