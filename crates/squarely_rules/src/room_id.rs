//! Six-digit room codes.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Number of digits in a room id.
pub const ROOM_ID_LEN: usize = 6;

/// Numeric range room ids are drawn from.
pub const ROOM_ID_RANGE: RangeInclusive<u32> = 100_000..=999_999;

/// A 6-digit numeric room id such as `"482193"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Validates a client-supplied room id.
    ///
    /// # Errors
    ///
    /// Returns [`RoomIdError`] if the value is not six digits or starts with zero.
    pub fn parse(value: &str) -> Result<Self, RoomIdError> {
        if value.len() != ROOM_ID_LEN {
            return Err(RoomIdError::InvalidLength {
                expected: ROOM_ID_LEN,
                found: value.len(),
            });
        }
        if let Some((index, ch)) = value.char_indices().find(|(_, ch)| !ch.is_ascii_digit()) {
            return Err(RoomIdError::InvalidCharacter { ch, index });
        }
        if value.starts_with('0') {
            return Err(RoomIdError::LeadingZero);
        }
        Ok(Self(value.to_string()))
    }

    /// Builds a room id from a number in [`ROOM_ID_RANGE`].
    pub fn from_number(number: u32) -> Option<Self> {
        ROOM_ID_RANGE
            .contains(&number)
            .then(|| Self(number.to_string()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

/// Malformed room id.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum RoomIdError {
    /// Wrong number of characters.
    #[display("room id must be {} digits, got {}", expected, found)]
    InvalidLength {
        /// Required length.
        expected: usize,
        /// Supplied length.
        found: usize,
    },
    /// A non-digit character.
    #[display("invalid character '{}' at position {}", ch, index)]
    InvalidCharacter {
        /// Offending character.
        ch: char,
        /// Byte offset.
        index: usize,
    },
    /// Room ids never start with zero.
    #[display("room id must not start with 0")]
    LeadingZero,
}

impl std::error::Error for RoomIdError {}
