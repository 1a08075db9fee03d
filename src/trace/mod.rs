//! Trace identity and span aggregation.
//!
//! A trace is the set of spans sharing one [`TraceId`], rooted at the span
//! that represents the inbound request. [`TraceContext`] carries the identity
//! of one span and (de)serializes it to the `traceparent` propagation header.

mod context;
mod span;
mod tracer;

pub use context::{TraceContext, TRACEPARENT_HEADER};
pub use span::SpanHandle;
pub use tracer::RequestTracer;

use std::cell::RefCell;
use std::fmt;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error returned when a hex id string has the wrong shape.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseIdError {
    /// The string is not the exact fixed width for the id type.
    #[error("id must be exactly {0} characters")]
    Length(usize),
    /// The string contains a character outside `[0-9a-f]`.
    #[error("id must be lowercase hexadecimal")]
    Digit,
}

fn check_hex(hex: &str, width: usize) -> Result<(), ParseIdError> {
    if hex.len() != width {
        return Err(ParseIdError::Length(width));
    }
    if !hex
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(ParseIdError::Digit);
    }
    Ok(())
}

thread_local! {
    /// Per-thread CSPRNG for id generation.
    static CURRENT_RNG: RefCell<StdRng> = RefCell::new(StdRng::from_os_rng());
}

/// A 16-byte value which identifies a given trace.
///
/// Formatted as exactly 32 lowercase hex characters.
#[derive(Clone, PartialEq, Eq, Copy, Hash)]
pub struct TraceId(u128);

impl TraceId {
    /// Generate a new random trace id.
    pub fn random() -> Self {
        CURRENT_RNG.with(|rng| TraceId(rng.borrow_mut().random::<u128>()))
    }

    /// Create a trace id from its representation as a byte array.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        TraceId(u128::from_be_bytes(bytes))
    }

    /// Return the representation of this trace id as a byte array.
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Converts a fixed-width lowercase base 16 string to a trace id.
    ///
    /// Unlike the permissive `u128` parser, this rejects uppercase digits and
    /// any width other than 32 characters, matching the `traceparent` field
    /// grammar.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIdError> {
        check_hex(hex, 32)?;
        u128::from_str_radix(hex, 16)
            .map(TraceId)
            .map_err(|_| ParseIdError::Digit)
    }
}

impl From<u128> for TraceId {
    fn from(value: u128) -> Self {
        TraceId(value)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::LowerHex for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = <std::borrow::Cow<'_, str>>::deserialize(deserializer)?;
        TraceId::from_hex(&hex).map_err(de::Error::custom)
    }
}

/// An 8-byte value which identifies a given span.
///
/// Formatted as exactly 16 lowercase hex characters.
#[derive(Clone, PartialEq, Eq, Copy, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// Generate a new random span id.
    pub fn random() -> Self {
        CURRENT_RNG.with(|rng| SpanId(rng.borrow_mut().random::<u64>()))
    }

    /// Create a span id from its representation as a byte array.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        SpanId(u64::from_be_bytes(bytes))
    }

    /// Return the representation of this span id as a byte array.
    pub const fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Converts a fixed-width lowercase base 16 string to a span id.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIdError> {
        check_hex(hex, 16)?;
        u64::from_str_radix(hex, 16)
            .map(SpanId)
            .map_err(|_| ParseIdError::Digit)
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        SpanId(value)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::LowerHex for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = <std::borrow::Cow<'_, str>>::deserialize(deserializer)?;
        SpanId::from_hex(&hex).map_err(de::Error::custom)
    }
}
