//! Order-preserving key encoding from typed segments.
//!
//! A key is a namespace tag byte followed by segments:
//!
//! ```text
//! +-----+-------------+------------+----------------+
//! | tag | string 0x00 | YYYY-MM-DD | 000000000300   |
//! +-----+-------------+------------+----------------+
//! ```
//!
//! - Strings are raw UTF-8 closed by a `0x00` terminator, so `foo` sorts
//!   before `foo-bar` and a prefix scan for `foo` never sees `foo-bar`.
//! - Dates are fixed-width ISO calendar dates, which sort chronologically.
//! - Numbers are fixed-width zero-padded decimal, so byte order equals
//!   numeric order.
//!
//! UTF-8 never produces `0xFF`, so `[tag, 0xFF]` sorts after every key in a
//! namespace and serves as an open upper bound.

use super::EncodingError;
use crate::error::Result;
use chrono::{Datelike, NaiveDate};

/// Terminator closing a string segment, also the open lower sentinel.
pub const LOW: u8 = 0x00;
/// Open upper sentinel; never appears in an encoded segment.
pub const HIGH: u8 = 0xFF;

const DATE_WIDTH: usize = 10;
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Builds an encoded key segment by segment.
#[derive(Debug, Default)]
pub struct KeyBuilder {
    buf: Vec<u8>,
}

impl KeyBuilder {
    pub fn new(tag: u8) -> Self {
        Self { buf: vec![tag] }
    }

    /// Append a terminated string segment
    pub fn string(mut self, s: &str) -> Result<Self> {
        encode_string(&mut self.buf, s)?;
        Ok(self)
    }

    /// Append a fixed-width date segment
    pub fn date(mut self, date: NaiveDate) -> Result<Self> {
        encode_date(&mut self.buf, date)?;
        Ok(self)
    }

    /// Append a zero-padded decimal segment of exactly `width` digits
    pub fn padded(mut self, value: u64, width: usize) -> Result<Self> {
        encode_padded(&mut self.buf, value, width)?;
        Ok(self)
    }

    /// Append a sentinel byte that sorts before or after every segment
    pub fn sentinel(mut self, byte: u8) -> Self {
        self.buf.push(byte);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub fn encode_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.as_bytes().contains(&LOW) {
        return Err(EncodingError::ReservedByte(s.to_string()).into());
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(LOW);
    Ok(())
}

pub fn encode_date(buf: &mut Vec<u8>, date: NaiveDate) -> Result<()> {
    // Years outside 0..=9999 would change the width
    if !(0..=9999).contains(&date.year()) {
        return Err(EncodingError::InvalidFormat(format!("Date {} out of range", date)).into());
    }
    buf.extend_from_slice(date.format(DATE_FORMAT).to_string().as_bytes());
    Ok(())
}

pub fn encode_padded(buf: &mut Vec<u8>, value: u64, width: usize) -> Result<()> {
    let digits = format!("{:0width$}", value, width = width);
    if digits.len() != width {
        return Err(EncodingError::Overflow { value, width }.into());
    }
    buf.extend_from_slice(digits.as_bytes());
    Ok(())
}

/// Reads segments back out of an encoded key, in the order they were built.
#[derive(Debug)]
pub struct KeyReader<'a> {
    bytes: &'a [u8],
}

impl<'a> KeyReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn tag(&mut self) -> Result<u8> {
        let (&tag, rest) = self
            .bytes
            .split_first()
            .ok_or(EncodingError::TruncatedData)?;
        self.bytes = rest;
        Ok(tag)
    }

    pub fn string(&mut self) -> Result<String> {
        let end = self
            .bytes
            .iter()
            .position(|b| *b == LOW)
            .ok_or(EncodingError::TruncatedData)?;
        let s = std::str::from_utf8(&self.bytes[..end]).map_err(|_| EncodingError::InvalidUtf8)?;
        self.bytes = &self.bytes[end + 1..];
        Ok(s.to_string())
    }

    pub fn date(&mut self) -> Result<NaiveDate> {
        let raw = self.take(DATE_WIDTH)?;
        let s = std::str::from_utf8(raw).map_err(|_| EncodingError::InvalidUtf8)?;
        NaiveDate::parse_from_str(s, DATE_FORMAT)
            .map_err(|e| EncodingError::InvalidFormat(format!("Bad date {:?}: {}", s, e)).into())
    }

    pub fn padded(&mut self, width: usize) -> Result<u64> {
        let raw = self.take(width)?;
        if !raw.iter().all(u8::is_ascii_digit) {
            return Err(EncodingError::InvalidFormat(format!(
                "Expected {} decimal digits, got {:?}",
                width,
                String::from_utf8_lossy(raw)
            ))
            .into());
        }
        // All-digit ASCII is valid UTF-8
        let s = std::str::from_utf8(raw).map_err(|_| EncodingError::InvalidUtf8)?;
        s.parse::<u64>()
            .map_err(|e| EncodingError::InvalidFormat(e.to_string()).into())
    }

    /// Ensure every byte was consumed.
    pub fn finish(self) -> Result<()> {
        if !self.bytes.is_empty() {
            return Err(EncodingError::InvalidFormat(format!(
                "{} trailing bytes in key",
                self.bytes.len()
            ))
            .into());
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(EncodingError::TruncatedData.into());
        }
        let (head, rest) = self.bytes.split_at(n);
        self.bytes = rest;
        Ok(head)
    }
}
