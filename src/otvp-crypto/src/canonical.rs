//! Canonical record encoding (RFC 8785 JSON Canonicalization Scheme).
//!
//! The canonical form is the sole input to hashing and signing:
//! - object keys sorted lexicographically at every nesting level
//! - no insignificant whitespace
//! - ES6-compatible number formatting (`1.0` encodes as `1`, `0.950` as `0.95`)
//! - UTF-8 output
//!
//! Every record is walked once before canonicalization. Non-finite floats
//! and integers outside the IEEE 754 exact range (`|n| > 2^53 - 1`) have no
//! canonical form and are rejected; otherwise two distinct integers could
//! encode to the same bytes.

use std::fmt;

use serde::ser::{self, Serializer};
use serde::Serialize;
use serde_json::Value;

use crate::error::CryptoError;

/// Largest integer magnitude an RFC 8785 number represents exactly.
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Encode any serializable record into canonical bytes.
///
/// # Errors
///
/// Returns [`CryptoError::SerializationError`] if the record cannot be
/// represented canonically (NaN or infinity, an integer beyond
/// [`MAX_SAFE_INTEGER`], or a map with non-string keys).
pub fn encode<T: Serialize + ?Sized>(record: &T) -> Result<Vec<u8>, CryptoError> {
    record
        .serialize(Precheck)
        .map_err(|e| CryptoError::SerializationError(e.0))?;

    serde_json_canonicalizer::to_string(&record)
        .map(String::into_bytes)
        .map_err(|e| CryptoError::SerializationError(e.to_string()))
}

/// Encode an already-built JSON value into canonical bytes.
///
/// # Errors
///
/// Returns [`CryptoError::SerializationError`] if canonicalization fails.
pub fn encode_value(value: &Value) -> Result<Vec<u8>, CryptoError> {
    encode(value)
}

/// Encode a record with one top-level field removed.
///
/// Used for self-signed records, where the signing preimage is every field
/// except the signature itself. The record is canonicalized first so that
/// values without a canonical form are rejected rather than silently mapped
/// to `null` by `serde_json::to_value`.
///
/// # Errors
///
/// Returns [`CryptoError::SerializationError`] if the record is not a JSON
/// object or cannot be canonicalized.
pub fn encode_without_field<T: Serialize + ?Sized>(
    record: &T,
    field: &str,
) -> Result<Vec<u8>, CryptoError> {
    let full = encode(record)?;
    let mut value: Value = serde_json::from_slice(&full)
        .map_err(|e| CryptoError::SerializationError(e.to_string()))?;

    let object = value.as_object_mut().ok_or_else(|| {
        CryptoError::SerializationError("record must encode as a JSON object".into())
    })?;
    object.remove(field);

    encode_value(&value)
}

// ========================================================================
// Number precheck
// ========================================================================

#[derive(Debug)]
struct NotCanonical(String);

impl fmt::Display for NotCanonical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NotCanonical {}

impl ser::Error for NotCanonical {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

fn check_magnitude(magnitude: u128) -> Result<(), NotCanonical> {
    if magnitude > u128::from(MAX_SAFE_INTEGER) {
        return Err(NotCanonical(format!(
            "integer magnitude {magnitude} exceeds 2^53 - 1"
        )));
    }
    Ok(())
}

fn check_float(value: f64) -> Result<(), NotCanonical> {
    if !value.is_finite() {
        return Err(NotCanonical(format!("{value} has no JSON representation")));
    }
    Ok(())
}

/// Serializer that produces nothing and only rejects numbers without a
/// canonical form. Map keys are skipped: JSON keys are strings.
#[derive(Clone, Copy)]
struct Precheck;

impl Serializer for Precheck {
    type Ok = ();
    type Error = NotCanonical;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, _: bool) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_i8(self, _: i8) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_i16(self, _: i16) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_i32(self, _: i32) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_i64(self, v: i64) -> Result<(), NotCanonical> {
        check_magnitude(u128::from(v.unsigned_abs()))
    }
    fn serialize_i128(self, v: i128) -> Result<(), NotCanonical> {
        check_magnitude(v.unsigned_abs())
    }
    fn serialize_u8(self, _: u8) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_u16(self, _: u16) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_u32(self, _: u32) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_u64(self, v: u64) -> Result<(), NotCanonical> {
        check_magnitude(u128::from(v))
    }
    fn serialize_u128(self, v: u128) -> Result<(), NotCanonical> {
        check_magnitude(v)
    }
    fn serialize_f32(self, v: f32) -> Result<(), NotCanonical> {
        check_float(f64::from(v))
    }
    fn serialize_f64(self, v: f64) -> Result<(), NotCanonical> {
        check_float(v)
    }
    fn serialize_char(self, _: char) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_str(self, _: &str) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_bytes(self, _: &[u8]) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_none(self) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), NotCanonical> {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_unit_struct(self, _: &'static str) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
    ) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        value: &T,
    ) -> Result<(), NotCanonical> {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Result<(), NotCanonical> {
        value.serialize(self)
    }
    fn serialize_seq(self, _: Option<usize>) -> Result<Self, NotCanonical> {
        Ok(self)
    }
    fn serialize_tuple(self, _: usize) -> Result<Self, NotCanonical> {
        Ok(self)
    }
    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, NotCanonical> {
        Ok(self)
    }
    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, NotCanonical> {
        Ok(self)
    }
    fn serialize_map(self, _: Option<usize>) -> Result<Self, NotCanonical> {
        Ok(self)
    }
    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, NotCanonical> {
        Ok(self)
    }
    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, NotCanonical> {
        Ok(self)
    }
}

impl ser::SerializeSeq for Precheck {
    type Ok = ();
    type Error = NotCanonical;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NotCanonical> {
        value.serialize(Precheck)
    }
    fn end(self) -> Result<(), NotCanonical> {
        Ok(())
    }
}

impl ser::SerializeTuple for Precheck {
    type Ok = ();
    type Error = NotCanonical;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NotCanonical> {
        value.serialize(Precheck)
    }
    fn end(self) -> Result<(), NotCanonical> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for Precheck {
    type Ok = ();
    type Error = NotCanonical;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NotCanonical> {
        value.serialize(Precheck)
    }
    fn end(self) -> Result<(), NotCanonical> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for Precheck {
    type Ok = ();
    type Error = NotCanonical;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NotCanonical> {
        value.serialize(Precheck)
    }
    fn end(self) -> Result<(), NotCanonical> {
        Ok(())
    }
}

impl ser::SerializeMap for Precheck {
    type Ok = ();
    type Error = NotCanonical;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, _: &T) -> Result<(), NotCanonical> {
        Ok(())
    }
    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NotCanonical> {
        value.serialize(Precheck)
    }
    fn end(self) -> Result<(), NotCanonical> {
        Ok(())
    }
}

impl ser::SerializeStruct for Precheck {
    type Ok = ();
    type Error = NotCanonical;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _: &'static str,
        value: &T,
    ) -> Result<(), NotCanonical> {
        value.serialize(Precheck)
    }
    fn end(self) -> Result<(), NotCanonical> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for Precheck {
    type Ok = ();
    type Error = NotCanonical;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _: &'static str,
        value: &T,
    ) -> Result<(), NotCanonical> {
        value.serialize(Precheck)
    }
    fn end(self) -> Result<(), NotCanonical> {
        Ok(())
    }
}
