//! Canonical CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Maximum nesting depth accepted by the encoder.
pub const MAX_DEPTH: usize = 128;

/// Largest magnitude below which every integer is exactly representable
/// as an `f64`.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Encode a value to canonical CBOR bytes.
///
/// This function produces deterministic output following the canonical
/// CBOR rules of RFC 8949 Section 4.2.1:
/// - Map keys are sorted by their encoded form (length-first, then bytewise)
/// - Integers use the shortest possible encoding
/// - No indefinite-length encoding
/// - Floats holding an exact integer up to 2^53 in magnitude are encoded as
///   that integer, so numerically equal values share one encoding
/// - Other floats are always encoded as 64-bit
///
/// # Errors
///
/// Returns an error if the value contains NaN or an infinity, or nests
/// deeper than [`MAX_DEPTH`].
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// A canonical CBOR encoder.
///
/// Structurally equal values always produce identical bytes, which makes the
/// output suitable for content hashing.
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
    depth: usize,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            depth: 0,
        }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            depth: 0,
        }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => {
                self.encode_null();
                Ok(())
            }
            Value::Bool(b) => {
                self.encode_bool(*b);
                Ok(())
            }
            Value::Integer(n) => {
                self.encode_integer(*n);
                Ok(())
            }
            Value::Float(f) => self.encode_float(*f),
            Value::Text(s) => {
                self.encode_text(s);
                Ok(())
            }
            Value::Array(arr) => self.nested(|enc| enc.encode_array(arr)),
            Value::Map(map) => self.nested(|enc| {
                enc.encode_map(map.iter().map(|(k, v)| (k.as_str(), v)))
            }),
        }
    }

    /// Encode a text string directly.
    ///
    /// Used by callers that assemble composite keys without building an
    /// intermediate [`Value`].
    pub fn encode_text(&mut self, text: &str) {
        self.encode_unsigned(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    /// Write an array header for `len` items that the caller encodes next.
    pub fn begin_array(&mut self, len: usize) {
        self.encode_unsigned(4, len as u64);
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> CodecResult<()>) -> CodecResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::TooDeep { max: MAX_DEPTH });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn encode_null(&mut self) {
        // CBOR null is simple value 22 (0xf6)
        self.buffer.push(0xf6);
    }

    fn encode_bool(&mut self, b: bool) {
        // CBOR false is 0xf4, true is 0xf5
        self.buffer.push(if b { 0xf5 } else { 0xf4 });
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_unsigned(0, n as u64);
        } else {
            // CBOR negative integers encode -(n+1)
            let abs_minus_one = (-(n + 1)) as u64;
            self.encode_unsigned(1, abs_minus_one);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_float(&mut self, f: f64) -> CodecResult<()> {
        if f.is_nan() {
            return Err(CodecError::NaNForbidden);
        }
        if f.is_infinite() {
            return Err(CodecError::InfinityForbidden);
        }
        // Covers -0.0 as well.
        if f.fract() == 0.0 && f.abs() <= MAX_EXACT_INTEGER {
            self.encode_integer(f as i64);
            return Ok(());
        }
        self.buffer.push(0xfb);
        self.buffer.extend_from_slice(&f.to_bits().to_be_bytes());
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_unsigned(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_array(&mut self, arr: &[Value]) -> CodecResult<()> {
        self.begin_array(arr.len());
        for item in arr {
            self.encode(item)?;
        }
        Ok(())
    }

    fn encode_map<'v>(
        &mut self,
        pairs: impl ExactSizeIterator<Item = (&'v str, &'v Value)>,
    ) -> CodecResult<()> {
        let len = pairs.len();
        let mut encoded_pairs: Vec<(Vec<u8>, &Value)> = Vec::with_capacity(len);

        for (key, value) in pairs {
            let mut key_encoder = CanonicalEncoder::new();
            key_encoder.encode_text(key);
            encoded_pairs.push((key_encoder.into_bytes(), value));
        }

        // Sort by encoded key (length-first, then bytewise)
        encoded_pairs.sort_by(|a, b| match a.0.len().cmp(&b.0.len()) {
            std::cmp::Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });

        self.encode_unsigned(5, len as u64);
        for (encoded_key, value) in encoded_pairs {
            self.buffer.extend_from_slice(&encoded_key);
            self.encode(value)?;
        }

        Ok(())
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}
