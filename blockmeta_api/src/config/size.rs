use std::{fmt::Display, str::FromStr};

use serde::Deserialize;

/// A size in bytes.
///
/// Sizes may be written as a plain integer byte count or as a string with an
/// optional binary unit suffix (`K`, `M`, `G`, `T`, meaning 2^10 through
/// 2^40). A trailing `B` is accepted and ignored, so `"512B"` is 512 bytes and
/// `"1GB"` is the same as `"1G"`. Fractional values are accepted only when they
/// describe a whole number of bytes: `"1.5K"` is 1536 bytes while `"0.1K"` is
/// rejected. Serialize and Deserialize are implemented manually below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(u64);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeError {
    #[error("size is empty")]
    Empty,

    #[error("size '{0}' is negative")]
    Negative(String),

    #[error("size '{0}' is not a valid number")]
    InvalidNumber(String),

    #[error("size '{value}' has unknown unit suffix '{suffix}'")]
    UnknownSuffix { value: String, suffix: char },

    #[error("size '{0}' is not a whole number of bytes")]
    NotIntegral(String),

    #[error("size '{0}' is too large")]
    Overflow(String),
}

impl ByteSize {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> u64 {
        self.0
    }

    /// Returns the size expressed in whole units of `unit` bytes, or `None` if
    /// the size is not a multiple of `unit`.
    pub fn in_units_of(&self, unit: u64) -> Option<u64> {
        (unit != 0 && self.0 % unit == 0).then(|| self.0 / unit)
    }
}

impl From<u64> for ByteSize {
    fn from(n: u64) -> Self {
        ByteSize(n)
    }
}

impl FromStr for ByteSize {
    type Err = SizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        from_human_readable(s).map(ByteSize)
    }
}

impl Display for ByteSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&to_human_readable(self.0))
    }
}

fn to_human_readable(x: u64) -> String {
    match x.trailing_zeros() {
        _ if x == 0 => "0".to_owned(),
        0..=9 => format!("{}", x),
        10..=19 => format!("{}K", x >> 10),
        20..=29 => format!("{}M", x >> 20),
        30..=39 => format!("{}G", x >> 30),
        _ => format!("{}T", x >> 40),
    }
}

fn from_human_readable(original: &str) -> Result<u64, SizeError> {
    let s = original.trim();
    if s.is_empty() {
        return Err(SizeError::Empty);
    }

    if s.starts_with('-') {
        return Err(SizeError::Negative(original.into()));
    }

    let s = s.strip_suffix('B').unwrap_or(s).trim_end();

    let (number, shift) = match s.chars().last() {
        None => return Err(SizeError::InvalidNumber(original.into())),
        Some('K') => (&s[..s.len() - 1], 10),
        Some('M') => (&s[..s.len() - 1], 20),
        Some('G') => (&s[..s.len() - 1], 30),
        Some('T') => (&s[..s.len() - 1], 40),
        Some(c) if c.is_ascii_digit() => (s, 0),
        Some(c) => {
            return Err(SizeError::UnknownSuffix {
                value: original.into(),
                suffix: c,
            })
        }
    };

    scale(number.trim(), shift, original)
}

/// Multiplies a decimal number by 2^shift using exact integer arithmetic.
fn scale(number: &str, shift: u32, original: &str) -> Result<u64, SizeError> {
    let (integer, fraction) = match number.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (number, ""),
    };

    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if integer.is_empty()
        || !all_digits(integer)
        || !all_digits(fraction)
        || (number.contains('.') && fraction.is_empty())
    {
        return Err(SizeError::InvalidNumber(original.into()));
    }

    // u128 keeps 2^40 * (u64::MAX with up to 18 decimals) in range.
    if fraction.len() > 18 {
        return Err(SizeError::NotIntegral(original.into()));
    }

    let denominator = 10u128.pow(fraction.len() as u32);
    let mantissa: u128 = format!("{integer}{fraction}")
        .parse()
        .map_err(|_| SizeError::Overflow(original.into()))?;

    let scaled = mantissa
        .checked_mul(1u128 << shift)
        .ok_or_else(|| SizeError::Overflow(original.into()))?;

    if scaled % denominator != 0 {
        return Err(SizeError::NotIntegral(original.into()));
    }

    u64::try_from(scaled / denominator).map_err(|_| SizeError::Overflow(original.into()))
}

impl<'de> serde::Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<ByteSize, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Size may be provided as a string (e.g. "1K") or as a pure number
        // (e.g. 1024). Serde forces a number when only digits are provided, so
        // we need to deserialize as a generic value and then check the type.
        let value = serde_yaml::Value::deserialize(deserializer)?;

        match value {
            serde_yaml::Value::String(s) => ByteSize::from_str(s.as_str())
                .map_err(|e| serde::de::Error::custom(format!("invalid size: {e}"))),
            serde_yaml::Value::Number(n) => {
                if let Some(n) = n.as_u64() {
                    Ok(ByteSize(n))
                } else if n.as_i64().is_some_and(|n| n < 0) {
                    Err(serde::de::Error::custom(format!(
                        "invalid size: {}",
                        SizeError::Negative(n.to_string())
                    )))
                } else {
                    ByteSize::from_str(&n.to_string())
                        .map_err(|e| serde::de::Error::custom(format!("invalid size: {e}")))
                }
            }
            _ => Err(serde::de::Error::custom(
                "invalid size, expected an integer or a string",
            )),
        }
    }
}

impl serde::Serialize for ByteSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}
