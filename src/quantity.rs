//! Exact resource quantity arithmetic
//!
//! Cluster quantities arrive as strings such as `100m`, `64Mi` or `1e3`. The
//! override engine has to compare them by magnitude, derive new values from
//! them, and write results back in the same display family the driving value
//! used (a binary memory limit yields a binary memory request). [`Quantity`]
//! holds the magnitude as signed nano-units, which is exact for every suffix
//! the cluster accepts, together with the [`Format`] it renders in.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity as KubeQuantity;

use crate::Error;

const NANOS_PER_UNIT: i128 = 1_000_000_000;
const NANOS_PER_MILLI: i128 = 1_000_000;

/// Largest mantissa digit count that always fits an `i128` before scaling
const MAX_MANTISSA_DIGITS: usize = 36;

const BINARY_SUFFIXES: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

/// Display family of a quantity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    /// `1e3`, `12e-3`
    DecimalExponent,
    /// Powers of 1024: `Ki`, `Mi`, `Gi`, ...
    BinarySI,
    /// Powers of 1000: `m`, `k`, `M`, `G`, ...
    DecimalSI,
}

impl Format {
    /// Returns true for power-of-1024 suffixes
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::BinarySI)
    }
}

/// A resource amount with its display format
///
/// Equality and ordering compare magnitudes only, so `1Gi == 1024Mi` and
/// `1 == 1000m`.
#[derive(Clone, Debug)]
pub struct Quantity {
    nanos: i128,
    format: Format,
}

impl Quantity {
    /// Whole units (bytes, cores) in the given format
    pub fn new(value: i64, format: Format) -> Self {
        Self {
            nanos: i128::from(value) * NANOS_PER_UNIT,
            format,
        }
    }

    /// Milli-units (milli-cores) in the given format
    pub fn new_milli(milli: i64, format: Format) -> Self {
        Self {
            nanos: i128::from(milli) * NANOS_PER_MILLI,
            format,
        }
    }

    /// Parse a quantity string
    pub fn parse(input: &str) -> Result<Self, Error> {
        let invalid = || Error::quantity(format!("{input:?}"));
        let bytes = input.as_bytes();

        let mut pos = 0;
        let negative = match bytes.first() {
            Some(b'-') => {
                pos = 1;
                true
            }
            Some(b'+') => {
                pos = 1;
                false
            }
            _ => false,
        };

        let int_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        let int_digits = &input[int_start..pos];

        let mut frac_digits = "";
        if pos < bytes.len() && bytes[pos] == b'.' {
            pos += 1;
            let frac_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            frac_digits = &input[frac_start..pos];
        }

        if int_digits.is_empty() && frac_digits.is_empty() {
            return Err(invalid());
        }

        let (suffix, format) = Suffix::parse(&input[pos..]).ok_or_else(invalid)?;

        let digits = format!("{int_digits}{frac_digits}");
        let digits = digits.trim_start_matches('0');
        if digits.len() > MAX_MANTISSA_DIGITS {
            return Err(Error::quantity(format!("{input:?} is out of range")));
        }
        let mantissa: i128 = if digits.is_empty() {
            0
        } else {
            digits.parse().map_err(|_| invalid())?
        };

        // nanos = mantissa * 2^binary * 10^(decimal + 9 - fraction digits)
        let mut scale10 = 9 - frac_digits.len() as i64;
        let mut magnitude = mantissa;
        match suffix {
            Suffix::Binary(power) => {
                magnitude = magnitude
                    .checked_mul(1i128 << power)
                    .ok_or_else(|| Error::quantity(format!("{input:?} is out of range")))?;
            }
            Suffix::Decimal(exponent) => {
                scale10 = scale10
                    .checked_add(exponent)
                    .ok_or_else(|| Error::quantity(format!("{input:?} is out of range")))?;
            }
        }

        let magnitude = if scale10 >= 0 {
            pow10(scale10)
                .and_then(|m| magnitude.checked_mul(m))
                .ok_or_else(|| Error::quantity(format!("{input:?} is out of range")))?
        } else {
            // precision beyond one nano rounds away from zero
            match scale10.checked_neg().and_then(pow10) {
                Some(divisor) => ceil_div(magnitude, divisor),
                None => i128::from(magnitude != 0),
            }
        };

        Ok(Self {
            nanos: if negative { -magnitude } else { magnitude },
            format,
        })
    }

    /// Display format
    pub fn format(&self) -> Format {
        self.format
    }

    /// Whole units, rounded up
    pub fn value(&self) -> i64 {
        saturate(ceil_div(self.nanos, NANOS_PER_UNIT))
    }

    /// Milli-units, rounded up
    pub fn milli_value(&self) -> i64 {
        saturate(ceil_div(self.nanos, NANOS_PER_MILLI))
    }

    /// Returns true if the magnitude is zero
    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Convert into the wire representation
    pub fn to_kube(&self) -> KubeQuantity {
        KubeQuantity(self.to_string())
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl FromStr for Quantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&KubeQuantity> for Quantity {
    type Error = Error;

    fn try_from(q: &KubeQuantity) -> Result<Self, Self::Error> {
        Self::parse(&q.0)
    }
}

impl From<&Quantity> for KubeQuantity {
    fn from(q: &Quantity) -> Self {
        q.to_kube()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }

        let sign = if self.nanos < 0 { "-" } else { "" };
        let magnitude = self.nanos.unsigned_abs();
        let unit = NANOS_PER_UNIT as u128;

        match self.format {
            // small or fractional binary amounts fall back to decimal
            Format::BinarySI if magnitude >= 1024 * unit && magnitude % unit == 0 => {
                let mut units = magnitude / unit;
                let mut exponent = 0;
                while exponent < BINARY_SUFFIXES.len() - 1 && units % 1024 == 0 {
                    units /= 1024;
                    exponent += 1;
                }
                write!(f, "{sign}{units}{}", BINARY_SUFFIXES[exponent])
            }
            Format::DecimalExponent => {
                let (mantissa, exponent) = decimal_parts(magnitude);
                if exponent == 0 {
                    write!(f, "{sign}{mantissa}")
                } else {
                    write!(f, "{sign}{mantissa}e{exponent}")
                }
            }
            Format::BinarySI | Format::DecimalSI => {
                let (mantissa, exponent) = decimal_parts(magnitude);
                write!(f, "{sign}{mantissa}{}", decimal_suffix(exponent))
            }
        }
    }
}

enum Suffix {
    /// Power of two
    Binary(u32),
    /// Power of ten
    Decimal(i64),
}

impl Suffix {
    fn parse(s: &str) -> Option<(Self, Format)> {
        let decimal = |e| Some((Self::Decimal(e), Format::DecimalSI));
        let binary = |p| Some((Self::Binary(p), Format::BinarySI));
        match s {
            "" => decimal(0),
            "n" => decimal(-9),
            "u" => decimal(-6),
            "m" => decimal(-3),
            "k" => decimal(3),
            "M" => decimal(6),
            "G" => decimal(9),
            "T" => decimal(12),
            "P" => decimal(15),
            "E" => decimal(18),
            "Ki" => binary(10),
            "Mi" => binary(20),
            "Gi" => binary(30),
            "Ti" => binary(40),
            "Pi" => binary(50),
            "Ei" => binary(60),
            _ => {
                let exponent = s.strip_prefix('e').or_else(|| s.strip_prefix('E'))?;
                let digits = exponent.trim_start_matches(['+', '-']);
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let exponent: i64 = exponent.parse().ok()?;
                Some((Self::Decimal(exponent), Format::DecimalExponent))
            }
        }
    }
}

/// Split nano-units into a mantissa and the largest power-of-1000 exponent
fn decimal_parts(nanos: u128) -> (u128, i64) {
    let mut mantissa = nanos;
    let mut exponent = -9;
    while exponent < 18 && mantissa % 1000 == 0 {
        mantissa /= 1000;
        exponent += 3;
    }
    (mantissa, exponent)
}

fn decimal_suffix(exponent: i64) -> &'static str {
    match exponent {
        -9 => "n",
        -6 => "u",
        -3 => "m",
        3 => "k",
        6 => "M",
        9 => "G",
        12 => "T",
        15 => "P",
        18 => "E",
        _ => "",
    }
}

fn pow10(exponent: i64) -> Option<i128> {
    u32::try_from(exponent)
        .ok()
        .and_then(|e| 10i128.checked_pow(e))
}

/// Division rounding toward positive infinity for a positive divisor
fn ceil_div(n: i128, d: i128) -> i128 {
    let q = n.div_euclid(d);
    if n.rem_euclid(d) != 0 {
        q + 1
    } else {
        q
    }
}

fn saturate(n: i128) -> i64 {
    n.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}
