//! Conversion of Kubernetes resource quantities to plain numbers.
//!
//! The cluster reports quantities as strings (`"500m"`, `"2Gi"`, `"1e3"`).
//! Everything downstream works on approximate `f64` values, the same way
//! the kube API machinery exposes `AsApproximateFloat64`.

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("Failed to parse quantity '{0}'")]
    Malformed(String),
    #[error("Quantity '{0}' mixes an exponent and a suffix")]
    ExponentAndSuffix(String),
}

enum Scale {
    Decimal(i32),
    Binary(i32),
}

fn suffix_scale(suffix: &str) -> Scale {
    match suffix {
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        "Ki" => Scale::Binary(10),
        "Mi" => Scale::Binary(20),
        "Gi" => Scale::Binary(30),
        "Ti" => Scale::Binary(40),
        "Pi" => Scale::Binary(50),
        "Ei" => Scale::Binary(60),
        _ => Scale::Decimal(0),
    }
}

impl Scale {
    // Dividing by an exact power of ten keeps "250m" at exactly 0.25
    fn apply(&self, number: f64) -> f64 {
        match *self {
            Scale::Decimal(exp) if exp < 0 => number / 10f64.powi(-exp),
            Scale::Decimal(exp) => number * 10f64.powi(exp),
            Scale::Binary(exp) => number * 2f64.powi(exp),
        }
    }
}

/// Parse a quantity string into its approximate numeric value, in the base
/// unit of the resource (cores for cpu, bytes for memory, units for
/// extended resources).
pub fn parse_quantity(quantity: &str) -> Result<f64, Error> {
    let trimmed = quantity.trim();
    let (_, number, exponent, suffix) = lazy_regex::regex_captures!(
        r"^([+-]?(?:\d+\.?\d*|\.\d+))(?:[eE]([+-]?\d+))?(Ki|Mi|Gi|Ti|Pi|Ei|n|u|m|k|M|G|T|P|E)?$",
        trimmed
    )
    .ok_or_else(|| Error::Malformed(quantity.to_string()))?;

    if !exponent.is_empty() && !suffix.is_empty() {
        return Err(Error::ExponentAndSuffix(quantity.to_string()));
    }

    let number = number
        .parse::<f64>()
        .map_err(|_| Error::Malformed(quantity.to_string()))?;

    let scale = if exponent.is_empty() {
        suffix_scale(suffix)
    } else {
        Scale::Decimal(
            exponent
                .parse::<i32>()
                .map_err(|_| Error::Malformed(quantity.to_string()))?,
        )
    };

    Ok(scale.apply(number))
}
