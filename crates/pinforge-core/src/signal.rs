//! Signal classification
//!
//! Descriptor signal vocabulary differs between peripheral families
//! (`tx`/`rx` vs `mosi`/`miso`, ADC inputs with or without an index).
//! Classification collapses a raw [`Signal`] into a [`SignalTag`] from a
//! closed vocabulary, or rejects it when the peripheral is not one the
//! generated tables care about.

use serde::{Deserialize, Serialize};

use crate::descriptor::Signal;

/// Peripheral class of a normalized tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Timer,
    Spi,
    Serial,
    Adc,
}

/// Normalized peripheral function: class, instance number, function name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalTag {
    #[serde(rename = "type")]
    pub kind: TagKind,
    pub index: u32,
    pub func: String,
}

/// A classified signal together with its alternate-function index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMapping {
    pub tag: SignalTag,
    /// Alternate-function selector, `-1` when not applicable
    pub af: i32,
}

/// Alternate-function value for signals without one
pub const NO_AF: i32 = -1;

/// Classify a raw signal record
///
/// Returns `None` for any record that does not describe a timer channel,
/// SPI line, UART line or ADC input, including records with missing or
/// non-numeric `instance`/`af` attributes.
pub fn classify(signal: &Signal) -> Option<SignalMapping> {
    let driver = signal.driver.as_deref()?;
    let name = signal.name.as_deref();

    let (kind, func, af) = match driver {
        "tim" | "timer" => {
            let name = name.filter(|n| n.starts_with("ch"))?;
            (TagKind::Timer, name.to_string(), parse_af(signal)?)
        }
        "spi" => {
            let func = match name? {
                "tx" => "mosi",
                "rx" => "miso",
                n @ ("sck" | "mosi" | "miso") => n,
                _ => return None,
            };
            (TagKind::Spi, func.to_string(), parse_af(signal)?)
        }
        "uart" | "usart" => {
            let name = name.filter(|n| matches!(*n, "rx" | "tx"))?;
            (TagKind::Serial, name.to_string(), parse_af(signal)?)
        }
        "adc" => {
            let digits = adc_input(name.unwrap_or("in0"))?;
            (TagKind::Adc, digits.to_string(), NO_AF)
        }
        _ => return None,
    };

    let index = signal.instance.as_deref()?.parse().ok()?;
    Some(SignalMapping {
        tag: SignalTag { kind, index, func },
        af,
    })
}

/// Parse the `af` attribute; `Some(NO_AF)` when absent, `None` when malformed
fn parse_af(signal: &Signal) -> Option<i32> {
    match signal.af.as_deref() {
        None => Some(NO_AF),
        Some(af) => af.parse().ok(),
    }
}

/// Digits of an ADC input name of the form `in<digits>`
fn adc_input(name: &str) -> Option<&str> {
    let digits = name.strip_prefix("in")?;
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(digits)
    } else {
        None
    }
}
