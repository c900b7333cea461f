//! Vendor-prefixed and dotted-suffix symbol forms.
//!
//! Code lists carry the vendor form (`SZ000001`); source tables key their rows
//! by the dotted form (`000001.SZ`). Conversion between the two is total over
//! [`Exchange::ALL`] and each direction inverts the other.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of the numeric security code shared by every supported exchange.
const CODE_LEN: usize = 6;

/// Exchanges whose securities can be harvested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Exchange {
    /// Shanghai Stock Exchange.
    #[serde(rename = "SH")]
    Sh,
    /// Shenzhen Stock Exchange.
    #[serde(rename = "SZ")]
    Sz,
    /// Beijing Stock Exchange.
    #[serde(rename = "BJ")]
    Bj,
}

impl Exchange {
    pub const ALL: [Exchange; 3] = [Exchange::Sh, Exchange::Sz, Exchange::Bj];

    /// Two-letter exchange tag used in both symbol forms.
    pub fn as_str(self) -> &'static str {
        match self {
            Exchange::Sh => "SH",
            Exchange::Sz => "SZ",
            Exchange::Bj => "BJ",
        }
    }

    /// Parse a two-letter tag, case-insensitively.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(tag))
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("unknown exchange in symbol '{0}'")]
    UnknownExchange(String),

    #[error("malformed security code in symbol '{0}' (expected 6 digits)")]
    MalformedCode(String),
}

fn validate_code(code: &str, original: &str) -> Result<String, SymbolError> {
    if code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(code.to_string())
    } else {
        Err(SymbolError::MalformedCode(original.to_string()))
    }
}

/// Vendor-prefixed form, e.g. `SZ000001`. This is the identity of a symbol
/// throughout a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VendorCode {
    exchange: Exchange,
    code: String,
}

impl VendorCode {
    /// Parse `SZ000001`-style input. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let s = raw.trim();
        let (tag, code) = s
            .get(..2)
            .zip(s.get(2..))
            .ok_or_else(|| SymbolError::UnknownExchange(raw.to_string()))?;
        let exchange =
            Exchange::from_tag(tag).ok_or_else(|| SymbolError::UnknownExchange(raw.to_string()))?;
        Ok(Self {
            exchange,
            code: validate_code(code, raw)?,
        })
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    /// The six-digit security code without any exchange tag.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn to_canonical(&self) -> CanonicalSymbol {
        CanonicalSymbol {
            exchange: self.exchange,
            code: self.code.clone(),
        }
    }
}

impl fmt::Display for VendorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.exchange, self.code)
    }
}

impl FromStr for VendorCode {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VendorCode {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VendorCode> for String {
    fn from(value: VendorCode) -> Self {
        value.to_string()
    }
}

/// Dotted-suffix form queried against the source, e.g. `000001.SZ`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalSymbol {
    exchange: Exchange,
    code: String,
}

impl CanonicalSymbol {
    /// Parse `000001.SZ`-style input.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let s = raw.trim();
        let (code, tag) = s
            .split_once('.')
            .ok_or_else(|| SymbolError::UnknownExchange(raw.to_string()))?;
        let exchange =
            Exchange::from_tag(tag).ok_or_else(|| SymbolError::UnknownExchange(raw.to_string()))?;
        Ok(Self {
            exchange,
            code: validate_code(code, raw)?,
        })
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn to_vendor(&self) -> VendorCode {
        VendorCode {
            exchange: self.exchange,
            code: self.code.clone(),
        }
    }
}

impl fmt::Display for CanonicalSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.code, self.exchange)
    }
}

impl FromStr for CanonicalSymbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CanonicalSymbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CanonicalSymbol> for String {
    fn from(value: CanonicalSymbol) -> Self {
        value.to_string()
    }
}

impl From<&VendorCode> for CanonicalSymbol {
    fn from(value: &VendorCode) -> Self {
        value.to_canonical()
    }
}

impl From<&CanonicalSymbol> for VendorCode {
    fn from(value: &CanonicalSymbol) -> Self {
        value.to_vendor()
    }
}

/// Parse a symbol written in either form and return its vendor form.
///
/// Code lists in the wild mix `SZ000001` and `000001.SZ`; both name the same
/// security.
pub fn parse_any(raw: &str) -> Result<VendorCode, SymbolError> {
    if raw.contains('.') {
        CanonicalSymbol::parse(raw).map(|c| c.to_vendor())
    } else {
        VendorCode::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_to_canonical() {
        let v = VendorCode::parse("SZ000001").unwrap();
        assert_eq!(v.to_canonical().to_string(), "000001.SZ");
        let v = VendorCode::parse("SH600000").unwrap();
        assert_eq!(v.to_canonical().to_string(), "600000.SH");
    }

    #[test]
    fn canonical_to_vendor() {
        let c = CanonicalSymbol::parse("830799.BJ").unwrap();
        assert_eq!(c.to_vendor().to_string(), "BJ830799");
    }

    #[test]
    fn lowercase_input_is_normalized() {
        let v = VendorCode::parse(" sz000002 ").unwrap();
        assert_eq!(v.to_string(), "SZ000002");
        let c = CanonicalSymbol::parse("000002.sz").unwrap();
        assert_eq!(c.to_string(), "000002.SZ");
    }

    #[test]
    fn rejects_unknown_exchange() {
        assert_eq!(
            VendorCode::parse("HK000700"),
            Err(SymbolError::UnknownExchange("HK000700".into()))
        );
        assert!(CanonicalSymbol::parse("000700.HK").is_err());
        assert!(VendorCode::parse("S").is_err());
    }

    #[test]
    fn rejects_malformed_code() {
        assert_eq!(
            VendorCode::parse("SZ00001"),
            Err(SymbolError::MalformedCode("SZ00001".into()))
        );
        assert!(VendorCode::parse("SZ00000A").is_err());
        assert!(CanonicalSymbol::parse("0000011.SZ").is_err());
    }

    #[test]
    fn parse_any_accepts_both_forms() {
        assert_eq!(parse_any("000001.SZ").unwrap().to_string(), "SZ000001");
        assert_eq!(parse_any("SZ000001").unwrap().to_string(), "SZ000001");
    }

    #[test]
    fn serde_uses_string_form() {
        let v = VendorCode::parse("SH600519").unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"SH600519\"");
        let back: VendorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
        assert!(serde_json::from_str::<VendorCode>("\"XX1\"").is_err());
    }
}
