//! Validation for storage and stream names
//!
//! Names are stored as UTF-16 in a 64-byte buffer that includes a
//! terminator, so at most 31 UTF-16 code units fit.

use crate::directory::entry::MAX_NAME_BYTES;
use crate::error::{CfbError, Result};
use regex::Regex;

/// A validated storage or stream name
///
/// # Rules
/// - Not empty
/// - At most 64 bytes as UTF-16 including the terminator
/// - None of `\`, `/`, `:` or `!`
///
/// # Examples
///
/// ```
/// use cfb_rs::EntryName;
///
/// let name = EntryName::new("\u{5}SummaryInformation").unwrap();
/// assert_eq!(name.as_str(), "\u{5}SummaryInformation");
///
/// assert!(EntryName::new("a/b").is_err()); // separator
/// assert!(EntryName::new("x".repeat(32)).is_err()); // too long
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryName(String);

impl EntryName {
    /// Characters the format reserves
    const FORBIDDEN: &'static str = r"[\\/:!]";

    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(EntryName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for EntryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check a name against the format's rules
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CfbError::name_invalid(name, "name cannot be empty"));
    }

    let encoded = (name.encode_utf16().count() + 1) * 2;
    if encoded > MAX_NAME_BYTES {
        return Err(CfbError::name_invalid(
            name,
            format!(
                "encodes to {} bytes with terminator (max {})",
                encoded, MAX_NAME_BYTES
            ),
        ));
    }

    let re = Regex::new(EntryName::FORBIDDEN)
        .map_err(|e| CfbError::InvalidOperation(format!("name pattern: {}", e)))?;
    if re.is_match(name) {
        return Err(CfbError::name_invalid(
            name,
            "contains a reserved character (\\ / : !)",
        ));
    }

    Ok(())
}
