//! Recipient normalization.
//!
//! Every recipient representation a caller may hand over (a bare address,
//! a `Name <address>` string, an `{email, name}` record or a list of any of
//! these) is described by [`AddressInput`] and resolved once into canonical
//! [`Address`] values by [`normalize`] and [`normalize_one`].
//!
//! Invalid input is never dropped: normalization fails with
//! [`MailErrorKind::InvalidAddress`](crate::errors::MailErrorKind::InvalidAddress).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{MailError, MailResult};

/// Maximum length of an address (RFC 5321 path limit).
const MAX_ADDRESS_LEN: usize = 254;

/// Maximum length of the local part.
const MAX_LOCAL_LEN: usize = 64;

/// Email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AddressRecord")]
pub struct Address {
    /// Display name (e.g., "John Doe"). An empty name is stored as `None`.
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com").
    pub email: String,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> MailResult<Self> {
        let email = email.into().trim().to_string();
        Self::validate_email(&email)?;
        Ok(Self { name: None, email })
    }

    /// Creates a new address with display name and email.
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> MailResult<Self> {
        let mut address = Self::new(email)?;
        let name = name.into().trim().to_string();
        address.name = (!name.is_empty()).then_some(name);
        Ok(address)
    }

    /// Parses an address from a string (e.g., "John Doe <john@example.com>").
    pub fn parse(s: &str) -> MailResult<Self> {
        let s = s.trim();

        if let (Some(start), Some(end)) = (s.find('<'), s.rfind('>')) {
            if start < end {
                if !s[end + 1..].trim().is_empty() {
                    return Err(MailError::invalid_address(format!(
                        "Unexpected text after address: {}",
                        s
                    )));
                }
                let name = s[..start].trim().trim_matches('"');
                let email = s[start + 1..end].trim();
                return Self::with_name(name, email);
            }
        }

        Self::new(s)
    }

    /// Validates an email address according to RFC 5321/5322 syntax limits.
    fn validate_email(email: &str) -> MailResult<()> {
        if email.is_empty() {
            return Err(MailError::invalid_address("Email address cannot be empty"));
        }

        if email.len() > MAX_ADDRESS_LEN {
            return Err(MailError::invalid_address(format!(
                "Email address too long (max {} characters)",
                MAX_ADDRESS_LEN
            )));
        }

        let (local, domain) = match email.split_once('@') {
            Some((local, domain)) if !domain.contains('@') => (local, domain),
            _ => {
                return Err(MailError::invalid_address(format!(
                    "Email address must contain exactly one @: \"{}\"",
                    email
                )))
            }
        };

        if local.is_empty() || local.len() > MAX_LOCAL_LEN {
            return Err(MailError::invalid_address(format!(
                "Local part must be 1-{} characters: \"{}\"",
                MAX_LOCAL_LEN, email
            )));
        }

        if domain.is_empty() || domain.starts_with('.') || domain.ends_with('.') {
            return Err(MailError::invalid_address(format!(
                "Invalid domain: \"{}\"",
                email
            )));
        }

        if email.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(MailError::invalid_address(format!(
                "Email address cannot contain whitespace or control characters: \"{}\"",
                email.escape_debug()
            )));
        }

        Ok(())
    }

    /// Returns the email part only.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Returns the display name if present.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Formats the address for email headers.
    pub fn to_header(&self) -> String {
        match &self.name {
            Some(name) => {
                if name.contains(|c: char| !c.is_alphanumeric() && c != ' ') {
                    format!("\"{}\" <{}>", name.replace('"', "\\\""), self.email)
                } else {
                    format!("{} <{}>", name, self.email)
                }
            }
            None => self.email.clone(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

impl TryFrom<&str> for Address {
    type Error = MailError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = MailError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Address::parse(&s)
    }
}

/// Wire shape of a stored address, validated on the way in.
#[derive(Debug, Clone, Deserialize)]
struct AddressRecord {
    email: String,
    #[serde(default)]
    name: Option<String>,
}

impl TryFrom<AddressRecord> for Address {
    type Error = MailError;

    fn try_from(record: AddressRecord) -> Result<Self, Self::Error> {
        match record.name {
            Some(name) => Address::with_name(name, record.email),
            None => Address::new(record.email),
        }
    }
}

/// Any recipient representation accepted at the API boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressInput {
    /// A bare address or a `Name <address>` string.
    Raw(String),
    /// A single `{email, name}` record.
    Record {
        /// The email address.
        email: String,
        /// Optional display name.
        name: Option<String>,
    },
    /// A collection, each element normalized on its own.
    Many(Vec<AddressInput>),
}

impl AddressInput {
    /// Creates a single-record input.
    pub fn record(email: impl Into<String>, name: Option<&str>) -> Self {
        AddressInput::Record {
            email: email.into(),
            name: name.map(str::to_string),
        }
    }

    /// Resolves a dynamically-shaped JSON value into an input.
    ///
    /// A string is a raw address, an object carrying an `email` key is one
    /// record, any other object or array is a collection (object values are
    /// taken in key order). Everything else is rejected.
    pub fn from_json(value: &Value) -> MailResult<Self> {
        match value {
            Value::String(s) => Ok(AddressInput::Raw(s.clone())),
            Value::Object(map) => match map.get("email") {
                Some(email) => {
                    let email = email.as_str().ok_or_else(|| {
                        MailError::invalid_address("The \"email\" field must be a string")
                    })?;
                    let name = match map.get("name") {
                        None | Some(Value::Null) => None,
                        Some(Value::String(name)) => Some(name.clone()),
                        Some(_) => {
                            return Err(MailError::invalid_address(
                                "The \"name\" field must be a string",
                            ))
                        }
                    };
                    Ok(AddressInput::Record {
                        email: email.to_string(),
                        name,
                    })
                }
                None => map
                    .values()
                    .map(AddressInput::from_json)
                    .collect::<MailResult<Vec<_>>>()
                    .map(AddressInput::Many),
            },
            Value::Array(items) => items
                .iter()
                .map(AddressInput::from_json)
                .collect::<MailResult<Vec<_>>>()
                .map(AddressInput::Many),
            other => Err(MailError::invalid_address(format!(
                "Unsupported address input: {}",
                other
            ))),
        }
    }
}

impl From<&str> for AddressInput {
    fn from(s: &str) -> Self {
        AddressInput::Raw(s.to_string())
    }
}

impl From<String> for AddressInput {
    fn from(s: String) -> Self {
        AddressInput::Raw(s)
    }
}

impl From<Address> for AddressInput {
    fn from(address: Address) -> Self {
        AddressInput::Record {
            email: address.email,
            name: address.name,
        }
    }
}

impl From<&Address> for AddressInput {
    fn from(address: &Address) -> Self {
        AddressInput::from(address.clone())
    }
}

impl<T: Into<AddressInput>> From<Vec<T>> for AddressInput {
    fn from(items: Vec<T>) -> Self {
        AddressInput::Many(items.into_iter().map(Into::into).collect())
    }
}

/// Normalizes any input into a list of addresses, preserving input order.
///
/// Nothing is returned unless every element is valid.
pub fn normalize(input: impl Into<AddressInput>) -> MailResult<Vec<Address>> {
    let mut out = Vec::new();
    collect(input.into(), &mut out)?;
    Ok(out)
}

fn collect(input: AddressInput, out: &mut Vec<Address>) -> MailResult<()> {
    match input {
        AddressInput::Many(items) => {
            for item in items {
                collect(item, out)?;
            }
            Ok(())
        }
        single => {
            out.push(normalize_one(single)?);
            Ok(())
        }
    }
}

/// Normalizes an input that must describe exactly one address.
pub fn normalize_one(input: impl Into<AddressInput>) -> MailResult<Address> {
    match input.into() {
        AddressInput::Raw(s) => Address::parse(&s),
        AddressInput::Record { email, name } => match name {
            Some(name) => Address::with_name(name, email),
            None => Address::new(email),
        },
        AddressInput::Many(items) => Err(MailError::invalid_address(format!(
            "Expected a single address, got a collection of {}",
            items.len()
        ))),
    }
}
