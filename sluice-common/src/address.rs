use std::{
    fmt::{self, Display},
    str::FromStr,
};

use mailparse::MailAddr;
use serde::{Deserialize, Serialize};

use crate::{error::MessageError, header};

/// A single validated mailbox, optionally carrying a display name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    display_name: Option<String>,
    addr: String,
}

impl Address {
    /// The bare `local@domain` part, as used in `MAIL FROM` / `RCPT TO`.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// The mailbox as written in a header, with a non-ASCII display name
    /// encoded per RFC 2047.
    #[must_use]
    pub fn to_header(&self) -> String {
        match &self.display_name {
            Some(name) if !name.is_ascii() => {
                format!("{} <{}>", header::encode_words(name, " "), self.addr)
            }
            _ => self.to_string(),
        }
    }

    /// The part after the `@`.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.addr
            .rsplit_once('@')
            .map_or_else(|| self.addr.as_str(), |(_, domain)| domain)
    }
}

impl FromStr for Address {
    type Err = MessageError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| MessageError::InvalidAddress {
            address: input.to_string(),
            reason: reason.to_string(),
        };

        if input.contains(['\r', '\n']) {
            return Err(invalid("contains a line break"));
        }

        let mut parsed = mailparse::addrparse(input)
            .map_err(|e| invalid(&e.to_string()))?
            .to_vec();

        if parsed.len() != 1 {
            return Err(invalid("expected exactly one mailbox"));
        }

        let MailAddr::Single(info) = parsed.remove(0) else {
            return Err(invalid("group syntax is not allowed"));
        };

        let Some((local, domain)) = info.addr.rsplit_once('@') else {
            return Err(invalid("missing '@'"));
        };

        if local.is_empty() || domain.is_empty() {
            return Err(invalid("empty local part or domain"));
        }

        if info.addr.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        if !info.addr.is_ascii() {
            return Err(invalid("non-ASCII mailboxes need SMTPUTF8, which is not supported"));
        }

        Ok(Self {
            display_name: info.display_name.filter(|name| !name.trim().is_empty()),
            addr: info.addr,
        })
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\" <{}>", self.addr)
            }
            None => f.write_str(&self.addr),
        }
    }
}

/// One or many mailboxes.
///
/// Senders and recipients may be given either as a single address or as a
/// list. A list is never empty, and a one-element list stays a list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Addresses {
    Single(Address),
    Multiple(Vec<Address>),
}

impl Addresses {
    /// Parse a single mailbox.
    ///
    /// # Errors
    /// If `input` is not exactly one valid mailbox
    pub fn single(input: &str) -> Result<Self, MessageError> {
        input.parse().map(Self::Single)
    }

    /// Parse a list of mailboxes. `role` names the list in errors.
    ///
    /// # Errors
    /// If the list is empty or any entry is not a valid mailbox
    pub fn multiple<I, S>(role: &'static str, inputs: I) -> Result<Self, MessageError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addresses = inputs
            .into_iter()
            .map(|input| input.as_ref().parse())
            .collect::<Result<Vec<Address>, _>>()?;

        if addresses.is_empty() {
            return Err(MessageError::EmptyAddressList(role));
        }

        Ok(Self::Multiple(addresses))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Address] {
        match self {
            Self::Single(address) => std::slice::from_ref(address),
            Self::Multiple(addresses) => addresses,
        }
    }

    /// Comma-separated header form of every mailbox.
    #[must_use]
    pub fn to_header(&self) -> String {
        self.iter()
            .map(Address::to_header)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Address> {
        self.as_slice().iter()
    }

    /// The first mailbox, used as the envelope sender when a message has
    /// several `From` addresses.
    #[must_use]
    pub fn first(&self) -> Option<&Address> {
        self.as_slice().first()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl<'a> IntoIterator for &'a Addresses {
    type Item = &'a Address;
    type IntoIter = std::slice::Iter<'a, Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Display for Addresses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, addr) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            Display::fmt(addr, f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_address() {
        let addr: Address = "foo@example.com".parse().expect("valid address");
        assert_eq!(addr.addr(), "foo@example.com");
        assert_eq!(addr.display_name(), None);
        assert_eq!(addr.domain(), "example.com");
        assert_eq!(addr.to_string(), "foo@example.com");
    }

    #[test]
    fn test_parse_named_address() {
        let addr: Address = "Foo Bar <foo@example.com>".parse().expect("valid address");
        assert_eq!(addr.addr(), "foo@example.com");
        assert_eq!(addr.display_name(), Some("Foo Bar"));
        assert_eq!(addr.to_string(), "\"Foo Bar\" <foo@example.com>");
    }

    #[test]
    fn test_non_ascii_display_name_is_encoded_for_headers() {
        let addr: Address = "José Núñez <jose@example.com>".parse().expect("valid address");

        assert_eq!(addr.display_name(), Some("José Núñez"));
        assert_eq!(
            addr.to_header(),
            "=?utf-8?B?Sm9zw6kgTsO6w7Fleg==?= <jose@example.com>"
        );

        let plain: Address = "Foo Bar <foo@example.com>".parse().expect("valid address");
        assert_eq!(plain.to_header(), plain.to_string());
    }

    #[test]
    fn test_rejects_invalid_addresses() {
        for input in [
            "",
            "no-at-sign",
            "@example.com",
            "a@b.com, c@d.com",
            "Team: a@b.com, c@d.com;",
            "foo@example.com\r\nBcc: evil@example.com",
            "jösé@example.com",
        ] {
            assert!(
                input.parse::<Address>().is_err(),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_multiple_keeps_order_and_shape() {
        let list = Addresses::multiple("to", ["a@example.com", "b@example.com"])
            .expect("valid list");

        assert_eq!(list.len(), 2);
        let addrs: Vec<_> = list.iter().map(Address::addr).collect();
        assert_eq!(addrs, ["a@example.com", "b@example.com"]);
        assert_eq!(list.to_string(), "a@example.com, b@example.com");

        let one = Addresses::multiple("to", ["a@example.com"]).expect("valid list");
        assert!(matches!(one, Addresses::Multiple(ref v) if v.len() == 1));
    }

    #[test]
    fn test_multiple_rejects_empty() {
        let empty: [&str; 0] = [];
        assert_eq!(
            Addresses::multiple("to", empty),
            Err(MessageError::EmptyAddressList("to"))
        );
    }

    #[test]
    fn test_single_iterates_as_one() {
        let single = Addresses::single("receiver@sample.com").expect("valid");
        assert_eq!(single.len(), 1);
        assert_eq!(
            single.first().map(Address::addr),
            Some("receiver@sample.com")
        );
    }
}
