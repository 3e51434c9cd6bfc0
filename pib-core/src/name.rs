//! Hierarchical names
//!
//! A `Name` is an ordered list of opaque byte components, written in URI
//! form as `/comp1/comp2/...`. Bytes outside the unreserved set are
//! percent-escaped in the textual form; the wire form is TLV.

use crate::wire::{self, types, WireResult};
use std::fmt;
use thiserror::Error;

/// Marker byte prefixed to version components.
const VERSION_MARKER: u8 = 0xFD;

#[derive(Debug, Error)]
pub enum NameError {
    #[error("invalid percent-escape in '{0}'")]
    BadEscape(String),
}

/// One opaque name component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Component(Vec<u8>);

impl Component {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Component(bytes.into())
    }

    pub fn from_str_component(s: &str) -> Self {
        Component(s.as_bytes().to_vec())
    }

    /// Version component: marker byte followed by a big-endian timestamp.
    pub fn version(millis: u64) -> Self {
        let mut bytes = vec![VERSION_MARKER];
        bytes.extend_from_slice(&wire::tlv::encode_nonneg(millis));
        Component(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Textual form with percent-escaping.
    pub fn to_uri(&self) -> String {
        let mut out = String::new();
        for &b in &self.0 {
            if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'~' | b'-') {
                out.push(b as char);
            } else {
                out.push_str(&format!("%{:02X}", b));
            }
        }
        out
    }

    fn from_escaped(s: &str) -> Result<Self, NameError> {
        let mut bytes = Vec::with_capacity(s.len());
        let raw = s.as_bytes();
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'%' {
                let hex = s
                    .get(i + 1..i + 3)
                    .ok_or_else(|| NameError::BadEscape(s.to_string()))?;
                let v = u8::from_str_radix(hex, 16)
                    .map_err(|_| NameError::BadEscape(s.to_string()))?;
                bytes.push(v);
                i += 3;
            } else {
                bytes.push(raw[i]);
                i += 1;
            }
        }
        Ok(Component(bytes))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

/// A hierarchical name.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name {
    components: Vec<Component>,
}

impl Name {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a URI-form name such as `/localhost/pib/alice`.
    pub fn from_uri(uri: &str) -> Result<Self, NameError> {
        let trimmed = uri.trim().trim_start_matches('/');
        let mut components = Vec::new();
        if !trimmed.is_empty() {
            for part in trimmed.split('/') {
                components.push(Component::from_escaped(part)?);
            }
        }
        Ok(Name { components })
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Component> {
        self.components.get(index)
    }

    pub fn last(&self) -> Option<&Component> {
        self.components.last()
    }

    /// First `n` components; a negative `n` counts from the back, so
    /// `prefix(-1)` drops the final component.
    pub fn prefix(&self, n: isize) -> Name {
        let len = self.components.len() as isize;
        let take = if n < 0 { (len + n).max(0) } else { n.min(len) } as usize;
        Name {
            components: self.components[..take].to_vec(),
        }
    }

    pub fn append(mut self, component: Component) -> Name {
        self.components.push(component);
        self
    }

    pub fn append_str(self, s: &str) -> Name {
        self.append(Component::from_str_component(s))
    }

    pub fn append_bytes(self, bytes: impl Into<Vec<u8>>) -> Name {
        self.append(Component::from_bytes(bytes))
    }

    pub fn append_name(mut self, other: &Name) -> Name {
        self.components.extend(other.components.iter().cloned());
        self
    }

    pub fn append_version(self, millis: u64) -> Name {
        self.append(Component::version(millis))
    }

    /// True if `self` is a prefix of `other`.
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.len() <= other.len() && self.components[..] == other.components[..self.len()]
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    pub fn to_uri(&self) -> String {
        if self.components.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for c in &self.components {
            out.push('/');
            out.push_str(&c.to_uri());
        }
        out
    }

    /// Encode as a NAME block.
    pub fn wire_encode(&self) -> Vec<u8> {
        let mut inner = wire::Writer::new();
        for c in &self.components {
            inner.write_block(types::COMPONENT, c.as_bytes());
        }
        let mut w = wire::Writer::new();
        w.write_block(types::NAME, inner.as_slice());
        w.into_bytes()
    }

    /// Decode from a NAME block.
    pub fn wire_decode(bytes: &[u8]) -> WireResult<Name> {
        let mut r = wire::Reader::new(bytes);
        let value = r.expect(types::NAME)?;
        Self::decode_value(value)
    }

    /// Decode from the value of an already-opened NAME block.
    pub fn decode_value(value: &[u8]) -> WireResult<Name> {
        let mut r = wire::Reader::new(value);
        let mut components = Vec::new();
        while !r.at_end() {
            components.push(Component::from_bytes(r.expect(types::COMPONENT)?));
        }
        Ok(Name { components })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}
