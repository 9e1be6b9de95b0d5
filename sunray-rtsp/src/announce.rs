//! The SDP-like ANNOUNCE payload: `s=<client-name>` and
//! `a=<key>:<value>` lines, order-insensitive, unknown line kinds
//! ignored.

use std::collections::HashMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDescription {
    pub client_name: Option<String>,
    attributes: HashMap<String, String>,
}

impl SessionDescription {
    pub fn parse(payload: &str) -> Self {
        let mut desc = SessionDescription::default();
        for line in payload.lines().map(str::trim) {
            if let Some(name) = line.strip_prefix("s=") {
                desc.client_name = Some(name.to_string());
            } else if let Some(attr) = line.strip_prefix("a=") {
                if let Some((key, value)) = attr.split_once(':') {
                    desc.attributes
                        .insert(key.trim().to_string(), value.trim().to_string());
                }
            }
        }
        desc
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Seeds a default for an optional attribute the client omitted.
    pub fn set_default(&mut self, key: &str, value: &str) {
        self.attributes
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    /// A required decimal integer attribute. Missing and malformed keys
    /// are distinct errors so the server can say which key broke.
    pub fn attr_i64(&self, key: &str) -> Result<i64> {
        let raw = self
            .attr(key)
            .ok_or_else(|| Error::ErrMissingAttribute(key.to_string()))?;
        raw.trim()
            .parse()
            .map_err(|_| Error::ErrInvalidAttribute(key.to_string(), raw.to_string()))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}
