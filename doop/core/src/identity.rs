use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::BTreeMap, sync::Arc};

pub type Map = BTreeMap<String, String>;

/// Structured key/value metadata describing the object behind a violation.
///
/// The map is shared between clones and only copied when written to, so
/// patterns and aggregated groups can hold the same identity cheaply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIdentity(Arc<Map>);

/// Splits violation messages of the form `{"key":"value"} >> message`.
#[derive(Clone, Debug)]
pub struct MessageParser {
    prefix: Regex,
}

/// The result of [`MessageParser::parse`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedMessage {
    pub object_identity: Option<ObjectIdentity>,
    pub message: String,
}

// === impl ObjectIdentity ===

impl ObjectIdentity {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the value for `key`, or the empty string if it is not set.
    #[inline]
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Grants write access, detaching from other clones first.
    #[inline]
    pub fn make_mut(&mut self) -> &mut Map {
        Arc::make_mut(&mut self.0)
    }
}

impl From<Map> for ObjectIdentity {
    #[inline]
    fn from(map: Map) -> Self {
        Self(Arc::new(map))
    }
}

impl AsRef<Map> for ObjectIdentity {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl std::iter::FromIterator<(String, String)> for ObjectIdentity {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for ObjectIdentity {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl Serialize for ObjectIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ObjectIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<Map>::deserialize(deserializer).map(|map| map.unwrap_or_default().into())
    }
}

// === impl MessageParser ===

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageParser {
    const PREFIX_REGEX: &'static str = r"^(\{.*?\})\s*>>\s*(.*)$";

    pub fn new() -> Self {
        Self {
            prefix: Regex::new(Self::PREFIX_REGEX).expect("object identity prefix regex must compile"),
        }
    }

    /// Extracts the object identity prefix from a violation message.
    ///
    /// If the prefix is missing or is not a JSON object of strings, the
    /// message is returned unchanged and no identity is reported.
    pub fn parse(&self, raw: &str) -> ParsedMessage {
        let unparsed = || ParsedMessage {
            object_identity: None,
            message: raw.to_string(),
        };

        let Some(captures) = self.prefix.captures(raw) else {
            return unparsed();
        };
        let (Some(prefix), Some(rest)) = (captures.get(1), captures.get(2)) else {
            return unparsed();
        };

        match serde_json::from_str::<Map>(prefix.as_str()) {
            Ok(map) => ParsedMessage {
                object_identity: Some(map.into()),
                message: rest.as_str().to_string(),
            },
            Err(error) => {
                tracing::trace!(%error, "Ignoring malformed object identity prefix");
                unparsed()
            }
        }
    }
}
