use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, IngestResult};

const KEY_SEPARATOR: char = '|';

/// Identity of one record in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataObjectIdentifier {
    pub id: String,
    pub partition_key: String,
}

impl DataObjectIdentifier {
    pub fn new(id: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            partition_key: partition_key.into(),
        }
    }

    /// Encodes the identifier as a table row key.
    ///
    /// The encoding is reversible with [`DataObjectIdentifier::from_key_string`] for any content.
    pub fn to_key_string(&self) -> String {
        format!(
            "{}{KEY_SEPARATOR}{}",
            escape(&self.id),
            escape(&self.partition_key)
        )
    }

    pub fn from_key_string(key: &str) -> IngestResult<Self> {
        let mut parts = key.split(KEY_SEPARATOR);
        let (Some(id), Some(partition_key), None) = (parts.next(), parts.next(), parts.next())
        else {
            bail!(
                ErrorKind::InvalidData,
                "Malformed data object identifier key",
                key
            );
        };

        Ok(Self::new(unescape(id)?, unescape(partition_key)?))
    }
}

impl fmt::Display for DataObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.partition_key)
    }
}

fn escape(value: &str) -> String {
    value.replace('%', "%25").replace(KEY_SEPARATOR, "%7C")
}

fn unescape(value: &str) -> IngestResult<String> {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(position) = rest.find('%') {
        result.push_str(&rest[..position]);
        match rest.get(position..position + 3) {
            Some("%25") => result.push('%'),
            Some("%7C") => result.push(KEY_SEPARATOR),
            _ => bail!(
                ErrorKind::InvalidData,
                "Invalid escape sequence in data object identifier key",
                value
            ),
        }
        rest = &rest[position + 3..];
    }
    result.push_str(rest);

    Ok(result)
}
