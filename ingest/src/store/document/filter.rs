use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use pg_escape::quote_literal;

use crate::types::{Document, DocumentStatus};

/// Metadata fields a [`DocumentFilter`] can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentField {
    Id,
    PartitionKey,
    Status,
    BatchId,
    Hash,
    LastUpdate,
}

impl DocumentField {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentField::Id => "id",
            DocumentField::PartitionKey => "partition_key",
            DocumentField::Status => "status",
            DocumentField::BatchId => "batch_id",
            DocumentField::Hash => "hash",
            DocumentField::LastUpdate => "last_update",
        }
    }

    fn value_of(&self, document: &Document) -> FilterValue {
        match self {
            DocumentField::Id => FilterValue::Text(document.id.clone()),
            DocumentField::PartitionKey => FilterValue::Text(document.partition_key.clone()),
            DocumentField::Status => FilterValue::Text(document.status.as_str().to_string()),
            DocumentField::BatchId => FilterValue::Text(document.batch_id.clone()),
            DocumentField::Hash => FilterValue::Text(document.hash.clone()),
            DocumentField::LastUpdate => FilterValue::Timestamp(document.last_update),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd)]
pub enum FilterValue {
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<DocumentStatus> for FilterValue {
    fn from(value: DocumentStatus) -> Self {
        FilterValue::Text(value.as_str().to_string())
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(value)
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Text(text) => f.write_str(&quote_literal(text)),
            FilterValue::Timestamp(time) => f.write_str(&quote_literal(
                &time.to_rfc3339_opts(SecondsFormat::Millis, true),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
}

impl Comparison {
    fn as_str(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Lt => "<",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: DocumentField,
    pub comparison: Comparison,
    pub value: FilterValue,
}

/// Conjunction of predicates over document metadata.
///
/// Backends either evaluate the filter with [`DocumentFilter::matches`] or render it with its
/// [`fmt::Display`] implementation, which quotes values as SQL string literals. Predicates
/// comparing values of different kinds never match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    predicates: Vec<Predicate>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(self, field: DocumentField, value: impl Into<FilterValue>) -> Self {
        self.with(field, Comparison::Eq, value.into())
    }

    pub fn ne(self, field: DocumentField, value: impl Into<FilterValue>) -> Self {
        self.with(field, Comparison::Ne, value.into())
    }

    pub fn lt(self, field: DocumentField, value: impl Into<FilterValue>) -> Self {
        self.with(field, Comparison::Lt, value.into())
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.predicates.iter().all(|predicate| {
            let actual = predicate.field.value_of(document);
            let same_kind = matches!(
                (&actual, &predicate.value),
                (FilterValue::Text(_), FilterValue::Text(_))
                    | (FilterValue::Timestamp(_), FilterValue::Timestamp(_))
            );

            same_kind
                && match predicate.comparison {
                    Comparison::Eq => actual == predicate.value,
                    Comparison::Ne => actual != predicate.value,
                    Comparison::Lt => actual < predicate.value,
                }
        })
    }

    fn with(mut self, field: DocumentField, comparison: Comparison, value: FilterValue) -> Self {
        self.predicates.push(Predicate {
            field,
            comparison,
            value,
        });
        self
    }
}

impl fmt::Display for DocumentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.predicates.is_empty() {
            return f.write_str("TRUE");
        }

        for (index, predicate) in self.predicates.iter().enumerate() {
            if index > 0 {
                f.write_str(" AND ")?;
            }
            write!(
                f,
                "{} {} {}",
                predicate.field.as_str(),
                predicate.comparison.as_str(),
                predicate.value
            )?;
        }

        Ok(())
    }
}
