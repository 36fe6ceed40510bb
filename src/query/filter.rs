use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use super::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum FilterMode {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    In,
    NotIn,
    Range,
    Regexp,
}

impl FilterMode {
    /// Suffix used in the query key (`height.gte=...`).
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterMode::Equal => "eq",
            FilterMode::NotEqual => "ne",
            FilterMode::GreaterThan => "gt",
            FilterMode::GreaterThanEqual => "gte",
            FilterMode::LessThan => "lt",
            FilterMode::LessThanEqual => "lte",
            FilterMode::In => "in",
            FilterMode::NotIn => "nin",
            FilterMode::Range => "rg",
            FilterMode::Regexp => "re",
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterMode {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(FilterMode::Equal),
            "ne" => Ok(FilterMode::NotEqual),
            "gt" => Ok(FilterMode::GreaterThan),
            "gte" => Ok(FilterMode::GreaterThanEqual),
            "lt" => Ok(FilterMode::LessThan),
            "lte" => Ok(FilterMode::LessThanEqual),
            "in" => Ok(FilterMode::In),
            "nin" => Ok(FilterMode::NotIn),
            "rg" | "range" => Ok(FilterMode::Range),
            "re" | "regexp" => Ok(FilterMode::Regexp),
            other => Err(QueryError::UnknownFilterMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for FilterMode {
    type Error = QueryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One `<column>.<mode>=<value>` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub mode: FilterMode,
    pub value: String,
}

impl Filter {
    pub fn new(column: impl Into<String>, mode: FilterMode, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            mode,
            value: value.to_string(),
        }
    }

    /// Set filter (`in`/`nin`) over several values.
    pub fn list<I, V>(column: impl Into<String>, mode: FilterMode, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        let value = values
            .into_iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self::new(column, mode, value)
    }

    /// Inclusive range filter.
    pub fn range(column: impl Into<String>, from: impl ToString, to: impl ToString) -> Self {
        Self::new(
            column,
            FilterMode::Range,
            format!("{},{}", from.to_string(), to.to_string()),
        )
    }

    pub fn key(&self) -> String {
        format!("{}.{}", self.column, self.mode)
    }

    pub fn check(&self, index: usize) -> Result<(), QueryError> {
        if self.column.is_empty() {
            return Err(QueryError::EmptyFilterColumn { index });
        }
        if self.value.is_empty() {
            return Err(QueryError::EmptyFilterValue {
                column: self.column.clone(),
            });
        }
        Ok(())
    }
}

/// Ordered filter list. Several filters may target the same column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterList(Vec<Filter>);

impl FilterList {
    pub fn add(&mut self, filter: Filter) {
        self.0.push(filter);
    }

    /// Replaces the first filter on the same column, or appends.
    pub fn replace(&mut self, filter: Filter) {
        match self.0.iter_mut().find(|f| f.column == filter.column) {
            Some(existing) => *existing = filter,
            None => self.0.push(filter),
        }
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Filter> {
        self.0.iter()
    }

    pub fn check(&self) -> Result<(), QueryError> {
        self.0
            .iter()
            .enumerate()
            .try_for_each(|(i, f)| f.check(i))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Csv,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Csv => "csv",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Format::Json),
            "csv" => Ok(Format::Csv),
            other => Err(QueryError::InvalidFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Order {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Order::Asc),
            "desc" => Ok(Order::Desc),
            other => Err(QueryError::InvalidOrder(other.to_string())),
        }
    }
}
