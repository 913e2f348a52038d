//! Declarative predicates for live queries

use serde_json::Value;
use std::cmp::Ordering;

use crate::models::Collection;
use crate::{Error, Result};

/// Fields every collection exposes besides its own
const META_FIELDS: &[&str] = &["is_deleted", "sync_status"];

/// A condition on one entity field
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    OneOf(String, Vec<Value>),
    IsNull(String),
    NotNull(String),
    Gt(String, Value),
    Lt(String, Value),
}

impl Filter {
    fn field(&self) -> &str {
        match self {
            Self::Eq(field, _)
            | Self::Ne(field, _)
            | Self::OneOf(field, _)
            | Self::IsNull(field)
            | Self::NotNull(field)
            | Self::Gt(field, _)
            | Self::Lt(field, _) => field,
        }
    }

    fn matches(&self, row: &Value) -> bool {
        let value = row.get(self.field()).unwrap_or(&Value::Null);
        match self {
            Self::Eq(_, expected) => loose_eq(value, expected),
            Self::Ne(_, expected) => !loose_eq(value, expected),
            Self::OneOf(_, options) => options.iter().any(|option| loose_eq(value, option)),
            Self::IsNull(_) => value.is_null(),
            Self::NotNull(_) => !value.is_null(),
            Self::Gt(_, bound) => {
                !value.is_null() && compare_values(value, bound) == Ordering::Greater
            }
            Self::Lt(_, bound) => !value.is_null() && compare_values(value, bound) == Ordering::Less,
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Filters, ordering and limit of a live query.
///
/// ```
/// use falimy_core::store::{Query, SortOrder};
///
/// let query = Query::new()
///     .eq("family_id", "fam123")
///     .ne("status", "archived")
///     .sort_by("sort_order", SortOrder::Asc);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filters: Vec<Filter>,
    sort: Vec<(String, SortOrder)>,
    limit: Option<usize>,
    include_deleted: bool,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    #[must_use]
    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Ne(field.into(), value.into()))
    }

    #[must_use]
    pub fn one_of<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Filter::OneOf(
            field.into(),
            values.into_iter().map(Into::into).collect(),
        ))
    }

    #[must_use]
    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.filter(Filter::IsNull(field.into()))
    }

    #[must_use]
    pub fn not_null(self, field: impl Into<String>) -> Self {
        self.filter(Filter::NotNull(field.into()))
    }

    #[must_use]
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gt(field.into(), value.into()))
    }

    #[must_use]
    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lt(field.into(), value.into()))
    }

    /// Add a sort key. Earlier keys take precedence.
    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Also match soft-deleted rows
    #[must_use]
    pub const fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub(crate) const fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    /// Reject fields the collection does not have.
    pub(crate) fn validate(&self, collection: Collection) -> Result<()> {
        let known = collection.fields();
        let fields = self
            .filters
            .iter()
            .map(Filter::field)
            .chain(self.sort.iter().map(|(field, _)| field.as_str()));
        for field in fields {
            if !known.contains(&field) && !META_FIELDS.contains(&field) {
                return Err(Error::Schema(format!(
                    "{} has no field {field:?}",
                    collection.table()
                )));
            }
        }
        Ok(())
    }

    /// Equality condition on the collection's indexed key, pushed down to SQL.
    pub(crate) fn index_key(&self, collection: Collection) -> Option<&str> {
        let index = collection.index_field()?;
        self.filters.iter().find_map(|filter| match filter {
            Filter::Eq(field, Value::String(key)) if field == index => Some(key.as_str()),
            _ => None,
        })
    }

    /// Filter, sort and truncate stored rows.
    pub(crate) fn apply(&self, rows: Vec<Value>) -> Vec<Value> {
        let mut rows: Vec<Value> = rows
            .into_iter()
            .filter(|row| self.filters.iter().all(|filter| filter.matches(row)))
            .collect();

        if !self.sort.is_empty() {
            rows.sort_by(|left, right| {
                for (field, order) in &self.sort {
                    let left = left.get(field).unwrap_or(&Value::Null);
                    let right = right.get(field).unwrap_or(&Value::Null);
                    let ordering = match order {
                        SortOrder::Asc => compare_values(left, right),
                        SortOrder::Desc => compare_values(right, left),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => left.as_f64() == right.as_f64(),
        _ => left == right,
    }
}

/// Total order over JSON scalars: null < bool < number < string < others.
fn compare_values(left: &Value, right: &Value) -> Ordering {
    const fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) | Value::Object(_) => 4,
        }
    }

    match (left, right) {
        (Value::Bool(left), Value::Bool(right)) => left.cmp(right),
        (Value::Number(left), Value::Number(right)) => left
            .as_f64()
            .unwrap_or_default()
            .total_cmp(&right.as_f64().unwrap_or_default()),
        (Value::String(left), Value::String(right)) => left.cmp(right),
        _ => rank(left).cmp(&rank(right)),
    }
}
