//! Cursor and offset pagination over any listed resource.
//!
//! DESIGN
//! ======
//! List endpoints take a flat query string:
//!
//! - `page` selects offset mode; without it the result is cursor based.
//! - `take` is the page size (default 20, at most 100).
//! - `order__createdAt` is `ASC` (default) or `DESC`; `id` breaks ties.
//! - `where__{field}` filters by equality, `where__{field}__{op}` applies an
//!   operator from [`Operator`].
//!
//! Each resource implements [`Paginate`], which names its `FROM` clause and
//! an allow-list mapping public field names to qualified columns. SQL is
//! assembled with `QueryBuilder`; user input only ever reaches the query as
//! a bound parameter.
//!
//! CURSOR MODE
//! ===========
//! `cursor.after` is the last row's id only when a full page came back. The
//! `next` link repeats the caller's filters, drops any previous id cursor and
//! appends `where__id__more_than` (ASC) or `where__id__less_than` (DESC).

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

use crate::error::ApiError;

pub const DEFAULT_TAKE: i64 = 20;
pub const MAX_TAKE: i64 = 100;

const CURSOR_MORE_THAN: &str = "where__id__more_than";
const CURSOR_LESS_THAN: &str = "where__id__less_than";
const ORDER_KEY: &str = "order__createdAt";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PaginationError {
    #[error("invalid query parameter {key}: {reason}")]
    InvalidParam { key: String, reason: &'static str },
    #[error("invalid base url: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for PaginationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidParam { .. } => "E_INVALID_QUERY",
            Self::BaseUrl(_) => "E_CONFIG",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

impl From<PaginationError> for ApiError {
    fn from(err: PaginationError) -> Self {
        match err {
            PaginationError::InvalidParam { .. } => ApiError::bad_request(err.to_string()),
            PaginationError::BaseUrl(_) | PaginationError::Database(_) => ApiError::internal(&err),
        }
    }
}

fn invalid(key: &str, reason: &'static str) -> PaginationError {
    PaginationError::InvalidParam { key: key.to_owned(), reason }
}

// =============================================================================
// RESOURCE DESCRIPTION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Text,
    Timestamp,
}

/// A filterable column: public name maps to this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub column: &'static str,
    pub kind: FieldKind,
}

impl Field {
    #[must_use]
    pub const fn new(column: &'static str, kind: FieldKind) -> Self {
        Self { column, kind }
    }
}

/// A listable resource.
pub trait Paginate: for<'r> FromRow<'r, PgRow> + Send + Unpin {
    /// Select list, without the `SELECT` keyword.
    const SELECT: &'static str;
    /// `FROM` clause body, including joins.
    const FROM: &'static str;
    const ID_COLUMN: &'static str;
    const CREATED_AT_COLUMN: &'static str;

    /// Resolve a public field name from the allow-list.
    fn field(name: &str) -> Option<Field>;

    fn id(&self) -> i64;
}

// =============================================================================
// QUERY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ASC" => Some(Self::Asc),
            "DESC" => Some(Self::Desc),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    fn cursor_key(self) -> &'static str {
        match self {
            Self::Asc => CURSOR_MORE_THAN,
            Self::Desc => CURSOR_LESS_THAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    Not,
    LessThan,
    LessThanOrEqual,
    MoreThan,
    MoreThanOrEqual,
    Like,
    ILike,
    In,
    Between,
    IsNull,
}

impl Operator {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "equal" => Self::Equal,
            "not" => Self::Not,
            "less_than" => Self::LessThan,
            "less_than_or_equal" => Self::LessThanOrEqual,
            "more_than" => Self::MoreThan,
            "more_than_or_equal" => Self::MoreThanOrEqual,
            "like" => Self::Like,
            "i_like" => Self::ILike,
            "in" => Self::In,
            "between" => Self::Between,
            "is_null" => Self::IsNull,
            _ => return None,
        })
    }
}

/// A `where__…` parameter before its field is resolved against a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFilter {
    pub key: String,
    pub field: String,
    pub op: Operator,
    pub value: String,
}

impl RawFilter {
    fn parse(key: &str, value: &str) -> Result<Self, PaginationError> {
        let parts: Vec<&str> = key.split("__").collect();
        let (field, op) = match parts.as_slice() {
            [_, field] => (*field, Operator::Equal),
            [_, field, op] => (*field, Operator::parse(op).ok_or_else(|| invalid(key, "unknown filter operator"))?),
            _ => return Err(invalid(key, "filter key must have 2 or 3 '__' separated parts")),
        };
        if field.is_empty() {
            return Err(invalid(key, "filter field is empty"));
        }
        Ok(Self { key: key.to_owned(), field: field.to_owned(), op, value: value.to_owned() })
    }
}

/// Parsed list query. Doubles as an axum extractor over the raw query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub take: i64,
    pub order: Order,
    pub filters: Vec<RawFilter>,
    /// Non-empty parameters in arrival order, replayed into `next` links.
    raw: Vec<(String, String)>,
}

impl Default for PaginationQuery {
    fn default() -> Self {
        Self { page: None, take: DEFAULT_TAKE, order: Order::Asc, filters: Vec::new(), raw: Vec::new() }
    }
}

impl PaginationQuery {
    /// Parse a raw (still percent-encoded) query string. Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParam` for unknown keys, malformed numbers, `take`
    /// outside `1..=100`, an unknown order or a malformed filter key.
    pub fn parse(raw_query: Option<&str>) -> Result<Self, PaginationError> {
        let mut query = Self::default();
        let raw_query = raw_query.unwrap_or_default();

        for (key, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "page" => query.page = Some(parse_positive(&key, &value)?),
                "take" => {
                    let take = parse_positive(&key, &value)?;
                    if take > MAX_TAKE {
                        return Err(invalid(&key, "must be at most 100"));
                    }
                    query.take = take;
                }
                ORDER_KEY => query.order = Order::parse(&value).ok_or_else(|| invalid(&key, "must be ASC or DESC"))?,
                k if k.starts_with("where__") => query.filters.push(RawFilter::parse(k, &value)?),
                _ => return Err(invalid(&key, "unknown query parameter")),
            }
            query.raw.push((key.into_owned(), value.into_owned()));
        }

        if query.page.is_some() && query.offset().is_none() {
            return Err(invalid("page", "is too large"));
        }
        Ok(query)
    }

    /// Rows skipped in page mode; `None` in cursor mode or on overflow.
    fn offset(&self) -> Option<i64> {
        self.take.checked_mul(self.page? - 1)
    }

    /// Absolute link to the page after `after`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid absolute URL.
    pub fn next_url(&self, base_url: &str, path: &str, after: i64) -> Result<String, url::ParseError> {
        let mut url = Url::parse(&format!("{base_url}/{path}"))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.raw {
                if matches!(key.as_str(), CURSOR_MORE_THAN | CURSOR_LESS_THAN | ORDER_KEY | "take") {
                    continue;
                }
                pairs.append_pair(key, value);
            }
            pairs.append_pair(ORDER_KEY, self.order.as_str());
            pairs.append_pair("take", &self.take.to_string());
            pairs.append_pair(self.order.cursor_key(), &after.to_string());
        }
        Ok(url.into())
    }
}

fn parse_positive(key: &str, value: &str) -> Result<i64, PaginationError> {
    match value.parse::<i64>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(invalid(key, "must be a positive integer")),
    }
}

impl<S: Send + Sync> FromRequestParts<S> for PaginationQuery {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::parse(parts.uri.query()).map_err(ApiError::from)
    }
}

// =============================================================================
// RESOLVED FILTERS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum FilterValue {
    Int(i64),
    Text(String),
    Timestamp(OffsetDateTime),
}

impl FilterValue {
    fn parse(kind: FieldKind, raw: &str) -> Option<Self> {
        match kind {
            FieldKind::Int => raw.trim().parse().ok().map(Self::Int),
            FieldKind::Text => Some(Self::Text(raw.to_owned())),
            FieldKind::Timestamp => OffsetDateTime::parse(raw.trim(), &Rfc3339).ok().map(Self::Timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Compare(&'static str, FilterValue),
    In(Vec<FilterValue>),
    Between(FilterValue, FilterValue),
    Null(bool),
}

#[derive(Debug, Clone, PartialEq)]
struct Filter {
    column: &'static str,
    condition: Condition,
}

fn resolve_filter<T: Paginate>(raw: &RawFilter) -> Result<Filter, PaginationError> {
    let field = T::field(&raw.field).ok_or_else(|| invalid(&raw.key, "field is not filterable"))?;
    let parse = |s: &str| FilterValue::parse(field.kind, s).ok_or_else(|| invalid(&raw.key, "value has the wrong type"));

    let compare = |sql: &'static str| parse(&raw.value).map(|v| Condition::Compare(sql, v));
    let condition = match raw.op {
        Operator::Equal => compare(" = ")?,
        Operator::Not => compare(" <> ")?,
        Operator::LessThan => compare(" < ")?,
        Operator::LessThanOrEqual => compare(" <= ")?,
        Operator::MoreThan => compare(" > ")?,
        Operator::MoreThanOrEqual => compare(" >= ")?,
        Operator::Like | Operator::ILike => {
            if field.kind != FieldKind::Text {
                return Err(invalid(&raw.key, "like filters apply to text fields only"));
            }
            let sql = if raw.op == Operator::Like { " LIKE " } else { " ILIKE " };
            Condition::Compare(sql, FilterValue::Text(format!("%{}%", raw.value)))
        }
        Operator::In => Condition::In(raw.value.split(',').map(parse).collect::<Result<_, _>>()?),
        Operator::Between => match raw.value.split(',').collect::<Vec<_>>().as_slice() {
            [low, high] => Condition::Between(parse(low)?, parse(high)?),
            _ => return Err(invalid(&raw.key, "between takes exactly two values")),
        },
        Operator::IsNull => match raw.value.as_str() {
            "true" => Condition::Null(true),
            "false" => Condition::Null(false),
            _ => return Err(invalid(&raw.key, "is_null takes true or false")),
        },
    };

    Ok(Filter { column: field.column, condition })
}

fn push_value(builder: &mut QueryBuilder<'_, Postgres>, value: &FilterValue) {
    match value {
        FilterValue::Int(v) => builder.push_bind(*v),
        FilterValue::Text(v) => builder.push_bind(v.clone()),
        FilterValue::Timestamp(v) => builder.push_bind(*v),
    };
}

fn push_where(builder: &mut QueryBuilder<'_, Postgres>, scope: &[(&'static str, i64)], filters: &[Filter]) {
    let mut sep = " WHERE ";
    for (column, value) in scope {
        builder.push(sep).push(*column).push(" = ").push_bind(*value);
        sep = " AND ";
    }
    for filter in filters {
        builder.push(sep).push(filter.column);
        sep = " AND ";
        match &filter.condition {
            Condition::Compare(sql, value) => {
                builder.push(*sql);
                push_value(builder, value);
            }
            Condition::In(values) => {
                builder.push(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        builder.push(", ");
                    }
                    push_value(builder, value);
                }
                builder.push(")");
            }
            Condition::Between(low, high) => {
                builder.push(" BETWEEN ");
                push_value(builder, low);
                builder.push(" AND ");
                push_value(builder, high);
            }
            Condition::Null(true) => {
                builder.push(" IS NULL");
            }
            Condition::Null(false) => {
                builder.push(" IS NOT NULL");
            }
        }
    }
}

fn select_builder<T: Paginate>(
    query: &PaginationQuery,
    scope: &[(&'static str, i64)],
    filters: &[Filter],
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {} FROM {}", T::SELECT, T::FROM));
    push_where(&mut builder, scope, filters);

    let dir = query.order.as_str();
    builder.push(format!(" ORDER BY {} {dir}, {} {dir}", T::CREATED_AT_COLUMN, T::ID_COLUMN));
    builder.push(" LIMIT ").push_bind(query.take);
    if let Some(offset) = query.offset() {
        builder.push(" OFFSET ").push_bind(offset);
    }
    builder
}

fn count_builder<T: Paginate>(scope: &[(&'static str, i64)], filters: &[Filter]) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", T::FROM));
    push_where(&mut builder, scope, filters);
    builder
}

// =============================================================================
// RESULTS
// =============================================================================

#[derive(Debug, Serialize)]
pub struct PageResult<T> {
    pub data: Vec<T>,
    pub total: i64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Cursor {
    pub after: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CursorResult<T> {
    pub data: Vec<T>,
    pub cursor: Cursor,
    pub count: usize,
    pub next: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Paginated<T> {
    Page(PageResult<T>),
    Cursor(CursorResult<T>),
}

// =============================================================================
// PAGINATE
// =============================================================================

/// List `T` rows matching `query`, AND-ed with the fixed `scope` columns.
///
/// `path` is the resource path (no leading slash) used for the `next` link.
///
/// # Errors
///
/// Returns `InvalidParam` when a filter names an unknown field or carries a
/// value of the wrong type, and a database error if a query fails.
pub async fn paginate<T: Paginate>(
    pool: &PgPool,
    query: &PaginationQuery,
    scope: &[(&'static str, i64)],
    base_url: &str,
    path: &str,
) -> Result<Paginated<T>, PaginationError> {
    let filters = query
        .filters
        .iter()
        .map(resolve_filter::<T>)
        .collect::<Result<Vec<_>, _>>()?;

    let data: Vec<T> = select_builder::<T>(query, scope, &filters)
        .build_query_as()
        .fetch_all(pool)
        .await?;

    if query.page.is_some() {
        let total: i64 = count_builder::<T>(scope, &filters)
            .build_query_scalar()
            .fetch_one(pool)
            .await?;
        return Ok(Paginated::Page(PageResult { data, total }));
    }

    let full_page = i64::try_from(data.len()).is_ok_and(|len| len == query.take);
    let after = if full_page { data.last().map(|item| item.id()) } else { None };
    let next = match after {
        Some(after) => Some(query.next_url(base_url, path, after)?),
        None => None,
    };

    Ok(Paginated::Cursor(CursorResult { count: data.len(), data, cursor: Cursor { after }, next }))
}

#[cfg(test)]
#[path = "pagination_test.rs"]
mod tests;
