use super::*;

#[derive(Debug, sqlx::FromRow)]
struct Note {
    id: i64,
}

impl Paginate for Note {
    const SELECT: &'static str = "n.id";
    const FROM: &'static str = "notes n";
    const ID_COLUMN: &'static str = "n.id";
    const CREATED_AT_COLUMN: &'static str = "n.created_at";

    fn field(name: &str) -> Option<Field> {
        match name {
            "id" => Some(Field::new("n.id", FieldKind::Int)),
            "title" => Some(Field::new("n.title", FieldKind::Text)),
            "createdAt" => Some(Field::new("n.created_at", FieldKind::Timestamp)),
            _ => None,
        }
    }

    fn id(&self) -> i64 {
        self.id
    }
}

fn parse(raw: &str) -> PaginationQuery {
    PaginationQuery::parse(Some(raw)).unwrap()
}

fn filters(query: &PaginationQuery) -> Result<Vec<Filter>, PaginationError> {
    query.filters.iter().map(resolve_filter::<Note>).collect()
}

fn select_sql(raw: &str, scope: &[(&'static str, i64)]) -> String {
    let query = parse(raw);
    let filters = filters(&query).unwrap();
    select_builder::<Note>(&query, scope, &filters).sql().to_owned()
}

// =============================================================================
// QUERY PARSING
// =============================================================================

#[test]
fn empty_query_uses_defaults() {
    let query = PaginationQuery::parse(None).unwrap();
    assert_eq!(query.page, None);
    assert_eq!(query.take, DEFAULT_TAKE);
    assert_eq!(query.order, Order::Asc);
    assert!(query.filters.is_empty());
}

#[test]
fn parses_page_take_order_and_filters() {
    let query = parse("page=2&take=5&order__createdAt=DESC&where__id__more_than=10&where__title=hi");
    assert_eq!(query.page, Some(2));
    assert_eq!(query.take, 5);
    assert_eq!(query.order, Order::Desc);
    assert_eq!(query.filters.len(), 2);
    assert_eq!(query.filters[0].op, Operator::MoreThan);
    assert_eq!(query.filters[0].field, "id");
    assert_eq!(query.filters[1].op, Operator::Equal);
    assert_eq!(query.filters[1].value, "hi");
}

#[test]
fn empty_values_are_ignored() {
    let query = parse("page=&where__title=");
    assert_eq!(query.page, None);
    assert!(query.filters.is_empty());
}

#[test]
fn rejects_bad_parameters() {
    for raw in [
        "take=0",
        "take=101",
        "take=abc",
        "page=0",
        "order__createdAt=UP",
        "order__title=ASC",
        "unknown=1",
        "where__id__more_than__x=1",
        "where__id__sideways=1",
        "where__=1",
    ] {
        assert!(
            matches!(PaginationQuery::parse(Some(raw)), Err(PaginationError::InvalidParam { .. })),
            "expected {raw:?} to be rejected"
        );
    }
}

#[test]
fn page_whose_offset_overflows_is_rejected() {
    let err = PaginationQuery::parse(Some("page=1000000000000000000&take=100")).unwrap_err();
    assert!(matches!(err, PaginationError::InvalidParam { ref key, .. } if key == "page"));

    // Order of parameters does not matter.
    assert!(PaginationQuery::parse(Some("take=100&page=1000000000000000000")).is_err());
}

#[test]
fn largest_page_that_fits_still_builds() {
    let query = parse(&format!("page={}&take=1", i64::MAX));
    let sql = select_builder::<Note>(&query, &[], &[]).sql().to_owned();
    assert!(sql.contains(" OFFSET "));
}

#[test]
fn decodes_percent_encoded_values() {
    let query = parse("where__title__i_like=hello%20world");
    assert_eq!(query.filters[0].value, "hello world");
}

// =============================================================================
// FILTER RESOLUTION
// =============================================================================

#[test]
fn unknown_field_is_rejected() {
    let query = parse("where__password=x");
    assert!(matches!(filters(&query), Err(PaginationError::InvalidParam { .. })));
}

#[test]
fn int_field_rejects_text_value() {
    let query = parse("where__id__more_than=ten");
    assert!(matches!(filters(&query), Err(PaginationError::InvalidParam { .. })));
}

#[test]
fn like_requires_text_field() {
    let query = parse("where__id__like=1");
    assert!(matches!(filters(&query), Err(PaginationError::InvalidParam { .. })));
}

#[test]
fn like_wraps_value_in_wildcards() {
    let resolved = filters(&parse("where__title__i_like=cat")).unwrap();
    assert_eq!(resolved[0].condition, Condition::Compare(" ILIKE ", FilterValue::Text("%cat%".into())));
}

#[test]
fn between_needs_two_values() {
    assert!(filters(&parse("where__id__between=1")).is_err());
    assert!(filters(&parse("where__id__between=1,2,3")).is_err());
    let resolved = filters(&parse("where__id__between=1,9")).unwrap();
    assert_eq!(resolved[0].condition, Condition::Between(FilterValue::Int(1), FilterValue::Int(9)));
}

#[test]
fn in_splits_on_commas() {
    let resolved = filters(&parse("where__id__in=1,2,3")).unwrap();
    assert_eq!(
        resolved[0].condition,
        Condition::In(vec![FilterValue::Int(1), FilterValue::Int(2), FilterValue::Int(3)])
    );
}

#[test]
fn timestamp_field_parses_rfc3339() {
    let resolved = filters(&parse("where__createdAt__more_than=2024-01-01T00:00:00Z")).unwrap();
    assert!(matches!(resolved[0].condition, Condition::Compare(" > ", FilterValue::Timestamp(_))));
    assert!(filters(&parse("where__createdAt__more_than=yesterday")).is_err());
}

#[test]
fn is_null_takes_bool() {
    assert_eq!(filters(&parse("where__title__is_null=false")).unwrap()[0].condition, Condition::Null(false));
    assert!(filters(&parse("where__title__is_null=maybe")).is_err());
}

// =============================================================================
// SQL
// =============================================================================

#[test]
fn cursor_sql_has_limit_but_no_offset() {
    let sql = select_sql("where__id__more_than=5", &[]);
    assert_eq!(
        sql,
        "SELECT n.id FROM notes n WHERE n.id > $1 ORDER BY n.created_at ASC, n.id ASC LIMIT $2"
    );
}

#[test]
fn page_sql_has_offset_and_scope_first() {
    let sql = select_sql("page=3&order__createdAt=DESC&where__title__like=x", &[("n.post_id", 7)]);
    assert_eq!(
        sql,
        "SELECT n.id FROM notes n WHERE n.post_id = $1 AND n.title LIKE $2 \
         ORDER BY n.created_at DESC, n.id DESC LIMIT $3 OFFSET $4"
    );
}

#[test]
fn in_between_and_null_sql() {
    let sql = select_sql("where__id__in=1,2&where__id__between=1,5&where__title__is_null=true", &[]);
    assert!(sql.contains("n.id IN ($1, $2)"));
    assert!(sql.contains("n.id BETWEEN $3 AND $4"));
    assert!(sql.contains("n.title IS NULL"));
}

#[test]
fn count_sql_shares_where_clause() {
    let query = parse("where__id__not=3");
    let filters = filters(&query).unwrap();
    let sql = count_builder::<Note>(&[("n.post_id", 1)], &filters).sql().to_owned();
    assert_eq!(sql, "SELECT COUNT(*) FROM notes n WHERE n.post_id = $1 AND n.id <> $2");
}

#[test]
fn user_input_never_reaches_sql_text() {
    let sql = select_sql("where__title=%27%3B%20DROP%20TABLE%20notes%3B--", &[]);
    assert!(!sql.contains("DROP"));
}

// =============================================================================
// NEXT URL
// =============================================================================

#[test]
fn next_url_appends_more_than_for_asc() {
    let query = parse("take=2&where__title__i_like=a");
    let next = query.next_url("http://localhost:3000", "posts", 42).unwrap();
    assert_eq!(
        next,
        "http://localhost:3000/posts?where__title__i_like=a&order__createdAt=ASC&take=2&where__id__more_than=42"
    );
}

#[test]
fn next_url_replaces_previous_cursor_for_desc() {
    let query = parse("order__createdAt=DESC&where__id__less_than=90");
    let next = query.next_url("https://sns.example.com", "posts/3/comments", 70).unwrap();
    assert_eq!(
        next,
        "https://sns.example.com/posts/3/comments?order__createdAt=DESC&take=20&where__id__less_than=70"
    );
    assert!(!next.contains("90"));
}

#[test]
fn next_url_rejects_relative_base() {
    let query = PaginationQuery::default();
    assert!(query.next_url("localhost", "posts", 1).is_err());
}

#[test]
fn cursor_result_serializes_flat() {
    let result: Paginated<i64> = Paginated::Cursor(CursorResult {
        data: vec![1, 2],
        cursor: Cursor { after: Some(2) },
        count: 2,
        next: Some("http://x/posts".into()),
    });
    let json = serde_json::to_value(result).unwrap();
    assert_eq!(json["cursor"]["after"], 2);
    assert_eq!(json["count"], 2);
    assert!(json.get("total").is_none());

    let page: Paginated<i64> = Paginated::Page(PageResult { data: vec![], total: 0 });
    assert_eq!(serde_json::to_value(page).unwrap(), serde_json::json!({"data": [], "total": 0}));
}
