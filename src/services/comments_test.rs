use super::*;
#[cfg(feature = "live-db-tests")]
use crate::state::test_helpers::{integration_pool, seed_user};

#[test]
fn comment_fields_exclude_author_columns() {
    assert_eq!(Comment::field("comment").map(|f| f.column), Some("c.comment"));
    assert_eq!(Comment::field("createdAt").map(|f| f.kind), Some(FieldKind::Timestamp));
    assert!(Comment::field("authorId").is_none());
    assert!(Comment::field("updatedAt").is_none());
}

#[test]
fn dto_validation() {
    assert!(CreateCommentDto { comment: "nice".into() }.validate().is_ok());
    assert!(CreateCommentDto { comment: String::new() }.validate().is_err());
    assert!(UpdateCommentDto { comment: None }.validate().is_ok());
    assert!(UpdateCommentDto { comment: Some(String::new()) }.validate().is_err());
}

#[test]
fn error_codes() {
    assert_eq!(CommentError::NotFound(3).error_code(), "E_COMMENT_NOT_FOUND");
    assert_eq!(CommentError::Forbidden(3).error_code(), "E_FORBIDDEN");
    assert!(!CommentError::Forbidden(3).retryable());
}

#[cfg(feature = "live-db-tests")]
async fn seed_post(pool: &PgPool, author_id: i64) -> i64 {
    sqlx::query_scalar("INSERT INTO posts (author_id, title, content) VALUES ($1, 't', 'c') RETURNING id")
        .bind(author_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[cfg(feature = "live-db-tests")]
async fn comment_count(pool: &PgPool, post_id: i64) -> i32 {
    sqlx::query_scalar("SELECT comment_count FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn create_and_delete_keep_comment_count_in_step() {
    let pool = integration_pool().await;
    let author_id = seed_user(&pool, "commenter", "USER").await;
    let author = crate::services::users::get_user_by_id(&pool, author_id).await.unwrap().unwrap();
    let post_id = seed_post(&pool, author_id).await;

    let first = create_comment(&pool, post_id, author_id, CreateCommentDto { comment: "one".into() })
        .await
        .unwrap();
    create_comment(&pool, post_id, author_id, CreateCommentDto { comment: "two".into() })
        .await
        .unwrap();
    assert_eq!(comment_count(&pool, post_id).await, 2);
    assert_eq!(first.author.nickname, "commenter");

    assert_eq!(delete_comment(&pool, post_id, first.id, &author).await.unwrap(), first.id);
    assert_eq!(comment_count(&pool, post_id).await, 1);
    assert!(matches!(
        get_comment_by_id(&pool, post_id, first.id).await,
        Err(CommentError::NotFound(_))
    ));
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn strangers_cannot_edit_and_failed_delete_keeps_count() {
    let pool = integration_pool().await;
    let owner_id = seed_user(&pool, "owner", "USER").await;
    let stranger_id = seed_user(&pool, "stranger", "USER").await;
    let stranger = crate::services::users::get_user_by_id(&pool, stranger_id).await.unwrap().unwrap();
    let post_id = seed_post(&pool, owner_id).await;

    let comment = create_comment(&pool, post_id, owner_id, CreateCommentDto { comment: "mine".into() })
        .await
        .unwrap();

    let dto = UpdateCommentDto { comment: Some("hijacked".into()) };
    assert!(matches!(
        update_comment(&pool, post_id, comment.id, &stranger, dto).await,
        Err(CommentError::Forbidden(_))
    ));
    assert!(matches!(
        delete_comment(&pool, post_id, comment.id, &stranger).await,
        Err(CommentError::Forbidden(_))
    ));
    assert_eq!(comment_count(&pool, post_id).await, 1);
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn pagination_is_scoped_to_the_post() {
    let pool = integration_pool().await;
    let author_id = seed_user(&pool, "scoped", "USER").await;
    let post_a = seed_post(&pool, author_id).await;
    let post_b = seed_post(&pool, author_id).await;
    for text in ["a1", "a2"] {
        create_comment(&pool, post_a, author_id, CreateCommentDto { comment: text.into() })
            .await
            .unwrap();
    }
    create_comment(&pool, post_b, author_id, CreateCommentDto { comment: "b1".into() })
        .await
        .unwrap();

    let query = PaginationQuery::parse(Some("take=1")).unwrap();
    let Paginated::Cursor(page) = paginate_comments(&pool, post_a, &query, "http://localhost:3000").await.unwrap() else {
        panic!("expected cursor result");
    };
    assert_eq!(page.data[0].comment, "a1");
    let next = page.next.expect("full page should link onward");
    assert!(next.starts_with(&format!("http://localhost:3000/posts/{post_a}/comments?")));
}
