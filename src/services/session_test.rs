use super::*;

// =============================================================================
// bytes_to_hex
// =============================================================================

#[test]
fn bytes_to_hex_empty() {
    assert_eq!(bytes_to_hex(&[]), "");
}

#[test]
fn bytes_to_hex_leading_zero() {
    assert_eq!(bytes_to_hex(&[0x0a]), "0a");
}

#[test]
fn bytes_to_hex_multi_byte() {
    assert_eq!(bytes_to_hex(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
}

// =============================================================================
// tokens and tickets
// =============================================================================

#[test]
fn generate_token_is_64_hex_chars() {
    let token = generate_token();
    assert_eq!(token.len(), 64);
    assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn generate_token_two_calls_differ() {
    assert_ne!(generate_token(), generate_token());
}

#[test]
fn generate_ws_ticket_is_32_hex_chars() {
    let ticket = generate_ws_ticket();
    assert_eq!(ticket.len(), 32);
    assert!(ticket.chars().all(|c| c.is_ascii_hexdigit()));
}

// =============================================================================
// normalize_email
// =============================================================================

#[test]
fn normalize_email_trims_and_lowercases() {
    assert_eq!(normalize_email("  Ada@Example.COM "), Some("ada@example.com".into()));
}

#[test]
fn normalize_email_rejects_missing_at() {
    assert_eq!(normalize_email("ada.example.com"), None);
}

#[test]
fn normalize_email_rejects_empty_parts() {
    assert_eq!(normalize_email("@example.com"), None);
    assert_eq!(normalize_email("ada@"), None);
    assert_eq!(normalize_email(""), None);
}

#[test]
fn normalize_email_rejects_inner_whitespace() {
    assert_eq!(normalize_email("ada lovelace@example.com"), None);
}

#[test]
fn default_display_name_uses_local_part() {
    assert_eq!(default_display_name("ada@example.com"), "ada");
    assert_eq!(default_display_name("nodomain"), "nodomain");
}

// =============================================================================
// live database
// =============================================================================

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;

    async fn pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required for live-db-tests");
        let pool = PgPool::connect(&url).await.expect("connect");
        sqlx::migrate!("src/db/migrations").run(&pool).await.expect("migrate");
        pool
    }

    #[tokio::test]
    async fn login_session_and_ticket_lifecycle() {
        let pool = pool().await;
        let email = format!("{}@example.com", Uuid::new_v4());
        let user = upsert_user(&pool, &email, Some("Ada")).await.expect("upsert");
        assert_eq!(user.display_name, "Ada");
        assert_eq!(user.role, "member");

        let again = upsert_user(&pool, &email, None).await.expect("re-upsert");
        assert_eq!(again.id, user.id);
        assert_eq!(again.display_name, "Ada");

        let token = create_session(&pool, user.id).await.expect("session");
        let found = validate_session(&pool, &token).await.expect("validate").expect("user");
        assert_eq!(found.id, user.id);

        let ticket = create_ws_ticket(&pool, user.id).await.expect("ticket");
        assert_eq!(consume_ws_ticket(&pool, &ticket).await.expect("consume"), Some(user.id));
        assert_eq!(consume_ws_ticket(&pool, &ticket).await.expect("consume twice"), None);

        delete_session(&pool, &token).await.expect("delete");
        assert!(validate_session(&pool, &token).await.expect("validate").is_none());
    }
}
