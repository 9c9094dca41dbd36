use crate::model::{GuestRecord, ImportRow};
use crate::phone;
use anyhow::Result;
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

/// Settings key for the check-in caption template.
pub const CAPTION_TEMPLATE_KEY: &str = "caption_template";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, make sure the parent directory exists so a
/// fresh deployment can open its database. In-memory URLs and non-sqlite
/// schemes pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let path = rest.trim_start_matches("//");
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    url.to_string()
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Import a batch of roster rows. A row is accepted iff both name and phone
/// are non-empty after trimming; the phone is normalized before storage and
/// an existing record of the same name is overwritten. The check-in flag of
/// an existing record survives re-import. Returns the number of rows
/// accepted. Commits before returning.
#[instrument(skip_all, fields(rows = rows.len()))]
pub async fn upsert_guests(pool: &Pool, rows: &[ImportRow], country_code: &str) -> Result<u32> {
    let mut tx = pool.begin().await?;
    let mut accepted = 0u32;
    for row in rows {
        let name = row.name.trim();
        let phone_raw = row.phone.trim();
        if name.is_empty() || phone_raw.is_empty() {
            continue;
        }
        let seat = row
            .seat
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("General");
        sqlx::query(
            "INSERT INTO guests (name, phone, seat, image_url) VALUES (?, ?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET \
                 phone = excluded.phone, \
                 seat = excluded.seat, \
                 image_url = excluded.image_url, \
                 updated_at = CURRENT_TIMESTAMP",
        )
        .bind(name)
        .bind(phone::normalize(phone_raw, country_code))
        .bind(seat)
        .bind(row.image_url.as_deref().map(str::trim).filter(|s| !s.is_empty()))
        .execute(&mut *tx)
        .await?;
        accepted += 1;
    }
    tx.commit().await?;
    Ok(accepted)
}

/// Look up a guest by name, case-insensitively.
#[instrument(skip_all)]
pub async fn get_guest(pool: &Pool, name: &str) -> Result<Option<GuestRecord>> {
    let guest = sqlx::query_as::<_, GuestRecord>("SELECT * FROM guests WHERE name = ?")
        .bind(name.trim())
        .fetch_optional(pool)
        .await?;
    Ok(guest)
}

/// Look up a guest whose stored contact ends with the given digit suffix.
/// Used by the manual-entry fallback when recognition is unavailable.
#[instrument(skip_all)]
pub async fn find_by_phone_suffix(pool: &Pool, suffix: &str) -> Result<Option<GuestRecord>> {
    if suffix.is_empty() {
        return Ok(None);
    }
    let guest = sqlx::query_as::<_, GuestRecord>(
        "SELECT * FROM guests WHERE phone LIKE ? ORDER BY rowid LIMIT 1",
    )
    .bind(format!("%{suffix}"))
    .fetch_optional(pool)
    .await?;
    Ok(guest)
}

/// All guests in insertion order.
#[instrument(skip_all)]
pub async fn list_guests(pool: &Pool) -> Result<Vec<GuestRecord>> {
    let guests = sqlx::query_as::<_, GuestRecord>("SELECT * FROM guests ORDER BY rowid")
        .fetch_all(pool)
        .await?;
    Ok(guests)
}

/// Delete a guest by name. Returns true iff a record existed.
#[instrument(skip_all)]
pub async fn delete_guest(pool: &Pool, name: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM guests WHERE name = ?")
        .bind(name.trim())
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Set the check-in flag on a guest. Returns true iff the record existed.
#[instrument(skip_all)]
pub async fn set_checked_in(pool: &Pool, name: &str, checked_in: bool) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE guests SET checked_in = ?, updated_at = CURRENT_TIMESTAMP WHERE name = ?",
    )
    .bind(checked_in)
    .bind(name.trim())
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Flip the check-in flag. Returns the new value, or None when no such guest.
#[instrument(skip_all)]
pub async fn toggle_checked_in(pool: &Pool, name: &str) -> Result<Option<bool>> {
    let res = sqlx::query(
        "UPDATE guests SET checked_in = NOT checked_in, updated_at = CURRENT_TIMESTAMP \
         WHERE name = ?",
    )
    .bind(name.trim())
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Ok(None);
    }
    let value = sqlx::query_scalar::<_, bool>("SELECT checked_in FROM guests WHERE name = ?")
        .bind(name.trim())
        .fetch_one(pool)
        .await?;
    Ok(Some(value))
}

#[instrument(skip_all)]
pub async fn get_setting(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[instrument(skip_all)]
pub async fn set_setting(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// The active check-in caption template: the stored override when one has
/// been saved, otherwise the configured default.
pub async fn caption_template(pool: &Pool, default: &str) -> Result<String> {
    Ok(get_setting(pool, CAPTION_TEMPLATE_KEY)
        .await?
        .unwrap_or_else(|| default.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn row(name: &str, phone: &str, seat: Option<&str>) -> ImportRow {
        ImportRow {
            name: name.into(),
            phone: phone.into(),
            seat: seat.map(str::to_string),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn import_normalizes_and_defaults_seat() {
        let pool = setup_pool().await;
        let accepted = upsert_guests(&pool, &[row("Bob", "9876543210", None)], "91")
            .await
            .unwrap();
        assert_eq!(accepted, 1);

        let bob = get_guest(&pool, "Bob").await.unwrap().unwrap();
        assert_eq!(bob.phone, "919876543210");
        assert_eq!(bob.seat, "General");
        assert!(!bob.checked_in);
    }

    #[tokio::test]
    async fn reimport_is_idempotent_and_later_wins() {
        let pool = setup_pool().await;
        upsert_guests(&pool, &[row("Alice", "9876543210", Some("A1"))], "91")
            .await
            .unwrap();
        set_checked_in(&pool, "Alice", true).await.unwrap();

        upsert_guests(&pool, &[row("Alice", "1111111111", Some("B2"))], "91")
            .await
            .unwrap();

        let all = list_guests(&pool).await.unwrap();
        assert_eq!(all.len(), 1);
        let alice = &all[0];
        assert_eq!(alice.phone, "911111111111");
        assert_eq!(alice.seat, "B2");
        // Re-import must not reset the check-in flag.
        assert!(alice.checked_in);
    }

    #[tokio::test]
    async fn rows_without_name_or_phone_are_rejected() {
        let pool = setup_pool().await;
        let rows = vec![
            row("", "123", None),
            row("  ", "123", None),
            row("Carol", "", None),
            row("Dave", "  ", None),
            row("Eve", "5551234", None),
        ];
        let accepted = upsert_guests(&pool, &rows, "91").await.unwrap();
        assert_eq!(accepted, 1);
        assert_eq!(list_guests(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let pool = setup_pool().await;
        upsert_guests(&pool, &[row("Alice", "9876543210", Some("A12"))], "91")
            .await
            .unwrap();

        let found = get_guest(&pool, "alice").await.unwrap().unwrap();
        assert_eq!(found.name, "Alice");
        let found = get_guest(&pool, "ALICE").await.unwrap().unwrap();
        assert_eq!(found.seat, "A12");
        assert!(get_guest(&pool, "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let pool = setup_pool().await;
        upsert_guests(&pool, &[row("Bob", "9876543210", None)], "91")
            .await
            .unwrap();
        assert!(delete_guest(&pool, "bob").await.unwrap());
        assert!(!delete_guest(&pool, "bob").await.unwrap());
    }

    #[tokio::test]
    async fn toggle_flips_check_in() {
        let pool = setup_pool().await;
        upsert_guests(&pool, &[row("Bob", "9876543210", None)], "91")
            .await
            .unwrap();
        assert_eq!(toggle_checked_in(&pool, "Bob").await.unwrap(), Some(true));
        assert_eq!(toggle_checked_in(&pool, "Bob").await.unwrap(), Some(false));
        assert_eq!(toggle_checked_in(&pool, "ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn phone_suffix_lookup() {
        let pool = setup_pool().await;
        upsert_guests(&pool, &[row("Alice", "9876543210", None)], "91")
            .await
            .unwrap();

        let found = find_by_phone_suffix(&pool, "9876543210").await.unwrap();
        assert_eq!(found.unwrap().name, "Alice");
        assert!(find_by_phone_suffix(&pool, "0000000000")
            .await
            .unwrap()
            .is_none());
        assert!(find_by_phone_suffix(&pool, "").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn settings_roundtrip_and_template_fallback() {
        let pool = setup_pool().await;
        assert_eq!(
            caption_template(&pool, "default {name}").await.unwrap(),
            "default {name}"
        );
        set_setting(&pool, CAPTION_TEMPLATE_KEY, "Hi {name}, seat {seat}")
            .await
            .unwrap();
        assert_eq!(
            caption_template(&pool, "default {name}").await.unwrap(),
            "Hi {name}, seat {seat}"
        );
        set_setting(&pool, CAPTION_TEMPLATE_KEY, "v2").await.unwrap();
        assert_eq!(caption_template(&pool, "d").await.unwrap(), "v2");
    }
}
