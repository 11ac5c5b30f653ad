//! Reference-data and article storage on SQLite.
//!
//! The pipeline only reads `companies`. It inserts into `news_articles` once
//! per run in a single transaction, and later fills in `cluster_id` /
//! `is_representative` for rows that do not have one yet. Nothing here ever
//! deletes a row or overwrites a non-NULL cluster id.

use crate::models::{ClusterAssignment, Entity, NewArticle, StoredArticle};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

/// Open (creating if missing) the database at `database_url`.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Create tables and indexes if they do not exist. Idempotent.
#[instrument(level = "info", skip_all)]
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS companies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name_ko TEXT NOT NULL,
            name_en TEXT,
            corp_code TEXT UNIQUE,
            stock_code TEXT,
            search_alias TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS news_articles (
            article_id INTEGER PRIMARY KEY AUTOINCREMENT,
            company_id INTEGER NOT NULL REFERENCES companies(id),
            title TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            url_hash TEXT NOT NULL UNIQUE,
            content TEXT,
            published_at TIMESTAMP,
            search_keyword TEXT,
            score INTEGER NOT NULL DEFAULT 0,
            matched_keywords TEXT,
            is_passed_rule BOOLEAN NOT NULL DEFAULT 0,
            cluster_id INTEGER,
            is_representative BOOLEAN,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_news_articles_company ON news_articles(company_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_news_articles_unclustered ON news_articles(is_passed_rule, cluster_id)",
    )
    .execute(pool)
    .await?;

    info!("Schema is up to date");
    Ok(())
}

/// All tracked companies, ordered by id. The alias falls back to `name_ko`.
pub async fn load_entities(pool: &SqlitePool) -> Result<Vec<Entity>, sqlx::Error> {
    let rows: Vec<(i64, String, String)> = sqlx::query_as(
        r#"
        SELECT id, name_ko, COALESCE(NULLIF(TRIM(search_alias), ''), name_ko)
        FROM companies
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, name, alias)| Entity { id, name, alias })
        .collect())
}

/// alias → company id. When two companies share an alias the highest id wins.
#[instrument(level = "info", skip_all)]
pub async fn load_entity_map(pool: &SqlitePool) -> Result<HashMap<String, i64>, sqlx::Error> {
    let mut map = HashMap::new();
    for entity in load_entities(pool).await? {
        if let Some(replaced) = map.insert(entity.alias.clone(), entity.id) {
            warn!(
                alias = %entity.alias,
                company = %entity.name,
                id = entity.id,
                replaced,
                "Alias shared by several companies; keeping the newest"
            );
        }
    }
    info!(count = map.len(), "Loaded company map");
    Ok(map)
}

/// Content hashes of every stored article.
#[instrument(level = "info", skip_all)]
pub async fn load_existing_hashes(pool: &SqlitePool) -> Result<HashSet<String>, sqlx::Error> {
    let hashes: Vec<String> = sqlx::query_scalar("SELECT url_hash FROM news_articles")
        .fetch_all(pool)
        .await?;
    info!(count = hashes.len(), "Loaded existing URL hashes");
    Ok(hashes.into_iter().collect())
}

/// Insert every staged article in one transaction.
///
/// Any failing row rolls the whole batch back; the error is returned and
/// nothing from the batch is visible afterwards.
#[instrument(level = "info", skip_all, fields(count = articles.len()))]
pub async fn insert_articles(pool: &SqlitePool, articles: &[NewArticle]) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for article in articles {
        let result = sqlx::query(
            r#"
            INSERT INTO news_articles
                (company_id, title, url, url_hash, content, published_at,
                 search_keyword, score, matched_keywords, is_passed_rule)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(article.company_id)
        .bind(&article.title)
        .bind(&article.url)
        .bind(&article.url_hash)
        .bind(&article.body)
        .bind(article.published_at)
        .bind(&article.search_alias)
        .bind(article.score)
        .bind(&article.matched_keywords)
        .bind(article.passed)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    debug!(inserted, "Committed article batch");
    Ok(inserted)
}

/// Passed, unclustered articles with a body, oldest first.
pub async fn load_unclustered(pool: &SqlitePool) -> Result<Vec<StoredArticle>, sqlx::Error> {
    let rows: Vec<(i64, String, String)> = sqlx::query_as(
        r#"
        SELECT article_id, url_hash, content
        FROM news_articles
        WHERE is_passed_rule = 1
          AND cluster_id IS NULL
          AND content IS NOT NULL
          AND content != ''
        ORDER BY published_at IS NULL, published_at ASC, article_id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(article_id, url_hash, body)| StoredArticle {
            article_id,
            url_hash,
            body,
        })
        .collect())
}

/// Highest cluster id handed out so far, or 0.
pub async fn max_cluster_id(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COALESCE(MAX(cluster_id), 0) FROM news_articles")
        .fetch_one(pool)
        .await
}

/// Write cluster ids and representative flags in one transaction.
///
/// Rows that already carry a cluster id are left untouched. Returns the
/// number of rows updated.
#[instrument(level = "info", skip_all, fields(clusters = clusters.len()))]
pub async fn apply_cluster_assignments(
    pool: &SqlitePool,
    clusters: &[ClusterAssignment],
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut updated = 0u64;

    for cluster in clusters {
        for (i, url_hash) in cluster.members.iter().enumerate() {
            let result = sqlx::query(
                r#"
                UPDATE news_articles
                SET cluster_id = ?, is_representative = ?
                WHERE url_hash = ? AND cluster_id IS NULL
                "#,
            )
            .bind(cluster.cluster_id)
            .bind(i == 0)
            .bind(url_hash)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected();
        }
    }

    tx.commit().await?;
    Ok(updated)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    /// A migrated in-memory database on a single connection.
    pub(crate) async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    pub(crate) async fn seed_company(pool: &SqlitePool, name: &str, alias: Option<&str>) -> i64 {
        sqlx::query("INSERT INTO companies (name_ko, search_alias) VALUES (?, ?)")
            .bind(name)
            .bind(alias)
            .execute(pool)
            .await
            .unwrap()
            .last_insert_rowid()
    }

    pub(crate) fn new_article(company_id: i64, url: &str, passed: bool) -> NewArticle {
        NewArticle {
            company_id,
            title: format!("title for {url}"),
            url: url.to_string(),
            url_hash: crate::utils::content_hash(url),
            body: format!("body for {url}"),
            published_at: None,
            search_alias: "KT".to_string(),
            score: if passed { 15 } else { 0 },
            matched_keywords: r#"{"matches":[]}"#.to_string(),
            passed,
        }
    }

    async fn count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM news_articles")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_entity_map_alias_fallback_and_duplicates() {
        let pool = memory_pool().await;
        seed_company(&pool, "삼성전자", None).await;
        let first_kt = seed_company(&pool, "케이티", Some("KT")).await;
        let second_kt = seed_company(&pool, "KT 주식회사", Some("KT")).await;
        seed_company(&pool, "SK하이닉스", Some("  ")).await;

        let map = load_entity_map(&pool).await.unwrap();
        assert_eq!(map.len(), 3);
        assert!(map.contains_key("삼성전자"));
        assert!(map.contains_key("SK하이닉스"));
        assert_eq!(map["KT"], second_kt);
        assert_ne!(map["KT"], first_kt);

        let entities = load_entities(&pool).await.unwrap();
        assert_eq!(entities[1].name, "케이티");
        assert_eq!(entities[3].alias, "SK하이닉스");
    }

    #[tokio::test]
    async fn test_insert_and_existing_hashes() {
        let pool = memory_pool().await;
        let id = seed_company(&pool, "케이티", Some("KT")).await;
        let batch = vec![
            new_article(id, "https://a.com/1", true),
            new_article(id, "https://a.com/2", false),
        ];
        assert_eq!(insert_articles(&pool, &batch).await.unwrap(), 2);

        let hashes = load_existing_hashes(&pool).await.unwrap();
        assert!(hashes.contains(&crate::utils::content_hash("https://a.com/1")));
        assert_eq!(hashes.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_atomicity_on_duplicate_hash() {
        let pool = memory_pool().await;
        let id = seed_company(&pool, "케이티", Some("KT")).await;
        let batch = vec![
            new_article(id, "https://a.com/1", true),
            new_article(id, "https://a.com/2", true),
            new_article(id, "https://a.com/1", true),
        ];
        assert!(insert_articles(&pool, &batch).await.is_err());
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_batch_atomicity_on_unknown_company() {
        let pool = memory_pool().await;
        let id = seed_company(&pool, "케이티", Some("KT")).await;
        let batch = vec![
            new_article(id, "https://a.com/1", true),
            new_article(id + 100, "https://a.com/2", true),
        ];
        assert!(insert_articles(&pool, &batch).await.is_err());
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_load_unclustered_order_and_scope() {
        let pool = memory_pool().await;
        let id = seed_company(&pool, "케이티", Some("KT")).await;
        let mut undated = new_article(id, "https://a.com/undated", true);
        undated.published_at = None;
        let mut newer = new_article(id, "https://a.com/newer", true);
        newer.published_at = Some(Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap());
        let mut older = new_article(id, "https://a.com/older", true);
        older.published_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        let failed = new_article(id, "https://a.com/failed", false);
        insert_articles(&pool, &[undated, newer, older, failed]).await.unwrap();

        let urls: Vec<String> = load_unclustered(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.body)
            .collect();
        assert_eq!(
            urls,
            vec![
                "body for https://a.com/older",
                "body for https://a.com/newer",
                "body for https://a.com/undated"
            ]
        );
    }

    #[tokio::test]
    async fn test_cluster_writes_only_touch_null_rows() {
        let pool = memory_pool().await;
        let id = seed_company(&pool, "케이티", Some("KT")).await;
        let a = new_article(id, "https://a.com/1", true);
        let b = new_article(id, "https://a.com/2", true);
        insert_articles(&pool, &[a.clone(), b.clone()]).await.unwrap();

        let first = ClusterAssignment {
            cluster_id: 1,
            members: vec![a.url_hash.clone(), b.url_hash.clone()],
        };
        assert_eq!(apply_cluster_assignments(&pool, &[first]).await.unwrap(), 2);
        assert_eq!(max_cluster_id(&pool).await.unwrap(), 1);

        let second = ClusterAssignment {
            cluster_id: 7,
            members: vec![b.url_hash.clone(), a.url_hash.clone()],
        };
        assert_eq!(apply_cluster_assignments(&pool, &[second]).await.unwrap(), 0);
        assert_eq!(max_cluster_id(&pool).await.unwrap(), 1);
        assert!(load_unclustered(&pool).await.unwrap().is_empty());
    }
}
