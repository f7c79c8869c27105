use anyhow::Result;
use chrono::{TimeZone, Utc};
use interfaces::{Article, MemorySeenStore, SeenStore, SqliteSeenStore};

fn article(n: u32, day: Option<u32>) -> Article {
    let article = Article::new(format!("https://news.example.org/{n}"), format!("Story {n}"));
    match day {
        Some(day) => article.published(Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()),
        None => article,
    }
}

#[test]
fn test_memory_store_remembers_ids() {
    tokio_test::block_on(async {
        let store = MemorySeenStore::<Article>::new();
        assert!(store.is_empty().await);

        store.insert(article(1, Some(1))).await.unwrap();
        store.insert(article(1, Some(1))).await.unwrap();

        assert!(store.exists("https://news.example.org/1").await.unwrap());
        assert!(!store.exists("https://news.example.org/2").await.unwrap());
        assert_eq!(store.len().await, 1);
    });
}

#[tokio::test]
async fn test_memory_store_newest_first() -> Result<()> {
    let store = MemorySeenStore::<Article>::new();
    store.insert(article(1, Some(3))).await?;
    store.insert(article(2, None)).await?;
    store.insert(article(3, Some(9))).await?;
    store.insert(article(4, Some(5))).await?;

    let newest = store.newest(3).await?;
    let links: Vec<&str> = newest.iter().map(|a| a.link.as_str()).collect();
    assert_eq!(
        links,
        vec![
            "https://news.example.org/3",
            "https://news.example.org/4",
            "https://news.example.org/1"
        ]
    );
    assert_eq!(store.newest(10).await?.last(), Some(&article(2, None)));
    Ok(())
}

#[tokio::test]
async fn test_sqlite_store_exists_and_insert() -> Result<()> {
    let store = SqliteSeenStore::connect("sqlite::memory:").await?;
    assert_eq!(store.count().await?, 0);

    store.insert(article(1, Some(1))).await?;
    store.insert(article(1, Some(2))).await?;
    store.insert(article(2, None)).await?;

    assert_eq!(store.count().await?, 2);
    assert!(store.exists("https://news.example.org/1").await?);
    assert!(store.exists("https://news.example.org/2").await?);
    assert!(!store.exists("https://news.example.org/3").await?);
    Ok(())
}

#[tokio::test]
async fn test_sqlite_store_newest_first() -> Result<()> {
    let store = SqliteSeenStore::connect("sqlite::memory:").await?;
    store.insert(article(1, Some(3))).await?;
    store.insert(article(2, None)).await?;
    store.insert(article(3, Some(9))).await?;
    store.insert(article(4, Some(5))).await?;

    let newest = store.newest(10).await?;

    assert_eq!(newest.len(), 4);
    assert_eq!(newest[0], article(3, Some(9)));
    assert_eq!(newest[1], article(4, Some(5)));
    assert_eq!(newest[2], article(1, Some(3)));
    assert_eq!(newest[3], article(2, None));
    assert_eq!(store.newest(2).await?.len(), 2);
    Ok(())
}
