mod common;

use common::{entry, store_with_source, FileStore};
use rss_enricher::utils::url::content_hash;
use rss_enricher::{EnrichmentStatus, IngestionGate, RawEntry, Result, MAX_ITEM_CONTENT_CHARS};
use tokio::task::JoinSet;

#[tokio::test]
async fn new_entry_creates_item_and_pending_request() -> Result<()> {
    let (store, source) = store_with_source("https://example.com/feed.xml").await;
    let gate = IngestionGate::new(store.clone());

    let created = gate
        .ingest(&entry("https://example.com/a?utm_source=rss", "Hello"), source.id)
        .await?;
    assert!(created);

    let key = content_hash("https://example.com/a", "Hello");
    let item = store.get_item_by_key(&key).await?.expect("item stored");
    assert_eq!(item.url, "https://example.com/a?utm_source=rss");
    assert_eq!(item.title, "Hello");
    assert_eq!(item.content, "Body of Hello");
    assert_eq!(item.source_id, source.id);

    let request = store
        .get_request_for_item(item.id)
        .await?
        .expect("request created with item");
    assert_eq!(request.status, EnrichmentStatus::Pending);
    assert!(request.summary.is_none());
    assert!(request.error.is_none());
    assert!(request.keywords.is_empty());
    Ok(())
}

#[tokio::test]
async fn ingesting_twice_is_idempotent() -> Result<()> {
    let (store, source) = store_with_source("https://example.com/feed.xml").await;
    let gate = IngestionGate::new(store.clone());
    let e = entry("https://example.com/post", "Same");

    assert!(gate.ingest(&e, source.id).await?);
    assert!(!gate.ingest(&e, source.id).await?);

    assert_eq!(store.count_items().await?, 1);
    assert_eq!(store.count_requests(EnrichmentStatus::Pending).await?, 1);
    Ok(())
}

#[tokio::test]
async fn tracking_parameters_do_not_create_duplicates() -> Result<()> {
    let (store, source) = store_with_source("https://example.com/feed.xml").await;
    let gate = IngestionGate::new(store.clone());

    assert!(gate.ingest(&entry("https://example.com/p?id=3", "T"), source.id).await?);
    assert!(
        !gate
            .ingest(
                &entry("https://example.com/p?utm_medium=social&id=3&utm_source=x", "T"),
                source.id
            )
            .await?
    );
    assert_eq!(store.count_items().await?, 1);
    Ok(())
}

#[tokio::test]
async fn same_url_with_different_titles_yields_two_items() -> Result<()> {
    let (store, source) = store_with_source("https://example.com/feed.xml").await;
    let gate = IngestionGate::new(store.clone());

    assert!(gate.ingest(&entry("https://example.com/x", "A"), source.id).await?);
    assert!(gate.ingest(&entry("https://example.com/x", "B"), source.id).await?);

    assert_eq!(store.count_items().await?, 2);
    assert_eq!(store.count_requests(EnrichmentStatus::Pending).await?, 2);
    Ok(())
}

#[tokio::test]
async fn entries_without_link_or_title_are_skipped() -> Result<()> {
    let (store, source) = store_with_source("https://example.com/feed.xml").await;
    let gate = IngestionGate::new(store.clone());

    let no_link = RawEntry {
        title: Some("Title".into()),
        ..Default::default()
    };
    let blank_title = RawEntry {
        link: Some("https://example.com/x".into()),
        title: Some("   ".into()),
        ..Default::default()
    };

    assert!(!gate.ingest(&no_link, source.id).await?);
    assert!(!gate.ingest(&blank_title, source.id).await?);
    assert_eq!(store.count_items().await?, 0);
    assert_eq!(store.count_requests(EnrichmentStatus::Pending).await?, 0);
    Ok(())
}

#[tokio::test]
async fn stored_content_is_sanitized_and_capped() -> Result<()> {
    let (store, source) = store_with_source("https://example.com/feed.xml").await;
    let gate = IngestionGate::new(store.clone());

    let long_body = format!(
        "<script>track()</script><p>{}</p>",
        "word ".repeat(MAX_ITEM_CONTENT_CHARS)
    );
    let raw = RawEntry {
        link: Some("https://example.com/long".into()),
        title: Some("Long".into()),
        body: Some(long_body),
        author: Some("Ada".into()),
        ..Default::default()
    };
    assert!(gate.ingest(&raw, source.id).await?);

    let item = store
        .get_item_by_key(&content_hash("https://example.com/long", "Long"))
        .await?
        .expect("item stored");
    assert_eq!(item.content.chars().count(), MAX_ITEM_CONTENT_CHARS);
    assert!(!item.content.contains("track()"));
    assert!(item.content.starts_with("word word"));
    assert_eq!(item.author.as_deref(), Some("Ada"));
    Ok(())
}

#[tokio::test]
async fn concurrent_identical_ingests_store_one_item() -> Result<()> {
    let (store, source) = store_with_source("https://example.com/feed.xml").await;
    let gate = IngestionGate::new(store.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gate = gate.clone();
        let e = entry("https://example.com/race", "Race");
        let source_id = source.id;
        handles.push(tokio::spawn(async move { gate.ingest(&e, source_id).await }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.expect("task completes")? {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(store.count_items().await?, 1);
    assert_eq!(store.count_requests(EnrichmentStatus::Pending).await?, 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_ingests_on_a_file_store_all_commit() -> Result<()> {
    let db = FileStore::new().await;
    let source = db
        .store
        .add_source("https://example.com/feed.xml", "Feed", 30, true)
        .await?;
    let gate = IngestionGate::new(db.store.clone());

    let mut writers = JoinSet::new();
    for writer in 0..10 {
        let gate = gate.clone();
        writers.spawn(async move {
            let mut created = 0;
            for n in 0..20 {
                let link = format!("https://example.com/{}/{}", writer, n);
                if gate.ingest(&entry(&link, &format!("Post {}-{}", writer, n)), source.id).await? {
                    created += 1;
                }
            }
            Ok::<_, rss_enricher::EnricherError>(created)
        });
    }

    let mut created = 0;
    while let Some(joined) = writers.join_next().await {
        created += joined.expect("writer task")?;
    }

    assert_eq!(created, 200);
    assert_eq!(db.store.count_items().await?, 200);
    assert_eq!(db.store.count_requests(EnrichmentStatus::Pending).await?, 200);
    db.close().await;
    Ok(())
}

#[tokio::test]
async fn racing_duplicates_on_a_file_store_store_one_item_each() -> Result<()> {
    let db = FileStore::new().await;
    let source = db
        .store
        .add_source("https://example.com/feed.xml", "Feed", 30, true)
        .await?;
    let gate = IngestionGate::new(db.store.clone());

    // Every writer offers the same 15 entries.
    let mut writers = JoinSet::new();
    for _ in 0..8 {
        let gate = gate.clone();
        writers.spawn(async move {
            let mut created = 0;
            for n in 0..15 {
                let link = format!("https://example.com/shared/{}", n);
                if gate.ingest(&entry(&link, &format!("Shared {}", n)), source.id).await? {
                    created += 1;
                }
            }
            Ok::<_, rss_enricher::EnricherError>(created)
        });
    }

    let mut created = 0;
    while let Some(joined) = writers.join_next().await {
        created += joined.expect("writer task")?;
    }

    assert_eq!(created, 15);
    assert_eq!(db.store.count_items().await?, 15);
    assert_eq!(db.store.count_requests(EnrichmentStatus::Pending).await?, 15);
    db.close().await;
    Ok(())
}
