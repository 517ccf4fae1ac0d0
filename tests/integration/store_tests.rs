use tg_stats::channel_store::{ChannelFilter, ChannelStore, PgChannelStore, StoreError};
use tg_stats::models::Channel;

use super::test_utils::{directory_channel, TestAssertions};
use super::TestDatabase;

fn metrics(tg_id: i64, sub_count: i64, avg_coverage: i64, er: f64, cpm: f64) -> Channel {
    Channel {
        sub_count,
        avg_coverage,
        er,
        cpm,
        ..Channel::from_fetcher(tg_id, "", "")
    }
}

#[tokio::test]
async fn test_insert_rejects_duplicates() {
    let db = TestDatabase::create_fresh().await.expect("Failed to create test database");
    let store = PgChannelStore::new(db.pool.clone());

    let channel = Channel {
        sub_count: 1_234,
        ..directory_channel(-1001, "Alpha", "https://t.me/+alpha", 500.0)
    };
    assert!(store.insert(&channel).await.unwrap());

    // same tg_id, different link
    let same_id = directory_channel(-1001, "Alpha", "https://t.me/+other", 500.0);
    assert!(!store.insert(&same_id).await.unwrap());

    // same link, different tg_id
    let same_link = directory_channel(-1002, "Beta", "https://t.me/+alpha", 500.0);
    assert!(!store.insert(&same_link).await.unwrap());

    TestAssertions::assert_channel_count(&db, 1)
        .await
        .expect("Channel count assertion failed");

    let stored = store.get_channel_by_telegram_id(-1001).await.unwrap().unwrap();
    assert_eq!(stored.name, "Alpha");
    assert_eq!(stored.post_price, 500.0);
    assert_eq!(stored.cpm, 0.0);
    assert_eq!(stored.owner_id, 42);
    assert_eq!(stored.sub_count, 1_234);

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_update_data_from_fetcher() {
    let db = TestDatabase::create_fresh().await.expect("Failed to create test database");
    let store = PgChannelStore::new(db.pool.clone());

    store
        .insert(&directory_channel(-1001, "Alpha", "https://t.me/+alpha", 600.0))
        .await
        .unwrap();

    let mut refreshed = metrics(-1001, 1_000, 300, 30.0, 2_000.0);
    refreshed.photo_path = "channel_img/1001.jpg".to_string();
    store.update_data_from_fetcher(&refreshed).await.unwrap();

    let stored = store.get_channel_by_telegram_id(-1001).await.unwrap().unwrap();
    assert_eq!(stored.sub_count, 1_000);
    assert_eq!(stored.avg_coverage, 300);
    assert_eq!(stored.er, 30.0);
    assert_eq!(stored.cpm, 2_000.0);
    assert_eq!(stored.photo_path, "channel_img/1001.jpg");
    // empty link keeps the stored one, directory fields are untouched
    assert_eq!(stored.tg_link, "https://t.me/+alpha");
    assert_eq!(stored.name, "Alpha");
    assert_eq!(stored.post_price, 600.0);
    TestAssertions::assert_refreshed(&db, -1001)
        .await
        .expect("Refresh assertion failed");

    let missing = store
        .update_data_from_fetcher(&metrics(-9999, 1, 1, 1.0, 0.0))
        .await;
    assert!(matches!(missing, Err(StoreError::ChannelNotFound(-9999))));

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_update_post_price_recomputes_cpm() {
    let db = TestDatabase::create_fresh().await.expect("Failed to create test database");
    let store = PgChannelStore::new(db.pool.clone());

    store
        .insert(&directory_channel(-1001, "Alpha", "https://t.me/+alpha", 0.0))
        .await
        .unwrap();
    store
        .update_data_from_fetcher(&metrics(-1001, 1_000, 300, 30.0, 0.0))
        .await
        .unwrap();
    let id = store.get_channel_by_telegram_id(-1001).await.unwrap().unwrap().id;

    assert!(store.update_post_price(id, 600.0).await.unwrap());
    let stored = store.get_channel_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.post_price, 600.0);
    assert_eq!(stored.cpm, 2_000.0);

    assert!(!store.update_post_price(id + 1_000, 10.0).await.unwrap());

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_get_all_filters_and_pages() {
    let db = TestDatabase::create_fresh().await.expect("Failed to create test database");
    let store = PgChannelStore::new(db.pool.clone());

    for i in 1..=20i64 {
        store
            .insert(&directory_channel(
                -1000 - i,
                &format!("Channel {}", i),
                &format!("https://t.me/+channel{}", i),
                0.0,
            ))
            .await
            .unwrap();
        store
            .update_data_from_fetcher(&metrics(-1000 - i, i * 100, i * 10, i as f64, 0.0))
            .await
            .unwrap();
    }

    let (first_page, total) = store.get_all(&ChannelFilter::new()).await.unwrap();
    assert_eq!(total, 20);
    assert_eq!(first_page.len(), 15);

    let (second_page, _) = store
        .get_all(&ChannelFilter::new().page(15, 15))
        .await
        .unwrap();
    assert_eq!(second_page.len(), 5);

    let filter = ChannelFilter::new()
        .subscribers(Some(500), Some(1_000))
        .er(Some(6.0), None);
    let (channels, total) = store.get_all(&filter).await.unwrap();
    assert_eq!(total, 5);
    assert!(channels.iter().all(|c| c.sub_count >= 600 && c.sub_count <= 1_000));

    let (channels, total) = store
        .get_all(&ChannelFilter::new().name("channel 1"))
        .await
        .unwrap();
    // "Channel 1" and "Channel 10" through "Channel 19"
    assert_eq!(total, 11);
    assert_eq!(channels.len(), 11);

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_get_channels_by_ids_and_delete() {
    let db = TestDatabase::create_fresh().await.expect("Failed to create test database");
    let store = PgChannelStore::new(db.pool.clone());

    for i in 1..=3i64 {
        store
            .insert(&directory_channel(
                -1000 - i,
                &format!("Channel {}", i),
                &format!("https://t.me/+channel{}", i),
                0.0,
            ))
            .await
            .unwrap();
    }
    let (all, _) = store.get_all(&ChannelFilter::new()).await.unwrap();
    let ids: Vec<i32> = all.iter().map(|c| c.id).collect();

    let selected = store.get_channels_by_ids(&[ids[2], ids[0]]).await.unwrap();
    assert_eq!(
        selected.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![ids[0], ids[2]]
    );

    assert!(store.delete(ids[1]).await.unwrap());
    assert!(!store.delete(ids[1]).await.unwrap());
    assert!(store.get_channel_by_id(ids[1]).await.unwrap().is_none());
    TestAssertions::assert_channel_count(&db, 2)
        .await
        .expect("Channel count assertion failed");

    db.cleanup().await.expect("Failed to cleanup test database");
}
