//! Integration tests for the storage reconciliation pass.

use std::path::Path;

use chan_webm_archiver::config::Config;
use chan_webm_archiver::db::{
    get_media_by_digest, get_or_create_board, get_or_create_host, insert_media, Database,
    MediaInsert, NewMedia,
};
use chan_webm_archiver::digest::digest_bytes;
use chan_webm_archiver::reconcile;
use tempfile::TempDir;

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

fn create_test_config(media_dir: &Path) -> Config {
    Config {
        media_dir: media_dir.to_path_buf(),
        ..Config::for_testing()
    }
}

async fn write(path: &Path, contents: &[u8]) {
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(path, contents).await.unwrap();
}

async fn record(db: &Database, config: &Config, board: &str, path: &Path, contents: &[u8]) {
    let pool = db.pool();
    let host = get_or_create_host(pool, &config.host_name).await.unwrap();
    let board = get_or_create_board(pool, host.id, board).await.unwrap();
    let inserted = insert_media(
        pool,
        &NewMedia {
            digest: digest_bytes(contents),
            filename: "a.webm".to_string(),
            file_path: path.to_string_lossy().into_owned(),
            size_bytes: contents.len() as i64,
            board_id: board.id,
            post_id: None,
        },
    )
    .await
    .unwrap();
    assert!(matches!(inserted, MediaInsert::Created(_)));
}

#[tokio::test]
async fn test_reports_orphans_and_missing_files() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let config = create_test_config(&media_dir);

    let known = media_dir.join("g/g_3_known.webm");
    let orphan = media_dir.join("g/g_6_orphan.webm");
    let gone = media_dir.join("g/g_4_gone.webm");
    write(&known, b"one").await;
    write(&orphan, b"orphan").await;
    // Never counted as media
    write(&media_dir.join("g/t/thumb_g_3_known.webm.jpg"), b"jpg").await;
    write(&media_dir.join("g/.dl-abc.part"), b"partial").await;

    record(&db, &config, "g", &known, b"one").await;
    record(&db, &config, "g", &gone, b"gone").await;

    let report = reconcile::run(&config, &db, false).await.unwrap();
    assert_eq!(report.files_seen, 2);
    assert_eq!(report.known_files, 1);
    assert_eq!(report.orphan_files, vec![orphan.clone()]);
    assert_eq!(report.missing_files, vec![gone.to_string_lossy().into_owned()]);
    assert_eq!(report.backfilled, 0);
    assert_eq!(report.media_in_db, 2);

    // Report only: nothing was touched
    assert!(orphan.exists());
    assert!(get_media_by_digest(db.pool(), &digest_bytes(b"orphan"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_backfill_records_orphans() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let config = create_test_config(&media_dir);

    let orphan = media_dir.join("wsg/wsg_6_orphan.webm");
    let copy = media_dir.join("g/g_3_copy.webm");
    let known = media_dir.join("g/g_3_known.webm");
    write(&orphan, b"orphan").await;
    write(&known, b"one").await;
    write(&copy, b"one").await;
    record(&db, &config, "g", &known, b"one").await;

    let report = reconcile::run(&config, &db, true).await.unwrap();
    assert_eq!(report.backfilled, 1);
    assert_eq!(report.duplicate_on_disk, vec![copy]);

    let media = get_media_by_digest(db.pool(), &digest_bytes(b"orphan"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(media.file_path, orphan.to_string_lossy());
    assert_eq!(media.filename, "wsg_6_orphan.webm");
    assert_eq!(media.size_bytes, 6);
    assert!(media.post_id.is_none());

    // Backfilled rows are known on the next run
    let again = reconcile::run(&config, &db, true).await.unwrap();
    assert_eq!(again.backfilled, 0);
    assert_eq!(again.known_files, 2);
}
