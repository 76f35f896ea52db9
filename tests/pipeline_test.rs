//! End-to-end harvest passes against a mocked origin.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chan_webm_archiver::api::ApiClient;
use chan_webm_archiver::config::Config;
use chan_webm_archiver::db::{
    count_media, count_media_aliases, count_posts, get_aliases_for_media, get_media_by_digest,
    get_or_create_board, get_or_create_host, get_post_by_source_id, get_post_replies, get_thread,
    insert_media, Database, NewMedia,
};
use chan_webm_archiver::digest::{digest_bytes, digest_token};
use chan_webm_archiver::harvest::naming::thumbnail_path;
use chan_webm_archiver::harvest::{Harvester, ThumbnailError, Thumbnailer};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WEBM: &[u8] = b"\x1a\x45\xdf\xa3 pretend this is a webm";
/// Same size as `WEBM`, different bytes.
const OTHER_WEBM: &[u8] = b"\x1a\x45\xdf\xa3 another clip same size";

/// Writes an empty thumbnail, or fails every time.
struct FakeThumbnailer {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeThumbnailer {
    fn working() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Thumbnailer for FakeThumbnailer {
    async fn generate(&self, media_path: &Path) -> Result<PathBuf, ThumbnailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ThumbnailError::Failed {
                path: media_path.to_path_buf(),
                stderr: "corrupt input".to_string(),
            });
        }
        let thumb = thumbnail_path(media_path);
        tokio::fs::create_dir_all(thumb.parent().unwrap()).await.unwrap();
        tokio::fs::write(&thumb, b"jpg").await.unwrap();
        Ok(thumb)
    }
}

/// Claims the storage path under another digest while the thumbnail is being
/// made, as a concurrent writer of different content would.
struct PathSquatter {
    db: Database,
    board_id: i64,
}

#[async_trait]
impl Thumbnailer for PathSquatter {
    async fn generate(&self, media_path: &Path) -> Result<PathBuf, ThumbnailError> {
        insert_media(
            self.db.pool(),
            &NewMedia {
                digest: digest_bytes(b"someone else"),
                filename: "other.webm".to_string(),
                file_path: media_path.to_string_lossy().into_owned(),
                size_bytes: 12,
                board_id: self.board_id,
                post_id: None,
            },
        )
        .await
        .unwrap();
        Err(ThumbnailError::Failed {
            path: media_path.to_path_buf(),
            stderr: "skipped".to_string(),
        })
    }
}

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

fn create_test_config(server: &MockServer, media_dir: &Path, boards: &[&str]) -> Config {
    Config {
        api_base_url: server.uri(),
        media_base_url: server.uri(),
        media_dir: media_dir.to_path_buf(),
        boards: boards.iter().map(|b| (*b).to_string()).collect(),
        board_concurrency: 2,
        ..Config::for_testing()
    }
}

fn harvester(config: &Config, db: &Database, thumbnailer: Arc<FakeThumbnailer>) -> Harvester {
    let api = ApiClient::new(config).unwrap();
    Harvester::from_config(config, db.clone(), api, thumbnailer)
}

fn webm_post(no: u64, filename: &str, tim: u64, body: &str) -> serde_json::Value {
    webm_post_with(no, filename, tim, body, WEBM)
}

fn webm_post_with(no: u64, filename: &str, tim: u64, body: &str, bytes: &[u8]) -> serde_json::Value {
    json!({
        "no": no,
        "time": 1_700_000_000 + no,
        "com": body,
        "filename": filename,
        "ext": ".webm",
        "fsize": bytes.len(),
        "md5": digest_bytes(bytes),
        "tim": tim,
    })
}

async fn mount_file(server: &MockServer, board: &str, tim: u64, bytes: &'static [u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/{board}/{tim}.webm")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
        .mount(server)
        .await;
}

async fn mount_catalog(server: &MockServer, board: &str, threads: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/{board}/catalog.json")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"page": 1, "threads": threads}
        ])))
        .mount(server)
        .await;
}

async fn mount_thread(server: &MockServer, board: &str, no: u64, posts: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/{board}/thread/{no}.json")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "posts": posts })))
        .mount(server)
        .await;
}

/// Stored media files under the media root, thumbnails excluded.
fn stored_webms(media_dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(boards) = std::fs::read_dir(media_dir) else {
        return found;
    };
    for board in boards.flatten() {
        for entry in std::fs::read_dir(board.path()).unwrap().flatten() {
            if entry.file_type().unwrap().is_file() {
                found.push(entry.path());
            }
        }
    }
    found.sort();
    found
}

#[tokio::test]
async fn test_duplicate_digest_in_one_thread_creates_alias() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let server = MockServer::start().await;

    mount_catalog(&server, "g", json!([{"no": 100, "ext": ".webm"}])).await;
    mount_thread(
        &server,
        "g",
        100,
        json!([
            webm_post(1, "a", 1001, "first"),
            webm_post(2, "b", 1002, "<a href=\"#p1\" class=\"quotelink\">&gt;&gt;1</a> same one"),
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/g/1001.webm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WEBM))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/g/1002.webm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WEBM))
        .expect(0)
        .mount(&server)
        .await;

    let config = create_test_config(&server, &media_dir, &["g"]);
    let thumbnailer = FakeThumbnailer::working();
    let report = harvester(&config, &db, thumbnailer.clone())
        .run_pass(&CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.has_fatal());
    let totals = report.totals();
    assert_eq!(totals.threads_scanned, 1);
    assert_eq!(totals.threads_new, 1);
    assert_eq!(totals.posts_seen, 2);
    assert_eq!(totals.posts_new, 2);
    assert_eq!(totals.media_created, 1);
    assert_eq!(totals.aliases_recorded, 1);
    assert_eq!(thumbnailer.calls.load(Ordering::SeqCst), 1);

    let pool = db.pool();
    assert_eq!(count_media(pool).await.unwrap(), 1);
    assert_eq!(count_media_aliases(pool).await.unwrap(), 1);

    let host = get_or_create_host(pool, &config.host_name).await.unwrap();
    let board = get_or_create_board(pool, host.id, "g").await.unwrap();
    let thread = get_thread(pool, board.id, 100).await.unwrap().unwrap();
    let post1 = get_post_by_source_id(pool, thread.id, 1).await.unwrap().unwrap();
    let post2 = get_post_by_source_id(pool, thread.id, 2).await.unwrap().unwrap();

    let media = get_media_by_digest(pool, &digest_bytes(WEBM)).await.unwrap().unwrap();
    assert_eq!(media.filename, "a.webm");
    assert_eq!(media.post_id, Some(post1.id));
    assert_eq!(media.board_id, board.id);
    assert_eq!(media.size_bytes, WEBM.len() as i64);

    let expected_path = media_dir.join("g").join(format!("g_{}_a.webm", WEBM.len()));
    assert_eq!(media.file_path, expected_path.to_string_lossy());
    assert_eq!(tokio::fs::read(&expected_path).await.unwrap(), WEBM);
    assert!(thumbnail_path(&expected_path).exists());

    let aliases = get_aliases_for_media(pool, media.id).await.unwrap();
    assert_eq!(aliases.len(), 1);
    assert_eq!(aliases[0].filename, "b.webm");
    assert_eq!(aliases[0].post_id, post2.id);

    // Reply linkage resolves against the earlier post
    let replies = get_post_replies(pool, post2.id).await.unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].target_source_id, 1);
    assert_eq!(replies[0].target_post_id, Some(post1.id));

    assert_eq!(stored_webms(&media_dir), vec![expected_path]);
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let server = MockServer::start().await;

    mount_catalog(&server, "g", json!([{"no": 100, "ext": ".webm"}])).await;
    mount_thread(
        &server,
        "g",
        100,
        json!([webm_post(1, "a", 1001, ""), webm_post(2, "b", 1002, "")]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/g/1001.webm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WEBM))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server, &media_dir, &["g"]);
    let thumbnailer = FakeThumbnailer::working();
    let harvester = harvester(&config, &db, thumbnailer.clone());
    let cancel = CancellationToken::new();

    harvester.run_pass(&cancel).await.unwrap();
    let pool = db.pool();
    let posts = count_posts(pool).await.unwrap();
    let media = count_media(pool).await.unwrap();
    let aliases = count_media_aliases(pool).await.unwrap();

    let second = harvester.run_pass(&cancel).await.unwrap();
    let totals = second.totals();
    assert_eq!(totals.threads_new, 0);
    assert_eq!(totals.posts_seen, 2);
    assert_eq!(totals.posts_new, 0);
    assert_eq!(totals.media_created, 0);
    assert_eq!(totals.aliases_recorded, 0);
    assert_eq!(totals.already_recorded, 2);

    assert_eq!(count_posts(pool).await.unwrap(), posts);
    assert_eq!(count_media(pool).await.unwrap(), media);
    assert_eq!(count_media_aliases(pool).await.unwrap(), aliases);
    assert_eq!(thumbnailer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(stored_webms(&media_dir).len(), 1);
}

#[tokio::test]
async fn test_failed_download_is_retried_next_pass() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let server = MockServer::start().await;

    mount_catalog(&server, "g", json!([{"no": 100, "ext": ".webm"}])).await;
    mount_thread(&server, "g", 100, json!([webm_post(1, "a", 1001, "")])).await;
    // First request fails, later ones succeed
    Mock::given(method("GET"))
        .and(path("/g/1001.webm"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/g/1001.webm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WEBM))
        .mount(&server)
        .await;

    let config = create_test_config(&server, &media_dir, &["g"]);
    let harvester = harvester(&config, &db, FakeThumbnailer::working());
    let cancel = CancellationToken::new();

    let first = harvester.run_pass(&cancel).await.unwrap();
    assert!(!first.has_fatal());
    assert_eq!(first.totals().download_failures, 1);
    assert_eq!(first.totals().media_created, 0);
    assert!(get_media_by_digest(db.pool(), &digest_bytes(WEBM))
        .await
        .unwrap()
        .is_none());
    assert!(stored_webms(&media_dir).is_empty());

    let second = harvester.run_pass(&cancel).await.unwrap();
    assert_eq!(second.totals().media_created, 1);
    assert_eq!(stored_webms(&media_dir).len(), 1);
}

#[tokio::test]
async fn test_truncated_download_leaves_nothing_behind() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let server = MockServer::start().await;

    mount_catalog(&server, "g", json!([{"no": 100, "ext": ".webm"}])).await;
    mount_thread(&server, "g", 100, json!([webm_post(1, "a", 1001, "")])).await;
    Mock::given(method("GET"))
        .and(path("/g/1001.webm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(&WEBM[..5]))
        .mount(&server)
        .await;

    let config = create_test_config(&server, &media_dir, &["g"]);
    let report = harvester(&config, &db, FakeThumbnailer::working())
        .run_pass(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.totals().download_failures, 1);
    assert_eq!(count_media(db.pool()).await.unwrap(), 0);
    assert!(stored_webms(&media_dir).is_empty());
}

#[tokio::test]
async fn test_thumbnail_failure_keeps_media() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let server = MockServer::start().await;

    mount_catalog(&server, "g", json!([{"no": 100, "ext": ".webm"}])).await;
    mount_thread(&server, "g", 100, json!([webm_post(1, "a", 1001, "")])).await;
    Mock::given(method("GET"))
        .and(path("/g/1001.webm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WEBM))
        .mount(&server)
        .await;

    let config = create_test_config(&server, &media_dir, &["g"]);
    let report = harvester(&config, &db, FakeThumbnailer::broken())
        .run_pass(&CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.has_fatal());
    assert_eq!(report.totals().media_created, 1);
    assert_eq!(report.totals().thumbnail_failures, 1);

    let media = get_media_by_digest(db.pool(), &digest_bytes(WEBM))
        .await
        .unwrap()
        .unwrap();
    let stored = PathBuf::from(&media.file_path);
    assert!(stored.exists());
    assert!(!thumbnail_path(&stored).exists());
}

#[tokio::test]
async fn test_same_digest_on_two_boards_stored_once() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let server = MockServer::start().await;

    for (board, thread, tim) in [("g", 100, 1001), ("wsg", 200, 2001)] {
        mount_catalog(&server, board, json!([{"no": thread, "ext": ".webm"}])).await;
        mount_thread(&server, board, thread, json!([webm_post(thread, "clip", tim, "")])).await;
        Mock::given(method("GET"))
            .and(path(format!("/{board}/{tim}.webm")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(WEBM))
            .mount(&server)
            .await;
    }

    let config = create_test_config(&server, &media_dir, &["g", "wsg"]);
    let report = harvester(&config, &db, FakeThumbnailer::working())
        .run_pass(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.boards.len(), 2);
    let totals = report.totals();
    assert_eq!(totals.media_created, 1);
    assert_eq!(totals.aliases_recorded, 1);

    let pool = db.pool();
    assert_eq!(count_media(pool).await.unwrap(), 1);
    assert_eq!(count_media_aliases(pool).await.unwrap(), 1);
    assert_eq!(stored_webms(&media_dir).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_digest_racing_on_one_board_thumbnails_once() {
    for _ in 0..5 {
        let (db, temp_dir) = setup_db().await;
        let media_dir = temp_dir.path().join("webms");
        let server = MockServer::start().await;

        mount_catalog(
            &server,
            "g",
            json!([{"no": 100, "ext": ".webm"}, {"no": 101, "ext": ".webm"}]),
        )
        .await;
        for (thread, tim) in [(100, 1001), (101, 2001)] {
            mount_thread(&server, "g", thread, json!([webm_post(thread, "a", tim, "")])).await;
            Mock::given(method("GET"))
                .and(path(format!("/g/{tim}.webm")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_bytes(WEBM)
                        .set_delay(Duration::from_millis(50)),
                )
                .mount(&server)
                .await;
        }

        let config = Config {
            thread_concurrency: 2,
            ..create_test_config(&server, &media_dir, &["g"])
        };
        let thumbnailer = FakeThumbnailer::working();
        let report = harvester(&config, &db, thumbnailer.clone())
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();

        assert!(!report.has_fatal());
        let pool = db.pool();
        assert_eq!(count_media(pool).await.unwrap(), 1);
        assert_eq!(count_media_aliases(pool).await.unwrap(), 1);
        assert_eq!(stored_webms(&media_dir).len(), 1);
        assert_eq!(thumbnailer.calls.load(Ordering::SeqCst), 1);

        let media = get_media_by_digest(pool, &digest_bytes(WEBM)).await.unwrap().unwrap();
        assert!(thumbnail_path(Path::new(&media.file_path)).exists());
    }
}

#[tokio::test]
async fn test_same_name_different_content_gets_digest_token() {
    assert_eq!(WEBM.len(), OTHER_WEBM.len());
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let server = MockServer::start().await;

    mount_catalog(&server, "g", json!([{"no": 100, "ext": ".webm"}])).await;
    mount_thread(
        &server,
        "g",
        100,
        json!([
            webm_post_with(1, "a", 1001, "", WEBM),
            webm_post_with(2, "a", 1002, "", OTHER_WEBM),
        ]),
    )
    .await;
    mount_file(&server, "g", 1001, WEBM).await;
    mount_file(&server, "g", 1002, OTHER_WEBM).await;

    let config = create_test_config(&server, &media_dir, &["g"]);
    let report = harvester(&config, &db, FakeThumbnailer::working())
        .run_pass(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.totals().media_created, 2);
    assert_eq!(report.totals().conflicts, 0);

    let plain = media_dir.join("g").join(format!("g_{}_a.webm", WEBM.len()));
    let token = digest_token(&digest_bytes(OTHER_WEBM), 8);
    let tokened = media_dir
        .join("g")
        .join(format!("g_{}_a_{token}.webm", OTHER_WEBM.len()));
    assert_eq!(stored_webms(&media_dir), vec![plain.clone(), tokened.clone()]);
    assert_eq!(std::fs::read(&plain).unwrap(), WEBM);
    assert_eq!(std::fs::read(&tokened).unwrap(), OTHER_WEBM);

    let other = get_media_by_digest(db.pool(), &digest_bytes(OTHER_WEBM))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(other.file_path, tokened.to_string_lossy());
    assert_eq!(other.filename, "a.webm");
}

#[tokio::test]
async fn test_foreign_file_on_disk_is_left_alone() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let server = MockServer::start().await;

    // Different bytes already sit under the plain name, with no row
    let plain = media_dir.join("g").join(format!("g_{}_a.webm", WEBM.len()));
    std::fs::create_dir_all(plain.parent().unwrap()).unwrap();
    std::fs::write(&plain, OTHER_WEBM).unwrap();

    mount_catalog(&server, "g", json!([{"no": 100, "ext": ".webm"}])).await;
    mount_thread(&server, "g", 100, json!([webm_post(1, "a", 1001, "")])).await;
    mount_file(&server, "g", 1001, WEBM).await;

    let config = create_test_config(&server, &media_dir, &["g"]);
    let report = harvester(&config, &db, FakeThumbnailer::working())
        .run_pass(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.totals().media_created, 1);

    let media = get_media_by_digest(db.pool(), &digest_bytes(WEBM))
        .await
        .unwrap()
        .unwrap();
    let token = digest_token(&digest_bytes(WEBM), 8);
    assert!(media.file_path.ends_with(&format!("g_{}_a_{token}.webm", WEBM.len())));
    assert_eq!(std::fs::read(&media.file_path).unwrap(), WEBM);
    assert_eq!(std::fs::read(&plain).unwrap(), OTHER_WEBM);
}

#[tokio::test]
async fn test_identical_file_on_disk_is_adopted() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let server = MockServer::start().await;

    // Left behind by a run that stopped before recording it
    let plain = media_dir.join("g").join(format!("g_{}_a.webm", WEBM.len()));
    std::fs::create_dir_all(plain.parent().unwrap()).unwrap();
    std::fs::write(&plain, WEBM).unwrap();

    mount_catalog(&server, "g", json!([{"no": 100, "ext": ".webm"}])).await;
    mount_thread(&server, "g", 100, json!([webm_post(1, "a", 1001, "")])).await;
    Mock::given(method("GET"))
        .and(path("/g/1001.webm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WEBM))
        .expect(0)
        .mount(&server)
        .await;

    let config = create_test_config(&server, &media_dir, &["g"]);
    let thumbnailer = FakeThumbnailer::working();
    let harvester = harvester(&config, &db, thumbnailer.clone());
    let cancel = CancellationToken::new();

    let first = harvester.run_pass(&cancel).await.unwrap();
    assert_eq!(first.totals().media_created, 1);
    assert_eq!(first.totals().download_failures, 0);

    let media = get_media_by_digest(db.pool(), &digest_bytes(WEBM))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(media.file_path, plain.to_string_lossy());
    assert_eq!(media.size_bytes, WEBM.len() as i64);
    assert!(thumbnail_path(&plain).exists());
    assert_eq!(thumbnailer.calls.load(Ordering::SeqCst), 1);

    let second = harvester.run_pass(&cancel).await.unwrap();
    assert_eq!(second.totals().media_created, 0);
    assert_eq!(second.totals().already_recorded, 1);
    assert_eq!(count_media(db.pool()).await.unwrap(), 1);
    assert_eq!(count_media_aliases(db.pool()).await.unwrap(), 0);
    assert_eq!(thumbnailer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(stored_webms(&media_dir), vec![plain]);
}

#[tokio::test]
async fn test_path_claimed_by_other_content_is_a_conflict() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let server = MockServer::start().await;

    mount_catalog(&server, "g", json!([{"no": 100, "ext": ".webm"}])).await;
    mount_thread(&server, "g", 100, json!([webm_post(1, "a", 1001, "")])).await;
    mount_file(&server, "g", 1001, WEBM).await;

    let config = create_test_config(&server, &media_dir, &["g"]);
    let host = get_or_create_host(db.pool(), &config.host_name).await.unwrap();
    let board = get_or_create_board(db.pool(), host.id, "g").await.unwrap();
    let squatter = Arc::new(PathSquatter {
        db: db.clone(),
        board_id: board.id,
    });
    let api = ApiClient::new(&config).unwrap();
    let report = Harvester::from_config(&config, db.clone(), api, squatter)
        .run_pass(&CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.has_fatal());
    let totals = report.totals();
    assert_eq!(totals.conflicts, 1);
    assert_eq!(totals.media_created, 0);

    // Our copy is gone and nothing was recorded under our digest
    assert!(get_media_by_digest(db.pool(), &digest_bytes(WEBM))
        .await
        .unwrap()
        .is_none());
    let plain = media_dir.join("g").join(format!("g_{}_a.webm", WEBM.len()));
    assert!(!plain.exists());
    assert_eq!(count_media(db.pool()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_catalog_failure_only_skips_that_board() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/g/catalog.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_catalog(&server, "wsg", json!([{"no": 200, "ext": ".webm"}])).await;
    mount_thread(&server, "wsg", 200, json!([webm_post(200, "a", 2001, "")])).await;
    Mock::given(method("GET"))
        .and(path("/wsg/2001.webm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WEBM))
        .mount(&server)
        .await;

    let config = create_test_config(&server, &media_dir, &["g", "wsg"]);
    let report = harvester(&config, &db, FakeThumbnailer::working())
        .run_pass(&CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.has_fatal());
    let g = report.boards.iter().find(|b| b.board == "g").unwrap();
    assert!(g.aborted.is_some());
    assert!(!g.fatal);
    let wsg = report.boards.iter().find(|b| b.board == "wsg").unwrap();
    assert!(wsg.aborted.is_none());
    assert_eq!(wsg.counts.media_created, 1);
}

#[tokio::test]
async fn test_malformed_thread_is_skipped() {
    let (db, temp_dir) = setup_db().await;
    let media_dir = temp_dir.path().join("webms");
    let server = MockServer::start().await;

    mount_catalog(
        &server,
        "g",
        json!([{"no": 100, "ext": ".webm"}, {"no": 101, "ext": ".webm"}]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/g/thread/100.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;
    mount_thread(&server, "g", 101, json!([webm_post(101, "a", 1001, "")])).await;
    Mock::given(method("GET"))
        .and(path("/g/1001.webm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WEBM))
        .mount(&server)
        .await;

    let config = create_test_config(&server, &media_dir, &["g"]);
    let report = harvester(&config, &db, FakeThumbnailer::working())
        .run_pass(&CancellationToken::new())
        .await
        .unwrap();

    let g = &report.boards[0];
    assert!(g.aborted.is_none());
    assert_eq!(g.counts.threads_failed, 1);
    assert_eq!(g.counts.threads_scanned, 1);
    assert_eq!(g.counts.media_created, 1);
}

#[tokio::test]
async fn test_unwritable_media_dir_is_fatal() {
    let (db, temp_dir) = setup_db().await;
    // A regular file where the media root should be
    let media_dir = temp_dir.path().join("not-a-dir");
    tokio::fs::write(&media_dir, b"").await.unwrap();
    let server = MockServer::start().await;

    mount_catalog(&server, "g", json!([{"no": 100, "ext": ".webm"}])).await;
    mount_thread(&server, "g", 100, json!([webm_post(1, "a", 1001, "")])).await;

    let config = create_test_config(&server, &media_dir, &["g"]);
    let report = harvester(&config, &db, FakeThumbnailer::working())
        .run_pass(&CancellationToken::new())
        .await
        .unwrap();

    assert!(report.has_fatal());
    assert!(report.boards[0].aborted.is_some());
    assert_eq!(count_media(db.pool()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_pass_does_no_work() {
    let (db, temp_dir) = setup_db().await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = create_test_config(&server, &temp_dir.path().join("webms"), &["g"]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = harvester(&config, &db, FakeThumbnailer::working())
        .run_pass(&cancel)
        .await
        .unwrap();
    assert!(report.cancelled);
    assert!(report.boards.is_empty());
}
