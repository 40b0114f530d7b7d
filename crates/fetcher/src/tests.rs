//! Unit and integration tests for the download engine

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tempfile::tempdir;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::EngineConfig;
use crate::core::validation::{classify_prefix, validate_archive};
use crate::core::{sanitize_name, DownloadTask, MismatchKind, ProgressUpdate, TaskStatus};
use crate::engine::DownloadEngine;
use crate::history::HistoryStore;
use crate::registry::TaskRegistry;
use crate::resolver::{classify, is_peer_reference, looks_like_archive, SourceResolver};
use crate::retry::RetryPolicy;
use crate::{EngineError, TaskRequest};

/// Engine configuration rooted in a temp directory, tuned for fast tests
fn test_config(root: &Path) -> EngineConfig {
    let mut config = EngineConfig::default()
        .with_download_dir(root.join("downloads"))
        .with_state_dir(root.join("state"))
        .with_helper_command("/bin/false");
    config.cancel_grace = Duration::from_millis(20);
    config.cleanup_retry = RetryPolicy::fixed(2, Duration::from_millis(20));
    config.probe_timeout = Duration::from_secs(5);
    config
}

/// Build an archive in memory: `None` content marks a directory entry
fn test_zip_bytes(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(&mut cursor);
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        match contents {
            None => writer.add_directory(*name, options).unwrap(),
            Some(bytes) => {
                writer.start_file(*name, options).unwrap();
                writer.write_all(bytes).unwrap();
            }
        }
    }
    writer.finish().unwrap();
    cursor.into_inner()
}

/// A terminal task snapshot for history tests
fn terminal_task(id: &str, status: TaskStatus) -> DownloadTask {
    DownloadTask {
        id: id.to_string(),
        display_name: "Thing".to_string(),
        catalog_id: None,
        reference: "http://example.com/thing.zip".to_string(),
        target_dir: PathBuf::from("/tmp/thing"),
        status,
        progress: 100,
        message: None,
        transport: None,
        started_at: Utc::now(),
        finished_at: Some(Utc::now()),
        error: None,
    }
}

/// An active (non-terminal) task for registry tests
fn active_task(id: &str, dir: &Path) -> DownloadTask {
    DownloadTask {
        id: id.to_string(),
        display_name: "Thing".to_string(),
        catalog_id: None,
        reference: "http://example.com/thing.zip".to_string(),
        target_dir: dir.to_path_buf(),
        status: TaskStatus::Starting,
        progress: 0,
        message: None,
        transport: None,
        started_at: Utc::now(),
        finished_at: None,
        error: None,
    }
}

/// Collect one task's events until it reaches a terminal state
async fn collect_until_terminal(
    events: &mut broadcast::Receiver<ProgressUpdate>,
    id: &str,
) -> Vec<ProgressUpdate> {
    let mut seen = Vec::new();
    let outcome = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match events.recv().await {
                Ok(update) if update.id == id => {
                    let terminal = update.status.is_terminal();
                    seen.push(update);
                    if terminal {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "timed out waiting for terminal event");
    seen
}

/// Per-task events must never regress in state order
fn assert_monotonic(events: &[ProgressUpdate]) {
    let mut last_rank = 0u8;
    for event in events {
        let rank = event.status.rank();
        assert!(
            rank >= last_rank,
            "status order regressed: {:?}",
            events.iter().map(|e| e.status).collect::<Vec<_>>()
        );
        last_rank = rank;
    }
}

#[cfg(unix)]
fn write_helper_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let script = dir.join("fake-helper.sh");
    std::fs::write(&script, body).unwrap();
    let mut perms = std::fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).unwrap();
    script
}

mod validation_rules {
    use super::*;

    #[test]
    fn accepts_archive_signature() {
        assert!(classify_prefix(b"PK\x03\x04 rest of the archive").is_none());
    }

    #[test]
    fn rejects_markup_prefix() {
        let (kind, _) = classify_prefix(b"<!DOCTYPE html><html><body>404</body>").unwrap();
        assert_eq!(kind, MismatchKind::MarkupPage);
    }

    #[test]
    fn rejects_structured_error_body() {
        let (kind, _) = classify_prefix(b"{\"error\": \"quota exceeded\"}").unwrap();
        assert_eq!(kind, MismatchKind::StructuredError);
        let (kind, _) = classify_prefix(b"[1, 2, 3]").unwrap();
        assert_eq!(kind, MismatchKind::StructuredError);
    }

    #[test]
    fn rejects_torrent_descriptor() {
        let (kind, _) = classify_prefix(b"d8:announce40:http://tracker/").unwrap();
        assert_eq!(kind, MismatchKind::TorrentDescriptor);
    }

    #[test]
    fn rejects_unknown_signature_with_hex() {
        let (kind, detail) = classify_prefix(&[0x00, 0x01, 0x02, 0x03, 0x04]).unwrap();
        assert_eq!(kind, MismatchKind::Unrecognized);
        assert!(detail.contains("00010203"), "detail was: {}", detail);
    }

    #[tokio::test]
    async fn rejects_empty_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("empty.zip");
        tokio::fs::write(&file, b"").await.unwrap();

        let err = validate_archive(&file, "http://example.com/empty.zip")
            .await
            .unwrap_err();
        match err {
            EngineError::ValidationMismatch { kind, url, .. } => {
                assert_eq!(kind, MismatchKind::Empty);
                assert_eq!(url, "http://example.com/empty.zip");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn accepts_real_archive_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("ok.zip");
        tokio::fs::write(&file, test_zip_bytes(&[("a.txt", Some(b"hello"))]))
            .await
            .unwrap();
        assert!(validate_archive(&file, "http://example.com/ok.zip")
            .await
            .is_ok());
    }
}

mod extraction {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn reports_per_entry_progress() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("content.zip");
        std::fs::write(
            &archive,
            test_zip_bytes(&[
                ("data/", None),
                ("data/a.txt", Some(b"alpha")),
                ("b.txt", Some(b"beta")),
            ]),
        )
        .unwrap();

        let reported = Mutex::new(Vec::new());
        let dest = dir.path().join("out");
        let written = crate::extract::extract_archive(&archive, &dest, &|percent| {
            reported.lock().unwrap().push(percent);
        })
        .unwrap();

        assert_eq!(written, 3);
        assert_eq!(*reported.lock().unwrap(), vec![33, 66, 100]);
        assert_eq!(std::fs::read(dest.join("data/a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(dest.join("b.txt")).unwrap(), b"beta");
        assert!(dest.join("data").is_dir());
    }

    #[test]
    fn aborts_on_corrupt_archive() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"PK but not actually an archive").unwrap();

        let result =
            crate::extract::extract_archive(&archive, &dir.path().join("out"), &|_| {});
        assert!(matches!(result, Err(EngineError::Extraction { .. })));
    }
}

mod launchable_search {
    use super::*;
    use crate::artifact::find_launchable;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"bin").unwrap();
    }

    #[test]
    fn prefers_program_subdirectory_over_installers() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("setup.exe"));
        touch(&dir.path().join("uninstall.exe"));
        touch(&dir.path().join("bin/game.exe"));

        let found = find_launchable(dir.path(), "Game").unwrap();
        assert_eq!(found, dir.path().join("bin/game.exe"));
    }

    #[test]
    fn falls_back_to_first_remaining_candidate() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("setup.exe"));
        touch(&dir.path().join("random123.exe"));

        let found = find_launchable(dir.path(), "Nothing Matches").unwrap();
        assert_eq!(found, dir.path().join("random123.exe"));
    }

    #[test]
    fn matches_display_name_first() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("aaa.exe"));
        touch(&dir.path().join("my-game.exe"));

        let found = find_launchable(dir.path(), "My Game").unwrap();
        assert_eq!(found, dir.path().join("my-game.exe"));
    }

    #[test]
    fn ignores_tooling_directories_and_installers() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("node_modules/game.exe"));
        touch(&dir.path().join(".hidden/game.exe"));
        touch(&dir.path().join("uninstall.exe"));
        assert!(find_launchable(dir.path(), "Game").is_none());
    }
}

mod history_store {
    use super::*;

    #[tokio::test]
    async fn caps_retention_evicting_oldest() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::load(dir.path().join("history.json"), 100);

        for n in 0..101 {
            store
                .record(&terminal_task(&format!("t{}", n), TaskStatus::Completed))
                .await;
        }

        let entries = store.list().await;
        assert_eq!(entries.len(), 100);
        assert_eq!(entries.first().unwrap().id, "t100");
        assert_eq!(entries.last().unwrap().id, "t1"); // t0 evicted
        for window in entries.windows(2) {
            let a: usize = window[0].id[1..].parse().unwrap();
            let b: usize = window[1].id[1..].parse().unwrap();
            assert_eq!(a, b + 1, "order not preserved");
        }
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        {
            let store = HistoryStore::load(path.clone(), 10);
            store.record(&terminal_task("a", TaskStatus::Completed)).await;
            store.record(&terminal_task("b", TaskStatus::Error)).await;
        }

        let reloaded = HistoryStore::load(path, 10);
        let entries = reloaded.list().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "b");
        assert_eq!(entries[1].id, "a");
    }

    #[tokio::test]
    async fn corrupt_file_resets_to_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, b"definitely { not json").unwrap();

        let store = HistoryStore::load(path, 10);
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_id_errors() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::load(dir.path().join("history.json"), 10);
        store.record(&terminal_task("a", TaskStatus::Cancelled)).await;

        assert!(store.remove("a").await.is_ok());
        assert!(store.remove("a").await.is_err());
    }
}

mod registry_semantics {
    use super::*;

    #[test]
    fn rejects_shared_target_dir() {
        let registry = TaskRegistry::new();
        let dir = PathBuf::from("/tmp/shared");
        registry.insert(active_task("one", &dir)).unwrap();

        let err = registry.insert(active_task("two", &dir)).unwrap_err();
        assert!(matches!(err, EngineError::Submit { .. }));
    }

    #[test]
    fn cancellation_wins_over_late_completion() {
        let registry = TaskRegistry::new();
        registry
            .insert(active_task("t", Path::new("/tmp/t")))
            .unwrap();

        let cancelled = registry.mark_cancelled("t").unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.finished_at.is_some());

        // The driver's completion must now be suppressed.
        assert!(registry
            .commit_terminal("t", TaskStatus::Completed, 100, None)
            .is_none());
        // And progress callbacks must not resurrect the record.
        assert!(registry.update("t", |t| t.progress = 50).is_none());
        // A second cancel is a race error.
        assert!(matches!(
            registry.mark_cancelled("t"),
            Err(EngineError::CancellationRace { .. })
        ));
    }

    #[test]
    fn terminal_commit_is_single_shot() {
        let registry = TaskRegistry::new();
        registry
            .insert(active_task("t", Path::new("/tmp/t")))
            .unwrap();

        let committed = registry
            .commit_terminal("t", TaskStatus::Completed, 100, None)
            .unwrap();
        assert_eq!(committed.status, TaskStatus::Completed);
        assert!(committed.finished_at.is_some());
        assert!(registry.get("t").is_none());
        assert!(registry
            .commit_terminal("t", TaskStatus::Error, 0, Some("late".into()))
            .is_none());
    }

    #[test]
    fn active_tasks_have_no_end_time() {
        let registry = TaskRegistry::new();
        registry
            .insert(active_task("t", Path::new("/tmp/t")))
            .unwrap();
        let task = registry.get("t").unwrap();
        assert!(!task.status.is_terminal());
        assert!(task.finished_at.is_none());
    }
}

mod resolver_rules {
    use super::*;

    #[test]
    fn classifies_known_services() {
        assert_eq!(classify("https://gofile.io/d/abc"), Some("Gofile"));
        assert_eq!(classify("https://mega.nz/file/xyz"), Some("Mega"));
        assert_eq!(classify("https://www.mediafire.com/file/q"), Some("MediaFire"));
        assert_eq!(classify("https://example.com/file.zip"), None);
    }

    #[test]
    fn recognizes_reference_shapes() {
        assert!(is_peer_reference("magnet:?xt=urn:btih:abc"));
        assert!(is_peer_reference("https://example.com/content.torrent"));
        assert!(!is_peer_reference("https://example.com/content.zip"));

        assert!(looks_like_archive("https://example.com/content.zip"));
        assert!(looks_like_archive("https://example.com/content.zip?key=1"));
        assert!(looks_like_archive("https://example.com/content.zip#frag"));
        assert!(!looks_like_archive("https://example.com/page"));
    }

    #[tokio::test]
    async fn follows_redirect_chain() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/b"))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let resolver = SourceResolver::new(&EngineConfig::default()).unwrap();
        let resolved = resolver.resolve(&format!("{}/a", server.uri())).await;
        assert_eq!(resolved.url, format!("{}/b", server.uri()));
        assert_eq!(resolved.service, None);
    }

    #[tokio::test]
    async fn stops_early_on_service_marker() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/a"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "https://gofile.io/d/abc"),
            )
            .mount(&server)
            .await;

        let resolver = SourceResolver::new(&EngineConfig::default()).unwrap();
        let resolved = resolver.resolve(&format!("{}/a", server.uri())).await;
        // No request reaches the service host; the marker alone decides.
        assert_eq!(resolved.url, "https://gofile.io/d/abc");
        assert_eq!(resolved.service, Some("Gofile"));
    }

    #[tokio::test]
    async fn bounded_hops_return_last_url() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
            .mount(&server)
            .await;

        let resolver = SourceResolver::new(&EngineConfig::default()).unwrap();
        let resolved = resolver.resolve(&format!("{}/loop", server.uri())).await;
        assert_eq!(resolved.url, format!("{}/loop", server.uri()));
        assert_eq!(resolved.service, None);
    }

    #[tokio::test]
    async fn head_rejection_falls_back_to_get() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/real.zip"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/real.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04".to_vec()))
            .mount(&server)
            .await;

        let resolver = SourceResolver::new(&EngineConfig::default()).unwrap();
        let resolved = resolver.resolve(&format!("{}/file", server.uri())).await;
        assert_eq!(resolved.url, format!("{}/real.zip", server.uri()));
    }

    #[tokio::test]
    async fn total_failure_returns_input_unclassified() {
        let resolver = SourceResolver::new(&EngineConfig::default()).unwrap();
        let resolved = resolver.resolve("http://127.0.0.1:1/nothing").await;
        assert_eq!(resolved.url, "http://127.0.0.1:1/nothing");
        assert_eq!(resolved.service, None);
    }
}

mod full_pipeline {
    use super::*;

    async fn mock_archive_server(body: Vec<u8>, content_type: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/content.zip"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/content.zip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", content_type)
                    .set_body_bytes(body),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn downloads_validates_and_extracts() {
        let root = tempdir().unwrap();
        let body = test_zip_bytes(&[
            ("bin/", None),
            ("bin/game.exe", Some(b"the game")),
            ("readme.txt", Some(b"hello")),
        ]);
        let server = mock_archive_server(body, "application/zip").await;

        let engine = DownloadEngine::new(test_config(root.path())).unwrap();
        let mut events = engine.subscribe();
        let id = engine
            .submit(TaskRequest::new(
                format!("{}/content.zip", server.uri()),
                "Content",
            ))
            .await
            .unwrap();

        let seen = collect_until_terminal(&mut events, &id).await;
        assert_monotonic(&seen);

        let last = seen.last().unwrap();
        assert_eq!(last.status, TaskStatus::Completed);
        assert_eq!(last.progress, 100);
        assert!(last
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("launchable artifact"));

        let statuses: Vec<TaskStatus> = seen.iter().map(|e| e.status).collect();
        assert!(statuses.contains(&TaskStatus::ResolvingUrl));
        assert!(statuses.contains(&TaskStatus::Downloading));
        assert!(statuses.contains(&TaskStatus::Validating));
        assert!(statuses.contains(&TaskStatus::Extracting));

        let extract_progress: Vec<u8> = seen
            .iter()
            .filter(|e| e.status == TaskStatus::Extracting && e.progress > 0)
            .map(|e| e.progress)
            .collect();
        assert_eq!(extract_progress, vec![33, 66, 100]);

        let dest = root.path().join("downloads/Content");
        assert_eq!(
            std::fs::read(dest.join("bin/game.exe")).unwrap(),
            b"the game"
        );
        assert!(!dest.join("artifact.zip").exists(), "archive not removed");

        assert!(engine.active().is_empty());
        let history = engine.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TaskStatus::Completed);
        assert_eq!(history[0].id, id);
        assert!(engine.is_installed("Content").await);
    }

    #[tokio::test]
    async fn markup_body_is_rejected_with_kind() {
        let root = tempdir().unwrap();
        let server = mock_archive_server(
            b"<!DOCTYPE html><html><body>sign in please</body></html>".to_vec(),
            "application/octet-stream",
        )
        .await;

        let engine = DownloadEngine::new(test_config(root.path())).unwrap();
        let mut events = engine.subscribe();
        let id = engine
            .submit(TaskRequest::new(
                format!("{}/content.zip", server.uri()),
                "Trap",
            ))
            .await
            .unwrap();

        let seen = collect_until_terminal(&mut events, &id).await;
        assert_eq!(seen.last().unwrap().status, TaskStatus::Error);

        let history = engine.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TaskStatus::Error);
        let error = history[0].error.as_deref().unwrap();
        assert!(error.contains("markup page"), "error was: {}", error);
        assert!(error.contains("/content.zip"), "error was: {}", error);
    }

    #[tokio::test]
    async fn structured_error_body_is_rejected_with_kind() {
        let root = tempdir().unwrap();
        let server = mock_archive_server(
            b"{\"error\": \"download quota exceeded\"}".to_vec(),
            "application/json",
        )
        .await;

        let engine = DownloadEngine::new(test_config(root.path())).unwrap();
        let mut events = engine.subscribe();
        let id = engine
            .submit(TaskRequest::new(
                format!("{}/content.zip", server.uri()),
                "Quota",
            ))
            .await
            .unwrap();

        let seen = collect_until_terminal(&mut events, &id).await;
        assert_eq!(seen.last().unwrap().status, TaskStatus::Error);
        let history = engine.history().await;
        let error = history[0].error.as_deref().unwrap();
        assert!(
            error.contains("structured error body"),
            "error was: {}",
            error
        );
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn cancel_tears_down_and_records_exactly_once() {
        let root = tempdir().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/slow.zip"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow.zip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/zip")
                    .set_body_bytes(test_zip_bytes(&[("a.txt", Some(b"x"))]))
                    .set_delay(Duration::from_secs(20)),
            )
            .mount(&server)
            .await;

        let engine = DownloadEngine::new(test_config(root.path())).unwrap();
        let mut events = engine.subscribe();
        let id = engine
            .submit(TaskRequest::new(
                format!("{}/slow.zip", server.uri()),
                "Slow",
            ))
            .await
            .unwrap();

        // Wait until the task is in its downloading state, give the transport
        // a moment to register its handle, then cancel mid-flight.
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let update = events.recv().await.unwrap();
                if update.id == id && update.status == TaskStatus::Downloading {
                    break;
                }
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        engine.cancel(&id).await.unwrap();

        let history = engine.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TaskStatus::Cancelled);
        assert!(engine.active().is_empty());
        assert!(
            !root.path().join("downloads/Slow").exists(),
            "destination directory survived cancellation"
        );

        // Idempotence: a second cancel is a race error, not a double append.
        assert!(matches!(
            engine.cancel(&id).await,
            Err(EngineError::CancellationRace { .. })
        ));
        assert_eq!(engine.history().await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_cancels_append_one_entry() {
        let root = tempdir().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/slow.zip"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow.zip"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(20)))
            .mount(&server)
            .await;

        let engine = DownloadEngine::new(test_config(root.path())).unwrap();
        let mut events = engine.subscribe();
        let id = engine
            .submit(TaskRequest::new(
                format!("{}/slow.zip", server.uri()),
                "Race",
            ))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let update = events.recv().await.unwrap();
                if update.id == id && update.status == TaskStatus::Downloading {
                    break;
                }
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (first, second) = tokio::join!(engine.cancel(&id), engine.cancel(&id));
        assert!(
            first.is_ok() != second.is_ok(),
            "exactly one concurrent cancel must win"
        );
        assert_eq!(engine.history().await.len(), 1);
        assert_eq!(engine.history().await[0].status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_a_race_error() {
        let root = tempdir().unwrap();
        let engine = DownloadEngine::new(test_config(root.path())).unwrap();
        assert!(matches!(
            engine.cancel("no-such-task").await,
            Err(EngineError::CancellationRace { .. })
        ));
    }
}

#[cfg(unix)]
mod helper_pipeline {
    use super::*;

    /// Unresolvable fast: connection refused routes the task to the helper
    const UNREACHABLE: &str = "http://127.0.0.1:1/page";

    #[tokio::test]
    async fn helper_progress_lines_merge_and_complete() {
        let root = tempdir().unwrap();
        let script = write_helper_script(
            root.path(),
            "#!/bin/sh\n\
             echo '{\"progress\": 40, \"message\": \"fetching from host\"}'\n\
             echo 'this line is not a status record'\n\
             echo '{\"progress\": 100}'\n\
             exit 0\n",
        );
        let config = test_config(root.path()).with_helper_command(script);

        let engine = DownloadEngine::new(config).unwrap();
        let mut events = engine.subscribe();
        let id = engine
            .submit(TaskRequest::new(UNREACHABLE, "Helper Content"))
            .await
            .unwrap();

        let seen = collect_until_terminal(&mut events, &id).await;
        assert_monotonic(&seen);
        assert_eq!(seen.last().unwrap().status, TaskStatus::Completed);

        let helper_events: Vec<&ProgressUpdate> = seen
            .iter()
            .filter(|e| e.status == TaskStatus::DownloadingViaHelper)
            .collect();
        assert!(helper_events
            .iter()
            .any(|e| e.progress == 40 && e.message.as_deref() == Some("fetching from host")));
        // The malformed line is skipped; the message survives the next record.
        assert!(helper_events
            .iter()
            .any(|e| e.progress == 100 && e.message.as_deref() == Some("fetching from host")));
    }

    #[tokio::test]
    async fn markup_content_type_reroutes_direct_to_helper() {
        let root = tempdir().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/content.zip"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        // The "direct archive link" actually serves a consent page.
        Mock::given(method("GET"))
            .and(path("/content.zip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<html><body>click to download</body></html>"),
            )
            .mount(&server)
            .await;
        let script = write_helper_script(root.path(), "#!/bin/sh\nexit 0\n");
        let config = test_config(root.path()).with_helper_command(script);

        let engine = DownloadEngine::new(config).unwrap();
        let mut events = engine.subscribe();
        let id = engine
            .submit(TaskRequest::new(
                format!("{}/content.zip", server.uri()),
                "Rerouted",
            ))
            .await
            .unwrap();

        let seen = collect_until_terminal(&mut events, &id).await;
        assert_monotonic(&seen);
        let statuses: Vec<TaskStatus> = seen.iter().map(|e| e.status).collect();
        assert!(statuses.contains(&TaskStatus::Downloading));
        assert!(statuses.contains(&TaskStatus::DownloadingViaHelper));
        assert_eq!(seen.last().unwrap().status, TaskStatus::Completed);

        // The abandoned direct stream leaves no partial output behind.
        let dest = root.path().join("downloads/Rerouted");
        assert!(!dest.join("artifact.zip").exists());
        assert!(!dest.join("artifact.zip.part").exists());
    }

    #[tokio::test]
    async fn helper_exit_code_becomes_task_error() {
        let root = tempdir().unwrap();
        let script = write_helper_script(root.path(), "#!/bin/sh\nexit 7\n");
        let config = test_config(root.path()).with_helper_command(script);

        let engine = DownloadEngine::new(config).unwrap();
        let mut events = engine.subscribe();
        let id = engine
            .submit(TaskRequest::new(UNREACHABLE, "Broken Helper"))
            .await
            .unwrap();

        let seen = collect_until_terminal(&mut events, &id).await;
        assert_eq!(seen.last().unwrap().status, TaskStatus::Error);
        let history = engine.history().await;
        let error = history[0].error.as_deref().unwrap();
        assert!(error.contains("exit code 7"), "error was: {}", error);
    }

    #[tokio::test]
    async fn helper_left_archive_is_validated_and_extracted() {
        let root = tempdir().unwrap();
        // The helper leaves its archive in the destination; pre-place one to
        // stand in for that, with a script that succeeds silently.
        let dest = root.path().join("downloads/Packed");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(
            dest.join("payload.zip"),
            test_zip_bytes(&[("game/", None), ("game/packed.exe", Some(b"payload"))]),
        )
        .unwrap();
        let script = write_helper_script(root.path(), "#!/bin/sh\nexit 0\n");
        let config = test_config(root.path()).with_helper_command(script);

        let engine = DownloadEngine::new(config).unwrap();
        let mut events = engine.subscribe();
        let id = engine
            .submit(TaskRequest::new(UNREACHABLE, "Packed"))
            .await
            .unwrap();

        let seen = collect_until_terminal(&mut events, &id).await;
        assert_eq!(seen.last().unwrap().status, TaskStatus::Completed);
        assert!(seen.iter().any(|e| e.status == TaskStatus::Validating));
        assert!(seen.iter().any(|e| e.status == TaskStatus::Extracting));

        assert_eq!(
            std::fs::read(dest.join("game/packed.exe")).unwrap(),
            b"payload"
        );
        assert!(!dest.join("payload.zip").exists(), "archive not cleaned up");
    }
}

mod engine_surface {
    use super::*;

    #[tokio::test]
    async fn rejects_empty_reference() {
        let root = tempdir().unwrap();
        let engine = DownloadEngine::new(test_config(root.path())).unwrap();
        let result = engine.submit(TaskRequest::new("  ", "Name")).await;
        assert!(matches!(result, Err(EngineError::Submit { .. })));
    }

    #[test]
    fn sanitizes_display_names() {
        assert_eq!(sanitize_name("My: Game?"), "My_ Game_");
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_name("  plain  "), "plain");
    }

    #[tokio::test]
    async fn installed_listing_and_uninstall() {
        let root = tempdir().unwrap();
        let engine = DownloadEngine::new(test_config(root.path())).unwrap();

        let dir = root.path().join("downloads/Thing");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("thing.exe"), b"bin").unwrap();

        assert!(engine.is_installed("Thing").await);
        let installed = engine.installed().await;
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].name, "Thing");
        assert_eq!(installed[0].launchable, dir.join("thing.exe"));

        engine.uninstall("Thing").await.unwrap();
        assert!(!engine.is_installed("Thing").await);
        assert!(matches!(
            engine.uninstall("Thing").await,
            Err(EngineError::NotInstalled { .. })
        ));
    }
}
