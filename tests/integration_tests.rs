//! Integration tests for squirrel-dl
//!
//! These tests drive the public `Downloader` API end to end against a local
//! mock HTTP server, using the default disk-backed state store so that the
//! persistence layer a real application relies on is exercised too.

use std::sync::Arc;
use std::time::Duration;

use squirrel_dl::{DownloadModel, DownloadStatus, Downloader, Error};
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve_video(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "video/mp4"))
        .mount(server)
        .await;
}

async fn wait_until_downloaded(downloader: &Downloader, identifier: &str) -> DownloadModel {
    for _ in 0..600 {
        if let Some(model) = downloader.completed_download(identifier).await {
            return model;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("download '{identifier}' did not complete in time");
}

#[tokio::test]
async fn test_full_lifecycle_with_disk_state() {
    let server = MockServer::start().await;
    let body = b"mp4-payload-".repeat(512);
    serve_video(&server, "/talk.mp4", body.clone()).await;

    let dir = tempdir().unwrap();
    let downloader = Downloader::builder()
        .directory(dir.path())
        .build()
        .unwrap();

    assert!(downloader.list_all().await.is_none());

    let started = downloader
        .resume_download("talk", &format!("{}/talk.mp4", server.uri()))
        .await
        .unwrap();
    assert_eq!(started.identifier, "talk");
    assert_eq!(started.status, DownloadStatus::Waiting);
    assert!(started.local_path.is_none());

    let model = wait_until_downloaded(&downloader, "talk").await;
    assert_eq!(model.progress, 100.0);
    let local = model.local_path.expect("completed file path");
    assert_eq!(local.file_name().unwrap(), "talktalk.mp4");
    assert_eq!(local.parent().unwrap(), dir.path());
    assert_eq!(std::fs::read(&local).unwrap(), body);

    // State lives under a hidden subdirectory next to the file
    assert!(dir.path().join(".squirrel-dl").is_dir());

    downloader.remove_download("talk").await.unwrap();
    assert!(!local.exists());
    assert!(downloader.list_all().await.is_none());
}

#[tokio::test]
async fn test_finished_job_survives_process_restart() {
    let server = MockServer::start().await;
    let body = b"persist-me".repeat(64);
    serve_video(&server, "/dl.mp4", body.clone()).await;

    let dir = tempdir().unwrap();
    let url = format!("{}/dl.mp4", server.uri());

    {
        let downloader = Downloader::builder()
            .directory(dir.path())
            .build()
            .unwrap();
        downloader.resume_download("dl", &url).await.unwrap();
        wait_until_downloaded(&downloader, "dl").await;
    }

    // Fresh manager over the same directory reloads the table from disk
    let downloader = Downloader::builder()
        .directory(dir.path())
        .build()
        .unwrap();
    let models = downloader.list_all().await.expect("table reloaded");
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].identifier, "dl");
    assert_eq!(models[0].status, DownloadStatus::Downloaded);
    assert_eq!(models[0].remote_path, url);

    let model = downloader.completed_download("dl").await.unwrap();
    assert_eq!(std::fs::read(model.local_path.unwrap()).unwrap(), body);
}

#[tokio::test]
async fn test_paused_job_resumes_after_restart() {
    let server = MockServer::start().await;
    let body = b"clip-bytes".repeat(128);
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(400))
                .set_body_raw(body.clone(), "video/mp4"),
        )
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let url = format!("{}/clip.mp4", server.uri());

    {
        let downloader = Downloader::builder()
            .directory(dir.path())
            .build()
            .unwrap();
        downloader.resume_download("clip", &url).await.unwrap();
        let paused = downloader.pause_download("clip").await.unwrap();
        assert_eq!(paused.status, DownloadStatus::Paused);
    }

    // The pause survives the restart, and resuming from it still completes
    let downloader = Downloader::builder()
        .directory(dir.path())
        .build()
        .unwrap();
    let models = downloader.list_all().await.expect("table reloaded");
    assert_eq!(models[0].status, DownloadStatus::Paused);

    downloader.resume_download("clip", &url).await.unwrap();
    let model = wait_until_downloaded(&downloader, "clip").await;
    assert_eq!(std::fs::read(model.local_path.unwrap()).unwrap(), body);
}

#[tokio::test]
async fn test_identifier_prefixes_remote_file_name() {
    let server = MockServer::start().await;
    serve_video(&server, "/media/video.mp4", b"abc".to_vec()).await;

    let dir = tempdir().unwrap();
    let downloader = Downloader::builder()
        .directory(dir.path())
        .build()
        .unwrap();

    downloader
        .resume_download("A", &format!("{}/media/video.mp4", server.uri()))
        .await
        .unwrap();
    let model = wait_until_downloaded(&downloader, "A").await;
    assert_eq!(
        model.local_path.unwrap().file_name().unwrap(),
        "Avideo.mp4"
    );
}

#[tokio::test]
async fn test_invalid_url_is_rejected_up_front() {
    let dir = tempdir().unwrap();
    let downloader = Downloader::builder()
        .directory(dir.path())
        .build()
        .unwrap();

    let result = downloader.resume_download("bad", "file:///etc/passwd").await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert!(downloader.list_all().await.is_none());

    // No state directory noise was left behind for the rejected job
    let downloader = Downloader::builder()
        .directory(dir.path())
        .build()
        .unwrap();
    assert!(downloader.completed_download("bad").await.is_none());
}

#[tokio::test]
async fn test_clones_share_one_job_table() {
    let server = MockServer::start().await;
    let body = b"shared".repeat(100);
    serve_video(&server, "/s.mp4", body.clone()).await;

    let dir = tempdir().unwrap();
    let downloader = Downloader::builder()
        .directory(dir.path())
        .build()
        .unwrap();
    let clone = downloader.clone();

    downloader
        .resume_download("s", &format!("{}/s.mp4", server.uri()))
        .await
        .unwrap();

    // The clone observes the same job and can complete the wait
    let model = wait_until_downloaded(&clone, "s").await;
    assert_eq!(model.identifier, "s");
    assert_eq!(clone.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_observer_sees_the_whole_arc() {
    use squirrel_dl::DownloadObserver;
    use std::sync::Mutex;

    struct History {
        statuses: Mutex<Vec<DownloadStatus>>,
    }

    impl DownloadObserver for History {
        fn on_status_update(
            &self,
            _identifier: &str,
            _progress: f32,
            status: DownloadStatus,
            _error: Option<&Error>,
        ) {
            self.statuses.lock().unwrap().push(status);
        }
    }

    let server = MockServer::start().await;
    serve_video(&server, "/arc.mp4", b"x".repeat(200_000)).await;

    let dir = tempdir().unwrap();
    let history = Arc::new(History {
        statuses: Mutex::new(Vec::new()),
    });
    let downloader = Downloader::builder()
        .directory(dir.path())
        .observer(history.clone())
        .build()
        .unwrap();

    downloader
        .resume_download("arc", &format!("{}/arc.mp4", server.uri()))
        .await
        .unwrap();
    wait_until_downloaded(&downloader, "arc").await;

    let statuses = history.statuses.lock().unwrap();
    assert!(statuses.contains(&DownloadStatus::Downloading));
    assert_eq!(statuses.last(), Some(&DownloadStatus::Downloaded));
    // Progress updates never arrive after the terminal state
    let last_downloading = statuses
        .iter()
        .rposition(|s| *s == DownloadStatus::Downloading)
        .unwrap();
    let downloaded = statuses
        .iter()
        .position(|s| *s == DownloadStatus::Downloaded)
        .unwrap();
    assert!(last_downloading < downloaded);
}
