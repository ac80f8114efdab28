use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use viewtime::{Rect, SectionLayout, TrackerConfig, TrackerController};

#[derive(Default)]
struct FakeLayout {
    rects: HashMap<String, Rect>,
}

impl FakeLayout {
    fn with_section(id: &str, rect: Rect) -> Self {
        Self {
            rects: HashMap::from([(id.to_string(), rect)]),
        }
    }
}

impl SectionLayout for FakeLayout {
    fn section_rect(&self, section_id: &str) -> Option<Rect> {
        self.rects.get(section_id).copied()
    }

    fn viewport_height(&self) -> f64 {
        800.0
    }
}

fn request_body(buf: &[u8]) -> Option<&[u8]> {
    let body_start = buf.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let headers = std::str::from_utf8(&buf[..body_start]).ok()?;
    let content_length = headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.eq_ignore_ascii_case("content-length") {
            value.trim().parse::<usize>().ok()
        } else {
            None
        }
    })?;
    buf.get(body_start..body_start + content_length)
}

/// Minimal collector: accepts POSTed JSON payloads, records them, and
/// answers `200 OK` with a session id.
async fn spawn_collector() -> (SocketAddr, Arc<Mutex<Vec<serde_json::Value>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let sink = sink.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let Ok(n) = socket.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(body) = request_body(&buf) {
                        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
                            sink.lock().unwrap().push(value);
                        }
                        let response = "HTTP/1.1 200 OK\r\n\
                                        Content-Type: application/json\r\n\
                                        Content-Length: 26\r\n\
                                        Connection: close\r\n\r\n\
                                        {\"sessionId\":\"sess-test\"}";
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        return;
                    }
                }
            });
        }
    });

    (addr, received)
}

async fn wait_for_payloads(received: &Arc<Mutex<Vec<serde_json::Value>>>) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while received.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    // Grace period so a duplicate send would have time to arrive.
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn startup_survives_unopenable_backup_store() {
    let (addr, _received) = spawn_collector().await;
    let dir = tempfile::tempdir().unwrap();

    // A regular file where a directory is needed makes the backup database
    // unopenable.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let backup_path = blocker.join("nested").join("backups.sqlite3");

    let config = TrackerConfig::new(format!("http://{addr}/track"), "proj", "tok", backup_path);
    let layout = Arc::new(FakeLayout::with_section("hero", Rect { top: 0.0, bottom: 400.0 }));

    let tracker = TrackerController::start(config, layout, vec!["hero".into()])
        .await
        .expect("tracker must start without a backup store");

    // Tracking continues in-memory.
    tracker.on_intersection("hero", 0.5).await;
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let snapshot = tracker.current_snapshot().await;
    assert!(snapshot.section_times["hero"] >= 1);

    tracker.shutdown().await;
}

#[tokio::test]
async fn shutdown_joins_tasks_and_sends_exactly_one_final_flush() {
    let (addr, received) = spawn_collector().await;
    let dir = tempfile::tempdir().unwrap();

    let config = TrackerConfig::new(
        format!("http://{addr}/track"),
        "proj",
        "tok",
        dir.path().join("backups.sqlite3"),
    );
    let layout = Arc::new(FakeLayout::with_section("hero", Rect { top: 0.0, bottom: 400.0 }));

    let tracker = TrackerController::start(config, layout, vec!["hero".into()])
        .await
        .unwrap();
    tracker.on_intersection("hero", 0.5).await;

    // Shutdown cancels and joins the background tasks, then sends the final
    // flush; a late unload signal must not produce a second one.
    tracker.shutdown().await;
    tracker.on_unload().await;

    wait_for_payloads(&received).await;
    let payloads = received.lock().unwrap().clone();

    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["isFinal"], true);
    assert_eq!(payloads[0]["projectId"], "proj");
    assert_eq!(payloads[0]["shareToken"], "tok");

    // Joined tasks mean the state is still reachable and consistent.
    let snapshot = tracker.current_snapshot().await;
    assert_eq!(snapshot.visibility_changes, 0);
}
