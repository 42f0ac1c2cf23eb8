//! Integration tests for rendering against live repositories

use std::sync::Arc;
use std::time::Duration;

use cmdweave::render::{RenderError, RenderSettings, Renderer};
use programstore::{Repository, WatchConfig};
use tempfile::TempDir;

fn quiet() -> RenderSettings {
    RenderSettings {
        verbose: false,
        ..Default::default()
    }
}

fn echoer(default: &str) -> String {
    format!(
        "name: echoer\npath: /bin/echo\nargs:\n  - name: msg\n    default: \"{}\"\n",
        default
    )
}

// =============================================================================
// Rendering
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_run_echoer_from_repository() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("a.yaml"), echoer("hi")).unwrap();

    let repository = Arc::new(Repository::new([temp.path()]));
    repository.load().unwrap();
    let renderer = Renderer::new(quiet()).unwrap().with_repository(repository);

    assert_eq!(renderer.render_string("{{ run \"echoer\" }}").await.unwrap(), "hi\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_first_repository_wins() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    std::fs::write(first.path().join("a.yaml"), echoer("first")).unwrap();
    std::fs::write(second.path().join("a.yaml"), echoer("second")).unwrap();

    let repositories: Vec<Arc<Repository>> = [first.path(), second.path()]
        .into_iter()
        .map(|dir| {
            let repository = Arc::new(Repository::new([dir]));
            repository.load().unwrap();
            repository
        })
        .collect();

    let mut renderer = Renderer::new(quiet()).unwrap();
    for repository in repositories {
        renderer = renderer.with_repository(repository);
    }
    assert_eq!(renderer.render_string("{{ run \"echoer\" }}").await.unwrap(), "first\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_overrides_do_not_leak_into_repository() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("a.yaml"), echoer("hi")).unwrap();
    let repository = Arc::new(Repository::new([temp.path()]));
    repository.load().unwrap();
    let renderer = Renderer::new(quiet()).unwrap().with_repository(repository.clone());

    let output = renderer
        .render_string("{{ run \"echoer\" msg=\"changed\" }}|{{ run \"echoer\" }}")
        .await
        .unwrap();
    assert_eq!(output, "changed\n|hi\n");
    assert_eq!(repository.get("echoer").unwrap().unwrap().args[0].value, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_program_is_an_error() {
    let renderer = Renderer::new(quiet()).unwrap();
    let err = renderer.render_string("{{ run \"ghost\" }}").await.unwrap_err();
    assert!(matches!(err, RenderError::Template(_)));
    assert!(err.to_string().contains("ghost"));
}

// =============================================================================
// Live reload
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_watch_reload_reaches_next_render() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("a.yaml"), echoer("before")).unwrap();
    let repository = Arc::new(Repository::new([temp.path()]));
    repository.load().unwrap();

    let (trigger, shutdown) = programstore::shutdown::channel();
    let renderer = Renderer::new(quiet())
        .unwrap()
        .with_repository(repository.clone())
        .with_shutdown(shutdown.clone());
    assert_eq!(renderer.render_string("{{ run \"echoer\" }}").await.unwrap(), "before\n");

    let watcher = {
        let repository = repository.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            repository
                .watch(&WatchConfig { poll_interval_ms: 20 }, &shutdown)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::fs::write(temp.path().join("a.yaml"), echoer("after")).unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut output = String::new();
    while tokio::time::Instant::now() < deadline {
        output = renderer.render_string("{{ run \"echoer\" }}").await.unwrap();
        if output == "after\n" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(output, "after\n");

    trigger.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), watcher).await.unwrap().unwrap();
    assert!(result.unwrap_err().is_cancelled());
}
