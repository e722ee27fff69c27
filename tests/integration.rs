//! Integration tests for kudobot
//!
//! These tests require Chrome to be installed and available.
//! Run with: cargo test --test integration -- --ignored

use kudobot::{BrowserSession, DelayPolicy, FeedSurface, SessionOptions};

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_launch_and_snapshot_blank_page() {
    let state_dir = tempfile::tempdir().expect("Failed to create state dir");
    let session = BrowserSession::launch(&SessionOptions {
        headless: true,
        state_dir: state_dir.path().to_path_buf(),
    })
    .await
    .expect("Failed to launch browser");

    let page = session
        .new_page(DelayPolicy::none())
        .await
        .expect("Failed to create page");

    // A blank page has no feed entries and no consent dialog.
    let entries = page.snapshot().await.expect("Failed to snapshot");
    assert!(entries.is_empty());

    page.accept_cookies().await.expect("Consent check failed");

    session.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_state_dir_persists_across_sessions() {
    let state_dir = tempfile::tempdir().expect("Failed to create state dir");

    for _ in 0..2 {
        let session = BrowserSession::launch(&SessionOptions {
            headless: true,
            state_dir: state_dir.path().to_path_buf(),
        })
        .await
        .expect("Failed to launch browser");
        session.close().await.expect("Failed to close browser");
    }

    // Chrome populates the profile on first launch and reuses it after.
    assert!(state_dir.path().read_dir().unwrap().next().is_some());
}
