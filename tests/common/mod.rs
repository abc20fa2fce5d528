//! Shared helpers for the mock portal integration tests

#![allow(dead_code)]

use knolx_uploadr::config::Config;
use knolx_uploadr::portal::PortalClient;
use knolx_uploadr::upload::UploadController;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use wiremock::{MockServer, Request, Respond, ResponseTemplate};

pub const CSRF_TOKEN: &str = "test-csrf-token";
pub const SESSION_ID: &str = "5a1b2c3d";
pub const SENTINEL: &str = "No new video URL found";

/// Replies with each template in turn, repeating the last one
pub struct Sequence {
    responses: Vec<ResponseTemplate>,
    next: AtomicUsize,
}

impl Sequence {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        Self {
            responses,
            next: AtomicUsize::new(0),
        }
    }

    /// 200 responses with the given plain-text bodies
    pub fn bodies(bodies: &[&str]) -> Self {
        Self::new(
            bodies
                .iter()
                .map(|body| ResponseTemplate::new(200).set_body_string(*body))
                .collect(),
        )
    }
}

impl Respond for Sequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(index)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_else(|| ResponseTemplate::new(500))
    }
}

/// Item route on the mock portal, e.g. `item_path("progress")`
pub fn item_path(route: &str) -> String {
    format!("/youtube/{}/{}", SESSION_ID, route)
}

pub fn test_config(server: &MockServer) -> Config {
    Config::for_portal(&server.uri(), CSRF_TOKEN)
}

pub fn test_client(server: &MockServer) -> PortalClient {
    PortalClient::new(&test_config(server).portal).unwrap()
}

pub fn test_controller(server: &MockServer) -> UploadController<PortalClient> {
    let config = test_config(server);
    UploadController::new(SESSION_ID, test_client(server), &config)
}

/// A video file on disk with `size` bytes of content
pub fn video_file(name: &str, size: usize) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, vec![b'v'; size]).unwrap();
    (dir, path)
}
