//! Origin test utilities.

use httpmock::MockServer;
use std::net::TcpListener;
use tessera_core::config::AppConfig;

#[allow(dead_code)]
pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Point every origin endpoint at `server`.
#[allow(dead_code)]
pub fn use_mock_origin(config: &mut AppConfig, server: &MockServer) {
    let drive = &mut config.origin.google_drive;
    drive.token_url = server.url("/token");
    drive.api_url = server.url("/drive/v3");
    drive.content_url = server.url("/thumbnail");
}
