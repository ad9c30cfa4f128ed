//! GitHub OAuth device flow, used to obtain the gist token backing the
//! rendezvous directory.

use serde::{Deserialize, Serialize};

use crate::error::NodeError;

// Device-flow client ids are public for desktop apps.
pub const CLIENT_ID: &str = "Ov23liXhUOLJ0WxMkpDL";
const GITHUB_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    interval: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

/// What the UI needs to drive the device flow: the code to display and
/// the polling interval GitHub asks for.
#[derive(Debug, Serialize)]
pub struct AuthState {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub interval: i64,
}

pub async fn start_device_flow() -> Result<AuthState, NodeError> {
    let client = reqwest::Client::new();
    let params = [("client_id", CLIENT_ID), ("scope", "gist")];

    let res = client
        .post(GITHUB_DEVICE_CODE_URL)
        .header("Accept", "application/json")
        .header("User-Agent", "rchat-node")
        .form(&params)
        .send()
        .await
        .map_err(|e| NodeError::Network(e.to_string()))?;

    if !res.status().is_success() {
        return Err(NodeError::Network(format!(
            "device code request failed: {}",
            res.status()
        )));
    }

    let body: DeviceCodeResponse = res
        .json()
        .await
        .map_err(|e| NodeError::Network(e.to_string()))?;

    Ok(AuthState {
        device_code: body.device_code,
        user_code: body.user_code,
        verification_uri: body.verification_uri,
        interval: body.interval,
    })
}

/// One polling attempt. Returns the token once the user has approved;
/// until then GitHub answers `authorization_pending`, surfaced as an
/// error the UI retries on its own interval.
pub async fn poll_for_token(device_code: &str) -> Result<String, NodeError> {
    let client = reqwest::Client::new();
    let params = [
        ("client_id", CLIENT_ID),
        ("device_code", device_code),
        ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
    ];

    let res = client
        .post(GITHUB_TOKEN_URL)
        .header("Accept", "application/json")
        .header("User-Agent", "rchat-node")
        .form(&params)
        .send()
        .await
        .map_err(|e| NodeError::Network(e.to_string()))?;

    let body: TokenResponse = res
        .json()
        .await
        .map_err(|e| NodeError::Network(e.to_string()))?;

    if let Some(error) = body.error {
        return Err(NodeError::Network(error));
    }

    body.access_token
        .ok_or_else(|| NodeError::Network("no access token in response".into()))
}
