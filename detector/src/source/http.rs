use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use reqwest::StatusCode;
use tracing::{debug, info};

use super::{decode_frame, AcquisitionError, FrameFuture, FrameSource};

/// Polls a camera snapshot endpoint, one GET per capture tick.
///
/// Each response body is expected to be a single encoded image (usually
/// JPEG). The frame is resized to capture resolution on decode.
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    url: String,
    width: u32,
    height: u32,
    next_seq: u64,
}

impl HttpSnapshotSource {
    pub fn new(
        url: &str,
        timeout: Duration,
        width: u32,
        height: u32,
    ) -> Result<Self, AcquisitionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| AcquisitionError::Lost(format!("failed to build HTTP client: {e}")))?;
        info!(url, width, height, "HTTP snapshot source ready");
        Ok(Self {
            client,
            url: url.to_string(),
            width,
            height,
            next_seq: 0,
        })
    }
}

impl FrameSource for HttpSnapshotSource {
    fn produce_frame(&mut self) -> FrameFuture {
        let client = self.client.clone();
        let url = self.url.clone();
        let (width, height) = (self.width, self.height);
        let seq = self.next_seq;
        self.next_seq += 1;

        async move {
            let resp = client
                .get(&url)
                .send()
                .await
                .map_err(classify_request_error)?;

            if let Some(err) = classify_status(resp.status()) {
                return Err(err);
            }

            let body = resp
                .bytes()
                .await
                .map_err(|e| AcquisitionError::Transient(format!("failed to read body: {e}")))?;
            let captured_at_ms = Utc::now().timestamp_millis();
            debug!(seq, bytes = body.len(), "fetched snapshot");
            decode_frame(&body, width, height, captured_at_ms, seq)
        }
        .boxed()
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Map an HTTP status to an acquisition failure, or `None` on success.
pub fn classify_status(status: StatusCode) -> Option<AcquisitionError> {
    match status {
        s if s.is_success() => None,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Some(AcquisitionError::Denied(format!("camera returned {status}")))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            Some(AcquisitionError::Lost(format!("camera returned {status}")))
        }
        _ => Some(AcquisitionError::Transient(format!("camera returned {status}"))),
    }
}

fn classify_request_error(e: reqwest::Error) -> AcquisitionError {
    if e.is_connect() {
        AcquisitionError::Lost(format!("cannot reach camera: {e}"))
    } else {
        AcquisitionError::Transient(format!("snapshot request failed: {e}"))
    }
}
