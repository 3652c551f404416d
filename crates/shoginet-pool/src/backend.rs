//! HTTP endpoint helper (spec §4.F): URL construction, timeouts, and
//! status-code classification shared by the worker's acquire/report call
//! and the progress reporter's side-channel POSTs.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::Deserialize;

/// Timeout applied to every call against the server.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Extra backoff added on top of the worker's own backoff value when the
/// server signals a rate limit.
pub const RATE_LIMIT_EXTRA_BACKOFF: Duration = Duration::from_secs(60);

/// Error reported in a `4xx` JSON body that means "the server considers
/// this client build obsolete and will not serve it further".
const UPDATE_REQUIRED_MARKER: &str = "Please restart";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Builds `base.join(path)`, rejecting anything other than an `http(s)`
/// base URL.
pub fn endpoint_url(base: &Url, path: &str) -> anyhow::Result<Url> {
    if base.scheme() != "http" && base.scheme() != "https" {
        anyhow::bail!("endpoint {base} has unsupported scheme {:?}", base.scheme());
    }
    Ok(base.join(path)?)
}

/// Outcome of a classified POST response, matching the worker's response
/// handling in spec §4.D step 4.
#[derive(Debug)]
pub enum PostOutcome {
    /// `202`: a new job was returned.
    Job(shoginet_core::Job),
    /// `204`, or no response was sent at all (the `stop=true` skip case).
    NoJob,
    /// `5xx`: transient server error.
    ServerError {
        /// HTTP status code.
        status: u16,
    },
    /// `4xx` other than an update-required signal.
    ClientError {
        /// HTTP status code.
        status: u16,
        /// Extra backoff to add on top of the worker's own draw (60s on
        /// `429`, otherwise zero).
        extra_backoff: Duration,
    },
    /// The server signaled that this client must be restarted to pick up
    /// an update; the worker must raise [`crate::worker::WorkerError::UpdateRequired`].
    UpdateRequired,
    /// Any other status code.
    Unexpected {
        /// HTTP status code.
        status: u16,
    },
}

fn classify_4xx(status: StatusCode, body: &str) -> PostOutcome {
    let extra_backoff = if status == StatusCode::TOO_MANY_REQUESTS {
        RATE_LIMIT_EXTRA_BACKOFF
    } else {
        Duration::ZERO
    };

    if let Ok(err) = serde_json::from_str::<ErrorBody>(body) {
        if err.error.contains(UPDATE_REQUIRED_MARKER) {
            return PostOutcome::UpdateRequired;
        }
    }

    PostOutcome::ClientError {
        status: status.as_u16(),
        extra_backoff,
    }
}

/// POSTs `body` to `path`, adding `?stop=true` when `stop` is set, and
/// classifies the response per spec §4.D step 4. Does not distinguish a
/// transport failure from a response — callers treat `Err` as the
/// "network exception" branch.
pub async fn report_and_fetch(
    http: &reqwest::Client,
    base: &Url,
    path: &str,
    body: &serde_json::Value,
    stop: bool,
) -> anyhow::Result<PostOutcome> {
    let mut url = endpoint_url(base, path)?;
    if stop {
        url.query_pairs_mut().append_pair("stop", "true");
    }

    let res = http
        .post(url)
        .json(body)
        .timeout(HTTP_TIMEOUT)
        .send()
        .await?;

    let status = res.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(PostOutcome::NoJob);
    }
    if status == StatusCode::ACCEPTED {
        let job: shoginet_core::Job = res.json().await?;
        return Ok(PostOutcome::Job(job));
    }
    if status.is_server_error() {
        return Ok(PostOutcome::ServerError {
            status: status.as_u16(),
        });
    }
    if status.is_client_error() {
        let text = res.text().await.unwrap_or_default();
        return Ok(classify_4xx(status, &text));
    }
    Ok(PostOutcome::Unexpected {
        status: status.as_u16(),
    })
}

/// POSTs `abort/<id>` with the standard envelope; logs outcome at the
/// caller (the worker logs success/failure, swallowing transport errors).
pub async fn abort_job(
    http: &reqwest::Client,
    base: &Url,
    job_id: &str,
    body: &serde_json::Value,
) -> anyhow::Result<StatusCode> {
    let url = endpoint_url(base, &format!("abort/{job_id}"))?;
    let res = http
        .post(url)
        .json(body)
        .timeout(HTTP_TIMEOUT)
        .send()
        .await?;
    Ok(res.status())
}

/// Status of a progress-reporter POST, used to decide whether to sleep
/// 60s before the next dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPostStatus {
    /// `204`, the expected response.
    Ok,
    /// `429`: suspend the reporter loop for 60s.
    RateLimited,
    /// Any other status; logged as an error but not retried.
    Unexpected(u16),
}

/// POSTs a progress-report body to `analysis/<job_id>` (raw bytes, as the
/// reporter pre-serializes to avoid re-encoding on every retry attempt —
/// there are none, but it matches the reference's `data=` byte-string
/// send).
pub async fn send_progress(
    http: &reqwest::Client,
    base: &Url,
    job_id: &str,
    body: &[u8],
) -> anyhow::Result<ProgressPostStatus> {
    let url = endpoint_url(base, &format!("analysis/{job_id}"))?;
    let res = http
        .post(url)
        .header("content-type", "application/json")
        .body(body.to_vec())
        .timeout(HTTP_TIMEOUT)
        .send()
        .await?;

    Ok(match res.status() {
        StatusCode::NO_CONTENT => ProgressPostStatus::Ok,
        StatusCode::TOO_MANY_REQUESTS => ProgressPostStatus::RateLimited,
        other => ProgressPostStatus::Unexpected(other.as_u16()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_scheme() {
        let url = Url::parse("ftp://example.test/").unwrap();
        assert!(endpoint_url(&url, "acquire").is_err());
    }

    #[test]
    fn joins_path_onto_trailing_slash_base() {
        let url = Url::parse("https://example.test/").unwrap();
        let joined = endpoint_url(&url, "analysis/j1").unwrap();
        assert_eq!(joined.as_str(), "https://example.test/analysis/j1");
    }

    #[test]
    fn classifies_update_required_marker() {
        let body = r#"{"error": "Please restart shoginet to upgrade."}"#;
        match classify_4xx(StatusCode::BAD_REQUEST, body) {
            PostOutcome::UpdateRequired => {}
            other => panic!("expected UpdateRequired, got {other:?}"),
        }
    }

    #[test]
    fn rate_limit_adds_extra_backoff() {
        match classify_4xx(StatusCode::TOO_MANY_REQUESTS, "{}") {
            PostOutcome::ClientError { extra_backoff, .. } => {
                assert_eq!(extra_backoff, RATE_LIMIT_EXTRA_BACKOFF);
            }
            other => panic!("expected ClientError, got {other:?}"),
        }
    }
}
