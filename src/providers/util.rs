use crate::core::FetchOutcome;
use crate::core::config::RetryConfig;
use reqwest::StatusCode;
use std::future::Future;
use tracing::debug;

const USER_AGENT: &str = concat!("quotecache/", env!("CARGO_PKG_VERSION"));

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Maps a non-success HTTP status to the adapter outcome taxonomy.
pub fn classify_status(status: StatusCode, context: &str) -> FetchOutcome {
    let message = format!("HTTP {status} for {context}");
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchOutcome::RateLimited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchOutcome::AuthError(message),
        StatusCode::NOT_FOUND => FetchOutcome::NoData,
        _ => FetchOutcome::NetworkError(message),
    }
}

pub fn classify_request_error(err: reqwest::Error, context: &str) -> FetchOutcome {
    if err.is_decode() {
        FetchOutcome::Malformed(format!("{err} for {context}"))
    } else {
        FetchOutcome::NetworkError(format!("{err} for {context}"))
    }
}

/// Sends a request and decodes its JSON body, classifying every failure.
pub async fn get_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
    context: &str,
) -> Result<T, FetchOutcome> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_request_error(e, context))?;
    if !response.status().is_success() {
        return Err(classify_status(response.status(), context));
    }
    let text = response
        .text()
        .await
        .map_err(|e| classify_request_error(e, context))?;
    serde_json::from_str(&text)
        .map_err(|e| FetchOutcome::Malformed(format!("Failed to parse JSON response for {context}: {e}")))
}

/// Retries an async operation while it fails transiently, with exponential
/// backoff between attempts.
///
/// Returns the final result together with the number of attempts made
/// (1 initial + up to `policy.max_retries`).
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    policy: &RetryConfig,
) -> (Result<T, FetchOutcome>, usize)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchOutcome>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return (Ok(val), attempt),
            Err(err) => {
                if !err.is_transient() || attempt > policy.max_retries {
                    return (Err(err), attempt);
                }
                let delay = policy.delay_for(attempt);
                debug!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt,
                    policy.max_retries + 1,
                    err,
                    delay
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick_policy() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            factor: 2,
            max_delay_ms: 5,
            call_timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_exhausted() {
        let calls = AtomicUsize::new(0);
        let (result, attempts) = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FetchOutcome::NetworkError("reset".to_string()))
            },
            &quick_policy(),
        )
        .await;

        assert!(matches!(result, Err(FetchOutcome::NetworkError(_))));
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let (result, attempts) = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FetchOutcome::NoData)
            },
            &quick_policy(),
        )
        .await;

        assert_eq!(result, Err(FetchOutcome::NoData));
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_rate_limit() {
        let calls = AtomicUsize::new(0);
        let (result, attempts) = with_retry(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FetchOutcome::RateLimited("429".to_string()))
                } else {
                    Ok(42)
                }
            },
            &quick_policy(),
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "x"),
            FetchOutcome::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "x"),
            FetchOutcome::AuthError(_)
        ));
        assert_eq!(classify_status(StatusCode::NOT_FOUND, "x"), FetchOutcome::NoData);
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "x"),
            FetchOutcome::NetworkError(_)
        ));
    }
}
