//! Outbound webhook delivery.
//!
//! Each session owns one [`WebhookDispatcher`]: a bounded queue drained by a
//! single worker, so deliveries for a user go out one at a time and in order.
//! Enqueueing never waits; a full queue drops the job.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    hookgate_common::UserId,
    hookgate_config::WebhookConfig,
    reqwest::{
        Client, StatusCode,
        multipart::{Form, Part},
        redirect, tls,
    },
    tokio::sync::mpsc::{self, error::TrySendError},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{error::DeliveryError, media};

/// One notification for one user's webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookJob {
    pub user_id: UserId,
    pub url: String,
    /// Form fields, in order (`jsonData`, `token`).
    pub fields: Vec<(String, String)>,
    /// Local file sent as the multipart `file` part.
    pub file: Option<PathBuf>,
}

impl WebhookJob {
    pub fn new(
        user_id: UserId,
        url: impl Into<String>,
        json_data: String,
        token: impl Into<String>,
        file: Option<PathBuf>,
    ) -> Self {
        Self {
            user_id,
            url: url.into(),
            fields: vec![
                ("jsonData".to_string(), json_data),
                ("token".to_string(), token.into()),
            ],
            file,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }

    /// Delay after the `attempt`-th failure (1-based): doubling, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WebhookConfig::default())
    }
}

/// Build a session's HTTP client.
pub fn build_http_client(config: &WebhookConfig, verbose: bool) -> reqwest::Result<Client> {
    Client::builder()
        .use_rustls_tls()
        .min_tls_version(tls::Version::TLS_1_3)
        .timeout(config.timeout())
        .redirect(redirect::Policy::limited(config.max_redirects))
        .connection_verbose(verbose)
        .build()
}

/// Producer side of a session's delivery queue.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    user_id: UserId,
    tx: mpsc::Sender<WebhookJob>,
}

impl WebhookDispatcher {
    /// A dispatcher and the receiver its worker drains.
    pub fn channel(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<WebhookJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { user_id, tx }, rx)
    }

    /// Queue a job without waiting. Returns false if it was dropped.
    pub fn enqueue(&self, job: WebhookJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                warn!(user_id = %self.user_id, url = %job.url, "webhook queue full, dropping delivery");
                false
            },
            Err(TrySendError::Closed(_)) => {
                debug!(user_id = %self.user_id, "webhook worker stopped, dropping delivery");
                false
            },
        }
    }

    /// Drain `rx` one job at a time until the queue closes or `cancel` fires.
    pub async fn run_worker(
        user_id: UserId,
        mut rx: mpsc::Receiver<WebhookJob>,
        client: Client,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) {
        loop {
            let job = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = deliver_with_retry(&client, &job, &policy) => {
                    if let Err(e) = result {
                        warn!(user_id = %user_id, url = %job.url, error = %e, "webhook delivery failed");
                    }
                },
            }
        }
        debug!(user_id = %user_id, "webhook worker stopped");
    }
}

/// One POST: a form, or multipart when the job carries a file.
pub async fn deliver(client: &Client, job: &WebhookJob) -> Result<StatusCode, DeliveryError> {
    let request = client.post(&job.url);
    let request = match &job.file {
        Some(path) => request.multipart(multipart_form(job, path).await?),
        None => request.form(&job.fields),
    };
    let status = request.send().await?.status();
    if status.is_success() {
        Ok(status)
    } else {
        Err(DeliveryError::Status(status))
    }
}

async fn multipart_form(job: &WebhookJob, path: &Path) -> Result<Form, DeliveryError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|source| DeliveryError::File {
            path: path.to_path_buf(),
            source,
        })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let mime = path
        .extension()
        .and_then(|e| e.to_str())
        .map(media::mime_for_extension)
        .unwrap_or(media::OCTET_STREAM);
    let part = Part::bytes(data)
        .file_name(file_name)
        .mime_str(mime)
        .map_err(|e| DeliveryError::Multipart(e.to_string()))?;

    let form = job
        .fields
        .iter()
        .fold(Form::new(), |form, (k, v)| form.text(k.clone(), v.clone()));
    Ok(form.part("file", part))
}

/// Deliver with exponential backoff on retryable failures.
pub async fn deliver_with_retry(
    client: &Client,
    job: &WebhookJob,
    policy: &RetryPolicy,
) -> Result<(), DeliveryError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match deliver(client, job).await {
            Ok(status) => {
                info!(
                    user_id = %job.user_id,
                    url = %job.url,
                    status = status.as_u16(),
                    with_file = job.file.is_some(),
                    "webhook delivered"
                );
                return Ok(());
            },
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    user_id = %job.user_id,
                    url = %job.url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "webhook attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        }
    }

    fn job(url: String, file: Option<PathBuf>) -> WebhookJob {
        WebhookJob::new(
            UserId(3),
            url,
            r#"{"type":"Message"}"#.to_string(),
            "tok",
            file,
        )
    }

    fn client() -> Client {
        build_http_client(&WebhookConfig::default(), false).unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(10), Duration::from_secs(10));
        assert_eq!(policy.backoff(64), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn form_delivery_posts_json_data_and_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header(
                "content-type",
                "application/x-www-form-urlencoded",
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("jsonData".into(), r#"{"type":"Message"}"#.into()),
                Matcher::UrlEncoded("token".into(), "tok".into()),
            ]))
            .with_status(200)
            .create_async()
            .await;

        let status = deliver(&client(), &job(format!("{}/hook", server.url()), None))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn file_delivery_is_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ABC123.txt");
        std::fs::write(&path, "attachment body").unwrap();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", Matcher::Regex("^multipart/form-data".into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="jsonData""#.into()),
                Matcher::Regex(r#"name="token""#.into()),
                Matcher::Regex(r#"name="file"; filename="ABC123.txt""#.into()),
                Matcher::Regex("attachment body".into()),
            ]))
            .with_status(200)
            .create_async()
            .await;

        deliver(&client(), &job(format!("{}/hook", server.url()), Some(path)))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_attachment_fails_without_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .expect(0)
            .create_async()
            .await;

        let err = deliver(
            &client(),
            &job(
                format!("{}/hook", server.url()),
                Some(PathBuf::from("/nonexistent/file.jpg")),
            ),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DeliveryError::File { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retried_up_to_the_limit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = deliver_with_retry(
            &client(),
            &job(format!("{}/hook", server.url()), None),
            &quick_policy(3),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DeliveryError::Status(s) if s == StatusCode::SERVICE_UNAVAILABLE));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_are_final() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let result = deliver_with_retry(
            &client(),
            &job(format!("{}/hook", server.url()), None),
            &quick_policy(3),
        )
        .await;
        assert!(matches!(result, Err(DeliveryError::Status(s)) if s == StatusCode::NOT_FOUND));
        mock.assert_async().await;
    }

    #[test]
    fn full_queue_drops_jobs() {
        let (dispatcher, _rx) = WebhookDispatcher::channel(UserId(3), 1);
        assert!(dispatcher.enqueue(job("http://hooks.local/a".into(), None)));
        assert!(!dispatcher.enqueue(job("http://hooks.local/b".into(), None)));
    }

    #[test]
    fn closed_queue_drops_jobs() {
        let (dispatcher, rx) = WebhookDispatcher::channel(UserId(3), 4);
        drop(rx);
        assert!(!dispatcher.enqueue(job("http://hooks.local/a".into(), None)));
    }

    #[tokio::test]
    async fn worker_delivers_in_order_and_stops_on_cancel() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/first")
            .with_status(200)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/second")
            .with_status(200)
            .create_async()
            .await;

        let (dispatcher, rx) = WebhookDispatcher::channel(UserId(3), 8);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(WebhookDispatcher::run_worker(
            UserId(3),
            rx,
            client(),
            quick_policy(1),
            cancel.clone(),
        ));

        assert!(dispatcher.enqueue(job(format!("{}/first", server.url()), None)));
        assert!(dispatcher.enqueue(job(format!("{}/second", server.url()), None)));

        // Closing the queue lets the worker drain it and exit.
        drop(dispatcher);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        first.assert_async().await;
        second.assert_async().await;

        let (_dispatcher, rx) = WebhookDispatcher::channel(UserId(3), 8);
        let worker = tokio::spawn(WebhookDispatcher::run_worker(
            UserId(3),
            rx,
            client(),
            quick_policy(1),
            cancel.clone(),
        ));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }
}
