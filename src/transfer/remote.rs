//! Remote Ledger Backend
//!
//! Each operation is one HTTP POST of a JSON payload to a named stored
//! procedure (`<base_url><procedure>`), e.g. a PostgREST `/rpc/` endpoint.
//!
//! # Response Classification
//!
//! | Status                         | Outcome                         |
//! |--------------------------------|---------------------------------|
//! | 2xx                            | success                         |
//! | 500, 409                       | retryable (serialization/deadlock) |
//! | 502, 503, 504                  | retryable (upstream timeout)    |
//! | 4xx except 408/409/429         | retryable, or fatal with `fast_fail_client_errors` |
//! | anything else                  | retryable                       |
//!
//! Transport failures (refused connection, DNS, client timeout) are returned
//! at once and never consume retry budget.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use super::backend::{BackendCapabilities, BackendKind, TransferBackend};
use super::error::TransferError;
use super::retry::{AttemptError, RetryPolicy};
use crate::config::RemoteConfig;
use crate::models::{Account, Transaction};

pub const CREATE_ACCOUNT: &str = "create_account";
pub const DELETE_ALL_ACCOUNTS: &str = "delete_all_accounts";
pub const TRANSFER_BALANCE: &str = "transfer_balance";

/// How a single response status is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// Serialization failure or deadlock detected by the remote store
    Conflict,
    /// Gateway or upstream timeout
    UpstreamTimeout,
    /// Any other non-success status; retried
    Unexpected,
    /// Client error fast-failed without retry
    Rejected,
}

impl ResponseClass {
    pub fn of(status: StatusCode, fast_fail_client_errors: bool) -> Self {
        if status.is_success() {
            return ResponseClass::Success;
        }
        match status {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::CONFLICT => ResponseClass::Conflict,
            StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => ResponseClass::UpstreamTimeout,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                ResponseClass::Unexpected
            }
            s if fast_fail_client_errors && s.is_client_error() => ResponseClass::Rejected,
            _ => ResponseClass::Unexpected,
        }
    }
}

#[derive(Serialize)]
struct CreateAccountParams<'a> {
    account_id: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    balance: Decimal,
}

#[derive(Serialize)]
struct TransferParams<'a> {
    from_id: &'a str,
    to_id: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
}

#[derive(Serialize)]
struct NoParams {}

/// Stored-procedure backend over HTTP
pub struct RemoteLedgerBackend {
    client: reqwest::Client,
    base_url: String,
    retry: Arc<RetryPolicy>,
    fast_fail_client_errors: bool,
    concurrency_multiplier: usize,
}

impl RemoteLedgerBackend {
    /// Build a backend with its own shared HTTP client
    pub fn new(config: &RemoteConfig, retry: Arc<RetryPolicy>) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                TransferError::Transport(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self::with_client(client, &config.base_url, retry)
            .fast_fail_client_errors(config.fast_fail_client_errors))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, retry: Arc<RetryPolicy>) -> Self {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            client,
            base_url,
            retry,
            fast_fail_client_errors: false,
            concurrency_multiplier: 1,
        }
    }

    pub fn fast_fail_client_errors(mut self, enabled: bool) -> Self {
        self.fast_fail_client_errors = enabled;
        self
    }

    pub fn with_concurrency_multiplier(mut self, multiplier: usize) -> Self {
        self.concurrency_multiplier = multiplier;
        self
    }

    pub fn endpoint(&self, procedure: &str) -> String {
        format!("{}{}", self.base_url, procedure)
    }

    /// Issue one request and read the whole body
    async fn call<P: Serialize + ?Sized>(
        &self,
        procedure: &'static str,
        payload: &P,
    ) -> Result<(StatusCode, String), TransferError> {
        let response = self
            .client
            .post(self.endpoint(procedure))
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                TransferError::Transport(format!("error sending POST to {}: {}", procedure, e))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<body unreadable: {}>", e));
        Ok((status, body))
    }

    /// Call `procedure` until it succeeds, is rejected, or the retry budget is spent
    async fn call_with_retry<P: Serialize + Sync + ?Sized>(
        &self,
        procedure: &'static str,
        payload: &P,
    ) -> Result<(), TransferError> {
        self.retry
            .run(procedure, |attempt| async move {
                let (status, body) = self
                    .call(procedure, payload)
                    .await
                    .map_err(AttemptError::Fatal)?;

                match ResponseClass::of(status, self.fast_fail_client_errors) {
                    ResponseClass::Success => Ok(()),
                    ResponseClass::Conflict => Err(AttemptError::Retryable(format!(
                        "conflict, status {}: {}",
                        status, body
                    ))),
                    ResponseClass::UpstreamTimeout => Err(AttemptError::Retryable(format!(
                        "upstream timeout, status {}: {}",
                        status, body
                    ))),
                    ResponseClass::Unexpected => Err(AttemptError::Retryable(format!(
                        "unexpected status {}: {}",
                        status, body
                    ))),
                    ResponseClass::Rejected => {
                        warn!(procedure, attempt, status = status.as_u16(), "Request rejected");
                        Err(AttemptError::Fatal(TransferError::Rejected {
                            status: status.as_u16(),
                            body,
                        }))
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl TransferBackend for RemoteLedgerBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            kind: BackendKind::Remote,
            concurrency_multiplier: self.concurrency_multiplier,
        }
    }

    async fn create_account(&self, account: &Account) -> Result<(), TransferError> {
        let params = CreateAccountParams {
            account_id: &account.id,
            balance: account.balance,
        };
        let (status, body) = self.call(CREATE_ACCOUNT, &params).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(TransferError::Store(format!(
                "received non-success response: {}, body: {}",
                status, body
            )))
        }
    }

    async fn delete_all_accounts(&self) -> Result<(), TransferError> {
        self.call_with_retry(DELETE_ALL_ACCOUNTS, &NoParams {}).await
    }

    async fn transfer_balance(
        &self,
        transaction: &Transaction,
        delay: Duration,
    ) -> Result<(), TransferError> {
        if !delay.is_zero() {
            // the procedure signature has no hold parameter
            debug!(
                delay_ms = delay.as_millis() as u64,
                "Transfer delay not forwarded to remote procedure"
            );
        }
        let params = TransferParams {
            from_id: &transaction.from,
            to_id: &transaction.to,
            amount: transaction.amount,
        };
        self.call_with_retry(TRANSFER_BALANCE, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use axum::extract::{Path, State};
    use axum::routing::post;
    use axum::{Json, Router};
    use rust_decimal_macros::dec;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Scripted stand-in for the stored-procedure endpoints
    struct Script {
        queued: Mutex<VecDeque<u16>>,
        fallback: u16,
        calls: AtomicU32,
        received: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl Script {
        fn new(queued: &[u16], fallback: u16) -> Arc<Self> {
            Arc::new(Self {
                queued: Mutex::new(queued.iter().copied().collect()),
                fallback,
                calls: AtomicU32::new(0),
                received: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    async fn procedure(
        State(script): State<Arc<Script>>,
        Path(name): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> (axum::http::StatusCode, String) {
        script.calls.fetch_add(1, Ordering::SeqCst);
        script.received.lock().unwrap().push((name, body));
        let code = script
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(script.fallback);
        let status = axum::http::StatusCode::from_u16(code).unwrap();
        (status, format!("scripted {}", code))
    }

    async fn spawn_server(script: Arc<Script>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/rpc/{name}", post(procedure))
            .with_state(script);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/rpc", addr)
    }

    fn retry(base_ms: u64, max_attempts: u32) -> Arc<RetryPolicy> {
        Arc::new(RetryPolicy::seeded(
            Duration::from_millis(base_ms),
            Duration::ZERO,
            max_attempts,
            5,
        ))
    }

    async fn backend(script: Arc<Script>, base_ms: u64, max_attempts: u32) -> RemoteLedgerBackend {
        let url = spawn_server(script).await;
        RemoteLedgerBackend::with_client(
            reqwest::Client::new(),
            &url,
            retry(base_ms, max_attempts),
        )
    }

    #[test]
    fn test_response_classification() {
        let of = |code: u16, ff: bool| ResponseClass::of(StatusCode::from_u16(code).unwrap(), ff);
        assert_eq!(of(200, false), ResponseClass::Success);
        assert_eq!(of(204, true), ResponseClass::Success);
        assert_eq!(of(500, false), ResponseClass::Conflict);
        assert_eq!(of(409, true), ResponseClass::Conflict);
        assert_eq!(of(504, false), ResponseClass::UpstreamTimeout);
        assert_eq!(of(400, false), ResponseClass::Unexpected);
        assert_eq!(of(400, true), ResponseClass::Rejected);
        assert_eq!(of(429, true), ResponseClass::Unexpected);
        assert_eq!(of(501, true), ResponseClass::Unexpected);
    }

    #[tokio::test]
    async fn test_transfer_succeeds_on_third_attempt() {
        let script = Script::new(&[500, 500], 200);
        let backend = backend(script.clone(), 20, 10).await;
        let tx = Transaction::new("A", "B", dec!(30));

        let started = Instant::now();
        let result = backend.transfer_balance(&tx, Duration::ZERO).await;

        assert_eq!(result, Ok(()));
        assert_eq!(script.calls(), 3);
        // delay(1) + delay(2) with zero jitter
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_gateway_timeout_is_retried() {
        let script = Script::new(&[504, 502], 200);
        let backend = backend(script.clone(), 1, 5).await;

        let tx = Transaction::new("A", "B", dec!(1));
        assert_eq!(backend.transfer_balance(&tx, Duration::ZERO).await, Ok(()));
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test]
    async fn test_delete_all_fails_after_exactly_max_attempts() {
        let script = Script::new(&[], 500);
        let backend = backend(script.clone(), 1, 4).await;

        match backend.delete_all_accounts().await {
            Err(TransferError::RetryExhausted {
                operation,
                attempts,
                last_cause,
            }) => {
                assert_eq!(operation, DELETE_ALL_ACCOUNTS);
                assert_eq!(attempts, 4);
                assert!(last_cause.contains("500"));
                assert!(last_cause.contains("scripted 500"));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
        assert_eq!(script.calls(), 4);
    }

    #[tokio::test]
    async fn test_unexpected_status_consumes_budget() {
        let script = Script::new(&[], 418);
        let backend = backend(script.clone(), 1, 3).await;

        let tx = Transaction::new("A", "B", dec!(1));
        let result = backend.transfer_balance(&tx, Duration::ZERO).await;
        assert!(result.unwrap_err().is_retry_exhausted());
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test]
    async fn test_fast_fail_client_errors() {
        let script = Script::new(&[], 400);
        let backend = backend(script.clone(), 1, 10)
            .await
            .fast_fail_client_errors(true);

        let tx = Transaction::new("A", "B", dec!(1));
        let result = backend.transfer_balance(&tx, Duration::ZERO).await;
        assert_eq!(
            result,
            Err(TransferError::Rejected {
                status: 400,
                body: "scripted 400".to_string()
            })
        );
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_not_retried() {
        // nothing listens on port 1; a retried call would sleep at least 5s
        let backend = RemoteLedgerBackend::with_client(
            reqwest::Client::new(),
            "http://127.0.0.1:1/rpc/",
            retry(5_000, 10),
        );

        let started = Instant::now();
        let tx = Transaction::new("A", "B", dec!(1));
        let result = backend.transfer_balance(&tx, Duration::ZERO).await;

        assert!(matches!(result, Err(TransferError::Transport(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_create_account_is_single_shot() {
        let script = Script::new(&[409], 200);
        let backend = backend(script.clone(), 1, 10).await;

        let result = backend.create_account(&Account::new("A", dec!(100))).await;
        assert!(matches!(result, Err(TransferError::Store(_))));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn test_wire_payloads() {
        let script = Script::new(&[], 200);
        let backend = backend(script.clone(), 1, 3).await;

        backend
            .create_account(&Account::new("A", dec!(100.5)))
            .await
            .unwrap();
        backend
            .transfer_balance(&Transaction::new("A", "B", dec!(30)), Duration::ZERO)
            .await
            .unwrap();
        backend.delete_all_accounts().await.unwrap();

        let received = script.received.lock().unwrap();
        assert_eq!(received.len(), 3);

        let (name, body) = &received[0];
        assert_eq!(name, CREATE_ACCOUNT);
        assert_eq!(body["account_id"], "A");
        assert_eq!(body["balance"].as_f64(), Some(100.5));

        let (name, body) = &received[1];
        assert_eq!(name, TRANSFER_BALANCE);
        assert_eq!(body["from_id"], "A");
        assert_eq!(body["to_id"], "B");
        assert_eq!(body["amount"].as_f64(), Some(30.0));

        let (name, body) = &received[2];
        assert_eq!(name, DELETE_ALL_ACCOUNTS);
        assert_eq!(body, &serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_endpoint_joins_base_url() {
        let backend = RemoteLedgerBackend::with_client(
            reqwest::Client::new(),
            "http://db:3000/rpc",
            retry(1, 1),
        );
        assert_eq!(
            backend.endpoint(TRANSFER_BALANCE),
            "http://db:3000/rpc/transfer_balance"
        );
        assert_eq!(backend.capabilities().kind, BackendKind::Remote);
    }

    /// Reads one request, then answers 503 with a body shorter than its
    /// declared length and closes the connection
    async fn spawn_truncating_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    read_request(&mut socket).await;
                    let _ = socket
                        .write_all(
                            b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 64\r\n\r\npartial",
                        )
                        .await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}/rpc", addr)
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        line.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_unreadable_body_reported_in_retry_cause() {
        let url = spawn_truncating_server().await;
        let backend = RemoteLedgerBackend::with_client(reqwest::Client::new(), &url, retry(1, 2));

        match backend.delete_all_accounts().await {
            Err(TransferError::RetryExhausted {
                attempts,
                last_cause,
                ..
            }) => {
                assert_eq!(attempts, 2);
                assert!(last_cause.contains("503"), "{}", last_cause);
                assert!(last_cause.contains("<body unreadable:"), "{}", last_cause);
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }
}
