//! Ledger client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::SagaError;

/// 32-byte recent block hash used to anchor a new transaction.
pub type BlockReference = [u8; 32];

/// Commitment level a transaction reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Finalized,
}

/// Operations the saga needs from the ledger.
///
/// Every call is terminal on failure; nothing is retried by the caller.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Submits a base64 signed transaction and returns its signature.
    async fn submit_signed(&self, signed_tx: &str) -> Result<String, SagaError>;

    /// Waits until the transaction is confirmed or fails.
    async fn await_confirmation(&self, signature: &str) -> Result<Confirmation, SagaError>;

    async fn recent_block_reference(&self) -> Result<BlockReference, SagaError>;

    /// Token balance of a token account, in base units.
    async fn balance_of(&self, token_account: &str) -> Result<u64, SagaError>;

    /// Token account holding `mint` for `owner`.
    async fn token_account(&self, owner: &str, mint: &str) -> Result<String, SagaError>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    err: Option<Value>,
    confirmation_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestBlockhash {
    blockhash: String,
}

#[derive(Debug, Deserialize)]
struct TokenAmount {
    amount: String,
}

#[derive(Debug, Deserialize)]
struct KeyedAccount {
    pubkey: String,
}

/// JSON-RPC ledger client speaking the Solana RPC dialect.
#[derive(Debug, Clone)]
pub struct RpcLedger {
    client: reqwest::Client,
    url: String,
    poll_interval: Duration,
    confirm_timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl RpcLedger {
    pub fn new(url: impl Into<String>) -> Result<Self, SagaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SagaError::Ledger(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            poll_interval: Duration::from_millis(500),
            confirm_timeout: Duration::from_secs(60),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Overrides confirmation polling.
    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.confirm_timeout = timeout;
        self
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, SagaError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| SagaError::Ledger(format!("{method}: {e}")))?
            .json()
            .await
            .map_err(|e| SagaError::Ledger(format!("{method}: invalid response: {e}")))?;

        if let Some(error) = response.error {
            return Err(SagaError::Ledger(format!(
                "{method}: rpc error {}: {}",
                error.code, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| SagaError::Ledger(format!("{method}: empty result")))
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    #[tracing::instrument(skip(self, signed_tx))]
    async fn submit_signed(&self, signed_tx: &str) -> Result<String, SagaError> {
        self.call(
            "sendTransaction",
            json!([signed_tx, {"encoding": "base64", "preflightCommitment": "confirmed"}]),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn await_confirmation(&self, signature: &str) -> Result<Confirmation, SagaError> {
        let deadline = tokio::time::Instant::now() + self.confirm_timeout;
        loop {
            let statuses: WithContext<Vec<Option<SignatureStatus>>> = self
                .call(
                    "getSignatureStatuses",
                    json!([[signature], {"searchTransactionHistory": true}]),
                )
                .await?;

            if let Some(Some(status)) = statuses.value.into_iter().next() {
                if let Some(err) = status.err {
                    return Err(SagaError::Ledger(format!("transaction failed: {err}")));
                }
                match status.confirmation_status.as_deref() {
                    Some("finalized") => return Ok(Confirmation::Finalized),
                    Some("confirmed") => return Ok(Confirmation::Confirmed),
                    _ => {}
                }
            }

            if tokio::time::Instant::now() + self.poll_interval > deadline {
                return Err(SagaError::Ledger(format!(
                    "transaction {signature} not confirmed within {:?}",
                    self.confirm_timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn recent_block_reference(&self) -> Result<BlockReference, SagaError> {
        let latest: WithContext<LatestBlockhash> = self
            .call("getLatestBlockhash", json!([{"commitment": "confirmed"}]))
            .await?;
        let bytes = bs58::decode(&latest.value.blockhash)
            .into_vec()
            .map_err(|e| SagaError::Ledger(format!("invalid blockhash: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| SagaError::Ledger("blockhash is not 32 bytes".to_string()))
    }

    async fn balance_of(&self, token_account: &str) -> Result<u64, SagaError> {
        let balance: WithContext<TokenAmount> = self
            .call(
                "getTokenAccountBalance",
                json!([token_account, {"commitment": "confirmed"}]),
            )
            .await?;
        balance
            .value
            .amount
            .parse()
            .map_err(|e| SagaError::Ledger(format!("invalid token amount: {e}")))
    }

    async fn token_account(&self, owner: &str, mint: &str) -> Result<String, SagaError> {
        let accounts: WithContext<Vec<KeyedAccount>> = self
            .call(
                "getTokenAccountsByOwner",
                json!([owner, {"mint": mint}, {"encoding": "jsonParsed"}]),
            )
            .await?;
        accounts
            .value
            .into_iter()
            .next()
            .map(|account| account.pubkey)
            .ok_or_else(|| SagaError::Ledger(format!("no {mint} token account for {owner}")))
    }
}

#[derive(Debug)]
struct InMemoryLedgerState {
    submissions: Vec<String>,
    confirmations: usize,
    /// Submissions from this index on are rejected.
    fail_submit_from: Option<usize>,
    /// Confirmations from this index on fail.
    fail_confirm_from: Option<usize>,
    balance: u64,
}

/// In-memory ledger for testing.
///
/// Signatures and token accounts are derived deterministically from their
/// inputs.
#[derive(Debug, Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<InMemoryLedgerState>>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryLedgerState {
                submissions: Vec::new(),
                confirmations: 0,
                fail_submit_from: None,
                fail_confirm_from: None,
                balance: u64::MAX,
            })),
        }
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_submit(&self, fail: bool) {
        self.state.lock().fail_submit_from = fail.then_some(0);
    }

    pub fn set_fail_on_confirm(&self, fail: bool) {
        self.state.lock().fail_confirm_from = fail.then_some(0);
    }

    /// Accepts the first `accepted` submissions and rejects the rest.
    pub fn fail_submissions_after(&self, accepted: usize) {
        self.state.lock().fail_submit_from = Some(accepted);
    }

    /// Confirms the first `confirmed` transactions and fails the rest.
    pub fn fail_confirmations_after(&self, confirmed: usize) {
        self.state.lock().fail_confirm_from = Some(confirmed);
    }

    /// Sets the balance reported for every token account.
    pub fn set_balance(&self, balance: u64) {
        self.state.lock().balance = balance;
    }

    /// Returns the raw transactions submitted so far.
    pub fn submissions(&self) -> Vec<String> {
        self.state.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    fn digest(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
        }
        bs58::encode(hasher.finalize()).into_string()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn submit_signed(&self, signed_tx: &str) -> Result<String, SagaError> {
        let mut state = self.state.lock();
        if state
            .fail_submit_from
            .is_some_and(|from| state.submissions.len() >= from)
        {
            return Err(SagaError::Ledger("submission rejected".to_string()));
        }
        state.submissions.push(signed_tx.to_string());
        Ok(Self::digest(&[signed_tx]))
    }

    async fn await_confirmation(&self, _signature: &str) -> Result<Confirmation, SagaError> {
        let mut state = self.state.lock();
        let index = state.confirmations;
        state.confirmations += 1;
        if state.fail_confirm_from.is_some_and(|from| index >= from) {
            return Err(SagaError::Ledger("transaction not confirmed".to_string()));
        }
        Ok(Confirmation::Confirmed)
    }

    async fn recent_block_reference(&self) -> Result<BlockReference, SagaError> {
        Ok([7u8; 32])
    }

    async fn balance_of(&self, _token_account: &str) -> Result<u64, SagaError> {
        Ok(self.state.lock().balance)
    }

    async fn token_account(&self, owner: &str, mint: &str) -> Result<String, SagaError> {
        Ok(Self::digest(&[owner, mint]))
    }
}
