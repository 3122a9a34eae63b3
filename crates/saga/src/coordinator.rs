//! Saga coordinator for the locate-and-settle workflow.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use common::RequestId;
use serde_json::{Value, json};
use session::Session;

use crate::config::SagaConfig;
use crate::correlation::{CorrelationStore, LocatedSaga, WaitOutcome};
use crate::error::SagaError;
use crate::messages::{
    INITIATE, LocateRequest, Notice, RESULT, RequestNotice, SUCCESS, SettleRequest,
    TIMEOUT_MESSAGE, UNSIGNED_TX,
};
use crate::operation::{TransferChecked, decode_address};
use crate::services::geocoder::Geocoder;
use crate::services::ledger::Ledger;
use crate::services::oracle::OracleNetwork;
use crate::services::signer::ServiceSigner;

pub const STEP_GEOCODE: &str = "geocode";
pub const STEP_APPROVAL: &str = "approval";
pub const STEP_TRANSFER: &str = "transfer";

/// Session context marker for the saga the session started last.
#[derive(Debug, Clone, Copy)]
struct ActiveSaga(RequestId);

/// Drives the two-phase saga over a client session.
///
/// Phase 1 ([`Self::locate`]) broadcasts the subject IP to the oracles, waits
/// for the first answer, enriches it and hands the client an approval to
/// sign. Phase 2 ([`Self::settle`]) submits the signed approval and then a
/// transfer signed by the service key. Both phases are correlated by the
/// request id minted in phase 1.
pub struct SagaCoordinator<O, G, L, K>
where
    O: OracleNetwork,
    G: Geocoder,
    L: Ledger,
    K: ServiceSigner,
{
    store: CorrelationStore,
    oracles: Arc<O>,
    geocoder: G,
    ledger: L,
    signer: K,
    config: SagaConfig,
}

impl<O, G, L, K> SagaCoordinator<O, G, L, K>
where
    O: OracleNetwork + 'static,
    G: Geocoder,
    L: Ledger,
    K: ServiceSigner,
{
    /// Creates a new saga coordinator.
    pub fn new(
        store: CorrelationStore,
        oracles: O,
        geocoder: G,
        ledger: L,
        signer: K,
        config: SagaConfig,
    ) -> Self {
        Self {
            store,
            oracles: Arc::new(oracles),
            geocoder,
            ledger,
            signer,
            config,
        }
    }

    pub fn store(&self) -> &CorrelationStore {
        &self.store
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Phase 1: locate the subject IP and send the approval to sign.
    ///
    /// Returns the request id when the saga reached `Located`. Timeouts, a
    /// concurrent start and a vanished session end the saga with `Ok(None)`
    /// and leave the session open; external failures are returned as errors.
    #[tracing::instrument(skip(self, session, request), fields(session_id = %session.id(), ip = %request.ip))]
    pub async fn locate(
        &self,
        session: &Session,
        request: LocateRequest,
    ) -> Result<Option<RequestId>, SagaError> {
        let ip = request.ip.trim().to_string();
        ip.parse::<IpAddr>()
            .map_err(|_| SagaError::InvalidPayload(format!("invalid ip '{ip}'")))?;

        if let Some(active) = self.active_saga(session) {
            tracing::warn!(request_id = %active, "geolocation already in progress for session");
            self.notify(
                session,
                Notice::error("A geolocation request is already in progress"),
            )
            .await;
            return Ok(None);
        }

        session
            .send(&Notice::new(
                INITIATE,
                format!("Pings started looking for your ip geo info. ip : {ip}"),
            ))
            .await?;

        let request_id = RequestId::new();
        let mut pending = self.store.begin_locate(request_id, session.id(), ip.clone())?;
        session.set_context(ActiveSaga(request_id));
        metrics::counter!("saga_started_total").increment(1);
        let started = Instant::now();

        let oracles = Arc::clone(&self.oracles);
        let broadcast_ip = ip.clone();
        tokio::spawn(async move {
            let report = oracles.broadcast(&broadcast_ip, request_id).await;
            tracing::info!(
                %request_id,
                attempted = report.attempted,
                succeeded = report.succeeded,
                "oracle broadcast finished"
            );
        });

        let answer = match pending
            .wait(self.config.locate_deadline, session.cancellation())
            .await
        {
            WaitOutcome::Answered(answer) => answer,
            WaitOutcome::TimedOut => {
                metrics::counter!("saga_timed_out_total").increment(1);
                tracing::warn!(%request_id, "no oracle answered before the deadline");
                self.notify(session, Notice::error(TIMEOUT_MESSAGE)).await;
                return Ok(None);
            }
            WaitOutcome::Cancelled => {
                tracing::info!(%request_id, "session closed while locating");
                return Ok(None);
            }
        };

        tracing::info!(step = STEP_GEOCODE, %request_id, "saga step started");
        let place = match self
            .geocoder
            .reverse(&answer.latitude, &answer.longitude)
            .await
        {
            Ok(place) => place,
            Err(e) => {
                self.fail(session, STEP_GEOCODE, "Failed to get location info")
                    .await;
                return Err(e);
            }
        };

        if !pending.promote(LocatedSaga {
            display_name: place.display_name,
            vault_address: answer.vault_address,
        }) {
            tracing::warn!(%request_id, "saga record vanished before it was located");
            return Ok(None);
        }

        metrics::counter!("saga_located_total").increment(1);
        metrics::histogram!("saga_duration_seconds", "phase" => "locate")
            .record(started.elapsed().as_secs_f64());

        session
            .send(&RequestNotice {
                kind: UNSIGNED_TX.to_string(),
                payload: self.approval_template(),
                request_id,
            })
            .await?;
        tracing::info!(%request_id, "approval sent to client");

        Ok(Some(request_id))
    }

    /// Phase 2: submit the signed approval, then the service transfer.
    #[tracing::instrument(skip(self, session, request), fields(session_id = %session.id(), request_id = %request.request_id))]
    pub async fn settle(&self, session: &Session, request: SettleRequest) -> Result<(), SagaError> {
        let guard = match self.store.begin_settle(request.request_id, session.id()) {
            Ok(guard) => guard,
            Err(e) => {
                self.notify(session, Notice::error("Request id not found")).await;
                return Err(e.into());
            }
        };
        let started = Instant::now();

        tracing::info!(step = STEP_APPROVAL, "saga step started");
        let approval = self
            .submit_and_confirm(
                session,
                STEP_APPROVAL,
                &request.signed_tx,
                "Failed to submit transaction",
                "Failed to confirm approval",
            )
            .await?;

        session
            .send(&Notice::new(
                SUCCESS,
                json!({
                    "message": "Approval Transaction submitted successfully",
                    "txHash": approval,
                }),
            ))
            .await?;

        tracing::info!(step = STEP_TRANSFER, "saga step started");
        let transfer = match self.build_transfer(&guard.located().vault_address).await {
            Ok(transfer) => transfer,
            Err(e) => {
                self.fail(session, STEP_TRANSFER, "Failed to execute transfer")
                    .await;
                return Err(e);
            }
        };
        self.submit_and_confirm(
            session,
            STEP_TRANSFER,
            &transfer,
            "Failed to execute transfer",
            "Failed to confirm transfer",
        )
        .await?;

        session
            .send(&Notice::new(
                RESULT,
                json!({ "geoResult": guard.located().display_name }),
            ))
            .await?;

        guard.finish();
        session.clear_context::<ActiveSaga>();
        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds", "phase" => "settle").record(duration);
        metrics::counter!("saga_completed_total").increment(1);
        tracing::info!(duration, "saga completed successfully");
        Ok(())
    }

    /// Saga this session still owns, if its record is live.
    ///
    /// A `Located` record counts: the session still owes its phase-2 message.
    /// A marker whose record is gone is stale and gets cleared.
    fn active_saga(&self, session: &Session) -> Option<RequestId> {
        let ActiveSaga(request_id) = session.context::<ActiveSaga>()?;
        match self.store.phase(request_id) {
            Some(phase) if !phase.is_terminal() => Some(request_id),
            _ => {
                session.clear_context::<ActiveSaga>();
                None
            }
        }
    }

    /// Approval the client signs: a delegation of the fixed amount to this
    /// service's key. The client fills in its own token account and owner.
    fn approval_template(&self) -> Value {
        let token = &self.config.token;
        json!({
            "program": token.program,
            "instruction": "Approve",
            "data": {
                "amount": token.amount.to_string(),
                "decimals": token.decimals,
                "mint": token.mint,
            },
            "accounts": {
                "source": "Client's token account",
                "delegate": self.signer.public_key(),
                "owner": "Client's wallet address",
            },
        })
    }

    async fn build_transfer(&self, vault_address: &str) -> Result<String, SagaError> {
        let token = &self.config.token;
        let destination = self.ledger.token_account(vault_address, &token.mint).await?;

        let balance = self.ledger.balance_of(&token.source).await?;
        if balance < token.amount {
            return Err(SagaError::step(
                STEP_TRANSFER,
                format!("insufficient balance: {balance} < {}", token.amount),
            ));
        }

        let transfer = TransferChecked {
            program: decode_address(&token.program)?,
            source: decode_address(&token.source)?,
            mint: decode_address(&token.mint)?,
            destination: decode_address(&destination)?,
            authority: self.signer.public_key_bytes(),
            amount: token.amount,
            decimals: token.decimals,
        };
        let recent_block = self.ledger.recent_block_reference().await?;
        Ok(transfer.sign(&recent_block, &self.signer))
    }

    async fn submit_and_confirm(
        &self,
        session: &Session,
        step: &'static str,
        signed_tx: &str,
        submit_notice: &str,
        confirm_notice: &str,
    ) -> Result<String, SagaError> {
        let signature = match self.ledger.submit_signed(signed_tx).await {
            Ok(signature) => signature,
            Err(e) => {
                self.fail(session, step, submit_notice).await;
                return Err(e);
            }
        };
        tracing::info!(step, %signature, "transaction submitted");

        if let Err(e) = self.ledger.await_confirmation(&signature).await {
            self.fail(session, step, confirm_notice).await;
            return Err(e);
        }
        tracing::info!(step, %signature, "transaction confirmed");
        Ok(signature)
    }

    async fn fail(&self, session: &Session, step: &'static str, message: &str) {
        metrics::counter!("saga_failed_total", "step" => step).increment(1);
        tracing::warn!(step, message, "saga step failed");
        self.notify(session, Notice::error(message)).await;
    }

    /// Best-effort write; a gone transport drops the notice.
    async fn notify(&self, session: &Session, notice: Notice) {
        if let Err(e) = session.send(&notice).await {
            tracing::debug!(session_id = %session.id(), error = %e, "notice dropped");
        }
    }
}
