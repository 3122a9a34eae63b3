//! Saga orchestration for the geolocation settlement workflow.
//!
//! The saga runs over one client session in two phases correlated by a
//! request id:
//! 1. Locate: broadcast the subject IP to the oracles, wait for the first
//!    answer (or time out), reverse-geocode it and send the client an
//!    approval to sign.
//! 2. Settle: submit the signed approval, then a transfer signed by the
//!    service key, and report the located place.
//!
//! Failures are reported to the client and abort the saga; nothing is
//! retried.

pub mod config;
pub mod coordinator;
pub mod correlation;
pub mod error;
pub mod handlers;
pub mod messages;
pub mod operation;
pub mod services;
pub mod state;

pub use config::{SagaConfig, TokenConfig};
pub use coordinator::SagaCoordinator;
pub use correlation::{
    CorrelationError, CorrelationStore, LocatedSaga, PendingLocate, ResolveOutcome, SettleGuard,
    WaitOutcome,
};
pub use error::SagaError;
pub use handlers::{LOCATE, ReleaseOnDisconnect, SETTLE, register_handlers};
pub use messages::{LocateRequest, Notice, RequestNotice, SettleRequest};
pub use services::{
    BroadcastReport, Geocoder, HttpOracleNetwork, InMemoryGeocoder, InMemoryLedger,
    InMemoryOracleNetwork, Ledger, NominatimGeocoder, OracleAnswer, OracleBehavior,
    OracleEndpoint, OracleNetwork, Place, RpcLedger, ServiceSigner,
};
pub use state::SagaPhase;
