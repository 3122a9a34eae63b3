//! External collaborator traits with HTTP and in-memory implementations.

pub mod geocoder;
pub mod ledger;
pub mod oracle;
pub mod signer;

pub use geocoder::{Geocoder, InMemoryGeocoder, NominatimGeocoder, Place, PlaceAddress};
pub use ledger::{BlockReference, Confirmation, InMemoryLedger, Ledger, RpcLedger};
pub use oracle::{
    BroadcastReport, HttpOracleNetwork, InMemoryOracleNetwork, OracleAnswer, OracleBehavior,
    OracleEndpoint, OracleNetwork,
};
pub use signer::ServiceSigner;
