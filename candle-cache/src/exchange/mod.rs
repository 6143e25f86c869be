//! Remote market data access
//!
//! REST transport, chunked fetching and credential rotation.

pub mod client;
pub mod credentials;
pub mod rotation;
pub mod source;
pub mod wire;

pub use client::{TinkoffClient, DEFAULT_API_URL};
pub use credentials::{Credential, CredentialPool};
pub use rotation::RotatingSource;
pub use source::{fetch_chunked, CandleApi, FetchConfig, FetchOutcome, FetchRequest, RemoteCandleSource};
