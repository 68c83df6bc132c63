//! # medchain-intake
//!
//! The request/response boundary between the clinical API and the ledger.
//!
//! This crate provides:
//!
//! 1. [`request::RequestValidator`]: JSON Schema validation of
//!    `POST /api/medications/administer` bodies and conversion into a
//!    `RecordPayload`.
//! 2. [`response`]: the bodies returned by the administer endpoint and by
//!    `GET /api/dashboard/chain/verify`, plus range query resolution.
//!
//! No HTTP framework lives here; route handlers call these types.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use medchain_intake::{RequestValidator, AdministrationResponse};
//!
//! let validator = RequestValidator::new()?;
//! let payload = validator.payload_from(&body, chrono::Utc::now())?;
//! let record = ledger.append(payload)?;
//! let reply = AdministrationResponse::from(&record);
//! ```

pub mod request;
pub mod response;

pub use request::{administration_schema, AdministrationRequest, RequestValidator};
pub use response::{AdministrationResponse, VerifyQuery, VerifyResponse};
