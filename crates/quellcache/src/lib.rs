//! # quellcache
//!
//! Normalized client-side cache engine for graph queries.
//!
//! ## Architecture
//! - **Parser**: nom grammar for the executable subset of the query language
//! - **PrototypeBuilder**: typed selection tree plus the routing decision
//! - **CacheReadPlanner**: answers what it can from the store, flags the rest
//! - **RemainderQuery**: the minimal query for unsatisfied fields
//! - **merge / Normalizer**: reassemble the response and write it back
//! - **MutationIntent**: create / update / delete consistency
//! - **QuellClient**: the orchestrator tying it all to a [`Transport`]
//!
//! ## Example
//! ```no_run
//! use quellcache::{CacheOptions, HttpTransport, QuellClient, TypeMaps};
//!
//! # async fn demo() -> quellcache::Result<()> {
//! let maps = TypeMaps::new()
//!     .with_field("country", "Country")
//!     .with_field("countries", "Country");
//! let client = QuellClient::new(
//!     "http://localhost:4000/graphql",
//!     HttpTransport::new(),
//!     maps,
//!     CacheOptions::default(),
//! )?;
//!
//! let response = client.query("{ country(id: 2) { id name } }").await?;
//! println!("{:?}", response.data);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod ast;
mod client;
mod config;
mod error;
mod merge;
mod mutation;
mod normalize;
pub mod parser;
mod planner;
mod prototype;
mod remainder;
mod stats;
mod transport;

#[cfg(test)]
mod testing;

pub use client::QuellClient;
pub use config::{
    CacheOptions, ClientConfig, IdentifierFields, StorageScope, TypeMaps,
    DEFAULT_CACHE_TIME_SECONDS, DEFAULT_IDENTIFIER_FIELDS, DEFAULT_STORAGE_PATH,
};
pub use error::{QuellError, Result};
pub use merge::{merge_responses, ShapeMismatchError};
pub use mutation::MutationIntent;
pub use normalize::{NormalizeReport, Normalizer};
pub use parser::{parse_document, ParseError};
pub use planner::{CacheReadPlanner, ReadPlan};
pub use prototype::{
    mark_all, FieldKind, FragmentBody, FragmentTable, OperationType, ParsedOperation,
    ProtoField, Prototype, PrototypeBuilder, UnQuellableReason, UnmappedTypeError,
};
pub use remainder::{RemainderField, RemainderQuery};
pub use stats::CacheStats;
pub use transport::{GraphResponse, HttpTransport, Transport, TransportError};
