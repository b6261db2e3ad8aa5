//! # bisync Engine
//!
//! Lazy fetch and dirty-tracked flush of remote entities over a REST session.
//!
//! This crate provides:
//! - [`FieldState`]: per-entity values, dirty set and fetched read groups
//! - [`SyncEngine`]: minimal-fetch and grouped-flush orchestration
//! - Nested collection add/remove/replace with membership partitioning
//! - [`VersionGate`]: minimum server version checks with a configurable policy
//! - Paginated listing with concurrent page requests
//! - Session abstraction, an HTTP adapter and a scriptable mock
//!
//! ## Architecture
//!
//! Entities own a [`FieldState`]; the engine is shared and stateless apart
//! from statistics. Every operation takes the entity's
//! [`AttributeSchema`](bisync_schema::AttributeSchema), its state and its id:
//!
//! 1. `fetch` calls only the read groups covering missing fields
//! 2. local edits mark fields dirty
//! 3. `flush` sends one request per implicated write group
//! 4. collection mutations are sent immediately
//!
//! ## Key Invariants
//!
//! - Flushing a clean state makes no request
//! - Merges never overwrite a dirty field
//! - A failed group leaves its fields dirty; other groups still flush
//! - Version gates are checked before any request is sent
//! - Collection caches are only updated from server responses

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod engine;
mod error;
mod fanout;
mod gate;
mod http;
mod list;
mod observer;
#[cfg(feature = "reqwest")]
mod reqwest_client;
mod state;
mod transport;

pub use collection::{partition, CollectionOp, CollectionOutcome};
pub use config::{HttpSessionConfig, RetryConfig, SyncConfig};
pub use engine::{FetchReport, FlushReport, Selection, SyncEngine, SyncStats};
pub use error::{FetchError, FlushError, GroupFailure, GroupOutcome, SyncError, SyncResult};
pub use gate::VersionGate;
pub use http::{HttpClient, HttpRequest, HttpResponse, HttpSession};
pub use list::ListRequest;
pub use observer::{NoopObserver, SyncEvent, SyncObserver, TracingObserver};
#[cfg(feature = "reqwest")]
pub use reqwest_client::ReqwestClient;
pub use state::FieldState;
pub use transport::{MockSession, Request, Response, Scope, Session, PROJECT_HEADER, TOTAL_COUNT_HEADER};

pub use bisync_schema::HttpMethod;
