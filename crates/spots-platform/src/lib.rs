//! Collaborator seams for the spot data layer and ad runtime: the document
//! store, the signed-in session, and the ad unit, each with an in-process
//! implementation.

pub mod ad_unit;
pub mod document;
pub mod memory;
pub mod session;

pub use ad_unit::{AdUnit, ScriptedAdUnit};
pub use document::{
    DocumentPath, DocumentSnapshot, DocumentStore, Fields, Query, SetMode, SortDirection,
    Transaction, TransactionBody, is_server_timestamp, merge_fields, server_timestamp, to_fields,
};
pub use memory::InMemoryDocumentStore;
pub use session::{AuthenticatedUser, InMemorySession, SessionProvider};
