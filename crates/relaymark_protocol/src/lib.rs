//! # relaymark Protocol
//!
//! State model and record codecs for relaymark.
//!
//! This crate provides:
//! - [`OwnerKey`] and [`StateKind`], the partitioning of all synchronized state
//! - [`Record`], [`RecordDraft`] and [`Filter`], the opaque relay record shapes
//! - Bookmark documents ([`BookmarkCollection`], [`BookmarkMetadata`], [`StateValue`])
//! - [`StateOp`] and [`QueuedOperation`] for optimistic and offline mutations
//! - Content codecs between records and documents
//! - Input validation run at the API boundary
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Replaceable documents
//!
//! Each `(OwnerKey, StateKind)` pair names exactly one logical document.
//! The newest record for that pair fully replaces all earlier ones, so every
//! mutation republishes the complete document.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bookmark;
mod codec;
mod error;
mod operation;
mod owner;
mod record;
mod validate;

pub use bookmark::{
    BookmarkCollection, BookmarkMetadata, CollectionUpdate, MetadataUpdate, StateValue,
};
pub use codec::{
    decode_bookmark_list, decode_collections, decode_metadata, encode_bookmark_list,
    encode_collections, encode_metadata,
};
pub use error::{ProtocolError, ProtocolResult};
pub use operation::{OperationStatus, QueuedOperation, StateOp};
pub use owner::{OwnerKey, StateKind};
pub use record::{unix_now, Filter, Record, RecordDraft};
pub use validate::{
    validate_collection_id, validate_color, validate_event_id, validate_name, validate_note,
    validate_tags, MAX_ID_LEN, MAX_NAME_LEN, MAX_NOTE_LEN, MAX_TAGS, MAX_TAG_LEN,
};
