//! # osprey-id
//!
//! Typed identifiers, parsing, and validation for the osprey platform.
//!
//! ## Design Principles
//!
//! - IDs are typed to prevent mixing different resource kinds
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//!
//! ## ID Kinds
//!
//! Three families of identifiers live here:
//!
//! - **User-chosen** (`AppId`): DNS-label-like names picked by operators.
//! - **Composed** (`TaskId`): built from slot index, incarnation, and app id.
//!   Every task id ends with `-{app_id}`; the routing plane depends on that
//!   suffix to attribute a task to its application.
//! - **System-generated** (`VersionId`): prefixed ULIDs, time-ordered.
//!
//! Cluster-manager identifiers (`AgentId`, `OfferId`, `FrameworkId`) are
//! opaque strings minted by the cluster manager; osprey never inspects their
//! structure.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
