//! # kiln-id
//!
//! Identifier types shared by the kiln host agent and its libraries.
//!
//! ## Design Principles
//!
//! - IDs are immutable values; equality and hashing cover every field
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//!
//! ## ID Formats
//!
//! - [`VmId`]: `{namespace}/{name}` or `{namespace}/{name}/{uid}`
//! - [`ExecutionId`]: `exec_{ulid}`, minted once per plan execution
//!
//! Examples:
//! - `default/web-01`
//! - `tenant-a/db/01HV4Z4NYPLTRS0JTUA8XDME5F`
//! - `exec_01HV4Z2WQXKJNM8GPQY6VBKC3D`

mod error;
mod execution;
mod vmid;

pub use error::IdError;
pub use execution::ExecutionId;
pub use vmid::{VmId, DEFAULT_NAMESPACE};

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
