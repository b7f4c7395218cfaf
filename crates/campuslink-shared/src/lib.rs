//! # campuslink-shared
//!
//! Identifiers, error kinds and wire shapes shared by the relationship engine,
//! its persistence adapter and the HTTP surface.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use types::{
    Decision, GroupId, PairKey, RequestId, RequestStatus, SourceType, UnreadSource, UserId,
};
