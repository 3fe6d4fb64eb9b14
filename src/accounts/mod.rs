//! OS account and session sources
//!
//! Readers for the three facts the monitor reconciles:
//!
//! - **Group membership** ([`GroupReader`]) - who may run a helper
//! - **Active sessions** ([`SessionReader`]) - who is logged in, and how
//! - **Identity** ([`UserIdentityResolver`]) - uid/gid/home for a username
//!
//! Each is a trait so the monitor can run against test doubles.

pub mod error;
pub mod group;
pub mod identity;
pub mod session;

pub use error::{AccountsError, Result};
pub use group::{parse_group_members, EtcGroupReader, GroupMembers, GroupReader};
pub use identity::{SystemIdentityResolver, UserIdentity, UserIdentityResolver};
pub use session::{
    classify_sessions, is_graphical_session, ActiveSessions, LoginKind, SessionReader,
    SessionRecord, UtmpSessionReader,
};
