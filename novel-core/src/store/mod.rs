//! Story memory: characters, locations and events.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       StoryStore                         │
//! │                                                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐    │
//! │  │ characters   │  │ locations    │  │ events       │    │
//! │  │ id → entity  │  │ id → entity  │  │ id → entity  │    │
//! │  │ L2 index     │  │ L2 index     │  │ L2 index     │    │
//! │  └──────────────┘  └──────────────┘  └──────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each kind has its own fingerprint index; kinds are never mixed.

mod entity;
mod index;
#[allow(clippy::module_inception)]
mod store;

pub use entity::{Character, Entity, EntityId, EntityKind, Event, Location};
pub use index::FingerprintIndex;
pub use store::{StoreError, StoreSnapshot, StoryStore};
