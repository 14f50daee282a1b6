//! Character registry.
//!
//! Maps every descriptor a book uses for a speaker ("Elizabeth", "Lizzy",
//! "her sister") to one stable [`CharacterId`].
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               CharacterRegistry              │
//! │                                              │
//! │  ┌──────────────┐   ┌─────────────────────┐  │
//! │  │ characters   │   │ aliases             │  │
//! │  │ (id → record)│   │ (descriptor → id,   │  │
//! │  └──────────────┘   │  provenance)        │  │
//! │                     └─────────────────────┘  │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ history (append-only alias events)     │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```

mod alias;
mod character;
mod shared;
mod store;

pub use alias::{AliasBinding, AliasChange, AliasRecord, Provenance};
pub use character::{Character, CharacterId};
pub use shared::{FinalizedRegistry, SharedRegistry};
pub use store::{CharacterRegistry, RegistryError};
