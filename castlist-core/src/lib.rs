//! Dialogue attribution and character registry engine.
//!
//! This crate provides:
//! - Narration/dialogue classification with an oracle fallback
//! - Speaker resolution from names, pronouns and relational descriptors
//! - A shared character registry with provenance-ranked aliases
//! - Concurrent, order-preserving attribution of whole books
//! - Registry persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use castlist_core::{read_plain_text, AttributionConfig, Attributor, ClaudeOracle};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let book = read_plain_text(&std::fs::read_to_string("pride.txt")?);
//!
//!     let attributor = Attributor::new(AttributionConfig::default())
//!         .with_oracle(Arc::new(ClaudeOracle::from_env()?));
//!     attributor.discover(&book).await;
//!
//!     let attributed = attributor.attribute_book(&book).await?;
//!     for segment in attributed.segments() {
//!         println!("{:?} {}", segment.speaker, segment.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod book;
pub mod classifier;
pub mod config;
pub mod context;
pub mod oracle;
pub mod persist;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod segment;
pub mod testing;
pub mod text;

// Primary public API
pub use book::{read_plain_text, Book, Chapter, Paragraph, ParagraphPosition};
pub use config::{AttributionConfig, ConfidenceLevels};
pub use oracle::{ClaudeOracle, ClaudeOracleConfig, Oracle, OracleError};
pub use persist::{load_registry, PersistError, RegistrySnapshot};
pub use pipeline::{AttributedBook, AttributedChapter, AttributionError, Attributor, RunStats};
pub use registry::{
    Character, CharacterId, CharacterRegistry, FinalizedRegistry, Provenance, RegistryError,
    SharedRegistry,
};
pub use segment::{Method, Segment, SegmentFlag, SegmentKind, Speaker};
pub use text::Gender;
