//! # repartir: Embedded A/B Experiment Engine
//!
//! repartir assigns subjects (visitors) to one of several named variants of
//! a named experiment, durably records participation and goal-completion
//! events per variant, and computes statistical significance between the
//! control variant and each alternative.
//!
//! ## Design
//!
//! - **Race-safe counting**: every counter mutation is an atomic
//!   single-field increment against the shared store; concurrent callers
//!   never lose an update.
//! - **Idempotent participation**: a subject is counted toward
//!   `participant_count` at most once per experiment version, enforced
//!   through the durable participant set.
//! - **Live redefinition**: re-saving an experiment with a different
//!   alternative or goal list resets counters and bumps the version;
//!   old-version keys are abandoned, never mutated in place. Retired sets
//!   are renamed under `gc:lists:` keys for an out-of-band sweeper.
//! - **No ambient state**: the store handle and configuration are passed
//!   explicitly into every operation.
//!
//! ## Example
//!
//! ```rust
//! use repartir::store::MemoryStore;
//! use repartir::{engine, Config};
//!
//! # async fn example() -> repartir::Result<()> {
//! let store = MemoryStore::new();
//! let config = Config::default();
//!
//! // Assign visitor "u1" to a variant of "button_color".
//! let choice = engine::assign(
//!     &store,
//!     &config,
//!     "button_color",
//!     vec!["red".into(), "blue".into()],
//!     vec!["signup".to_string()],
//!     "u1",
//!     None,
//! )
//! .await?;
//!
//! // Later, record a signup conversion for the same visitor.
//! engine::complete(&store, &config, "button_color", "u1", vec!["signup".to_string()]).await?;
//! println!("u1 saw {choice}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod algorithm;
pub mod alternative;
pub mod config;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod significance;
pub mod store;
pub mod trial;

pub use algorithm::Algorithm;
pub use alternative::{Alternative, AlternativeSpec};
pub use config::{Config, ConfigBuilder, ExperimentConfig};
pub use error::{Error, Result};
pub use experiment::Experiment;
pub use significance::{z_score, Significance};
pub use trial::{Trial, TrialEvent, TrialStatus};
