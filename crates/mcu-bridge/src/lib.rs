//! MCU Bridge Library
//!
//! Core of a multipoint conferencing unit: it keeps every live conference,
//! admits and removes members, and mixes audio so each member hears every
//! other contributing member but never itself.
//!
//! # Architecture
//!
//! ```text
//! ConferenceManager (registry: list id, guid, room number)
//! ├── ConferenceMonitor (periodic housekeeping task)
//! └── Conference (one per room)
//!     ├── members + profiles (membership mutex)
//!     └── AudioConnection (one ring buffer per contributing member)
//!         └── read by each listener through its own AudioReader
//! ```
//!
//! Members share a [`ConferenceMember`](member::ConferenceMember) contract
//! and guard their media paths with a [`ClosableLock`](lock::ClosableLock).
//! Removal is deferred through [`deletion::schedule_member_removal`] so a
//! signaling callback never waits for in-flight audio.
//!
//! Subsystems outside the mixing core (video mixer, templates, recorder,
//! feature-access codes) are reached through the traits in [`external`].
//!
//! # Modules
//!
//! - [`audio`] - formats, ring buffers, resampling, mixing
//! - [`conference`] - membership and per-listener mixing
//! - [`manager`] - conference registry
//! - [`monitor`] - idle reaping and recorder ticks
//! - [`config`] - service configuration from environment
//! - [`errors`] - error types with error codes

pub mod audio;
pub mod conference;
pub mod config;
pub mod deletion;
pub mod errors;
pub mod external;
pub mod lock;
pub mod manager;
pub mod member;
pub mod monitor;
pub mod observability;
pub mod profile;
