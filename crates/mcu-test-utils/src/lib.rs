//! # MCU Test Utilities
//!
//! Shared fixtures and mock collaborators for exercising the MCU bridge
//! without any signaling or media transport.
//!
//! ## Modules
//!
//! - `fixtures` - member and manager builders, audio block generators
//! - `mock_collaborators` - recorder, observer, feature-access and template
//!   mocks that record every call
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mcu_test_utils::*;
//!
//! let observer = RecordingObserver::new();
//! let manager = TestManager::new()
//!     .with_grace(Duration::ZERO)
//!     .with_observer(observer.clone())
//!     .build();
//!
//! let conf = manager.make_conference("100", "Standup").unwrap();
//! let alice = bridge_member("Alice");
//! conf.add_member(alice.clone()).unwrap();
//!
//! alice.write_audio(&constant_block(NARROWBAND, 160, 1000), NARROWBAND);
//! ```

pub mod fixtures;
pub mod mock_collaborators;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_collaborators::*;
