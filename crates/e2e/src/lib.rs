//! reclog scenario test support
//!
//! Provides an instrumented fake recording service and fixtures that lay out
//! a recordings directory the way a recorder does.
//!
//! ```text
//! Workspace ── TempDir + EventLog + Registry
//!   ├── add_on_disk / add_crashed / add_sourcemap
//!   └── uploader(&FakeConnector, options) -> Uploader
//!
//! FakeConnector ── shared call log, failure injection, in-flight gauge
//! ```

pub mod error;
pub mod fake;
pub mod workspace;

pub use error::{E2eError, E2eResult};
pub use fake::{FakeConnector, ServiceCalls};
pub use workspace::{expect_recordings, init_tracing, Workspace, TEST_SERVER};
