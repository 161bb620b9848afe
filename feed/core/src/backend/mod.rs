//! Content and Position Backends
//!
//! External collaborators of the feed core, behind async traits.
//!
//! # Available Backends
//!
//! - **Content**: [`InMemoryContentService`] (simulator, tests) and
//!   [`HttpContentService`] (remote JSON API)
//! - **Position**: [`MemoryPositionBackend`] and [`FilePositionBackend`]
//!   (JSON under the XDG data dir)
//!
//! # Usage
//!
//! ```ignore
//! use feed_core::backend::{ContentService, HttpContentService};
//!
//! let service = HttpContentService::new("https://api.example/v1", timeout)?;
//! let threads = service.fetch_feed(&user, 20).await?;
//! ```

mod file;
mod http;
mod memory;
mod traits;

pub use file::FilePositionBackend;
pub use http::{HttpContentService, DEFAULT_REQUEST_TIMEOUT};
pub use memory::{InMemoryContentService, MemoryPositionBackend, ServiceCalls};
pub use traits::{ContentError, ContentService, PositionBackend};
