//! Knolx Uploadr Library
//!
//! Resumable video uploads for knolx sessions on the knolx portal.
//!
//! # Features
//!
//! - **Resumable**: picks up a running upload or an unattached video on start
//! - **Guarded**: one upload per session, with cancel and a leave warning
//! - **Bounded polling**: progress and reference polling with attempt and deadline limits
//! - **Search**: paged session and user search with row projections
//!
//! # Example
//!
//! ```no_run
//! use knolx_uploadr::config::Config;
//! use knolx_uploadr::portal::PortalClient;
//! use knolx_uploadr::upload::{UploadController, VideoMetadata};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let client = PortalClient::new(&config.portal)?;
//!     let controller = UploadController::new("5a1b2c3d", client, &config);
//!
//!     controller.resume().await;
//!     controller.stage("talk.mp4").await?;
//!     controller.run(&VideoMetadata::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod portal;
pub mod render;
pub mod search;
pub mod telemetry;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use portal::{PortalBackend, PortalClient};
pub use upload::UploadController;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
