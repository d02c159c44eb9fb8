//! Notecanvas Render Library
//!
//! Background rendering for a paginated, zoomable annotation canvas. Page
//! views keep tiled renders of their page; render jobs patch dirty regions
//! into those tiles or rebuild them around the viewport, and thumbnails are
//! rendered whole. All painting happens on the scheduler's worker thread
//! and results are posted back to the interactive thread.

pub mod config;
pub mod document;
pub mod error;
pub mod page_view;
pub mod preview;
pub mod render_job;
pub mod view_scheduler;

pub use config::CanvasConfig;
pub use document::{PageDocument, PagePainter, PaintFlags, SharedDocument};
pub use error::{ConfigError, RenderError, RenderResult};
pub use page_view::{PageView, RenderRequest, RepaintTarget, Retiling, Viewport};
pub use preview::{PreviewJob, PreviewSink, Recolor, ThumbnailView};
pub use render_job::{RenderJob, RenderSettings};
pub use view_scheduler::{ViewScheduler, BLOCKING_PRIORITY, PAGE_PRIORITY, THUMBNAIL_PRIORITY};
