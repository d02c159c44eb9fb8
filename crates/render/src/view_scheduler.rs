//! Render requests from the interactive thread
//!
//! [`ViewScheduler`] sits between page and thumbnail views and the generic
//! [`Scheduler`]. It creates the right job for each request, drops requests
//! that are already queued, and cancels all work for a view before the view
//! is destroyed.

use crate::config::CanvasConfig;
use crate::document::{PageDocument, PagePainter, SharedDocument};
use crate::page_view::PageView;
use crate::preview::{PreviewJob, PreviewSink, Recolor, ThumbnailView};
use crate::render_job::{RenderJob, RenderSettings};
use log::debug;
use notecanvas_scheduler::{
    BlockingJob, JobPriority, JobRef, JobType, Scheduler, SchedulerResult, UiDispatcher,
};
use std::sync::Arc;
use std::time::Duration;

/// Priority of page repaints
pub const PAGE_PRIORITY: JobPriority = JobPriority::Urgent;

/// Priority of thumbnail renders
pub const THUMBNAIL_PRIORITY: JobPriority = JobPriority::High;

/// Priority of jobs that block user input
pub const BLOCKING_PRIORITY: JobPriority = JobPriority::Urgent;

/// Render scheduling policy for page and thumbnail views
///
/// # Example
///
/// ```
/// use notecanvas_cache::{PixelRect, Rect, Size, Surface};
/// use notecanvas_render::{
///     CanvasConfig, PageDocument, PagePainter, PageView, PaintFlags, RenderResult,
///     RepaintTarget, ViewScheduler, Viewport,
/// };
/// use notecanvas_scheduler::ChannelDispatcher;
/// use parking_lot::RwLock;
/// use std::sync::Arc;
///
/// struct Blank;
/// impl PageDocument for Blank {
///     fn page_count(&self) -> usize { 1 }
///     fn page_size(&self, _page: usize) -> Option<Size> { Some(Size::new(300.0, 300.0)) }
/// }
///
/// struct Paper;
/// impl PagePainter<Blank> for Paper {
///     fn paint(
///         &self,
///         _doc: &Blank,
///         _page: usize,
///         _region: Rect,
///         _zoom: f64,
///         target: &mut Surface,
///         _flags: PaintFlags,
///     ) -> RenderResult<()> {
///         target.fill([255, 255, 255, 255]);
///         Ok(())
///     }
/// }
///
/// struct Widget;
/// impl RepaintTarget for Widget {
///     fn repaint_rects(&self, _rects: Vec<PixelRect>) {}
///     fn repaint_all(&self) {}
/// }
///
/// let config = CanvasConfig::default();
/// let (dispatcher, ui_queue) = ChannelDispatcher::new();
/// let views = ViewScheduler::new(
///     config.clone(),
///     Arc::new(RwLock::new(Blank)),
///     Arc::new(Paper),
///     Arc::new(dispatcher),
/// );
/// views.start().unwrap();
///
/// let viewport = Viewport::new(1.0, PixelRect::new(0, 0, 300, 300), (0, 0));
/// let page = PageView::new(0, Size::new(300.0, 300.0), viewport, &config, Arc::new(Widget));
/// page.request_rerender(false);
/// views.request_page_render(&page);
///
/// // Before dropping the view, make sure no job still refers to it
/// views.cancel_page(&page);
/// ui_queue.run_pending();
/// views.stop();
/// ```
pub struct ViewScheduler<D> {
    scheduler: Scheduler,
    config: CanvasConfig,
    document: SharedDocument<D>,
    painter: Arc<dyn PagePainter<D>>,
    dispatcher: Arc<dyn UiDispatcher>,
}

impl<D: PageDocument + 'static> ViewScheduler<D> {
    /// Create a scheduler; the worker is not started yet
    pub fn new(
        config: CanvasConfig,
        document: SharedDocument<D>,
        painter: Arc<dyn PagePainter<D>>,
        dispatcher: Arc<dyn UiDispatcher>,
    ) -> Self {
        Self {
            scheduler: Scheduler::with_thread_name(config.worker_thread_name.clone()),
            config,
            document,
            painter,
            dispatcher,
        }
    }

    pub fn start(&self) -> SchedulerResult<()> {
        self.scheduler.start()
    }

    pub fn stop(&self) {
        self.scheduler.stop()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Arc<dyn UiDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            dirty_padding: self.config.dirty_padding,
            parallel_tiles: self.config.parallel_tiles,
        }
    }

    /// Queue a repaint of `view` unless one is already waiting
    ///
    /// The queued job reads the view's request when it starts, so anything
    /// marked dirty before then is picked up by the job already queued.
    /// Returns `true` if a new job was queued.
    pub fn request_page_render(&self, view: &Arc<PageView>) -> bool {
        let source = PageView::source_id(view);
        self.scheduler
            .submit_unique(source, JobType::Render, PAGE_PRIORITY, || -> JobRef {
                Arc::new(RenderJob::new(
                    Arc::clone(view),
                    Arc::clone(&self.document),
                    Arc::clone(&self.painter),
                    Arc::clone(&self.dispatcher),
                    self.render_settings(),
                ))
            })
    }

    /// A thumbnail slot for `page` at the configured thumbnail width
    pub fn thumbnail_view(&self, page: usize, sink: Arc<dyn PreviewSink>) -> Arc<ThumbnailView> {
        ThumbnailView::new(page, self.config.thumbnail_width, sink)
    }

    /// Queue a thumbnail render unless one is already waiting
    ///
    /// When a render is already queued, `recolor` is ignored.
    pub fn request_thumbnail_render(
        &self,
        thumbnail: &Arc<ThumbnailView>,
        recolor: Option<Recolor>,
    ) -> bool {
        let source = ThumbnailView::source_id(thumbnail);
        self.scheduler
            .submit_unique(source, JobType::Preview, THUMBNAIL_PRIORITY, || -> JobRef {
                Arc::new(PreviewJob::new(
                    Arc::clone(thumbnail),
                    recolor,
                    Arc::clone(&self.document),
                    Arc::clone(&self.painter),
                    Arc::clone(&self.dispatcher),
                ))
            })
    }

    /// Drop every queued page and thumbnail render
    ///
    /// Blocking jobs stay queued. Returns the number of removed jobs.
    pub fn cancel_all_pending(&self) -> usize {
        let removed = self
            .scheduler
            .remove_all_of_types(&[JobType::Preview, JobType::Render]);
        debug!("cancelled {} pending render jobs", removed);
        removed
    }

    /// Remove all render jobs for `view` and wait for the one in flight
    ///
    /// A render of this view that is already running is cancelled and
    /// waited for; a job for another view is not. Once this returns no job
    /// refers to the view, so it can be dropped.
    pub fn cancel_page(&self, view: &Arc<PageView>) -> usize {
        self.scheduler.remove_all_of_source_and_type_any_priority(
            PageView::source_id(view),
            JobType::Render,
            true,
        )
    }

    /// Remove all preview jobs for `thumbnail` and wait for the one in flight
    pub fn cancel_thumbnail(&self, thumbnail: &Arc<ThumbnailView>) -> usize {
        self.scheduler.remove_all_of_source_and_type_any_priority(
            ThumbnailView::source_id(thumbnail),
            JobType::Preview,
            true,
        )
    }

    /// Queue a job that keeps input blocked while it runs
    pub fn submit_blocking(&self, job: BlockingJob) {
        self.scheduler.submit(job.into_ref(), BLOCKING_PRIORITY);
    }

    /// Hold back rendering for `duration`, e.g. during a zoom gesture
    ///
    /// Page and thumbnail renders that come up meanwhile are set aside and
    /// run once the pause ends; other jobs keep running.
    pub fn pause_rendering(&self, duration: Duration) {
        self.scheduler.pause_rendering(duration);
    }

    pub fn resume_paused_rendering(&self) {
        self.scheduler.resume_paused_rendering();
    }
}
