//! Page thumbnails
//!
//! A preview job renders a whole page into a single small surface, without
//! going through a tile cache, and hands the result to the thumbnail's sink
//! on the interactive thread.

use crate::document::{PageDocument, PagePainter, PaintFlags, SharedDocument};
use crate::error::{RenderError, RenderResult};
use crate::render_job::render_region;
use log::{trace, warn};
use notecanvas_cache::{PixelRect, Rgba, Surface};
use notecanvas_scheduler::{Job, JobContext, JobType, SourceId, UiDispatcher};
use std::sync::Arc;

/// Receives finished thumbnails on the interactive thread
pub trait PreviewSink: Send + Sync {
    fn deliver(&self, page: usize, image: Surface);
}

/// Colour mapping applied to a rendered thumbnail
///
/// Each pixel is mapped by its luminance: black becomes `foreground`, white
/// becomes `background`, and everything in between is interpolated. Alpha is
/// kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recolor {
    pub foreground: Rgba,
    pub background: Rgba,
}

impl Recolor {
    pub fn new(foreground: Rgba, background: Rgba) -> Self {
        Self {
            foreground,
            background,
        }
    }

    pub fn map(&self, [r, g, b, a]: Rgba) -> Rgba {
        let luminance = (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64) / 255.0;
        let mix = |fg: u8, bg: u8| {
            let value = fg as f64 + (bg as f64 - fg as f64) * luminance;
            value.round().clamp(0.0, 255.0) as u8
        };
        [
            mix(self.foreground[0], self.background[0]),
            mix(self.foreground[1], self.background[1]),
            mix(self.foreground[2], self.background[2]),
            a,
        ]
    }

    pub fn apply(&self, surface: &mut Surface) {
        surface.map_pixels(|rgba| self.map(rgba));
    }
}

/// A thumbnail slot in the page sidebar
pub struct ThumbnailView {
    page: usize,
    width: u32,
    sink: Arc<dyn PreviewSink>,
}

impl ThumbnailView {
    pub fn new(page: usize, width: u32, sink: Arc<dyn PreviewSink>) -> Arc<Self> {
        Arc::new(Self {
            page,
            width: width.max(1),
            sink,
        })
    }

    /// Identity used by the scheduler for dedup and cancellation
    pub fn source_id(view: &Arc<ThumbnailView>) -> SourceId {
        SourceId::of(view)
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn width(&self) -> u32 {
        self.width
    }
}

/// One-shot whole-page thumbnail render
pub struct PreviewJob<D> {
    thumbnail: Arc<ThumbnailView>,
    recolor: Option<Recolor>,
    document: SharedDocument<D>,
    painter: Arc<dyn PagePainter<D>>,
    dispatcher: Arc<dyn UiDispatcher>,
}

impl<D: PageDocument + 'static> PreviewJob<D> {
    pub fn new(
        thumbnail: Arc<ThumbnailView>,
        recolor: Option<Recolor>,
        document: SharedDocument<D>,
        painter: Arc<dyn PagePainter<D>>,
        dispatcher: Arc<dyn UiDispatcher>,
    ) -> Self {
        Self {
            thumbnail,
            recolor,
            document,
            painter,
            dispatcher,
        }
    }

    fn render(&self) -> RenderResult<Surface> {
        let page = self.thumbnail.page;
        let doc = self.document.read();
        let size = doc.page_size(page).ok_or(RenderError::InvalidPage(page))?;
        if size.width <= 0.0 {
            return Err(RenderError::InvalidPage(page));
        }

        let zoom = self.thumbnail.width as f64 / size.width;
        let height = (size.height * zoom).ceil().max(1.0) as u32;
        let device = PixelRect::new(0, 0, self.thumbnail.width, height);
        render_region(
            self.painter.as_ref(),
            &*doc,
            page,
            device,
            zoom,
            PaintFlags::preview(),
        )
    }
}

impl<D: PageDocument + 'static> Job for PreviewJob<D> {
    fn job_type(&self) -> JobType {
        JobType::Preview
    }

    fn source(&self) -> Option<SourceId> {
        Some(ThumbnailView::source_id(&self.thumbnail))
    }

    fn run(&self, ctx: &JobContext) {
        if ctx.is_cancelled() {
            return;
        }
        if ctx.is_paused() {
            ctx.defer_until_resumed();
            return;
        }

        let mut image = match self.render() {
            Ok(image) => image,
            Err(err) => {
                warn!("thumbnail of page {} not rendered: {}", self.thumbnail.page, err);
                return;
            }
        };
        if let Some(recolor) = self.recolor {
            recolor.apply(&mut image);
        }
        if ctx.is_cancelled() {
            return;
        }

        trace!("thumbnail of page {} ready", self.thumbnail.page);
        let sink = Arc::clone(&self.thumbnail.sink);
        let page = self.thumbnail.page;
        self.dispatcher
            .dispatch(Box::new(move || sink.deliver(page, image)));
    }

    fn name(&self) -> &str {
        "render thumbnail"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notecanvas_cache::{Rect, Size, WHITE};
    use notecanvas_scheduler::{CancellationToken, ChannelDispatcher, PauseGate};
    use parking_lot::{Mutex, RwLock};

    const BLACK: Rgba = [0, 0, 0, 255];
    const DARK_BG: Rgba = [30, 30, 40, 255];
    const LIGHT_FG: Rgba = [220, 220, 210, 255];

    struct Letter;

    impl PageDocument for Letter {
        fn page_count(&self) -> usize {
            2
        }

        fn page_size(&self, page: usize) -> Option<Size> {
            (page < 2).then(|| Size::new(612.0, 792.0))
        }
    }

    /// White paper with a black band across the top
    struct BandPainter;

    impl PagePainter<Letter> for BandPainter {
        fn paint(
            &self,
            _doc: &Letter,
            _page: usize,
            _region: Rect,
            _zoom: f64,
            target: &mut Surface,
            _flags: PaintFlags,
        ) -> RenderResult<()> {
            target.fill(WHITE);
            let width = target.width();
            target.fill_rect(0, 0, width, 4, BLACK);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Collect {
        images: Mutex<Vec<(usize, Surface)>>,
    }

    impl PreviewSink for Collect {
        fn deliver(&self, page: usize, image: Surface) {
            self.images.lock().push((page, image));
        }
    }

    fn run_preview(page: usize, recolor: Option<Recolor>) -> Vec<(usize, Surface)> {
        run_preview_with(page, recolor, PauseGate::new()).0
    }

    fn run_preview_with(
        page: usize,
        recolor: Option<Recolor>,
        pause: PauseGate,
    ) -> (Vec<(usize, Surface)>, JobContext) {
        let sink = Arc::new(Collect::default());
        let thumbnail = ThumbnailView::new(page, 102, sink.clone());
        let (dispatcher, queue) = ChannelDispatcher::new();
        let job = PreviewJob::new(
            thumbnail,
            recolor,
            Arc::new(RwLock::new(Letter)),
            Arc::new(BandPainter),
            Arc::new(dispatcher),
        );

        let ctx = JobContext::new(CancellationToken::new(), pause);
        job.run(&ctx);
        queue.run_pending();
        let images = std::mem::take(&mut *sink.images.lock());
        (images, ctx)
    }

    #[test]
    fn test_recolor_maps_extremes() {
        let recolor = Recolor::new(LIGHT_FG, DARK_BG);
        assert_eq!(recolor.map(WHITE), DARK_BG);
        assert_eq!(recolor.map(BLACK), LIGHT_FG);
        // Alpha is kept
        assert_eq!(recolor.map([255, 255, 255, 128])[3], 128);
    }

    #[test]
    fn test_preview_scales_to_width() {
        let images = run_preview(1, None);
        assert_eq!(images.len(), 1);

        let (page, image) = &images[0];
        assert_eq!(*page, 1);
        assert_eq!(image.width(), 102);
        // 792 * (102 / 612) = 132
        assert_eq!(image.height(), 132);
        assert_eq!(image.pixel(0, 0), Some(BLACK));
        assert_eq!(image.pixel(0, 100), Some(WHITE));
    }

    #[test]
    fn test_preview_recolored() {
        let images = run_preview(0, Some(Recolor::new(LIGHT_FG, DARK_BG)));
        let (_, image) = &images[0];
        assert_eq!(image.pixel(0, 0), Some(LIGHT_FG));
        assert_eq!(image.pixel(0, 100), Some(DARK_BG));
    }

    #[test]
    fn test_preview_of_missing_page_delivers_nothing() {
        assert!(run_preview(7, None).is_empty());
    }

    #[test]
    fn test_paused_preview_defers() {
        let pause = PauseGate::new();
        pause.pause_for(std::time::Duration::from_secs(60));

        let (images, ctx) = run_preview_with(0, None, pause);
        assert!(images.is_empty());
        assert!(ctx.is_deferred());
    }
}
