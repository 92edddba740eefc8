//! Two stage page pipeline.
//!
//! A renderer thread thresholds and plans pages ahead while the calling
//! thread prints them. Pages travel through a bounded channel, so the
//! renderer never gets more than `queue_depth` pages ahead. Closing the
//! channel tells the printer that rendering is done.

use image::DynamicImage;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;

use crate::bitmap::Bitmap;
use crate::config::{PageOrder, PrintConfig, Side};
use crate::device::{HeadInterface, MotionInterface};
use crate::error::Error;
use crate::event::{Event, EventSink};
use crate::line::{LineEncoder, PagePlan};
use crate::session::{Flow, JobOutcome, JobReport, SessionControl};
use crate::synchronizer::{PageOutcome, Synchronizer};

/// A page waiting to be rendered.
#[derive(Debug, Clone)]
pub enum PageInput {
    /// Already thresholded.
    Bitmap(Bitmap),
    /// Decoded image, thresholded with the job's threshold.
    Image(DynamicImage),
    /// Image file loaded at render time.
    File(PathBuf),
}

impl PageInput {
    /// Threshold the input into a bitmap at the job's resolution.
    pub fn render(self, config: &PrintConfig) -> Result<Bitmap, Error> {
        match self {
            PageInput::Bitmap(bitmap) => Ok(bitmap),
            PageInput::Image(image) => Ok(Bitmap::from_image(
                &image,
                config.threshold_value(),
                config.resolution(),
            )),
            PageInput::File(path) => {
                Bitmap::open(&path, config.threshold_value(), config.resolution())
            }
        }
    }
}

impl From<Bitmap> for PageInput {
    fn from(bitmap: Bitmap) -> Self {
        PageInput::Bitmap(bitmap)
    }
}

impl From<PathBuf> for PageInput {
    fn from(path: PathBuf) -> Self {
        PageInput::File(path)
    }
}

/// A rendered and planned page.
#[derive(Debug)]
pub struct Page {
    /// Position of the page in the submitted job, from 0.
    pub index: usize,
    pub bitmap: Bitmap,
    pub plan: PagePlan,
}

/// A page that failed to render.
#[derive(Debug)]
pub struct RenderFailure {
    pub index: usize,
    pub error: Error,
}

/// What the renderer hands to the printer stage.
pub type Rendered = Result<Page, RenderFailure>;

/// Render `pages` in `order` into `ready`, stopping early on abort.
///
/// Dropping `ready` on return is the end of rendering.
pub fn render_pages(
    pages: Vec<PageInput>,
    order: PageOrder,
    config: &PrintConfig,
    encoder: &dyn LineEncoder,
    control: &SessionControl,
    events: &EventSink,
    ready: SyncSender<Rendered>,
) {
    let mut queue: VecDeque<(usize, PageInput)> = pages.into_iter().enumerate().collect();

    loop {
        let next = match order {
            PageOrder::Fifo => queue.pop_front(),
            PageOrder::Lifo => queue.pop_back(),
        };
        let Some((index, input)) = next else {
            break;
        };
        if control.is_aborted() {
            debug!("renderer stopping on abort");
            break;
        }

        let rendered = match input.render(config) {
            Ok(bitmap) => {
                let plan = PagePlan::build(&bitmap, encoder);
                events.emit(Event::PageReady {
                    page: index,
                    sweeps: plan.sweeps.len(),
                });
                Ok(Page {
                    index,
                    bitmap,
                    plan,
                })
            }
            Err(error) => {
                warn!("page {} failed to render: {}", index + 1, error);
                Err(RenderFailure { index, error })
            }
        };

        if ready.send(rendered).is_err() {
            debug!("printer stage is gone, renderer stopping");
            break;
        }
    }
    info!("rendering done");
}

/// One job's worth of settings for the pipeline.
pub struct Job<'a> {
    pub config: &'a PrintConfig,
    pub control: &'a SessionControl,
    pub events: &'a EventSink,
    pub encoder: &'a dyn LineEncoder,
    /// Print in submission order and wait for a release after each page.
    pub manual: bool,
}

impl<'a> Job<'a> {
    /// Run the job to the end, flipping `side` after every printed page.
    pub fn run(
        &self,
        motion: &mut dyn MotionInterface,
        head: &mut dyn HeadInterface,
        pages: Vec<PageInput>,
        side: &mut Side,
    ) -> Result<JobReport, Error> {
        let total = pages.len();
        let order = if self.manual {
            PageOrder::Fifo
        } else {
            self.config.order()
        };
        let (ready_tx, ready_rx) = sync_channel(self.config.depth());

        let (config, encoder, control) = (self.config, self.encoder, self.control);
        let events = self.events.clone();

        thread::scope(|scope| {
            let renderer = thread::Builder::new()
                .name("renderer".to_string())
                .spawn_scoped(scope, move || {
                    render_pages(pages, order, config, encoder, control, &events, ready_tx)
                })?;

            let result = self.print_pages(motion, head, ready_rx, total, side);
            if renderer.join().is_err() {
                warn!("renderer thread panicked");
            }
            result
        })
    }

    /// Printer stage: print ready pages until rendering is done and the
    /// queue is empty.
    fn print_pages(
        &self,
        motion: &mut dyn MotionInterface,
        head: &mut dyn HeadInterface,
        ready: Receiver<Rendered>,
        total: usize,
        side: &mut Side,
    ) -> Result<JobReport, Error> {
        let mut report = JobReport {
            printed: Vec::new(),
            skipped: Vec::new(),
            outcome: JobOutcome::Completed,
            side: *side,
        };
        let mut synchronizer =
            Synchronizer::new(motion, head, self.config, self.control, self.events);

        let mut previous = None;

        for rendered in ready {
            let page = match rendered {
                Ok(page) => page,
                Err(failure) => {
                    self.events.emit(Event::PageSkipped {
                        page: failure.index,
                        reason: failure.error.to_string(),
                    });
                    report.skipped.push(failure.index);
                    continue;
                }
            };

            // The gate sits between two printable pages, never before a
            // skipped one or after the last.
            if let (true, Some(done)) = (self.manual, previous) {
                self.events.emit(Event::AwaitingContinue { page: done });
                if self.control.wait_for_continue() == Flow::Abort {
                    self.events.emit(Event::Aborted { page: page.index });
                    report.outcome = JobOutcome::Aborted;
                    break;
                }
            }
            if self.control.checkpoint() == Flow::Abort {
                self.events.emit(Event::Aborted { page: page.index });
                report.outcome = JobOutcome::Aborted;
                break;
            }

            previous = Some(page.index);
            match synchronizer.print_page(page.index, &page.plan, *side)? {
                PageOutcome::Completed => {
                    report.printed.push(page.index);
                    *side = side.flip();
                }
                PageOutcome::Blank => report.printed.push(page.index),
                PageOutcome::Aborted => {
                    report.outcome = JobOutcome::Aborted;
                    break;
                }
            }
        }

        if report.outcome == JobOutcome::Completed
            && report.printed.len() + report.skipped.len() < total
        {
            // The renderer stopped early because of an abort.
            report.outcome = JobOutcome::Aborted;
        }
        report.side = *side;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::Base64Encoder;

    fn marked(width: usize) -> PageInput {
        PageInput::Bitmap(Bitmap::from_fn(width, 4, 300.0, |_, col| col == 0))
    }

    fn rendered_order(order: PageOrder) -> Vec<usize> {
        let config = PrintConfig::new(300.0);
        let control = SessionControl::new();
        let (tx, rx) = sync_channel(8);
        render_pages(
            vec![marked(1), marked(2), marked(3)],
            order,
            &config,
            &Base64Encoder,
            &control,
            &EventSink::silent(),
            tx,
        );
        rx.iter().map(|r| r.unwrap().index).collect()
    }

    #[test]
    fn renders_in_configured_order() {
        assert_eq!(rendered_order(PageOrder::Fifo), vec![0, 1, 2]);
        assert_eq!(rendered_order(PageOrder::Lifo), vec![2, 1, 0]);
    }

    #[test]
    fn failed_page_is_reported_and_rendering_continues() {
        let config = PrintConfig::new(300.0);
        let control = SessionControl::new();
        let (tx, rx) = sync_channel(1);

        let handle = thread::spawn(move || {
            render_pages(
                vec![
                    PageInput::File(PathBuf::from("/nonexistent/page-1.png")),
                    marked(5),
                ],
                PageOrder::Fifo,
                &config,
                &Base64Encoder,
                &control,
                &EventSink::silent(),
                tx,
            )
        });

        let results: Vec<_> = rx.iter().collect();
        handle.join().unwrap();
        assert_eq!(results.len(), 2);
        assert!(matches!(&results[0], Err(RenderFailure { index: 0, .. })));
        assert_eq!(results[1].as_ref().map(|p| p.bitmap.width()).ok(), Some(5));
    }

    #[test]
    fn renderer_stops_when_printer_is_gone() {
        let config = PrintConfig::new(300.0);
        let control = SessionControl::new();
        let (tx, rx) = sync_channel(1);
        drop(rx);
        // Returns instead of blocking on a full queue.
        render_pages(
            vec![marked(1), marked(2), marked(3)],
            PageOrder::Fifo,
            &config,
            &Base64Encoder,
            &control,
            &EventSink::silent(),
            tx,
        );
    }
}
