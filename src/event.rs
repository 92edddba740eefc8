//! Progress events for whoever drives the session.

use log::info;
use std::fmt;
use std::sync::mpsc::Sender;

use crate::config::Side;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    JobStarted { pages: usize },
    PageReady { page: usize, sweeps: usize },
    PageSkipped { page: usize, reason: String },
    PageStarted { page: usize, side: Side },
    SweepDone { page: usize, sweep: usize, sweeps: usize },
    PageDone { page: usize },
    AwaitingContinue { page: usize },
    Aborted { page: usize },
    JobFinished { printed: usize, skipped: usize },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::JobStarted { pages } => write!(f, "Printing {} page(s)", pages),
            Event::PageReady { page, sweeps } => {
                write!(f, "Page {} rendered, {} sweep(s)", page + 1, sweeps)
            }
            Event::PageSkipped { page, reason } => {
                write!(f, "Page {} skipped: {}", page + 1, reason)
            }
            Event::PageStarted { page, side } => {
                write!(f, "Printing page {} on the {:?} side", page + 1, side)
            }
            Event::SweepDone {
                page,
                sweep,
                sweeps,
            } => write!(f, "Page {}: sweep {}/{} done", page + 1, sweep + 1, sweeps),
            Event::PageDone { page } => write!(f, "Page {} done", page + 1),
            Event::AwaitingContinue { page } => {
                write!(f, "Finished page {}, continue to print the next", page + 1)
            }
            Event::Aborted { page } => write!(f, "Aborted at page {}", page + 1),
            Event::JobFinished { printed, skipped } => {
                write!(f, "Job finished: {} printed, {} skipped", printed, skipped)
            }
        }
    }
}

/// Logs events and forwards them to an optional listener.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    listener: Option<Sender<Event>>,
}

impl EventSink {
    pub fn new(listener: Sender<Event>) -> Self {
        EventSink {
            listener: Some(listener),
        }
    }

    /// A sink that only logs.
    pub fn silent() -> Self {
        EventSink::default()
    }

    pub fn emit(&self, event: Event) {
        info!("{}", event);
        if let Some(listener) = &self.listener {
            // A listener that went away only loses progress text.
            let _ = listener.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn events_read_as_one_based_pages() {
        let event = Event::SweepDone {
            page: 0,
            sweep: 1,
            sweeps: 3,
        };
        assert_eq!(event.to_string(), "Page 1: sweep 2/3 done");
        assert_eq!(
            Event::PageStarted {
                page: 2,
                side: Side::Left
            }
            .to_string(),
            "Printing page 3 on the Left side"
        );
    }

    #[test]
    fn sink_forwards_to_listener() {
        let (tx, rx) = mpsc::channel();
        let sink = EventSink::new(tx);
        sink.emit(Event::PageDone { page: 1 });
        drop(sink);
        assert_eq!(rx.iter().collect::<Vec<_>>(), vec![Event::PageDone { page: 1 }]);

        EventSink::silent().emit(Event::JobStarted { pages: 1 });
    }
}
