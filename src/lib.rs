//! Raster-sweep print scheduler
//!
//! This crate drives an HP45 thermal inkjet head mounted on a GRBL motion
//! stage. Each page is thresholded into a bitmap, sliced into head-height
//! sweep bands, reduced to the columns where the nozzle pattern changes, and
//! printed one sweep at a time with the head buffer filled before the stage
//! carries it across the page.
//!
//! # Example
//!
//! ```rust,no_run
//! use sweepjet::{Grbl, Hp45, HeadInterface, MotionInterface, PageInput, PrintConfig, PrintSession};
//!
//! let mut motion = Grbl::new();
//! let mut head = Hp45::new();
//! motion.connect("/dev/ttyACM0").unwrap();
//! head.connect("/dev/ttyACM1").unwrap();
//!
//! let mut session = PrintSession::new(PrintConfig::new(300.0)).unwrap();
//! let report = session
//!     .print(&mut motion, &mut head, vec![PageInput::File("page.png".into())])
//!     .unwrap();
//! println!("{:?}", report);
//! ```

mod bitmap;
mod config;
mod device;
mod emitter;
mod error;
mod event;
mod grbl;
mod hp45;
mod line;
mod pipeline;
mod position;
mod serial;
mod session;
mod status;
mod sweep;
mod synchronizer;

pub mod document;
pub mod sim;

pub use crate::{
    bitmap::Bitmap,
    config::{PageOrder, PrintConfig, Side, SideAnchor},
    device::{HeadInterface, MotionInterface, MotionState, MotionStatus},
    emitter::{Command, CommandBuffer, SweepCommands},
    error::{Device, Error, MotionError},
    event::{Event, EventSink},
    grbl::{parse_status_report, Grbl, StatusReport},
    hp45::{encode_position, HeadStatus, Hp45},
    line::{diff_lines, walk, Base64Encoder, LineEncoder, PagePlan, ScanLine, SweepLines},
    pipeline::{render_pages, Job, Page, PageInput, RenderFailure, Rendered},
    position::{mm_to_micron, mm_to_pixel, pixel_to_mm, PositionMapper, MM_PER_INCH},
    serial::{LineSplitter, SerialLink, DEFAULT_BAUD},
    session::{Flow, JobOutcome, JobReport, PrintSession, SessionControl, SessionState},
    status::StatusCell,
    sweep::{plan_sweeps, sweep_size, Direction, SweepBand},
    synchronizer::{PageOutcome, Synchronizer},
};
