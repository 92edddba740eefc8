//! # sweepjet CLI
//!
//! ```bash
//! # Print a PDF, starting on the left side of the bed
//! sweepjet print --side left document.pdf
//!
//! # Rehearse a job without hardware
//! sweepjet print --dry-run page1.png page2.png
//!
//! # Show the sweeps of a page
//! sweepjet plan page1.png
//!
//! # Home the stage
//! sweepjet stage home
//! ```
//!
//! While printing, type `p` and Enter to pause or resume, `a` to abort, and
//! Enter alone to release the next page in manual mode.

use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sweepjet::document::{collect_pages, is_pdf, rasterize_pdf, WorkingDir};
use sweepjet::sim::{SimHead, SimLog, SimStage};
use sweepjet::{
    Base64Encoder, Bitmap, Error, EventSink, Grbl, HeadInterface, Hp45, MotionInterface,
    PageOrder, PagePlan, PrintConfig, PrintSession, SessionControl, Side, SideAnchor,
};

/// sweepjet - raster-sweep printing on an HP45 head and a GRBL stage
#[derive(Parser, Debug)]
#[command(name = "sweepjet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SideArg {
    Left,
    Right,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Left => Side::Left,
            SideArg::Right => Side::Right,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print PDF or image files
    Print {
        /// Files to print, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Motion controller serial port
        #[arg(long, default_value = "/dev/ttyACM0")]
        motion: String,

        /// Head controller serial port
        #[arg(long, default_value = "/dev/ttyACM1")]
        head: String,

        /// Print resolution in dots per inch
        #[arg(long, default_value = "300")]
        dpi: u32,

        /// Luminance below which a pixel is printed
        #[arg(long, default_value = "128")]
        threshold: u8,

        /// Side of the bed the first page prints on
        #[arg(long, value_enum, default_value = "right")]
        side: SideArg,

        /// Sweep axis start of the left side, in mm
        #[arg(long)]
        left_y: Option<f64>,

        /// Sweep axis start of the right side, in mm
        #[arg(long)]
        right_y: Option<f64>,

        /// Travel feed rate in mm/min
        #[arg(long, default_value = "12000")]
        travel_speed: f64,

        /// Print feed rate in mm/min
        #[arg(long, default_value = "8000")]
        print_speed: f64,

        /// Do not home the stage before each page
        #[arg(long)]
        no_home: bool,

        /// Wait for Enter between pages
        #[arg(long)]
        manual: bool,

        /// Print the last page first
        #[arg(long)]
        lifo: bool,

        /// Nozzle density in percent
        #[arg(long)]
        density: Option<u8>,

        /// Preheat pulses before the job
        #[arg(long)]
        preheat: Option<u32>,

        /// Use simulated devices instead of the serial ports
        #[arg(long)]
        dry_run: bool,
    },

    /// Show how a file would be split into sweeps
    Plan {
        file: PathBuf,

        #[arg(long, default_value = "300")]
        dpi: u32,

        #[arg(long, default_value = "128")]
        threshold: u8,
    },

    /// Move the stage by hand
    Stage {
        /// Motion controller serial port
        #[arg(long, default_value = "/dev/ttyACM0")]
        port: String,

        #[command(subcommand)]
        action: StageAction,
    },
}

#[derive(Subcommand, Debug)]
enum StageAction {
    /// Run the homing cycle
    Home,
    /// Clear an alarm lock
    Unlock,
    /// Jog one axis by a relative distance in mm
    Jog {
        axis: char,
        distance: f64,
        #[arg(long, default_value = "9000")]
        speed: f64,
    },
    /// Move to the park position
    Park,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}:{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            )
        })
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Error> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Print {
            files,
            motion,
            head,
            dpi,
            threshold,
            side,
            left_y,
            right_y,
            travel_speed,
            print_speed,
            no_home,
            manual,
            lifo,
            density,
            preheat,
            dry_run,
        } => {
            let defaults = PrintConfig::new(dpi as f64);
            let mut config = defaults
                .clone()
                .threshold(threshold)
                .start_side(side.into())
                .travel_speed(travel_speed)
                .print_speed(print_speed)
                .home_before_page(!no_home)
                .page_order(if lifo { PageOrder::Lifo } else { PageOrder::Fifo });
            if let Some(y) = left_y {
                config = config.left_anchor(SideAnchor::new(defaults.anchor(Side::Left).x, y));
            }
            if let Some(y) = right_y {
                config = config.right_anchor(SideAnchor::new(defaults.anchor(Side::Right).x, y));
            }

            let dir = WorkingDir::create()?;
            let pages = collect_pages(&files, dpi, &dir)?;
            println!("{} page(s) to print", pages.len());

            let mut motion_dev: Box<dyn MotionInterface>;
            let mut head_dev: Box<dyn HeadInterface>;
            if dry_run {
                let log = SimLog::new();
                motion_dev = Box::new(SimStage::new(log.clone()).move_delay(Duration::from_millis(5)));
                head_dev = Box::new(SimHead::new(log));
            } else {
                let mut hp45 = Hp45::new();
                hp45.connect(&head)?;
                if let Some(density) = density {
                    hp45.set_density(density)?;
                }
                if let Some(pulses) = preheat {
                    hp45.preheat(pulses)?;
                }
                motion_dev = Box::new(Grbl::new());
                head_dev = Box::new(hp45);
            }
            motion_dev.connect(&motion)?;
            if !head_dev.is_connected() {
                head_dev.connect(&head)?;
            }

            let (tx, rx) = mpsc::channel();
            let printer = thread::spawn(move || {
                for event in rx {
                    println!("{}", event);
                }
            });

            let mut session = PrintSession::new(config)?.with_events(EventSink::new(tx));
            spawn_operator_input(session.control());

            let result = if manual {
                session.print_manual(motion_dev.as_mut(), head_dev.as_mut(), pages)
            } else {
                session.print(motion_dev.as_mut(), head_dev.as_mut(), pages)
            };
            drop(session);
            let _ = printer.join();

            let report = result?;
            println!(
                "{:?}: printed {:?}, skipped {:?}, next job starts on the {:?} side",
                report.outcome, report.printed, report.skipped, report.side
            );
        }

        Commands::Plan {
            file,
            dpi,
            threshold,
        } => {
            let dir = WorkingDir::create()?;
            let images = if is_pdf(&file) {
                rasterize_pdf(&file, dpi, &dir)?
            } else {
                vec![file]
            };
            for (index, image) in images.iter().enumerate() {
                let bitmap = Bitmap::open(image, threshold, dpi as f64)?;
                print_plan(index, &bitmap);
            }
        }

        Commands::Stage { port, action } => {
            let mut grbl = Grbl::new();
            grbl.connect(&port)?;
            match action {
                StageAction::Home => grbl.home()?,
                StageAction::Unlock => grbl.unlock()?,
                StageAction::Jog {
                    axis,
                    distance,
                    speed,
                } => grbl.jog(axis.to_ascii_uppercase(), distance, speed)?,
                StageAction::Park => {
                    let (x, y, speed) = PrintConfig::default().park();
                    grbl.move_to(x, y, speed)?
                }
            }
            println!("{:?}", grbl.status().snapshot());
        }
    }

    Ok(())
}

fn print_plan(index: usize, bitmap: &Bitmap) {
    let plan = PagePlan::build(bitmap, &Base64Encoder);
    println!(
        "Page {}: {}x{} px, {} sweep(s) of {} rows, {} line(s)",
        index + 1,
        bitmap.width(),
        bitmap.height(),
        plan.sweeps.len(),
        plan.sweep_size,
        plan.line_count()
    );
    for (i, sweep) in plan.sweeps.iter().enumerate() {
        let commands = if sweep.is_blank() {
            0
        } else {
            sweep.lines.len() + 2
        };
        println!(
            "  sweep {:>3}: rows {:?} {:?}, columns {:?}, {} command(s)",
            i + 1,
            sweep.band.rows(),
            sweep.band.direction,
            sweep.columns,
            commands
        );
    }
}

/// Read operator commands from stdin for the rest of the process.
fn spawn_operator_input(control: Arc<SessionControl>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match line.trim() {
                "p" => {
                    if control.toggle_pause() {
                        println!("Paused, type p to resume");
                    } else {
                        println!("Resumed");
                    }
                }
                "a" => {
                    println!("Aborting after the current sweep");
                    control.abort();
                }
                "" | "c" => control.release_page(),
                other => println!("Unknown command {:?}: p pause/resume, a abort, Enter continue", other),
            }
        }
    });
}
