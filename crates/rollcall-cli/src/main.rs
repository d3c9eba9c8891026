mod config;
mod setup;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use rollcall_core::{AugmentParams, RandomAugmenter, ScrfdDetector};
use rollcall_manager::{
    list_attendance_files, paginate, render_pdf, take_attendance, Conflict, NewStudent, Outcome,
    OverwriteDecision, PageLayout, StudentManager, ATTENDANCE_COLUMNS,
};
use rollcall_store::{LocalBlobConfig, LocalBlobStore, RosterStore, RosterTable};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "rollcall", about = "Student roster and face-asset manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a student from a photo
    Add {
        /// Enrollment number (unique key)
        #[arg(short, long)]
        enrollment: String,
        /// Full name
        #[arg(short, long)]
        name: String,
        /// Class or section
        #[arg(short, long)]
        class: String,
        /// Photo containing the student's face
        photo: PathBuf,
        /// Replace an existing registration without asking
        #[arg(long, conflicts_with = "keep")]
        overwrite: bool,
        /// Keep an existing registration without asking
        #[arg(long)]
        keep: bool,
        /// Seed for reproducible augmentation
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Remove a student and their images
    Remove {
        /// Enrollment number
        enrollment: String,
    },
    /// Delete image folders of students no longer on the roster
    Cleanup,
    /// List registered students
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Mark registered students present from class photos
    Attendance {
        /// Class photos
        #[arg(required = true)]
        photos: Vec<PathBuf>,
        /// Also export the sheet as PDF
        #[arg(long)]
        pdf: bool,
    },
    /// List saved attendance sheets, newest first
    Sheets,
    /// Download face detection models
    Setup {
        /// Model directory (defaults to ROLLCALL_MODEL_DIR)
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

/// Manager for operations that never run face detection.
type StoreManager = StudentManager<LocalBlobStore, (), ()>;

fn open_blobs(cfg: &Config) -> Result<LocalBlobStore> {
    let blob_config = LocalBlobConfig {
        root: cfg.blob_root.clone(),
    };
    LocalBlobStore::open(&blob_config)
        .with_context(|| format!("failed to open blob store at {}", cfg.blob_root.display()))
}

fn store_manager(cfg: &Config) -> Result<StoreManager> {
    Ok(StudentManager::new(
        open_blobs(cfg)?,
        RosterStore::new(&cfg.roster_path),
        (),
        (),
        cfg.manager_settings(),
    ))
}

/// Ask on the terminal; without one, existing data is kept.
fn prompt_overwrite(conflict: &Conflict) -> OverwriteDecision {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        eprintln!("{conflict}; keeping existing registration (pass --overwrite to replace)");
        return OverwriteDecision::Keep;
    }

    print!("{conflict}\nOverwrite existing registration? [y/N] ");
    io::stdout().flush().ok();
    let mut answer = String::new();
    if stdin.lock().read_line(&mut answer).is_err() {
        return OverwriteDecision::Keep;
    }
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => OverwriteDecision::Overwrite,
        _ => OverwriteDecision::Keep,
    }
}

fn print_table(table: &RosterTable) {
    if table.is_empty() {
        println!("No students registered");
        return;
    }
    println!("{:<14} {:<28} {:<10} IMAGES", "ENROLLMENT", "NAME", "CLASS");
    for record in table {
        println!(
            "{:<14} {:<28} {:<10} {}",
            record.enrollment,
            record.name,
            record.class_name,
            record.image_location.as_deref().unwrap_or("-")
        );
    }
}

fn report(outcome: Outcome) -> ExitCode {
    if outcome.success {
        println!("{}", outcome.message);
        ExitCode::SUCCESS
    } else {
        eprintln!("error: {}", outcome.message);
        ExitCode::FAILURE
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env();
    tracing::debug!(
        data_dir = %cfg.data_dir.display(),
        roster = %cfg.roster_path.display(),
        blob_root = %cfg.blob_root.display(),
        model = %cfg.detector_model_path().display(),
        "configuration loaded"
    );

    let code = match cli.command {
        Commands::Add {
            enrollment,
            name,
            class,
            photo,
            overwrite,
            keep,
            seed,
        } => {
            let photo_bytes =
                std::fs::read(&photo).with_context(|| format!("failed to read {}", photo.display()))?;
            let student = NewStudent {
                enrollment: &enrollment,
                name: &name,
                class_name: &class,
                photo: &photo_bytes,
            };
            if let Err(e) = student.validate() {
                return Ok(report(Outcome::failed(e.to_string())));
            }

            let model_path = rollcall_models::verify_model(&cfg.model_dir, rollcall_core::DETECTOR_MODEL_FILE)
                .context("detection model unavailable; run `rollcall setup` first")?;
            let detector = ScrfdDetector::load(&model_path)?;
            tracing::info!(path = %model_path.display(), "SCRFD detector loaded");

            let augmenter = match seed.or(cfg.augment_seed) {
                Some(seed) => RandomAugmenter::seeded(AugmentParams::default(), seed),
                None => RandomAugmenter::new(AugmentParams::default()),
            };

            let mut manager = StudentManager::new(
                open_blobs(&cfg)?,
                RosterStore::new(&cfg.roster_path),
                detector,
                augmenter,
                cfg.manager_settings(),
            );

            let result = manager.add(student, |conflict| {
                if overwrite {
                    OverwriteDecision::Overwrite
                } else if keep {
                    OverwriteDecision::Keep
                } else {
                    prompt_overwrite(conflict)
                }
            });
            report(result.into())
        }
        Commands::Remove { enrollment } => {
            let mut manager = store_manager(&cfg)?;
            report(manager.remove(&enrollment).into())
        }
        Commands::Cleanup => {
            let mut manager = store_manager(&cfg)?;
            report(manager.cleanup().into())
        }
        Commands::List { json } => {
            let table = store_manager(&cfg)?.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(table.records())?);
            } else {
                print_table(&table);
            }
            ExitCode::SUCCESS
        }
        Commands::Attendance { photos, pdf } => {
            let table = RosterStore::new(&cfg.roster_path).load()?;
            let now = chrono::Local::now().naive_local();
            let sheet = match take_attendance(&table, &photos, now) {
                Ok(sheet) => sheet,
                Err(e) => return Ok(report(Outcome::failed(e.to_string()))),
            };

            let path = sheet.write_xlsx(&cfg.attendance_dir)?;
            println!(
                "Attendance marked for {} student(s) and saved to {}",
                sheet.entries.len(),
                path.display()
            );

            if pdf {
                let layout = PageLayout::default();
                let pages = paginate(&ATTENDANCE_COLUMNS, &sheet.rows(), &layout);
                let pdf_path = path.with_extension("pdf");
                render_pdf(&pages, &layout, "Attendance", &pdf_path)?;
                println!("PDF written to {}", pdf_path.display());
            }
            ExitCode::SUCCESS
        }
        Commands::Sheets => {
            let files = list_attendance_files(&cfg.attendance_dir)?;
            if files.is_empty() {
                println!("No attendance files found");
            }
            for file in files {
                println!("{}", file.display());
            }
            ExitCode::SUCCESS
        }
        Commands::Setup { model_dir } => {
            setup::run(model_dir.as_deref().unwrap_or(cfg.model_dir.as_path()))?;
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}
