use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rollcall_core::MAX_PHOTO_SLOTS;
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod client;
mod models;

use client::DaemonClient;

#[derive(Parser)]
#[command(name = "rollcall", about = "Classroom attendance by face recognition")]
struct Cli {
    /// Base URL of the rollcalld HTTP API
    #[arg(long, global = true, env = "ROLLCALL_SERVER", default_value = "http://127.0.0.1:5000")]
    server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Check a portrait for a well-framed face
    Detect {
        image: PathBuf,
    },
    /// Upload one enrollment photo into a slot
    StorePhoto {
        student: String,
        /// Slot 1-10; re-using a slot replaces the photo
        #[arg(long)]
        slot: u32,
        image: PathBuf,
    },
    /// Upload photos into slots 1..n and build the student's profile
    Enroll {
        student: String,
        /// Up to 10 photos, stored in the order given
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    /// Rebuild a student's profile from their stored photos
    Extract {
        student: String,
        /// Number of photo slots to read
        #[arg(long)]
        count: u32,
    },
    /// Recognize students in a group photo and record attendance
    Recognize {
        image: PathBuf,
        #[arg(long)]
        period: String,
    },
    /// List attendance records
    Attendance {
        #[arg(long)]
        period: Option<String>,
        /// Calendar date, YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
        /// Show the latest activity instead of filtering
        #[arg(long, conflicts_with_all = ["period", "date"])]
        recent: bool,
    },
    /// Show the number of registered students
    Students,
    /// Download the detector and embedder models
    FetchModels {
        #[arg(long)]
        detector_url: String,
        #[arg(long)]
        embedder_url: String,
        /// Target directory
        #[arg(long, env = "ROLLCALL_MODEL_DIR")]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(EnvFilter::try_from_default_env().ok()))
        .init();

    let cli = Cli::parse();

    if let Commands::FetchModels {
        detector_url,
        embedder_url,
        dir,
    } = &cli.command
    {
        let dir = dir.clone().unwrap_or_else(rollcall_core::default_model_dir);
        let http = reqwest::Client::new();
        for (url, file) in [
            (detector_url, models::DETECTOR_FILE),
            (embedder_url, models::EMBEDDER_FILE),
        ] {
            match models::fetch(&http, url, &dir, file).await? {
                models::Fetched::Downloaded { bytes } => {
                    println!("{file}: downloaded {bytes} bytes")
                }
                models::Fetched::AlreadyPresent => println!("{file}: already present"),
            }
        }
        println!("models in {}", dir.display());
        return Ok(());
    }

    let client = DaemonClient::new(&cli.server)?;
    let response = match cli.command {
        Commands::Status => client.health().await?,
        Commands::Detect { image } => client.detect_face(&image).await?,
        Commands::StorePhoto {
            student,
            slot,
            image,
        } => client.store_photo(&student, slot, &image).await?,
        Commands::Enroll { student, photos } => {
            if photos.len() > MAX_PHOTO_SLOTS as usize {
                bail!("at most {MAX_PHOTO_SLOTS} photos per student");
            }
            for (slot, photo) in (1..).zip(&photos) {
                client.store_photo(&student, slot, photo).await?;
                if !cli.json {
                    println!("stored {} as slot {slot}", photo.display());
                }
            }
            client
                .extract_features(&student, photos.len() as u32)
                .await?
        }
        Commands::Extract { student, count } => client.extract_features(&student, count).await?,
        Commands::Recognize { image, period } => client.recognize_faces(&image, &period).await?,
        Commands::Attendance {
            period,
            date,
            recent,
        } => {
            if recent {
                client.recent_attendance().await?
            } else {
                client.attendance(period.as_deref(), date.as_deref()).await?
            }
        }
        Commands::Students => client.student_count().await?,
        Commands::FetchModels { .. } => return Ok(()),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_summary(&response);
    }
    Ok(())
}

/// `RUST_LOG` when set, otherwise `info`.
fn log_filter(from_env: Option<EnvFilter>) -> EnvFilter {
    from_env.unwrap_or_else(|| EnvFilter::new("info"))
}

/// Human-readable rendering of whichever response shape came back.
fn print_summary(response: &Value) {
    if let Some(loaded) = response["modelsLoaded"].as_bool() {
        println!("rollcalld: {}", response["status"].as_str().unwrap_or("unknown"));
        println!("models:    {}", if loaded { "loaded" } else { "unavailable" });
    } else if let Some(detected) = response["faceDetected"].as_bool() {
        println!("faces: {}", response["faceCount"]);
        if detected {
            let b = &response["boundingBox"];
            println!(
                "primary face at x={:.1}% y={:.1}% w={:.1}% h={:.1}%",
                b["x"].as_f64().unwrap_or_default(),
                b["y"].as_f64().unwrap_or_default(),
                b["width"].as_f64().unwrap_or_default(),
                b["height"].as_f64().unwrap_or_default(),
            );
            if response["outOfRange"].as_bool() == Some(true) {
                println!("face is too close to the edge; re-frame and retake");
            }
        }
    } else if let Some(path) = response["filePath"].as_str() {
        println!("stored {path}");
    } else if response.get("validPhotos").is_some() {
        println!(
            "{} ({} of {} photos usable, {} features)",
            response["message"].as_str().unwrap_or("enrolled"),
            response["validPhotos"],
            response["totalPhotos"],
            response["featuresCount"],
        );
    } else if let Some(students) = response["recognizedStudents"].as_array() {
        if let Some(message) = response["message"].as_str() {
            println!("{message}");
        }
        println!(
            "period {}: {} faces, {} recognized, {} recorded",
            response["period"].as_str().unwrap_or_default(),
            response["facesDetected"],
            students.len(),
            response["attendanceCount"],
        );
        for s in students {
            println!(
                "  {:<24} {:>5.1}%",
                s["name"].as_str().unwrap_or_default(),
                s["confidence"].as_f64().unwrap_or_default() * 100.0
            );
        }
    } else if let Some(records) = response["records"].as_array() {
        if records.is_empty() {
            println!("no attendance records");
        }
        for r in records {
            println!(
                "{}  {:<8} {:<24} {:>5.1}%",
                r["recordedAt"].as_str().unwrap_or_default(),
                r["period"].as_str().unwrap_or_default(),
                r["studentName"].as_str().unwrap_or_default(),
                r["confidence"].as_f64().unwrap_or_default() * 100.0
            );
        }
    } else if let Some(count) = response["count"].as_u64() {
        println!("{count} registered students");
    } else {
        println!("{response}");
    }
}
