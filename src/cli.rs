use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{RasterDecoder, ResourceCache};
use crate::config::ClientConfig;
use crate::model::{CafeId, SeatRecord};
use crate::reconcile::{ReconciliationPlan, SaveOutcome};
use crate::repository::HttpCafeRepository;
use crate::screen::CafeScreen;

/// studycafe - seat and usage sync client for study-cafe management
#[derive(Parser)]
#[command(name = "studycafe")]
#[command(about = "Inspect cafes and save seat layouts against the study-cafe service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Dry run mode (don't make changes)
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load every section of a cafe screen and print it
    Show {
        /// Cafe id
        #[arg(long)]
        cafe: CafeId,
    },

    /// Compute the writes between two seat layouts without contacting the server
    Plan {
        /// JSON file with the server layout
        #[arg(long)]
        server: PathBuf,

        /// JSON file with the edited layout
        #[arg(long)]
        local: PathBuf,
    },

    /// Save an edited seat layout for a cafe
    SaveSeats {
        /// Cafe id
        #[arg(long)]
        cafe: CafeId,

        /// JSON file with the edited layout
        #[arg(long)]
        layout: PathBuf,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        init: bool,
    },
}

/// Command-line interface handler
pub struct CliHandler {
    config: ClientConfig,
    config_path: PathBuf,
}

impl CliHandler {
    /// Load configuration from `config_path` or the default location
    pub async fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(ClientConfig::default_path);
        let config = ClientConfig::load_from_file(&config_path)
            .await
            .with_context(|| format!("loading {}", config_path.display()))?;

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Handle CLI commands
    pub async fn handle_command(&self, command: Commands, dry_run: bool) -> Result<()> {
        match command {
            Commands::Show { cafe } => self.handle_show(cafe).await,
            Commands::Plan { server, local } => self.handle_plan(&server, &local).await,
            Commands::SaveSeats { cafe, layout } => self.handle_save_seats(cafe, &layout, dry_run).await,
            Commands::Config { init } => self.handle_config(init, dry_run).await,
        }
    }

    fn open_screen(&self, cafe: CafeId) -> Result<CafeScreen> {
        let repository = Arc::new(HttpCafeRepository::from_config(&self.config)?);
        let images = ResourceCache::new(
            repository.clone(),
            Arc::new(RasterDecoder::new(self.config.images.max_dimension)),
            &self.config.images,
        )?;

        let (screen, mut messages) = CafeScreen::attach(cafe, repository, images, &self.config.seats);
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                eprintln!("{}", message);
            }
        });
        Ok(screen)
    }

    async fn handle_show(&self, cafe: CafeId) -> Result<()> {
        let screen = self.open_screen(cafe)?;
        screen.refresh().await;
        let state = screen.state();

        match state.cafe_info.data() {
            Some(info) => {
                println!("{} (#{})", info.name, info.id);
                if let Some(address) = &info.address {
                    println!("  {}", address);
                }
                for key in info.image_keys {
                    match state.images().ensure(key.clone()).await {
                        Some(image) => println!("  image {} ({}x{})", key, image.width(), image.height()),
                        None => println!("  image {} (unavailable)", key),
                    }
                }
            }
            None => println!("cafe: {}", error_text(state.cafe_info.error())),
        }

        match state.usage.data() {
            Some(usage) => println!(
                "usage: {}/{} seats occupied ({:.0}%)",
                usage.occupied_seats,
                usage.total_seats,
                usage.occupancy() * 100.0
            ),
            None => println!("usage: {}", error_text(state.usage.error())),
        }

        match state.seats.data() {
            Some(seats) => {
                println!("seats: {}", seats.len());
                for seat in seats {
                    println!(
                        "  [{}] {} at ({}, {})",
                        seat.id, seat.label, seat.position.x, seat.position.y
                    );
                }
            }
            None => println!("seats: {}", error_text(state.seats.error())),
        }

        match state.sessions.data() {
            Some(sessions) => {
                let now = chrono::Utc::now();
                let active = sessions.iter().filter(|s| s.is_active_at(now)).count();
                println!("sessions: {} ({} active)", sessions.len(), active);
            }
            None => println!("sessions: {}", error_text(state.sessions.error())),
        }

        screen.detach();
        Ok(())
    }

    async fn handle_plan(&self, server: &Path, local: &Path) -> Result<()> {
        let server = read_layout(server).await?;
        let local = read_layout(local).await?;

        let plan = ReconciliationPlan::compute(&server, &local);
        println!("{}", serde_json::to_string_pretty(&plan)?);
        Ok(())
    }

    async fn handle_save_seats(&self, cafe: CafeId, layout: &Path, dry_run: bool) -> Result<()> {
        let edited = read_layout(layout).await?;
        let screen = self.open_screen(cafe)?;

        let summary = screen.refresh_seats().await;
        if let Some(message) = summary.failure(crate::screen::SEATS) {
            return Err(anyhow!("Failed to load seats for cafe {}: {}", cafe, message));
        }

        if dry_run {
            let server = screen.state().seats.data().unwrap_or_default();
            let plan = ReconciliationPlan::compute(&server, &edited);
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }

        let outcome = screen.save_seat_config(&edited).await;
        println!("{}", outcome.message());
        match outcome {
            SaveOutcome::UpdateFailed(_) | SaveOutcome::CreateFailed(_) | SaveOutcome::NotLoaded => {
                Err(anyhow!("Seat layout for cafe {} was not saved", cafe))
            }
            _ => Ok(()),
        }
    }

    async fn handle_config(&self, init: bool, dry_run: bool) -> Result<()> {
        if init {
            if dry_run {
                println!("Would write default configuration to {}", self.config_path.display());
            } else {
                ClientConfig::default().save_to_file(&self.config_path).await?;
                println!("Wrote default configuration to {}", self.config_path.display());
            }
            return Ok(());
        }

        println!("# {}", self.config_path.display());
        println!("{}", toml::to_string_pretty(&self.config)?);
        Ok(())
    }
}

async fn read_layout(path: &Path) -> Result<Vec<SeatRecord>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn error_text(error: Option<String>) -> String {
    error.unwrap_or_else(|| "not loaded".to_string())
}
