mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use lightspeed_looks::config::{ensure_parent_dir, user_config_path, AppConfig};
use lightspeed_looks::model::{sparse_to_dense, FixtureId, LookId};
use lightspeed_looks::{EditSession, LookDatabase, SacnPreviewEngine};
use log::info;
use std::fs;
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn open_database(config: &AppConfig) -> Result<LookDatabase> {
    let db_path = config.database_path();
    ensure_parent_dir(&db_path).context("Failed to create data directory")?;
    LookDatabase::open(&db_path)
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(user_config_path);
    let config = AppConfig::load(&config_path)?;
    let mut db = open_database(&config)?;

    match cli.command {
        Commands::List => {
            for look in db.list_looks()? {
                println!("{:>5}  {:<30} {} fixtures", look.id, look.name, look.fixture_count);
            }
        }
        Commands::Show { look } => {
            let snapshot = db.load_look(look)?;
            for fixture in &snapshot.fixtures {
                let dense = sparse_to_dense(fixture.channel_count, &fixture.channels);
                let stored: Vec<String> = fixture
                    .channels
                    .iter()
                    .map(|e| format!("{}={}", e.offset, e.value))
                    .collect();
                println!("{} ({} ch) {:?}  stored: [{}]", fixture.fixture_id, fixture.channel_count, dense, stored.join(", "));
            }
        }
        Commands::Set { look, fixture, channel, value } => {
            let fixture_id = FixtureId(fixture);
            let mut session = EditSession::new(look, config.project_id, &config.session);
            session.load(&mut db)?;
            let stored = session.set_channel_value(fixture_id, channel, value)?;
            session.save(&mut db)?;
            session.close();
            println!("{} channel {} = {}", fixture_id, channel, stored);
        }
        Commands::Export { file } => {
            let json = db.export_to_json()?;
            fs::write(&file, json).with_context(|| format!("Failed to write export file {:?}", file))?;
            info!("[DB] Exported to {:?}", file);
        }
        Commands::Import { file, merge } => {
            let json = fs::read_to_string(&file).with_context(|| format!("Failed to read import file {:?}", file))?;
            db.import_from_json(&json, merge)?;
        }
        Commands::Preview { look, seconds } => {
            preview(&mut db, &config, look, Duration::from_secs(seconds))?;
        }
    }
    Ok(())
}

fn preview(db: &mut LookDatabase, config: &AppConfig, look_id: LookId, hold: Duration) -> Result<()> {
    let patch = db.load_patch()?;
    let mut session = EditSession::new(look_id, config.project_id, &config.session);
    session.load(db)?;
    session.attach_preview(Box::new(SacnPreviewEngine::new(&patch, config.network.clone())));

    let id = session.start_preview()?;
    if let Some(e) = session.take_preview_error() {
        log::warn!("[PREVIEW] Seeding preview failed: {}", e);
    }
    println!("Previewing look {} (session {}) for {}s", look_id, id, hold.as_secs());

    let until = Instant::now() + hold;
    while Instant::now() < until {
        session.tick();
        std::thread::sleep(Duration::from_millis(20));
    }
    session.stop_preview();
    session.close();
    Ok(())
}
