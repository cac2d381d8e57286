//! People import application.
//!
//! Imports the configured file into the `people` table once at startup, then
//! on a cron schedule until interrupted. The health of the last run is logged
//! as JSON and, when configured, written to a file for external probes.

use std::{path::PathBuf, str::FromStr, sync::Arc};

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use batch_import::{
    config::ImportConfig,
    core::{
        health::JobHealthIndicator,
        job::{BatchStatus, JobExecution, JobResult},
        launcher::JobLauncher,
        repository::SqliteJobRepository,
        scheduler::{JobScheduler, Trigger},
    },
    people::{
        JobCompletionNotificationListener, build_import_job, create_people_table, date_parameters,
    },
};

#[derive(Parser, Debug)]
#[command(name = "people-import")]
#[command(version)]
#[command(about = "Imports people from a delimited file into SQLite, at startup and on a schedule", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run the import once and exit
    #[arg(long, action)]
    once: bool,
}

struct App {
    config: ImportConfig,
    pool: Pool<Sqlite>,
    launcher: JobLauncher,
    health: JobHealthIndicator,
    notification: JobCompletionNotificationListener,
}

impl App {
    /// Runs the import for the current date. Called from the blocking pool.
    fn run_import(&self) -> JobResult<JobExecution> {
        let job = build_import_job(&self.config, &self.pool)
            .listener(&self.notification)
            .listener(&self.health);

        let result = self.launcher.run(&job, date_parameters());
        self.publish_health();
        result
    }

    fn publish_health(&self) {
        let json = match self.health.health().to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Unable to serialize health: {}", e);
                return;
            }
        };

        info!("Health of {}: {}", self.config.job_name, json);

        if let Some(path) = &self.config.health_file {
            if let Err(e) = std::fs::write(path, &json) {
                warn!("Unable to write health to {}: {}", path.display(), e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ImportConfig::from_file(path)?,
        None => ImportConfig::default(),
    };
    config.validate()?;

    let options = SqliteConnectOptions::from_str(&config.database_url)
        .with_context(|| format!("invalid database url {}", config.database_url))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .with_context(|| format!("unable to connect to {}", config.database_url))?;

    create_people_table(&pool).await?;
    let repository = SqliteJobRepository::new(pool.clone());
    repository.initialize().await?;

    let app = Arc::new(App {
        launcher: JobLauncher::new(Arc::new(repository)),
        health: JobHealthIndicator::new(),
        notification: JobCompletionNotificationListener::new(pool.clone()),
        pool: pool.clone(),
        config,
    });

    if app.config.run_on_startup || cli.once {
        let startup = Arc::clone(&app);
        match tokio::task::spawn_blocking(move || startup.run_import()).await? {
            Ok(execution) => info!("batchStatus: {}", execution.status),
            Err(e) => error!("Startup run of {} rejected: {}", app.config.job_name, e),
        }
    }

    if cli.once {
        pool.close().await;
        let status = app.health.batch_status();
        if status != BatchStatus::Completed {
            anyhow::bail!("import ended with status {}", status);
        }
        return Ok(());
    }

    let trigger = Trigger::cron(&app.config.cron)?;
    let scheduled = Arc::clone(&app);
    let handle = JobScheduler::new(&app.config.job_name, trigger).start(move || scheduled.run_import());

    tokio::signal::ctrl_c()
        .await
        .context("unable to listen for shutdown signal")?;
    info!("Shutdown requested");

    handle.shutdown().await;
    pool.close().await;

    Ok(())
}
