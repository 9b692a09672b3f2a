// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! flagkeeper command line: manage stored feature flags.
//!
//! Results are printed to stdout as JSON, logs go to stderr.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flagkeeper_server_config::{load_config, FlagkeeperConfig, LogFormat};
use flagkeeper_server_flags::{run_migrations, Flag, FlagService, SqliteFlagStorage};

#[derive(Parser, Debug)]
#[command(name = "flagkeeper", version, about, long_about = None)]
struct Args {
	/// Path to a TOML configuration file (default: ./flagkeeper.toml)
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Database URL (overrides config)
	#[arg(long)]
	database_url: Option<String>,

	/// Log level or filter directive (overrides config)
	#[arg(short, long)]
	log_level: Option<String>,

	/// Output logs as JSON (overrides config)
	#[arg(long)]
	json_logs: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Create or upgrade the database schema
	Migrate,
	/// Check that the database is reachable
	Ping,
	/// List all flags, most recently updated first
	List,
	/// Show one flag by id
	Get {
		id: String,
	},
	/// Show one flag by name
	GetByName {
		name: String,
	},
	/// Create a flag from a JSON file
	Create {
		file: PathBuf,
		/// Recorded as the flag's last modifier
		#[arg(long, default_value = "flagkeeper-cli")]
		modified_by: String,
	},
	/// Replace a flag with the contents of a JSON file
	Update {
		id: String,
		file: PathBuf,
		#[arg(long, default_value = "flagkeeper-cli")]
		modified_by: String,
	},
	/// Enable a flag
	Enable {
		id: String,
		#[arg(long, default_value = "flagkeeper-cli")]
		modified_by: String,
	},
	/// Disable a flag
	Disable {
		id: String,
		#[arg(long, default_value = "flagkeeper-cli")]
		modified_by: String,
	},
	/// Delete a flag and its rules
	Delete {
		id: String,
	},
}

#[derive(Debug, Serialize)]
struct Status<'a> {
	status: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	id: Option<&'a str>,
}

fn resolve_config(args: &Args) -> Result<FlagkeeperConfig> {
	let mut config = load_config(args.config.clone()).context("failed to load configuration")?;
	if let Some(url) = &args.database_url {
		config.database.url = url.clone();
	}
	if let Some(level) = &args.log_level {
		config.logging.level = level.clone();
	}
	if args.json_logs {
		config.logging.format = LogFormat::Json;
	}
	Ok(config)
}

fn init_tracing(config: &FlagkeeperConfig) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

	match config.logging.format {
		LogFormat::Json => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().json().with_writer(std::io::stderr))
				.init();
		}
		LogFormat::Pretty => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().with_writer(std::io::stderr))
				.init();
		}
	}
}

fn read_flag(path: &Path) -> Result<Flag> {
	let content = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read {}", path.display()))?;
	serde_json::from_str(&content).with_context(|| format!("{} is not a valid flag", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

async fn run(command: Command, service: &FlagService<SqliteFlagStorage>) -> Result<()> {
	match command {
		Command::Migrate => {
			run_migrations(service.storage().pool()).await?;
			print_json(&Status {
				status: "migrated",
				id: None,
			})
		}
		Command::Ping => {
			service.health().await?;
			print_json(&Status {
				status: "ok",
				id: None,
			})
		}
		Command::List => print_json(&service.list_flags().await?),
		Command::Get { id } => print_json(&service.get_flag(&id).await?),
		Command::GetByName { name } => print_json(&service.get_flag_by_name(&name).await?),
		Command::Create { file, modified_by } => {
			let flag = read_flag(&file)?;
			print_json(&service.create_flag(flag, &modified_by).await?)
		}
		Command::Update {
			id,
			file,
			modified_by,
		} => {
			let flag = read_flag(&file)?;
			print_json(&service.update_flag(&id, flag, &modified_by).await?)
		}
		Command::Enable { id, modified_by } => {
			print_json(&service.set_flag_status(&id, false, &modified_by).await?)
		}
		Command::Disable { id, modified_by } => {
			print_json(&service.set_flag_status(&id, true, &modified_by).await?)
		}
		Command::Delete { id } => {
			service.delete_flag(&id).await?;
			print_json(&Status {
				status: "deleted",
				id: Some(&id),
			})
		}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	let config = resolve_config(&args)?;
	init_tracing(&config);

	info!(
		mode = %config.mode,
		database = %config.database.url,
		"starting flagkeeper"
	);

	let storage = SqliteFlagStorage::connect(&config.database.url, config.database.max_connections)
		.await
		.context("failed to open database")?;
	if config.database.run_migrations && !matches!(args.command, Command::Migrate) {
		run_migrations(storage.pool()).await?;
	}

	let service = FlagService::new(storage);
	let outcome = run(args.command, &service).await;
	service.storage().close().await;
	outcome
}
