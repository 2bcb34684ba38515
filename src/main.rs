use async_trait::async_trait;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use std::{fs, path};

use docsync::conflict::{
	ConflictPipeline, ConflictStep, DeferMerger, ManualMerger, ManualRequest, Resolution,
};
use docsync::logging::{init_tracing, LogFormat};
use docsync::types::{ProcessedKey, Side};
use docsync::utils::shutdown_signal;
use docsync::{
	Config, Direction, Engine, EngineBuilder, LocalStorage, MemoryStore, RedbStateCache, ScanReport,
	SyncError,
};

///////////////////////
// Utility functions //
///////////////////////

fn load_config(matches: &ArgMatches) -> Result<Config, Box<dyn Error>> {
	let file = matches.get_one::<String>("config").map(path::PathBuf::from);
	let mut config = Config::load(file.as_deref())?;
	if let Some(profile) = matches.get_one::<String>("profile") {
		config.profile = profile.clone();
	}
	if let Some(dir) = matches.get_one::<String>("state-dir") {
		config.state_dir = path::PathBuf::from(dir);
	}
	if matches.get_flag("verbose") {
		config.log_level = "debug".to_string();
	}
	if let Some(format) = matches.get_one::<String>("log-format") {
		config.log_format = format.parse::<LogFormat>()?;
	}
	config.validate()?;
	Ok(config)
}

fn init_profile_dir(config: &Config) -> Result<path::PathBuf, Box<dyn Error>> {
	let dir = config.profile_dir();
	match fs::metadata(&dir) {
		Ok(meta) if meta.is_dir() => Ok(dir),
		Ok(_) => Err(format!("{} exists, but it is not a directory!", dir.display()).into()),
		Err(_) => {
			fs::create_dir_all(&dir).map_err(|err| format!("Cannot create directory: {}", err))?;
			Ok(dir)
		}
	}
}

/// Engine over `dir` plus the store it was built on, for saving afterwards
fn open_engine(config: &Config, dir: &str) -> Result<(Engine, Arc<MemoryStore>), Box<dyn Error>> {
	init_profile_dir(config)?;
	let cache = RedbStateCache::open(&config.cache_path())?;
	let store = Arc::new(MemoryStore::load(&config.store_path())?);
	let engine = EngineBuilder::new(Arc::new(LocalStorage::new(dir)), store.clone(), Arc::new(cache))
		.config(config.clone())
		.build()?;
	Ok((engine, store))
}

fn print_report(direction: Direction, report: &ScanReport) {
	println!(
		"{}: {} pushed, {} pulled, {} deleted in store, {} deleted locally, {} unchanged",
		direction,
		report.pushed,
		report.pulled,
		report.deleted_in_store,
		report.deleted_in_storage,
		report.skipped
	);
	if report.conflicted > 0 || report.refused > 0 {
		println!("{} conflicted, {} refused", report.conflicted, report.refused);
	}
	for (path, message) in &report.errors {
		eprintln!("  {}: {}", path, message);
	}
}

fn describe(key: &ProcessedKey) -> String {
	match key {
		ProcessedKey::Storage(key) => format!("{:?}", key),
		ProcessedKey::Store(key) => format!(
			"rev {} mtime {} size {}{}",
			key.rev,
			key.mtime,
			key.size,
			if key.deleted { " (deleted)" } else { "" }
		),
	}
}

/// Asks on the terminal which revision of a conflicted file to keep
struct PromptMerger;

#[async_trait]
impl ManualMerger for PromptMerger {
	async fn merge(&self, request: ManualRequest) -> Result<Resolution, SyncError> {
		tokio::task::spawn_blocking(move || prompt(&request))
			.await
			.map_err(|e| SyncError::Other { message: format!("Prompt task failed: {}", e) })?
	}
}

fn prompt(request: &ManualRequest) -> Result<Resolution, SyncError> {
	let mut stdout = io::stdout();
	writeln!(stdout, "Conflict on {}", request.path)?;
	for (n, doc) in [(1, &request.current), (2, &request.competitor)] {
		writeln!(
			stdout,
			"  [{}] {} ({} bytes, mtime {})",
			n,
			doc.rev.as_deref().unwrap_or("?"),
			doc.size(),
			doc.mtime
		)?;
	}
	loop {
		write!(stdout, "Keep [1], [2] or [s]kip? ")?;
		stdout.flush()?;
		let mut line = String::new();
		if io::stdin().lock().read_line(&mut line)? == 0 {
			return Ok(Resolution::Cancelled);
		}
		match line.trim() {
			"1" => return Ok(Resolution::Keep(request.current_rev().to_string())),
			"2" => return Ok(Resolution::Keep(request.competitor_rev().to_string())),
			"s" | "S" => return Ok(Resolution::Cancelled),
			_ => continue,
		}
	}
}

//////////////
// Commands //
//////////////

async fn run_scan(config: &Config, dir: &str, direction: Direction) -> Result<(), Box<dyn Error>> {
	let (engine, store) = open_engine(config, dir)?;
	let engine = Arc::new(engine);
	let pipeline = ConflictPipeline::start(engine.clone(), Arc::new(DeferMerger))?;

	let report = engine.scan(direction).await?;
	engine.wait_conflicts_idle().await;
	pipeline.shutdown();

	store.save(&config.store_path())?;
	print_report(direction, &report);
	Ok(())
}

async fn watch(config: &Config, dir: &str) -> Result<(), Box<dyn Error>> {
	let (engine, store) = open_engine(config, dir)?;
	let engine = Arc::new(engine);
	let pipeline = ConflictPipeline::start(engine.clone(), Arc::new(DeferMerger))?;
	let mut ticker = tokio::time::interval(Duration::from_secs(config.scan_interval_secs.max(1)));

	let shutdown = shutdown_signal();
	tokio::pin!(shutdown);
	loop {
		tokio::select! {
			_ = &mut shutdown => {
				eprintln!("Shutting down...");
				break;
			}
			_ = ticker.tick() => {
				match engine.scan(Direction::Safe).await {
					Ok(report) if report.transfers() > 0 => print_report(Direction::Safe, &report),
					Ok(_) => {}
					Err(e) => eprintln!("Sweep failed: {}", e),
				}
				store.save(&config.store_path())?;
			}
		}
	}

	pipeline.shutdown();
	store.save(&config.store_path())?;
	Ok(())
}

async fn status(config: &Config) -> Result<(), Box<dyn Error>> {
	let (engine, _store) = open_engine(config, ".")?;
	for side in [Side::Storage, Side::Store] {
		let keys = engine.processed_keys(side)?;
		println!("{} ({} paths)", side, keys.len());
		for (path, key) in keys {
			println!("  {}: {}", path, describe(&key));
		}
	}
	Ok(())
}

async fn resolve(config: &Config, dir: &str, file: &str) -> Result<(), Box<dyn Error>> {
	let (engine, store) = open_engine(config, dir)?;
	let outcome = engine.resolve_conflicts(file, &PromptMerger).await;
	store.save(&config.store_path())?;
	match outcome? {
		ConflictStep::Clear => println!("{}: resolved", file),
		ConflictStep::Stale => println!("{}: no conflict", file),
		ConflictStep::Manual(_) => println!("{}: left unresolved", file),
		ConflictStep::Progress { remaining } => println!("{}: {} revisions left", file, remaining),
	}
	Ok(())
}

fn dir_arg() -> Arg {
	Arg::new("dir").required(true).help("Directory to synchronize")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("docsync")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Keeps a directory and a versioned document store in sync")
		.subcommand_required(true)
		.arg(
			Arg::new("profile")
				.short('p')
				.long("profile")
				.value_name("PROFILE")
				.global(true)
				.help("Profile"),
		)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.global(true)
				.help("TOML config file"),
		)
		.arg(
			Arg::new("state-dir")
				.long("state-dir")
				.value_name("DIR")
				.global(true)
				.help("State directory (default: ~/.docsync)"),
		)
		.arg(
			Arg::new("log-format")
				.long("log-format")
				.value_name("FORMAT")
				.global(true)
				.help("Log format: text or json"),
		)
		.arg(
			Arg::new("verbose")
				.short('v')
				.long("verbose")
				.action(ArgAction::SetTrue)
				.global(true)
				.help("Debug logging"),
		)
		.subcommand(Command::new("push").about("Storage wins: push every file").arg(dir_arg()))
		.subcommand(Command::new("pull").about("Store wins: pull every document").arg(dir_arg()))
		.subcommand(Command::new("safe").about("Newer side wins per file").arg(dir_arg()))
		.subcommand(Command::new("watch").about("Run safe sweeps until interrupted").arg(dir_arg()))
		.subcommand(Command::new("status").about("Show processed keys"))
		.subcommand(Command::new("reset").about("Forget processed keys"))
		.subcommand(
			Command::new("resolve")
				.about("Resolve a conflicted file interactively")
				.arg(dir_arg())
				.arg(Arg::new("path").required(true).help("File path relative to the directory")),
		)
		.get_matches();

	let config = load_config(&matches)?;
	init_tracing(&config.log_level, config.log_format);

	match matches.subcommand() {
		Some((name @ ("push" | "pull" | "safe"), sub_matches)) => {
			let dir = sub_matches.get_one::<String>("dir").ok_or("directory argument required")?;
			run_scan(&config, dir, name.parse::<Direction>()?).await?;
		}
		Some(("watch", sub_matches)) => {
			let dir = sub_matches.get_one::<String>("dir").ok_or("watch: directory argument required")?;
			watch(&config, dir).await?;
		}
		Some(("status", _)) => status(&config).await?,
		Some(("reset", _)) => {
			let (engine, _store) = open_engine(&config, ".")?;
			engine.reset_cache()?;
			println!("Processed keys of profile {} cleared", config.profile);
		}
		Some(("resolve", sub_matches)) => {
			let dir = sub_matches.get_one::<String>("dir").ok_or("resolve: directory argument required")?;
			let file = sub_matches.get_one::<String>("path").ok_or("resolve: path argument required")?;
			resolve(&config, dir, file).await?;
		}
		_ => {}
	}

	Ok(())
}

// vim: ts=4
