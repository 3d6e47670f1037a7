use bytesize::ByteSize;
use clap::Parser;
use libwriteslots::MAX_SLOTS;
use libwriteslots::MIN_SLOTS;
use serde::Deserialize;
use std::env::var;
use std::env::var_os;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// We cannot simply rely on default value if omitted, as we need to differentiate between a set (but empty/default) value and an omitted value to know if they override/are overriden by defaults, env vars, CLI, etc.
#[derive(Parser, Debug, Deserialize)]
#[command(author, version, about)]
struct Cli {
  /// Path to the config file.
  #[arg(long)]
  config: Option<PathBuf>,

  /// Number of write slots in the pool. Defaults to 1024.
  #[arg(long)]
  slots: Option<usize>,

  /// Total writes to perform. Defaults to 100000.
  #[arg(long)]
  writes: Option<u64>,

  /// Maximum size of a single write, e.g. "4 KiB". Defaults to 4 KiB.
  #[arg(long)]
  max_write_size: Option<ByteSize>,

  /// Concurrency level. Defaults to 64.
  #[arg(long)]
  concurrency: Option<u64>,

  /// How long the sync loop waits for further position changes before syncing, in microseconds. Defaults to 200.
  #[arg(long)]
  sync_delay_us: Option<u64>,

  /// Emit logs as JSON lines.
  #[arg(long)]
  log_json: Option<bool>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CfgFile {
  slots: Option<usize>,
  writes: Option<u64>,
  max_write_size: Option<ByteSize>,
  concurrency: Option<u64>,
  sync_delay_us: Option<u64>,
  log_json: Option<bool>,
}

#[derive(Debug)]
pub(crate) struct Cfg {
  pub slots: usize,
  pub writes: u64,
  pub max_write_size: u64,
  pub concurrency: u64,
  pub sync_delay: Duration,
  pub log_json: bool,
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
  let raw = var(name).ok()?;
  let Ok(parsed) = raw.parse::<T>() else {
    panic!("invalid {name}");
  };
  Some(parsed)
}

fn env_path(name: &str) -> Option<PathBuf> {
  let raw = var_os(name)?;
  Some(PathBuf::from(raw))
}

fn merge(cli: Cli, f: CfgFile) -> Cfg {
  let slots = cli
    .slots
    .or(env_parsed("WRITESLOTS_SLOTS"))
    .or(f.slots)
    .unwrap_or(1024);
  if !(MIN_SLOTS..=MAX_SLOTS).contains(&slots) {
    panic!("invalid value for slots, must be between {MIN_SLOTS} and {MAX_SLOTS}");
  };

  let concurrency = cli
    .concurrency
    .or(env_parsed("WRITESLOTS_CONCURRENCY"))
    .or(f.concurrency)
    .unwrap_or(64);
  if concurrency == 0 {
    panic!("invalid value for concurrency, must be at least 1");
  };

  Cfg {
    slots,

    writes: cli
      .writes
      .or(env_parsed("WRITESLOTS_WRITES"))
      .or(f.writes)
      .unwrap_or(100_000),

    max_write_size: cli
      .max_write_size
      .or(env_parsed("WRITESLOTS_MAX_WRITE_SIZE"))
      .or(f.max_write_size)
      .unwrap_or(ByteSize::kib(4))
      .as_u64(),

    concurrency,

    sync_delay: Duration::from_micros(
      cli
        .sync_delay_us
        .or(env_parsed("WRITESLOTS_SYNC_DELAY_US"))
        .or(f.sync_delay_us)
        .unwrap_or(200),
    ),

    log_json: cli
      .log_json
      .or(env_parsed("WRITESLOTS_LOG_JSON"))
      .or(f.log_json)
      .unwrap_or(false),
  }
}

// Precedence:
// - Lowest: config file.
// - Then: env vars.
// - Highest: CLI args.
pub(crate) fn load_cfg() -> Cfg {
  let cli = Cli::parse();

  let f = cli
    .config
    .clone()
    .or_else(|| env_path("WRITESLOTS_CONFIG"))
    .map(|cfg_path| {
      // Logging isn't set up yet, as the config decides its format.
      let cfg = std::fs::read_to_string(&cfg_path).expect("failed to read config file");
      let cfg: CfgFile = toml::from_str(&cfg).expect("failed to parse config file");
      cfg
    })
    .unwrap_or_default();

  merge(cli, f)
}
