//! mallard demo - walks through the driver surface against an embedded database.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use mallard_core::{
    date_to_value, Connector, ConnectorConfig, DriverError, Row, Session, Value,
};
use tracing::info;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mallard-demo")]
#[command(about = "Walk through sessions, transactions, prepared statements and progress polling", long_about = None)]
struct Args {
    /// Database file; in-memory when omitted
    #[arg(short, long)]
    database: Option<String>,

    /// Configuration file (TOML or JSON), layered under MALLARD_* variables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log format: compact or json
    #[arg(long)]
    log_format: Option<String>,

    /// Extensions to install and load, e.g. httpfs
    #[arg(short, long)]
    extension: Vec<String>,

    /// Remote parquet file scanned by the long-running query (needs httpfs)
    #[arg(long)]
    remote_parquet: Option<String>,

    /// Rows generated by the long-running query when no parquet file is given
    #[arg(long, default_value_t = 200_000_000)]
    long_query_rows: u64,
}

struct User {
    name: String,
    age: i32,
    height: f32,
    awesome: bool,
    bday: NaiveDate,
}

impl User {
    fn from_row(row: &Row) -> Result<Self, DriverError> {
        let (name, age, height, awesome, bday): (String, i32, f32, bool, NaiveDate) =
            row.decode()?;
        Ok(Self {
            name,
            age,
            height,
            awesome,
            bday,
        })
    }

    fn log(&self) {
        info!(
            "{} is {} years old, {:.2} tall, bday on {} and has awesomeness: {}",
            self.name,
            self.age,
            self.height,
            self.bday.format("%Y-%m-%dT00:00:00Z"),
            self.awesome
        );
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = build_config(&args)?;
    init_tracing(&config);
    info!("connector config:\n{:?}", config);

    let connector = Connector::open(config).context("failed to open database")?;
    let session = connector.new_session().context("failed to open session")?;

    session.ping()?;
    let access_mode = session.current_setting("access_mode")?;
    info!("DB opened with access mode {}", display_value(&access_mode));

    seed_users(&session)?;
    query_users(&session)?;

    let deleted = session.execute("DELETE FROM users", &[])?;
    info!("Deleted {deleted} rows");

    run_transaction(&session)?;
    prepared_statements(&session)?;
    session.close();

    progress_check(&connector, &args)?;

    let resources = connector.resources();
    info!(?resources, "walkthrough finished");
    Ok(())
}

fn build_config(args: &Args) -> Result<ConnectorConfig> {
    let mut config =
        ConnectorConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(database) = &args.database {
        config.path = database.clone();
    }
    if let Some(log_format) = &args.log_format {
        config.log_format = log_format.clone();
    }
    for extension in &args.extension {
        config = config.with_extension(extension.clone());
    }
    config = config
        .with_init_sql("PRAGMA enable_progress_bar")
        .with_init_sql("PRAGMA disable_print_progress_bar");
    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &ConnectorConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mallard_core=debug"));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .init();
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .init();
    }
}

fn seed_users(session: &Session) -> Result<()> {
    session.execute(
        "CREATE TABLE users(name VARCHAR, age INTEGER, height FLOAT, awesome BOOLEAN, bday DATE)",
        &[],
    )?;
    session.execute(
        "INSERT INTO users VALUES('marc', 99, 1.91, true, '1970-01-01')",
        &[],
    )?;
    session.execute(
        "INSERT INTO users VALUES('macgyver', 70, 1.85, true, '1951-01-23')",
        &[],
    )?;
    Ok(())
}

fn query_users(session: &Session) -> Result<()> {
    let cursor = session.query(
        "SELECT name, age, height, awesome, bday
         FROM users
         WHERE (name = ? OR name = ?) AND age > ? AND awesome = ?",
        &[
            Value::Text("macgyver".to_string()),
            Value::Text("marc".to_string()),
            Value::Int(30),
            Value::Boolean(true),
        ],
    )?;
    for row in cursor {
        User::from_row(&row?)?.log();
    }
    Ok(())
}

fn run_transaction(session: &Session) -> Result<()> {
    const COUNT_GRU: &str = "SELECT COUNT(*) FROM users WHERE name = ?";
    let gru = [Value::Text("gru".to_string())];

    info!("Starting transaction...");
    session.begin_transaction()?;
    session.execute(
        "INSERT INTO users VALUES('gru', 25, 1.35, false, '1996-04-03')",
        &[],
    )?;
    if session.query_row(COUNT_GRU, &gru)?.get::<i64>(0)? > 0 {
        info!("User Gru was inserted");
    }

    info!("Rolling back transaction...");
    session.rollback()?;

    if session.query_row(COUNT_GRU, &gru)?.get::<i64>(0)? > 0 {
        info!("Found user Gru");
    } else {
        info!("Couldn't find user Gru");
    }
    Ok(())
}

fn prepared_statements(session: &Session) -> Result<()> {
    let insert = session.prepare("INSERT INTO users VALUES(?, ?, ?, ?, ?)")?;
    for (name, age, height, bday) in [
        ("Kevin", 11, 0.55, "2013-07-06"),
        ("Bob", 12, 0.73, "2012-11-04"),
        ("Stuart", 13, 0.66, "2014-02-12"),
    ] {
        let bday = NaiveDate::parse_from_str(bday, "%Y-%m-%d")
            .with_context(|| format!("invalid birthday for {name}"))?;
        insert.execute(&[
            Value::Text(name.to_string()),
            Value::Int(age),
            Value::Float(height),
            Value::Boolean(true),
            date_to_value(bday),
        ])?;
    }
    drop(insert);

    let select = session.prepare("SELECT * FROM users WHERE age > ?")?;
    for row in select.bind_and_execute(&[Value::Int(1)])? {
        User::from_row(&row?)?.log();
    }
    Ok(())
}

/// Run a long query on a worker thread and print progress until it finishes.
fn progress_check(connector: &Connector, args: &Args) -> Result<()> {
    let sql = match &args.remote_parquet {
        Some(url) => format!("SELECT COUNT(*) FROM read_parquet('{}')", url.replace('\'', "''")),
        None => format!(
            "SELECT COUNT(*) FROM range({}) t WHERE t.range % 7 = 0",
            args.long_query_rows
        ),
    };

    let worker = {
        let connector = connector.clone();
        thread::spawn(move || -> Result<i64> {
            let session = connector.new_session()?;
            let count = session.query_row(&sql, &[])?.get::<i64>(0)?;
            Ok(count)
        })
    };

    while !worker.is_finished() {
        println!("{}", connector.progress());
        thread::sleep(Duration::from_millis(1));
    }

    let count = worker
        .join()
        .map_err(|_| anyhow!("long-running query thread panicked"))??;
    info!(count, "long-running query finished");
    Ok(())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Text(text) => text.clone(),
        other => format!("{other:?}"),
    }
}
