use clap::Parser;
use memconnect::config::{Config, ConnectionConfig};
use memconnect::core::{ClientOption, OptionMap, OptionValue, ServerEntry, ServerSpec};
use tracing::{error, info};
use tracing_appender::non_blocking;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "memconnect")]
#[command(about = "Build and inspect memcached connections from DSNs")]
struct Args {
    /// Path to a YAML file with named connections
    #[arg(short, long)]
    config: Option<String>,

    /// Connection to use from the config file (defaults to the only one)
    #[arg(long)]
    connection: Option<String>,

    /// Server DSN, e.g. memcached://localhost:11211 (repeatable)
    #[arg(short, long)]
    dsn: Vec<String>,

    /// Client option as key=value (repeatable)
    #[arg(short = 'o', long = "option", value_parser = parse_option)]
    options: Vec<(String, OptionValue)>,

    /// Connect to every server and ask for its version
    #[arg(long)]
    probe: bool,
}

fn parse_option(raw: &str) -> Result<(String, OptionValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    // Option translation coerces strings per option kind
    Ok((key.trim().to_string(), OptionValue::Str(value.to_string())))
}

fn init_logging() {
    let (non_blocking_writer, guard) = non_blocking(std::io::stderr());
    // Keep guard alive for the program lifetime to avoid log loss
    let _ = LOG_GUARD.set(guard);

    let fmt = tracing_subscriber::fmt()
        .with_writer(non_blocking_writer)
        .with_ansi(true)
        .with_target(false)
        .with_level(true)
        .compact();

    let level = match std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "warn".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::WARN,
    };

    let _ = fmt.with_max_level(level).try_init();
}

/// Merge the config file entry (if any) with command line servers and options
async fn resolve_connection(args: &Args) -> Result<ConnectionConfig, Box<dyn std::error::Error>> {
    let mut connection = match &args.config {
        Some(path) => {
            let config = Config::from_yaml_file(path).await?;
            match &args.connection {
                Some(name) => config.connection(name)?.clone(),
                None if config.connections.len() == 1 => {
                    config.connections.into_values().next().ok_or("empty config")?
                }
                None => return Err("config has several connections, pick one with --connection".into()),
            }
        }
        None => ConnectionConfig {
            servers: ServerSpec::default(),
            options: OptionMap::new(),
        },
    };

    if !args.dsn.is_empty() {
        let mut entries = connection.servers.entries().to_vec();
        entries.extend(args.dsn.iter().cloned().map(ServerEntry::Dsn));
        connection.servers = ServerSpec::List(entries);
    }
    connection.options.extend(args.options.iter().cloned());

    Ok(connection)
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let connection = resolve_connection(&args).await?;
    let client = connection.connect()?;

    println!("servers:");
    for server in client.server_list() {
        println!("  {} (port {}, weight {})", server.host, server.port, server.weight);
    }
    println!("options:");
    for option in ClientOption::all() {
        println!("  {} = {}", option, client.option(option));
    }
    if let Some(credentials) = client.credentials() {
        println!("sasl user: {}", credentials.username);
    }

    if args.probe {
        let mut failures = 0;
        for outcome in client.probe().await {
            match &outcome.result {
                Ok(version) => println!("{}: up, version {}", outcome.server, version),
                Err(e) => {
                    failures += 1;
                    println!("{}: down, {}", outcome.server, e);
                }
            }
        }
        if failures > 0 {
            return Err(format!("{} server(s) failed the probe", failures).into());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_logging();
    let args = Args::parse();

    if !memconnect::is_supported() {
        error!("Bundled memcached client is not supported in this build");
        std::process::exit(2);
    }

    info!("memconnect starting");
    if let Err(e) = run(args).await {
        error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
