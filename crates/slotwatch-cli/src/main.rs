use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use slotwatch::client::WidgetClient;
use slotwatch::config::{MonitorConfig, TelegramConfig};
use slotwatch::monitor::{Monitor, alert_reason};
use slotwatch::parser;
use slotwatch::types::WidgetTarget;

#[derive(Parser)]
#[command(name = "slotwatch")]
#[command(about = "Availability monitor for hosted appointment-booking widgets", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, ValueEnum)]
enum Flow {
    /// Current JSONP bookings endpoint
    Api,
    /// Legacy token-POST widget flow
    Widget,
}

/// Which widget to poll. Every flag falls back to the matching `.env`
/// variable, then to the built-in defaults.
#[derive(Debug, Args)]
struct TargetArgs {
    #[arg(long, help = "Booking site base URL")]
    base_url: Option<String>,

    #[arg(long, help = "Widget public key")]
    public_key: Option<String>,

    #[arg(long, help = "Service (agenda) id, e.g. bkt873048")]
    service: Option<String>,

    #[arg(long, help = "Referer header for the session request")]
    referer: Option<String>,
}

impl TargetArgs {
    fn resolve(self) -> WidgetTarget {
        let defaults = WidgetTarget::default();
        WidgetTarget {
            base_url: pick(self.base_url, "BASE_URL", defaults.base_url),
            public_key: pick(self.public_key, "PUBLIC_KEY", defaults.public_key),
            service_id: pick(self.service, "SERVICE_ID", defaults.service_id),
            referer: pick(self.referer, "GET_REFERER", defaults.referer),
        }
    }
}

fn pick(flag: Option<String>, var: &str, default: String) -> String {
    flag.or_else(|| env::var(var).ok()).unwrap_or(default)
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the widget on an interval and alert when availability appears
    Watch {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(
            long,
            help = "Seconds between probe cycles",
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        interval_secs: Option<u64>,

        #[arg(long, value_name = "FILE", help = "Proxy list (host:port:user:pass per line)")]
        proxies: Option<PathBuf>,

        #[arg(long, value_name = "URL", help = "Webhook to POST alert payloads to")]
        webhook: Option<String>,

        #[arg(long, value_name = "TOKEN", help = "Telegram bot token")]
        telegram_token: Option<String>,

        #[arg(
            long,
            value_name = "IDS",
            help = "Comma-separated Telegram chat ids to notify"
        )]
        telegram_chats: Option<String>,

        #[arg(
            long,
            help = "Replace the first probe with a fabricated positive to test the alert channels"
        )]
        simulate: bool,
    },
    /// Probe the widget once and print the availability report
    Check {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(
            long,
            value_enum,
            default_value = "api",
            help = "Which provider flow to probe"
        )]
        flow: Flow,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Establish a session and dump response heads, for debugging the flow
    Session {
        #[command(flatten)]
        target: TargetArgs,
    },
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

fn head(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    match cli.command {
        Commands::Watch {
            target,
            interval_secs,
            proxies,
            webhook,
            telegram_token,
            telegram_chats,
            simulate,
        } => {
            let interval_secs = interval_secs
                .or_else(|| env::var("INTERVAL_SECS").ok().and_then(|v| v.parse().ok()))
                .unwrap_or(60);
            let telegram_token =
                telegram_token.or_else(|| env::var("TELEGRAM_BOT_TOKEN").ok().filter(|v| !v.is_empty()));
            let telegram_chats =
                telegram_chats.or_else(|| env::var("TELEGRAM_CHAT_ID").ok().filter(|v| !v.is_empty()));

            let telegram = telegram_token.map(|bot_token| TelegramConfig {
                bot_token,
                chat_ids: telegram_chats
                    .as_deref()
                    .map(TelegramConfig::parse_chat_ids)
                    .unwrap_or_default(),
            });

            let config = MonitorConfig {
                target: target.resolve(),
                interval: Duration::from_secs(interval_secs),
                proxy_file: proxies.or_else(|| env::var("PROXY_LIST_FILE").ok().map(PathBuf::from)),
                webhook_url: webhook
                    .or_else(|| env::var("ALERT_WEBHOOK_URL").ok().filter(|v| !v.is_empty())),
                telegram,
                simulate,
            };

            let config = config.validate().unwrap_or_else(|e| {
                log::error!("Invalid configuration: {}", e);
                process::exit(1);
            });

            if config.telegram.is_none() {
                log::warn!("Telegram not configured, alerts go to log/webhook only");
            }

            let mut monitor = Monitor::new(config).unwrap_or_else(|e| {
                log::error!("Error starting monitor: {}", e);
                process::exit(1);
            });
            monitor.run().await;
        }

        Commands::Check {
            target,
            flow,
            format,
        } => {
            let target = target.resolve();
            log::info!("Probing {} once...", target.widget_url());

            let client = WidgetClient::new(target, None).unwrap_or_else(|e| {
                log::error!("Error building client: {}", e);
                process::exit(1);
            });

            let result = match flow {
                Flow::Api => client.probe().await,
                Flow::Widget => client.probe_widget().await,
            };
            let report = result.unwrap_or_else(|e| {
                log::error!("Probe failed: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&report),
                OutputFormat::Text => {
                    println!("{}", report);
                    match alert_reason(&report) {
                        Some(reason) => println!("Would alert: {}", reason),
                        None => println!("Would not alert."),
                    }
                }
            }
        }

        Commands::Session { target } => {
            let target = target.resolve();
            let client = WidgetClient::new(target, None).unwrap_or_else(|e| {
                log::error!("Error building client: {}", e);
                process::exit(1);
            });

            let page = client.establish_session().await.unwrap_or_else(|e| {
                log::error!("Session request failed: {}", e);
                process::exit(1);
            });
            println!("Widget page: {} chars", page.len());
            println!("--- head ---\n{}\n------------", head(&page, 500));

            let callback = parser::jsonp_callback();
            println!("Callback: {}", callback);
            let body = client.fetch_bookings(&callback).await.unwrap_or_else(|e| {
                log::error!("Bookings request failed: {}", e);
                process::exit(1);
            });
            println!("Bookings response: {} chars", body.len());
            println!("--- head ---\n{}\n------------", head(&body, 1000));

            if body.contains(&callback) {
                println!("Response echoes the callback (well-formed JSONP).");
            } else {
                println!("Response does NOT echo the callback; session was likely rejected.");
            }
        }
    }
}
