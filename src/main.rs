use anyhow::Context;
use dotenvy::dotenv;
use loot_courier::bot::{schema, ChatFilter, TelegramSender};
use loot_courier::config::Settings;
use loot_courier::links::LinkExtractor;
use loot_courier::pipeline::{FfmpegTranscoder, LinkPipeline};
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
    cookies_arg: Regex,
    cookies_env: Regex,
    login_arg: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token1: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token2: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token3: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            cookies_arg: Regex::new(r#"(--cookies["',\s]+)[^\s"',\]]+"#)?,
            cookies_env: Regex::new(r"COOKIES_FILE=[^\s&]+")?,
            login_arg: Regex::new(r#"(--login["',\s]+)[^\s"',\]]+"#)?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .token1
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .token2
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token3
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .cookies_arg
            .replace_all(&output, "${1}[MASKED]")
            .to_string();
        output = self
            .cookies_env
            .replace_all(&output, "COOKIES_FILE=[MASKED]")
            .to_string();
        output = self
            .login_arg
            .replace_all(&output, "${1}[MASKED]")
            .to_string();
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's buffer was consumed in full, whatever length the redacted text has
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Before logging, so nothing unredacted is ever written
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);

    init_logging(patterns);

    info!("Starting loot courier...");

    let settings = init_settings();

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(settings.send_timeout_secs))
        .tcp_nodelay(true)
        .build()
        .context("building Bot API HTTP client")?;
    let bot = Bot::with_client(settings.telegram_token.clone(), client);

    let me = bot.get_me().await.context("get_me failed; check TELEGRAM_TOKEN")?;
    info!(username = %me.username(), "Authorized");

    let pipeline = Arc::new(init_pipeline(&settings, bot.clone(), me.username())?);
    let filter = Arc::new(ChatFilter::new(settings.allowed_chats()));

    info!("Bot is running...");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![pipeline, filter])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_pipeline(settings: &Settings, bot: Bot, username: &str) -> anyhow::Result<LinkPipeline> {
    let registry = settings
        .backend_registry()
        .context("invalid BACKEND_ROUTES")?;
    info!(?registry, "Backends ready");

    let config = settings.pipeline_config();
    info!(
        workers = config.worker_pool_size,
        link_timeout_secs = config.link_timeout.as_secs(),
        max_retries = config.retry.max_retries,
        "Pipeline configured"
    );

    let sender = TelegramSender::new(bot, config.limits.collapse_at_chars);
    Ok(LinkPipeline::new(
        LinkExtractor::default().with_mention(username),
        registry,
        Arc::new(FfmpegTranscoder::new()),
        Arc::new(sender),
        config,
    ))
}
