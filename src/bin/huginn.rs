//! huginn: submit a prompt from the command line.

use std::path::PathBuf;

use clap::Parser;
use huginn::{Attachment, CompletionRequest, Config, HuginnBuilder, ProviderKind, Secrets};

/// Huginn CLI
#[derive(Parser)]
#[command(name = "huginn")]
#[command(version)]
#[command(about = "Send a prompt (and optional attachment) to an LLM provider")]
struct Args {
    /// Prompt text
    prompt: String,

    /// Config file (default: ~/.huginn/config.toml, then /etc/huginn/config.toml)
    #[arg(short, long, env = "HUGINN_CONFIG")]
    config: Option<PathBuf>,

    /// File to attach (e.g. a captured image)
    #[arg(short, long)]
    attach: Option<PathBuf>,

    /// MIME type of the attachment (guessed from the extension when omitted)
    #[arg(long, requires = "attach")]
    mime: Option<String>,

    /// Pin the request to one provider (no fallback)
    #[arg(short, long)]
    provider: Option<ProviderKind>,

    /// Model identifier (provider default when omitted)
    #[arg(short, long)]
    model: Option<String>,

    /// Sampling temperature
    #[arg(short, long)]
    temperature: Option<f32>,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load_or_default()?,
    };
    let secrets = Secrets::load()?;
    let gateway = HuginnBuilder::from_config(&config, &secrets)?.build()?;

    let mut request = CompletionRequest::new(args.prompt);
    if let Some(path) = &args.attach {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| format!("reading {}: {e}", path.display()))?;
        let mime = args.mime.clone().unwrap_or_else(|| guess_mime(path).to_string());
        request = request.attachment(Attachment::new(mime, data));
    }
    if let Some(provider) = args.provider {
        request = request.provider(provider);
    }
    if let Some(model) = args.model {
        request = request.model(model);
    }
    if let Some(t) = args.temperature {
        request.params = request.params.temperature(t);
    }

    let outcome = gateway.submit(request).await;
    gateway.shutdown().await;

    match outcome {
        Ok(result) if args.json => println!("{}", serde_json::to_string_pretty(&result)?),
        Ok(result) => println!("{}", result.text),
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_configuration() {
                eprintln!("Check provider API keys and configuration.");
            } else if e.is_retryable() {
                eprintln!("The provider may be temporarily unavailable; try again later.");
            }
            std::process::exit(1);
        }
    }
    Ok(())
}

fn guess_mime(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}
