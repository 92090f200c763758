mod cli;
mod config;
mod console;
mod telemetry;
mod tools;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::Settings;
use secrecy::ExposeSecret;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_json);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Voices => {
            for voice in gemlive::GEMINI_VOICES {
                println!("{voice}");
            }
            Ok(())
        }
        Commands::Config => {
            let settings = resolve(&cli.config, &cli.session)?;
            print_settings(&settings);
            Ok(())
        }
        Commands::Chat => {
            let settings = resolve(&cli.config, &cli.session)?;
            console::run_console(settings, cli.session.audio).await
        }
    }
}

fn resolve(path: &Option<std::path::PathBuf>, flags: &cli::SessionArgs) -> Result<Settings> {
    let (file, source) = config::load_file(path.as_deref())?;
    Settings::resolve(file, source, |var| std::env::var(var).ok(), flags)
}

fn print_settings(settings: &Settings) {
    let key: Vec<char> = settings.api_key.expose_secret().chars().collect();
    let redacted = match key.len() {
        n if n > 8 => format!("...{}", key[n - 4..].iter().collect::<String>()),
        _ => "****".to_string(),
    };
    match &settings.source {
        Some(path) => println!("source      = {}", path.display()),
        None => println!("source      = (defaults)"),
    }
    println!("api_key     = {redacted}");
    println!("endpoint    = {}", settings.endpoint);
    println!("model       = {}", settings.model);
    println!("voice       = {}", settings.voice.as_deref().unwrap_or("(server default)"));
    println!("modality    = {:?}", settings.modality);
    println!("temperature = {:?}", settings.temperature);
    println!("reconnect   = {:?}", settings.reconnect);
}
