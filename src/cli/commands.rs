//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::io::{self, Read, Write};
use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::advisor::AdvisorService;
use crate::envelope::Envelope;
use crate::error::{InscriptError, Result};
use crate::pipeline::{EncryptOptions, Pipeline, PipelineConfig, PipelineSettings};

/// Load settings from a file when given, otherwise from the environment.
pub fn load_settings(path: Option<&Path>) -> Result<PipelineSettings> {
    match path {
        Some(path) => {
            info!("Loading settings: {}", path.display());
            PipelineSettings::load(path)
        }
        None => PipelineSettings::from_env(),
    }
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, format!("{}\n", text))?;
            info!("Wrote {}", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", text)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Encrypt a JSON payload.
pub fn encrypt(
    settings: PipelineSettings,
    level: u8,
    seed: Option<u64>,
    input: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let payload: Value = serde_json::from_str(&read_input(input)?)?;
    let pipeline = Pipeline::new(settings)?;
    let options = EncryptOptions {
        seed,
        ..EncryptOptions::default()
    };

    let envelope = pipeline.encrypt_with(&payload, &PipelineConfig::for_level(level), &options)?;
    write_output(output, &serde_json::to_string_pretty(&envelope)?)
}

/// Decrypt an envelope.
pub fn decrypt(
    settings: PipelineSettings,
    level: u8,
    input: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let envelope = Envelope::from_json_str(&read_input(input)?)?;
    let pipeline = Pipeline::new(settings)?;

    let payload = pipeline.decrypt(&envelope, &PipelineConfig::for_level(level))?;
    write_output(output, &serde_json::to_string_pretty(&payload)?)
}

/// Verify an envelope's outer checksum.
pub fn verify(input: Option<&Path>) -> Result<()> {
    let envelope = Envelope::from_json_str(&read_input(input)?)?;
    let layer = envelope.verify()?;
    println!("Envelope OK: sealed by {} (format {})", layer, envelope.version);
    Ok(())
}

/// Print pipeline status.
pub fn status(settings: PipelineSettings) -> Result<()> {
    let pipeline = Pipeline::new(settings)?;
    let status = pipeline.status();

    println!("Layers:");
    println!("{:-<60}", "");
    for layer in &status.layers {
        println!("  {}  {:<16} v{}", layer.id, layer.name, layer.version);
    }
    println!("{:-<60}", "");
    println!(
        "Advisor: {} ({})",
        status.advisor_mode,
        if status.advisor_available {
            "available"
        } else {
            "unavailable, local fallback"
        }
    );
    println!("Honeypot: {}", if status.honeypot { "on" } else { "off" });
    println!("History capacity: {}", status.history_capacity);
    Ok(())
}

/// Serve one advisor request from stdin.
pub fn advisor() -> Result<()> {
    let response = AdvisorService::new().serve(io::stdin().lock(), io::stdout().lock())?;
    if !response.success {
        return Err(InscriptError::bridge(
            response.error.unwrap_or_else(|| "advisor request failed".to_string()),
        ));
    }
    Ok(())
}
