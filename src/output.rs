use std::io::{self, Write};

use crossterm::style::Stylize;
use serde::Serialize;

use crate::app::{
    DefaultResult, InitResult, ListResult, ProgressEvent, ProgressSink, PullReport, RemoveResult,
    SeekResult, TagResult,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable results on stdout, progress on stderr.
pub struct TextOutput;

impl TextOutput {
    pub fn print_init(result: &InitResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "Initialized genome configuration: {}", result.config_path)?;
        writeln!(stdout, "  server: {}", result.genome_server)?;
        writeln!(stdout, "  folder: {}", result.genome_folder)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "{} {}", "Server/config:".bold(), result.source)?;
        writeln!(stdout, "{} {}", "Genomes:".bold(), result.genomes)?;
        writeln!(stdout, "{}", "Assets:".bold())?;
        writeln!(stdout, "{}", result.assets)
    }

    pub fn print_pull(report: &PullReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        for item in &report.items {
            let name = format!(
                "{}/{}:{}",
                item.genome,
                item.asset,
                item.tag.as_deref().unwrap_or("?")
            );
            let action = match item.action.as_str() {
                "installed" => item.action.as_str().green(),
                "skipped" => item.action.as_str().cyan(),
                "aborted" => item.action.as_str().yellow(),
                _ => item.action.as_str().red(),
            };
            writeln!(stdout, "{action} {name}")?;
            if let Some(path) = &item.path {
                writeln!(stdout, "   {path}")?;
            }
            if let Some(message) = &item.message {
                writeln!(stdout, "   {message}")?;
            }
        }
        Ok(())
    }

    pub fn print_seek(result: &SeekResult) -> io::Result<()> {
        writeln!(io::stdout(), "{}", result.path)
    }

    pub fn print_tag(result: &TagResult) -> io::Result<()> {
        writeln!(
            io::stdout(),
            "{}/{}:{} -> {} ({})",
            result.genome,
            result.asset,
            result.old_tag,
            result.new_tag,
            result.action
        )
    }

    pub fn print_remove(result: &RemoveResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        if !result.removed {
            return writeln!(stdout, "Nothing removed");
        }
        writeln!(
            stdout,
            "Removed {}/{}:{}",
            result.genome, result.asset, result.tag
        )?;
        if let Some(path) = &result.deleted_path {
            writeln!(stdout, "   {path}")?;
        }
        Ok(())
    }

    pub fn print_default(result: &DefaultResult) -> io::Result<()> {
        let state = if result.changed { "set" } else { "unchanged" };
        writeln!(
            io::stdout(),
            "Default tag for {}/{}: {} ({state})",
            result.genome, result.asset, result.tag
        )
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        let elapsed = event
            .elapsed
            .map(|elapsed| format!(" [{:.1}s]", elapsed.as_secs_f64()))
            .unwrap_or_default();
        let _ = writeln!(io::stderr(), "{}{}", event.message.dark_grey(), elapsed);
    }
}
