use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tagsmith_contracts::ack::AckStore;
use tagsmith_contracts::config::{GenerationConfig, KeywordDensity, TargetModel};
use tagsmith_contracts::export::{csv_document, json_document, text_document};
use tagsmith_contracts::metadata::Metadata;
use tagsmith_engine::backend::model_profiles;
use tagsmith_engine::{
    default_backend_registry, BatchEngine, SourceFile, UnavailableRenderer, UnitStatus,
};

#[derive(Debug, Parser)]
#[command(name = "tagsmith", version, about = "Batch stock-metadata generation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate metadata for a batch of image/PDF files.
    Run(RunArgs),
    /// Convert a session's unit files into a single CSV/JSON/TXT document.
    Export(ExportArgs),
    /// Record the one-time review disclaimer acknowledgement.
    Ack(AckArgs),
    /// List target model profiles and their prompt styles.
    Models,
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// Input files, processed strictly in the order given.
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Session output directory.
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "dryrun")]
    backend: String,
    #[arg(long, default_value = "midjourney")]
    model: TargetModel,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: String,
    #[arg(long, default_value = "standard")]
    density: KeywordDensity,
    /// Include camera/technical settings in generated metadata (default).
    #[arg(long, overrides_with = "no_technical")]
    include_technical: bool,
    /// Omit camera/technical settings from generated metadata.
    #[arg(long, overrides_with = "include_technical")]
    no_technical: bool,
    /// Durable flags file (disclaimer acknowledgement).
    #[arg(long, default_value = ".tagsmith_flags.json")]
    flags: PathBuf,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    /// Session directory produced by `tagsmith run`.
    #[arg(long)]
    session: PathBuf,
    #[arg(long, value_enum, default_value = "csv")]
    format: ExportFormat,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct AckArgs {
    #[arg(long, default_value = ".tagsmith_flags.json")]
    flags: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
    Txt,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("tagsmith error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_batch(args),
        Command::Export(args) => run_export(args),
        Command::Ack(args) => {
            AckStore::new(&args.flags).acknowledge()?;
            println!("Disclaimer acknowledged.");
            Ok(0)
        }
        Command::Models => {
            for (model, profile) in model_profiles() {
                println!("{:<18} {:<18} {}", model.as_str(), profile.label, profile.prompt_style);
            }
            Ok(0)
        }
    }
}

fn run_batch(args: RunArgs) -> Result<i32> {
    let ack = AckStore::new(&args.flags);
    if !ack.is_acknowledged() {
        eprintln!(
            "note: AI-generated metadata needs human review before marketplace \
             submission. Run `tagsmith ack` to record that you have read this."
        );
    }

    let mut registry = default_backend_registry();
    let Some(backend) = registry.take(&args.backend) else {
        bail!(
            "unknown backend '{}' (available: {})",
            args.backend,
            registry.names().join(", ")
        );
    };

    let config = GenerationConfig {
        target_model: args.model,
        aspect_ratio: args.aspect_ratio.clone(),
        include_technical: args.include_technical || !args.no_technical,
        keyword_density: args.density,
    };

    fs::create_dir_all(&args.out)
        .with_context(|| format!("cannot create session dir {}", args.out.display()))?;
    let session_id = new_session_id();
    let mut engine = BatchEngine::new(
        backend,
        config,
        args.out.join("events.jsonl"),
        session_id.clone(),
    )?;

    let mut files = Vec::new();
    for path in &args.files {
        let bytes =
            fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        files.push(SourceFile {
            file_name: file_name_of(path),
            bytes,
        });
    }

    let admitted = engine.admit(files, &UnavailableRenderer)?;
    if let Some(notice) = admitted.skip_notice() {
        eprintln!("note: {notice}");
    }
    if admitted.admitted.is_empty() {
        bail!("no processable files in the selection");
    }

    let report = engine.run();

    let mut used_stems = HashSet::new();
    for unit in engine.state().units() {
        match unit.status {
            UnitStatus::Completed => {
                println!("{}: completed", unit.asset.file_name);
                if let Some(metadata) = &unit.result {
                    // Same stem from different files (a.jpg + a.png, or a
                    // re-added asset) must not overwrite earlier output.
                    let stem = unique_stem(&mut used_stems, &stem_of(&unit.asset.file_name));
                    let path = args.out.join(format!("{stem}.json"));
                    fs::write(&path, json_document(metadata)?)
                        .with_context(|| format!("cannot write {}", path.display()))?;
                }
            }
            UnitStatus::Error => {
                let message = unit.error_message.as_deref().unwrap_or("unknown error");
                println!("{}: error ({message})", unit.asset.file_name);
            }
            _ => println!("{}: {}", unit.asset.file_name, unit.status.as_str()),
        }
    }

    write_summary(&args.out, &session_id, engine.backend_name(), &engine, &admitted.skipped)?;
    println!(
        "{} completed, {} failed, {} skipped -> {}",
        report.completed,
        report.failed,
        admitted.skipped.len(),
        args.out.display()
    );

    if report.completed == 0 {
        return Ok(1);
    }
    Ok(0)
}

fn write_summary(
    out: &Path,
    session_id: &str,
    backend: &str,
    engine: &BatchEngine,
    skipped: &[String],
) -> Result<()> {
    let units: Vec<serde_json::Value> = engine
        .state()
        .units()
        .iter()
        .map(|unit| {
            serde_json::json!({
                "id": unit.id,
                "file": unit.asset.file_name,
                "status": unit.status.as_str(),
                "error": unit.error_message,
            })
        })
        .collect();
    let summary = serde_json::json!({
        "session_id": session_id,
        "backend": backend,
        "skipped": skipped,
        "units": units,
    });
    let path = out.join("summary.json");
    fs::write(&path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(())
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let rows = collect_session_rows(&args.session)?;
    if rows.is_empty() {
        bail!(
            "no unit metadata files found in {}",
            args.session.display()
        );
    }

    let document = match args.format {
        ExportFormat::Csv => csv_document(&rows),
        ExportFormat::Json => {
            let all: Vec<&Metadata> = rows.iter().map(|(_, metadata)| metadata).collect();
            serde_json::to_string_pretty(&all)? + "\n"
        }
        ExportFormat::Txt => rows
            .iter()
            .map(|(filename, metadata)| format!("=== {filename} ===\n\n{}", text_document(metadata)))
            .collect::<Vec<String>>()
            .join("\n"),
    };

    if let Some(parent) = args.out.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&args.out, document)
        .with_context(|| format!("cannot write {}", args.out.display()))?;
    println!("Exported {} unit(s) to {}", rows.len(), args.out.display());
    Ok(0)
}

/// Loads every per-unit metadata file from a session directory, sorted
/// by name for a stable export order. `summary.json` and anything that
/// does not parse as unit metadata is ignored.
fn collect_session_rows(session: &Path) -> Result<Vec<(String, Metadata)>> {
    let entries = fs::read_dir(session)
        .with_context(|| format!("cannot read session dir {}", session.display()))?;
    let mut rows = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let stem = stem_of(&file_name_of(&path));
        if stem == "summary" {
            continue;
        }
        let raw = fs::read_to_string(&path)?;
        let Ok(metadata) = serde_json::from_str::<Metadata>(&raw) else {
            continue;
        };
        rows.push((stem, metadata));
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(rows)
}

fn new_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0);
    format!("session-{millis}")
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("input")
        .to_string()
}

fn stem_of(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(stem, _)| stem.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// First claim of a stem keeps it; later claims get a numeric suffix
/// that is itself checked against already-claimed names.
fn unique_stem(used: &mut HashSet<String>, stem: &str) -> String {
    if used.insert(stem.to_string()) {
        return stem.to_string();
    }
    let mut index = 2;
    loop {
        let candidate = format!("{stem}_{index}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata(title: &str) -> Metadata {
        Metadata {
            title: title.to_string(),
            description: "d".to_string(),
            prompt: "p".to_string(),
            keywords: vec!["k1".to_string(), "k2".to_string()],
            category: "Nature".to_string(),
            technical_settings: None,
            generated_for_model: "midjourney".to_string(),
        }
    }

    #[test]
    fn collect_session_rows_skips_summary_and_sorts() -> Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(
            temp.path().join("zebra.json"),
            serde_json::to_string(&sample_metadata("z"))?,
        )?;
        fs::write(
            temp.path().join("aster.json"),
            serde_json::to_string(&sample_metadata("a"))?,
        )?;
        fs::write(temp.path().join("summary.json"), r#"{"session_id": "x"}"#)?;
        fs::write(temp.path().join("events.jsonl"), "{}\n")?;

        let rows = collect_session_rows(temp.path())?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "aster");
        assert_eq!(rows[1].0, "zebra");
        Ok(())
    }

    #[test]
    fn stem_of_strips_only_the_last_extension() {
        assert_eq!(stem_of("deck_page_1.jpg"), "deck_page_1");
        assert_eq!(stem_of("archive.tar.gz"), "archive.tar");
        assert_eq!(stem_of("noext"), "noext");
    }

    #[test]
    fn colliding_stems_get_distinct_output_names() {
        let mut used = HashSet::new();
        // a.jpg and a.png share a stem; so does a re-added a.jpg.
        assert_eq!(unique_stem(&mut used, "a"), "a");
        assert_eq!(unique_stem(&mut used, "a"), "a_2");
        assert_eq!(unique_stem(&mut used, "a"), "a_3");
        assert_eq!(unique_stem(&mut used, "b"), "b");
        // A file literally named a_2 must not be clobbered either.
        assert_eq!(unique_stem(&mut used, "a_2"), "a_2_2");
    }

    #[test]
    fn technical_flag_pair_parses_with_include_as_default() -> Result<()> {
        let parse = |argv: &[&str]| -> Result<bool> {
            let cli = Cli::try_parse_from(argv)?;
            let Command::Run(args) = cli.command else {
                anyhow::bail!("expected run command");
            };
            Ok(args.include_technical || !args.no_technical)
        };

        let base = ["tagsmith", "run", "a.jpg", "--out", "session"];
        assert!(parse(&base)?);

        let mut with_no = base.to_vec();
        with_no.push("--no-technical");
        assert!(!parse(&with_no)?);

        let mut with_include = base.to_vec();
        with_include.push("--include-technical");
        assert!(parse(&with_include)?);

        // Later flag wins when both are given.
        let mut both = base.to_vec();
        both.extend(["--no-technical", "--include-technical"]);
        assert!(parse(&both)?);
        Ok(())
    }
}
