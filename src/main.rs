use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use page_overlay_translator::glossary::{Glossary, NewGlossaryEntry};
use page_overlay_translator::{ExportMode, Orientation, TranslateJob, settings};

#[derive(Parser, Debug)]
#[command(
    name = "page-overlay-translator",
    version,
    about = "Translate PDF and PowerPoint pages in place, keeping their layout"
)]
struct Cli {
    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "settings", alias = "read-settings", global = true)]
    settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Bind address (default: [server].addr)
        #[arg(long = "addr")]
        addr: Option<String>,
    },
    /// Translate every page of a document and write the exported PDF
    Translate {
        /// PDF, PPT or PPTX file
        input: PathBuf,

        /// Output path (default: <name>_translated.pdf next to the input)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Target language (default: [translation].target_lang)
        #[arg(short = 'l', long = "lang")]
        lang: Option<String>,

        #[arg(short = 'm', long = "mode", value_enum, default_value_t = ModeArg::TranslationOnly)]
        mode: ModeArg,

        /// Page orientation for side-by-side output
        #[arg(long = "orientation", value_enum)]
        orientation: Option<OrientationArg>,
    },
    /// Manage the terminology glossary
    Glossary {
        #[command(subcommand)]
        action: GlossaryAction,
    },
}

#[derive(Subcommand, Debug)]
enum GlossaryAction {
    /// List all terms
    List,
    /// Add a term pair
    Add {
        source: String,
        target: String,
        #[arg(long = "note")]
        note: Option<String>,
        #[arg(long = "context")]
        context: Option<String>,
    },
    /// Remove a term by id
    Remove { id: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    TranslationOnly,
    SideBySide,
}

impl From<ModeArg> for ExportMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::TranslationOnly => ExportMode::TranslationOnly,
            ModeArg::SideBySide => ExportMode::SideBySide,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrientationArg {
    Landscape,
    Portrait,
}

impl From<OrientationArg> for Orientation {
    fn from(value: OrientationArg) -> Self {
        match value {
            OrientationArg::Landscape => Orientation::Landscape,
            OrientationArg::Portrait => Orientation::Portrait,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    page_overlay_translator::logging::init(cli.verbose)?;
    let settings = settings::load_settings(cli.settings.as_deref())?;

    match cli.command {
        Command::Serve { addr } => page_overlay_translator::server::run_server(settings, addr).await,
        Command::Translate {
            input,
            output,
            lang,
            mode,
            orientation,
        } => {
            let job = TranslateJob {
                input,
                output,
                target_lang: lang,
                mode: mode.into(),
                orientation: orientation.map(Into::into),
            };
            let outcome = page_overlay_translator::run_translate(&settings, job).await?;
            println!(
                "{} ({}/{} pages translated)",
                outcome.output.display(),
                outcome.summary.translated,
                outcome.summary.total
            );
            Ok(())
        }
        Command::Glossary { action } => run_glossary(&settings, action),
    }
}

fn run_glossary(settings: &settings::Settings, action: GlossaryAction) -> Result<()> {
    let glossary = Glossary::open(settings.glossary_path());
    match action {
        GlossaryAction::List => {
            for entry in glossary.list()? {
                println!(
                    "{}\t{}\t{}\t{}",
                    entry.id,
                    entry.source,
                    entry.target,
                    entry.note.as_deref().unwrap_or("")
                );
            }
        }
        GlossaryAction::Add {
            source,
            target,
            note,
            context,
        } => {
            let entry = glossary.add(NewGlossaryEntry {
                source,
                target,
                context,
                note,
            })?;
            println!("{}", entry.id);
        }
        GlossaryAction::Remove { id } => {
            glossary.delete(&id)?;
            println!("removed {}", id);
        }
    }
    Ok(())
}
