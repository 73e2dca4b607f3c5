use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use notemark::{
    AppError, ExtensionSpec, NotePreview, NoteStyle, RenderSettings, Result, highlight_markdown,
    note_scope_class, scope_css,
};

#[derive(Parser)]
#[command(name = "notemark")]
#[command(version, about = "Render markdown notes with per-note extensions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a markdown note to sanitized HTML
    Render {
        /// Markdown file ("-" for stdin)
        input: PathBuf,

        /// JSON array of extension specs
        #[arg(long, value_name = "FILE")]
        plugins: Option<PathBuf>,

        /// Custom stylesheet for the note
        #[arg(long, value_name = "FILE")]
        css: Option<PathBuf>,

        /// Render settings (TOML, or JSON by extension); defaults to the user config
        #[arg(long, value_name = "FILE")]
        settings: Option<PathBuf>,

        /// Note id used for the stylesheet scope class
        #[arg(long, default_value = "note")]
        note_id: String,

        /// Emit a full HTML document with the scoped stylesheet inlined
        #[arg(long)]
        standalone: bool,

        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Print editor-overlay markup for raw markdown
    Highlight {
        /// Markdown file ("-" for stdin)
        input: PathBuf,
    },

    /// Scope a stylesheet beneath a root selector
    Scope {
        /// CSS file ("-" for stdin)
        input: PathBuf,

        /// Root selector
        #[arg(long, conflicts_with = "note_id")]
        root: Option<String>,

        /// Scope to the class of this note id
        #[arg(long)]
        note_id: Option<String>,
    },
}

fn main() -> ExitCode {
    init_logging();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("notemark: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Render {
            input,
            plugins,
            css,
            settings,
            note_id,
            standalone,
            output,
        } => {
            let settings = match settings {
                Some(path) => RenderSettings::load_from(&path)?,
                None => RenderSettings::load(),
            };
            let style = NoteStyle {
                custom_css: css.as_deref().map(fs::read_to_string).transpose()?,
                markdown_plugins: match plugins {
                    Some(path) => load_plugins(&path)?,
                    None => Vec::new(),
                },
            };

            let text = read_input(&input)?;
            let preview = NotePreview::new(&note_id, &style, &settings);
            for (id, message) in preview.errors() {
                eprintln!("plugin {}: {}", id, message);
            }

            let html = if standalone {
                preview.standalone_page(&title_for(&input), &text)
            } else {
                preview.render(&text).html
            };
            write_output(output.as_deref(), &html)
        }
        Commands::Highlight { input } => {
            let text = read_input(&input)?;
            write_output(None, &highlight_markdown(&text))
        }
        Commands::Scope {
            input,
            root,
            note_id,
        } => {
            let css = read_input(&input)?;
            let root = match (root, note_id) {
                (Some(root), _) => root,
                (None, Some(id)) => format!(".{}", note_scope_class(&id)),
                (None, None) => {
                    return Err(AppError::Settings("either --root or --note-id is required".into()));
                }
            };
            write_output(None, &scope_css(&css, &root))
        }
    }
}

fn load_plugins(path: &Path) -> Result<Vec<ExtensionSpec>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    Ok(fs::read_to_string(path)?)
}

fn write_output(path: Option<&Path>, content: &str) -> Result<()> {
    match path {
        Some(path) => fs::write(path, content)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(content.as_bytes())?;
            if !content.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}

fn title_for(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| s != "-")
        .unwrap_or_else(|| "Note".to_string())
}
