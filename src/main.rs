//! Converge CLI entry point.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use converge::cli::{Cli, CommandDispatcher};
use converge::ui::{should_use_colors, OutputMode, Theme};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber for logging.
///
/// Log level is controlled by:
/// 1. `--debug` flag sets level to DEBUG
/// 2. `RUST_LOG` environment variable (if set)
/// 3. Default is INFO
///
/// Logs go to stderr; stdout carries the step lines.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("converge=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("converge=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    tracing::debug!("Converge starting with args: {:?}", cli);

    let output_mode = OutputMode::from_flags(cli.verbose, cli.quiet);

    let colors = !cli.no_color && should_use_colors();
    console::set_colors_enabled(colors);
    console::set_colors_enabled_stderr(colors);
    let theme = Theme::for_colors(colors);

    // Determine project root
    let project_root = cli
        .project
        .as_ref()
        .cloned()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    let dispatcher = CommandDispatcher::new(project_root, theme, output_mode);
    let mut stdout = io::stdout();

    match dispatcher.dispatch(&cli, &mut stdout) {
        Ok(result) => ExitCode::from(u8::try_from(result.exit_code).unwrap_or(1)),
        Err(e) => {
            eprintln!("{}", Theme::for_colors(colors).format_failed(&format!("Error: {}", e)));
            if e.is_configuration_error() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}
