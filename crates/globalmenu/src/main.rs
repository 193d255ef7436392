//! globalmenu - a global menu bar for Linux desktops
//!
//! This is the main entry point for the globalmenu bar application.

mod bar;
mod services;
pub mod styles;
mod widgets;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use gtk4::Application;
use gtk4::prelude::*;
use tracing::{debug, error, info, warn};

use globalmenu_core::{Config, logging};

use crate::services::appmenu::AppMenuService;
use crate::services::config_manager::ConfigManager;
use crate::services::wm::WmManager;

/// globalmenu - a global menu bar for Linux desktops
#[derive(Parser, Debug)]
#[command(name = "globalmenu", version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (uses XDG lookup if not specified)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print example configuration and exit
    #[arg(long)]
    print_example_config: bool,

    /// Validate configuration and exit (returns non-zero on errors)
    #[arg(long)]
    check_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the full layout of a menu exported on the session bus
    Inspect {
        /// Bus name of the menu exporter (e.g. ":1.42")
        service: String,
        /// Object path of the menu (e.g. "/com/canonical/menu/1a2b3c")
        path: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    logging::init(args.verbose);

    // Handle subcommands (these don't need config or GTK)
    if let Some(command) = args.command {
        return handle_command(command);
    }

    // Load configuration using XDG lookup chain
    // If --config is specified, it must exist and be valid (no fallback)
    let load_result = match Config::find_and_load(args.config.as_deref()) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(ref source) = load_result.source {
        info!("Loaded configuration from {:?}", source);
    } else if load_result.used_defaults {
        warn!("Using default configuration (no config file found)");
    }

    let config = load_result.config;

    // Validate configuration (strict - fail on invalid values)
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    debug!("Configuration validated successfully");

    // --check-config: just validate and exit
    if args.check_config {
        if let Some(ref source) = load_result.source {
            println!("Configuration valid: {}", source.display());
        } else {
            println!("Configuration valid (using defaults)");
        }
        return ExitCode::SUCCESS;
    }

    // --print-example-config: print the example config with comments
    if args.print_example_config {
        print!("{}", globalmenu_core::config::DEFAULT_CONFIG_TOML);
        return ExitCode::SUCCESS;
    }

    info!("{}", config.summary());

    // Run the GTK application
    run_gtk_app(config, load_result.source)
}

/// Handle CLI subcommands.
fn handle_command(command: Command) -> ExitCode {
    match command {
        Command::Inspect { service, path } => handle_inspect_command(&service, &path),
    }
}

/// Dump a remote menu tree to stdout for debugging exporters.
fn handle_inspect_command(service: &str, path: &str) -> ExitCode {
    use crate::services::menu::MenuCli;

    let cli = match MenuCli::new() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: could not connect to D-Bus session bus: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.inspect(service, path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize and run the GTK4 application.
fn run_gtk_app(config: Config, config_source: Option<PathBuf>) -> ExitCode {
    if let Some(ref source) = config_source {
        info!("Running with configuration file: {}", source.display());
    } else {
        info!("Running with default configuration (no file found)");
    }

    // Initialize the config manager singleton (before GTK, so it's ready for hot-reload)
    ConfigManager::init_global(config, config_source);

    let app = Application::builder()
        .application_id("io.github.globalmenu")
        .flags(gtk4::gio::ApplicationFlags::NON_UNIQUE)
        .build();

    app.connect_activate(move |app| {
        info!("GTK application activated");

        // Load CSS styling
        bar::load_css();

        let config = ConfigManager::global().config();

        // Discovery backend first: AppMenuService subscribes to it, and the
        // bar widget subscribes to both.
        WmManager::init_global(&config);
        AppMenuService::init_global();

        bar::show_bar(app);

        // Start config file watcher for live reload
        ConfigManager::global().start_watching();
    });

    app.connect_startup(|_| {
        info!("GTK application starting up");
    });

    app.connect_shutdown(|_| {
        info!("GTK application shutting down");
        // Stop config watcher
        ConfigManager::global().stop_watching();
    });

    // Run the application with empty args (we already parsed with clap)
    let empty_args: Vec<String> = vec![];
    let status = app.run_with_args(&empty_args);

    if status == gtk4::glib::ExitCode::SUCCESS {
        ExitCode::SUCCESS
    } else {
        error!("GTK application exited with error");
        ExitCode::FAILURE
    }
}
