// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod columns;
mod config;
mod runtime;

use anyhow::{Context, Result, anyhow};
use celda_db::{Dataset, SqlitePrefsStore, Store};
use celda_grid::ServerFilters;
use celda_tui::{AppOptions, GridApp};
use columns::Catalogs;
use config::Config;
use runtime::DbRuntime;
use std::env;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `celda --print-example-config` to generate a v1 template",
            options.config_path.display()
        )
    })?;

    let db_path = if options.demo {
        PathBuf::from(":memory:")
    } else {
        config.db_path()?
    };
    if options.print_db_path {
        println!("{}", db_path.display());
        return Ok(());
    }

    init_logging(&config)?;

    let (store, prefs) = if options.demo {
        (Store::open_memory()?, SqlitePrefsStore::open_memory()?)
    } else {
        let store = Store::open(&db_path).with_context(|| {
            format!(
                "open database {} -- if this path is wrong, set [storage].db_path or CELDA_DB_PATH",
                db_path.display()
            )
        })?;
        (store, SqlitePrefsStore::open(&db_path)?)
    };
    store.bootstrap()?;
    if options.demo {
        store.seed_demo_data()?;
    }

    let store = Arc::new(Mutex::new(store));
    let catalogs = Catalogs::new(&store);
    columns::preload(&catalogs).context("load picker catalogs")?;
    let grid_options = config.grid_options(options.dataset)?;
    if options.check_only {
        return Ok(());
    }

    log::info!(
        "opening {} from {} ({} rows per page)",
        options.dataset,
        db_path.display(),
        config.page_size()
    );
    let grid = columns::build_grid(options.dataset, &catalogs, grid_options);
    let mut app = GridApp::new(
        grid,
        AppOptions {
            title: format!("celda: {}", options.dataset),
            page_size: config.page_size(),
            initial_filters: (!options.filters.is_empty()).then_some(options.filters),
        },
    );
    let mut runtime = DbRuntime::new(store, options.dataset, prefs);
    celda_tui::run_grid_app(&mut app, &mut runtime)
}

/// File logging; the terminal belongs to the grid.
fn init_logging(config: &Config) -> Result<()> {
    let level = config.log_level()?;
    if level == log::LevelFilter::Off {
        return Ok(());
    }
    let path = config.log_file()?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let file = File::create(&path).with_context(|| format!("create log file {}", path.display()))?;
    simplelog::WriteLogger::init(level, simplelog::Config::default(), file)
        .context("install logger")?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    dataset: Dataset,
    filters: ServerFilters,
    print_config_path: bool,
    print_db_path: bool,
    demo: bool,
    print_example: bool,
    check_only: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        dataset: Dataset::Circulation,
        filters: ServerFilters::new(),
        print_config_path: false,
        print_db_path: false,
        demo: false,
        print_example: false,
        check_only: false,
        show_help: false,
    };

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--dataset" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--dataset requires circulation or expenses"))?;
                options.dataset = Dataset::parse(value.as_ref()).ok_or_else(|| {
                    anyhow!(
                        "unknown dataset {:?}; use circulation or expenses",
                        value.as_ref()
                    )
                })?;
            }
            "--filter" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--filter requires <param>=<value>[,<value>...]"))?;
                add_filter(&mut options.filters, value.as_ref())?;
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-path" => {
                options.print_db_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--demo" => {
                options.demo = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            unknown => {
                return Err(anyhow!(
                    "unknown argument {unknown:?}; run with --help to see supported options"
                ));
            }
        }
    }

    Ok(options)
}

/// Adds `param=v1,v2` to the opening filters. Blank values are dropped, the
/// way the grid drops them when it reads filters back.
fn add_filter(filters: &mut ServerFilters, raw: &str) -> Result<()> {
    let (param, values) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("--filter {raw:?} must look like <param>=<value>"))?;
    let param = param.trim();
    if param.is_empty() {
        return Err(anyhow!("--filter {raw:?} has no parameter name"));
    }
    let values = values
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned);
    filters.entry(param.to_owned()).or_default().extend(values);
    if filters.get(param).is_some_and(Vec::is_empty) {
        filters.remove(param);
    }
    Ok(())
}

fn print_help() {
    println!("celda");
    println!("  --config <path>          Use a specific config path");
    println!("  --dataset <name>         Open circulation (default) or expenses");
    println!("  --filter <param>=<v,..>  Open with a server filter applied (repeatable)");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-path             Print resolved database path");
    println!("  --print-example-config   Print a v1 config template");
    println!("  --demo                   Launch with seeded demo data (in-memory)");
    println!("  --check                  Validate config + DB + catalogs, then exit");
    println!("  --help                   Show this help");
}
