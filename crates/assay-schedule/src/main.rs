use anyhow::{bail, Context};
use assay_procedure::{Procedure, ProcedureDependencies, ProcedureDocument};
use assay_schedule::{
    AssayConfig, Conflicts, FileSystemStore, ManifestCatalog, NoStorage, Products, Schedule, Scheduler,
    StorageLocator,
};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let procedure = |name: &'static str, help: &'static str| {
        Arg::new(name)
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help(help)
    };
    let storage = Arg::new("storage")
        .long("storage")
        .value_parser(value_parser!(PathBuf))
        .help("Directory of persisted results");

    Command::new("assay")
        .version(assay_schedule::VERSION)
        .about("Coordinate experiment procedures")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration with scheduler settings, environment and conductors"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("check")
                .about("Validate a procedure and print its execution order")
                .arg(procedure("procedure", "Procedure document (JSON)")),
        )
        .subcommand(
            Command::new("run")
                .about("Conduct a procedure, printing lifecycle events")
                .arg(procedure("procedure", "Procedure document (JSON)"))
                .arg(storage.clone().help("Directory to persist results into")),
        )
        .subcommand(
            Command::new("diff")
                .about("Compare a procedure against a previously conducted one")
                .arg(procedure("previous", "Previously conducted procedure document (JSON)"))
                .arg(procedure("next", "New procedure document (JSON)"))
                .arg(storage),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn path_arg<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a PathBuf> {
    args.get_one::<PathBuf>(name)
        .with_context(|| format!("missing argument '{name}'"))
}

fn load_config(args: &ArgMatches) -> anyhow::Result<AssayConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => Ok(AssayConfig::load(path)?),
        None => Ok(AssayConfig::default()),
    }
}

fn load_procedure(path: &Path, catalog: &ManifestCatalog) -> anyhow::Result<Procedure> {
    let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let document: ProcedureDocument =
        serde_json::from_str(&text).with_context(|| format!("malformed procedure document {}", path.display()))?;
    Procedure::from_document(&document, catalog.registry())
        .with_context(|| format!("cannot build procedure from {}", path.display()))
}

fn check(args: &ArgMatches, catalog: &ManifestCatalog) -> anyhow::Result<bool> {
    let procedure = load_procedure(path_arg(args, "procedure")?, catalog)?;
    let dependencies = ProcedureDependencies::analyze(&procedure)?;

    println!("procedure {} ({} instructions)", procedure.id(), procedure.len());
    for (position, path) in dependencies.order().iter().enumerate() {
        let requires: Vec<String> = dependencies
            .dependencies_of(path)
            .iter()
            .map(|dependency| format!("{} via {:?}", dependency.dependency, dependency.kind))
            .collect();
        if requires.is_empty() {
            println!("{:>4}. {path}", position + 1);
        } else {
            println!("{:>4}. {path} after {}", position + 1, requires.join(", "));
        }
    }
    Ok(true)
}

fn persist(schedule: &Schedule, catalog: &ManifestCatalog, store: &FileSystemStore) -> anyhow::Result<usize> {
    let mut persisted = 0;
    for path in schedule.products().paths() {
        let Some(outputs) = schedule.outputs(path) else {
            continue;
        };
        for id in outputs.production_ids() {
            let Some(production) = catalog.production(id) else {
                continue;
            };
            let values: Vec<&Value> = outputs
                .condition(production)
                .into_iter()
                .chain(outputs.results(production))
                .filter_map(|value| value.downcast_ref::<Value>())
                .collect();
            let value = match values.as_slice() {
                [single] => (*single).clone(),
                many => Value::Array(many.iter().map(|value| (*value).clone()).collect()),
            };
            store.persist(path, &format!("{id}.json"), serde_json::to_string_pretty(&value)?.as_bytes())?;
            persisted += 1;
        }
    }
    Ok(persisted)
}

async fn run(args: &ArgMatches, config: &AssayConfig, catalog: &ManifestCatalog) -> anyhow::Result<bool> {
    let procedure = load_procedure(path_arg(args, "procedure")?, catalog)?;
    let scheduler = Scheduler::new(Arc::new(catalog.environment()), config.scheduler.clone());
    let schedule = scheduler.schedule(&procedure)?;

    let mut subscription = scheduler.subscribe();
    let subscription_id = subscription.id();
    let printer = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            println!("{event}");
        }
    });

    let report = schedule.conduct().await;
    scheduler.events().unsubscribe(subscription_id);
    printer.await.context("event printer failed")?;
    let report = report?;

    for (path, record) in &report.steps {
        println!("{path}: {}", record.state);
    }
    if let Some(root) = args.get_one::<PathBuf>("storage") {
        let store = FileSystemStore::new(root);
        let persisted = persist(&schedule, catalog, &store)?;
        tracing::info!(persisted, root = %root.display(), "persisted results");
    }
    Ok(report.is_success())
}

fn diff(args: &ArgMatches, catalog: &ManifestCatalog) -> anyhow::Result<bool> {
    let previous = load_procedure(path_arg(args, "previous")?, catalog)?;
    let next = load_procedure(path_arg(args, "next")?, catalog)?;
    ProcedureDependencies::analyze(&next)?;

    let storage: Box<dyn StorageLocator> = match args.get_one::<PathBuf>("storage") {
        Some(root) => Box::new(FileSystemStore::new(root)),
        None => Box::new(NoStorage),
    };
    let conflicts = Conflicts::compare(&Products::from_procedure(&previous), &next, storage.as_ref());

    for change in conflicts.changes() {
        let marker = if change.is_conflicting() { '!' } else { ' ' };
        println!("{marker} {}: {}", change.path(), change.summary());
    }
    Ok(conflicts.is_conflict_free())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let config = load_config(&matches)?;
    let catalog = ManifestCatalog::from_config(&config)?;

    let success = match matches.subcommand() {
        Some(("check", args)) => check(args, &catalog)?,
        Some(("run", args)) => run(args, &config, &catalog).await?,
        Some(("diff", args)) => diff(args, &catalog)?,
        Some((other, _)) => bail!("unknown command '{other}'"),
        None => bail!("no command given"),
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn parses_diff_with_storage() {
        let matches = cli()
            .try_get_matches_from(["assay", "--log-json", "diff", "a.json", "b.json", "--storage", "out"])
            .unwrap();
        assert!(matches.get_flag("log-json"));
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "diff");
        assert_eq!(path_arg(args, "next").unwrap(), &PathBuf::from("b.json"));
        assert_eq!(args.get_one::<PathBuf>("storage"), Some(&PathBuf::from("out")));
    }
}
