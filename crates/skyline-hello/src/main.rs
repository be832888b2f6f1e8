//! `skyline-hello` command line

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use skyline_aws::sim::{CloudSnapshot, HttpRequest, SimulatedCloud};
use skyline_engine::{
    ApplyReport, Engine, FileStateStore, SkylineConfig, StateRecord, StateStore,
};
use skyline_hello::{hello_graph, register, HelloOptions, URL_OUTPUT};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let no_route = Arg::new("no-route")
        .long("no-route")
        .action(ArgAction::SetTrue)
        .help("Leave the POST /hello route out of the declaration");

    Command::new("skyline-hello")
        .version(skyline_hello::VERSION)
        .about("Deploy the hello-world HTTP stack to a simulated AWS account")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("state-dir")
                .long("state-dir")
                .global(true)
                .default_value(".skyline")
                .value_parser(value_parser!(PathBuf))
                .help("Directory holding state and simulated cloud snapshots"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log output format"),
        )
        .subcommand(
            Command::new("preview")
                .about("Show what an apply would change")
                .arg(no_route.clone()),
        )
        .subcommand(
            Command::new("up")
                .about("Apply the stack")
                .arg(no_route),
        )
        .subcommand(Command::new("destroy").about("Delete every resource of the stack"))
        .subcommand(
            Command::new("invoke")
                .about("Send a request to the deployed endpoint")
                .arg(
                    Arg::new("method")
                        .long("method")
                        .default_value("POST")
                        .help("HTTP method"),
                )
                .arg(
                    Arg::new("path")
                        .long("path")
                        .default_value("/hello")
                        .help("Request path"),
                )
                .arg(Arg::new("body").long("body").help("Request body")),
        )
        .subcommand(
            Command::new("graph")
                .about("Print the dependency graph")
                .arg(
                    Arg::new("dot")
                        .long("dot")
                        .action(ArgAction::SetTrue)
                        .help("Graphviz output"),
                ),
        )
        .subcommand(Command::new("journal").about("List and verify the apply journal"))
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Everything a command needs from disk
struct Session {
    config: SkylineConfig,
    store: FileStateStore,
    cloud: Arc<SimulatedCloud>,
}

impl Session {
    fn open(matches: &ArgMatches) -> Result<Self> {
        let config = SkylineConfig::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))
            .context("loading configuration")?;
        let dir = matches
            .get_one::<PathBuf>("state-dir")
            .cloned()
            .unwrap_or_else(|| PathBuf::from(".skyline"));
        let store = FileStateStore::new(dir);

        let snapshot_path = snapshot_path(store.dir(), &config.stack);
        let cloud = match std::fs::read_to_string(&snapshot_path) {
            Ok(text) => {
                let snapshot: CloudSnapshot = serde_json::from_str(&text)
                    .with_context(|| format!("parsing {}", snapshot_path.display()))?;
                SimulatedCloud::from_snapshot(snapshot, &config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SimulatedCloud::new(&config),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", snapshot_path.display()))
            }
        };
        let cloud = Arc::new(cloud);
        register(&cloud);

        Ok(Self {
            config,
            store,
            cloud,
        })
    }

    fn state(&self) -> Result<StateRecord> {
        self.store
            .load_or_new(&self.config.stack)
            .with_context(|| format!("loading state of stack {}", self.config.stack))
    }

    fn engine(&self) -> Engine {
        Engine::from_config(self.cloud.clone(), &self.config)
    }

    fn save(&self, state: &StateRecord) -> Result<()> {
        self.store.save(state).context("saving state")?;
        let path = snapshot_path(self.store.dir(), &self.config.stack);
        let text = serde_json::to_string_pretty(&self.cloud.snapshot())?;
        std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

fn snapshot_path(dir: &Path, stack: &str) -> PathBuf {
    dir.join(format!("{stack}.cloud.json"))
}

fn options(args: &ArgMatches) -> HelloOptions {
    HelloOptions::new().with_route(!args.get_flag("no-route"))
}

fn print_report(report: &ApplyReport) {
    for (name, outcome) in &report.outcomes {
        println!("  {name}: {outcome}");
    }
    for (name, value) in &report.outputs {
        match value.as_str() {
            Some(text) => println!("{name}: {text}"),
            None => println!("{name}: {value}"),
        }
    }
    for name in &report.unresolved_outputs {
        println!("{name}: <unresolved>");
    }
}

fn finish(session: &Session, report: &ApplyReport) -> Result<()> {
    session.save(&report.state)?;
    print_report(report);
    let failed = report.failures().count();
    if failed > 0 {
        bail!("{failed} resource(s) failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let format = matches
        .get_one::<String>("log-format")
        .map_or("text", String::as_str);
    init_tracing(format);

    let session = Session::open(&matches)?;
    match matches.subcommand() {
        Some(("preview", args)) => {
            let graph = hello_graph(&session.config.stack, &options(args))?;
            let plan = session.engine().preview(&graph, &session.state()?);
            println!("{plan}");
        }
        Some(("up", args)) => {
            let graph = hello_graph(&session.config.stack, &options(args))?;
            let report = session.engine().apply(&graph, session.state()?).await?;
            finish(&session, &report)?;
        }
        Some(("destroy", _)) => {
            let report = session.engine().destroy(session.state()?).await?;
            finish(&session, &report)?;
        }
        Some(("invoke", args)) => {
            let state = session.state()?;
            let Some(url) = state.outputs.get(URL_OUTPUT).and_then(|v| v.as_str()) else {
                bail!("stack {} has no {URL_OUTPUT} output; run `up` first", state.stack);
            };
            let method = args.get_one::<String>("method").map_or("POST", String::as_str);
            let path = args.get_one::<String>("path").map_or("/hello", String::as_str);
            let mut request = HttpRequest::new(method, path);
            if let Some(body) = args.get_one::<String>("body") {
                request = request.with_body(body.clone());
            }
            let response = session.cloud.invoke(url, &request)?;
            println!("{}", response.status);
            println!("{}", response.body);
        }
        Some(("graph", args)) => {
            let graph = hello_graph(&session.config.stack, &HelloOptions::default())?;
            if args.get_flag("dot") {
                println!("{}", graph.to_dot());
            } else {
                for (i, level) in graph.levels().iter().enumerate() {
                    let names: Vec<&str> = level.iter().map(|n| n.as_str()).collect();
                    println!("wave {i}: {}", names.join(", "));
                }
            }
        }
        Some(("journal", _)) => {
            let state = session.state()?;
            for entry in state.journal.entries() {
                println!(
                    "{:>4} {} {} {} {}",
                    entry.sequence,
                    entry.timestamp.to_rfc3339(),
                    entry.action,
                    entry.node,
                    entry.result
                );
            }
            match state.journal.verify_integrity() {
                Ok(()) => println!("journal intact ({} entries)", state.journal.len()),
                Err(sequence) => bail!("journal tampered at entry {sequence}"),
            }
        }
        _ => bail!("unknown command"),
    }
    Ok(())
}
