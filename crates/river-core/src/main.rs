use anyhow::{anyhow, bail, Context};
use clap::parser::ValueSource;
use clap::{value_parser, Arg, ArgMatches, Command};
use river_core::catalog::PREFERRED_DEFAULT_MODELS;
use river_core::prelude::*;
use river_core::TokenObserver;
use river_tree::{ApiKeys, NodeType};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_STORE: &str = "riverchat.json";

fn cli() -> Command {
    let river = || {
        Arg::new("river")
            .required(true)
            .help("River ID or name")
    };
    let model = || {
        Arg::new("model")
            .long("model")
            .help("Model ID; defaults to the last used model")
    };
    let backend = || {
        Arg::new("backend")
            .long("backend")
            .value_parser(["openrouter", "openai", "anthropic", "google"])
            .default_value("openrouter")
            .help("API serving the model")
    };

    Command::new("riverctl")
        .version(river_core::VERSION)
        .about("Branching LLM conversations from the terminal")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .subcommand(
            Command::new("new")
                .about("Create a river")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(Command::new("list").about("List rivers, newest first"))
        .subcommand(
            Command::new("show")
                .about("Print a river as a tree")
                .arg(river()),
        )
        .subcommand(
            Command::new("ask")
                .about("Add a question and stream the answer")
                .arg(river())
                .arg(
                    Arg::new("parent")
                        .long("parent")
                        .help("Node to continue from; defaults to the newest node"),
                )
                .arg(model())
                .arg(backend())
                .arg(Arg::new("prompt").required(true)),
        )
        .subcommand(
            Command::new("branch")
                .about("Ask about an excerpt of an existing node")
                .arg(river())
                .arg(Arg::new("source").required(true).help("Node ID or prefix"))
                .arg(Arg::new("quote").required(true).help("Highlighted text"))
                .arg(model())
                .arg(backend())
                .arg(Arg::new("prompt").required(true)),
        )
        .subcommand(
            Command::new("rm")
                .about("Delete a river, or one node and its descendants")
                .arg(river())
                .arg(Arg::new("node").help("Node ID or prefix")),
        )
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn env_api_keys() -> ApiKeys {
    let var = |name: &str| std::env::var(name).unwrap_or_default();
    ApiKeys {
        openrouter: var("OPENROUTER_API_KEY"),
        openai: var("OPENAI_API_KEY"),
        anthropic: var("ANTHROPIC_API_KEY"),
        google: var("GOOGLE_API_KEY"),
    }
}

async fn open_session(matches: &ArgMatches) -> anyhow::Result<RiverSession> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => RiverConfig::load(path)?,
        None => RiverConfig::default(),
    };
    let store_path = config
        .local_store_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE));
    let local = Arc::new(
        LocalStore::open(&store_path)
            .with_context(|| format!("opening {}", store_path.display()))?,
    );
    let transport = Arc::new(HttpTransport::new(config.connect_timeout())?);
    let sync = SyncCoordinator::offline(&config.sync, local);

    let observer: TokenObserver = Arc::new(|node: NodeId, token: &str| {
        let mut out = std::io::stdout().lock();
        if let Err(err) = out.write_all(token.as_bytes()).and_then(|()| out.flush()) {
            tracing::warn!(node = %node, error = %err, "could not write token to stdout");
        }
    });
    let session = RiverSession::new(&config, transport, sync).with_token_observer(observer);
    session.initialize().await?;
    session.use_api_keys(&env_api_keys());
    Ok(session)
}

/// Load the river named by `key`, matching ID first, then name
async fn open_river(session: &RiverSession, key: &str) -> anyhow::Result<RiverId> {
    let rivers = session.list_rivers(false).await;
    let summary = rivers
        .iter()
        .find(|r| r.id.to_string() == key)
        .or_else(|| rivers.iter().find(|r| r.name == key))
        .ok_or_else(|| anyhow!("no river matches {key:?}"))?;
    session.load_river(summary.id).await?;
    Ok(summary.id)
}

/// Resolve a full node ID or a unique prefix of one
fn find_node(session: &RiverSession, key: &str) -> anyhow::Result<NodeId> {
    let river = session.active_river().ok_or(SessionError::NoActiveRiver)?;
    let mut matches = river
        .nodes
        .keys()
        .filter(|id| id.to_string().starts_with(key));
    match (matches.next(), matches.next()) {
        (Some(id), None) => Ok(*id),
        (None, _) => bail!("no node matches {key:?}"),
        (Some(_), Some(_)) => bail!("{key:?} matches several nodes"),
    }
}

/// `--model` on `--backend`, or the default model when `--model` is absent
///
/// An explicit `--backend` must agree with the default model's backend.
fn pick_model(session: &RiverSession, args: &ArgMatches) -> anyhow::Result<ModelRef> {
    let backend = match args.get_one::<String>("backend").map(String::as_str) {
        Some("openai") => Backend::OpenAi,
        Some("anthropic") => Backend::Anthropic,
        Some("google") => Backend::Google,
        _ => Backend::OpenRouter,
    };
    if let Some(id) = args.get_one::<String>("model") {
        return Ok(ModelRef::new(id, id).with_backend(backend));
    }
    let model = session.last_used_model().unwrap_or_else(|| {
        let id = PREFERRED_DEFAULT_MODELS[0];
        ModelRef::new(id, id)
    });
    if args.value_source("backend") == Some(ValueSource::CommandLine) && model.backend != backend {
        bail!(
            "default model {} is served by {}; pass --model to use {backend}",
            model.id,
            model.backend
        );
    }
    Ok(model)
}

/// Print the answer's fate; streamed text is already on stdout
fn report_generation(session: &RiverSession, node: NodeId) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out)?;
    out.flush()?;
    drop(out);
    let node = session.node(node)?;
    match node.state {
        NodeState::Error => bail!(node.error.unwrap_or_default()),
        _ => {
            eprintln!("[{}]", short(node.id));
            Ok(())
        }
    }
}

fn short(id: NodeId) -> String {
    id.to_string().chars().take(8).collect()
}

fn print_tree(session: &RiverSession, node: &Node, depth: usize) -> anyhow::Result<()> {
    let role = match node.kind {
        NodeType::User => "you",
        NodeType::Ai => node.model.as_ref().map_or("ai", |m| m.name.as_str()),
    };
    let first_line: String = node
        .content
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(72)
        .collect();
    let marker = match node.state {
        NodeState::Generating => " …",
        NodeState::Error => " ✗",
        NodeState::Complete => "",
    };
    let quote = node
        .branch_metadata
        .as_ref()
        .map(|b| format!(" «{}»", b.highlighted_text))
        .unwrap_or_default();
    println!(
        "{}{} {role}:{quote} {first_line}{marker}",
        "  ".repeat(depth),
        short(node.id)
    );
    for child in session.children(node.id)? {
        print_tree(session, &child, depth + 1)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let matches = cli().get_matches();
    let session = open_session(&matches).await?;

    match matches.subcommand() {
        Some(("new", args)) => {
            let name = args
                .get_one::<String>("name")
                .ok_or_else(|| anyhow!("name is required"))?;
            let summary = session.create_river(name.as_str()).await;
            println!("{}", summary.id);
        }
        Some(("list", _)) => {
            for river in session.list_rivers(true).await {
                println!(
                    "{}  {:<24} {:>4} nodes  {}",
                    river.id,
                    river.name,
                    river.node_count,
                    river.last_modified.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Some(("show", args)) => {
            let key = args.get_one::<String>("river").map_or("", String::as_str);
            open_river(&session, key).await?;
            let river = session.active_river().ok_or(SessionError::NoActiveRiver)?;
            let mut roots: Vec<&Node> = river.nodes.values().filter(|n| n.is_root()).collect();
            roots.sort_by_key(|n| (n.timestamp, n.id));
            for root in roots {
                print_tree(&session, root, 0)?;
            }
        }
        Some(("ask", args)) => {
            let key = args.get_one::<String>("river").map_or("", String::as_str);
            let prompt = args.get_one::<String>("prompt").map_or("", String::as_str);
            open_river(&session, key).await?;

            let parent = match args.get_one::<String>("parent") {
                Some(p) => Some(find_node(&session, p)?),
                None => session
                    .active_river()
                    .and_then(|r| r.nodes.values().max_by_key(|n| (n.timestamp, n.id)).map(|n| n.id)),
            };
            let model = pick_model(&session, args)?;
            let question = session.create_user_node(prompt, parent)?;
            let answer = session.create_ai_node_and_stream(question, model).await?;
            session.flush().await;
            report_generation(&session, answer)?;
        }
        Some(("branch", args)) => {
            let key = args.get_one::<String>("river").map_or("", String::as_str);
            open_river(&session, key).await?;
            let source = find_node(
                &session,
                args.get_one::<String>("source").map_or("", String::as_str),
            )?;
            let quote = args.get_one::<String>("quote").map_or("", String::as_str);
            let prompt = args.get_one::<String>("prompt").map_or("", String::as_str);
            let model = pick_model(&session, args)?;

            let (_, answer) = session
                .branch_from_selection(source, quote, prompt, model)
                .await?;
            session.flush().await;
            report_generation(&session, answer)?;
        }
        Some(("rm", args)) => {
            let key = args.get_one::<String>("river").map_or("", String::as_str);
            let river = open_river(&session, key).await?;
            match args.get_one::<String>("node") {
                Some(node) => {
                    let id = find_node(&session, node)?;
                    let removal = session.delete_node(id)?;
                    println!("removed {} node(s)", removal.removed.len());
                }
                None => {
                    session.delete_river(river).await;
                    println!("removed river {river}");
                }
            }
        }
        _ => {}
    }

    session.flush().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use river_sync::SyncConfig;
    use river_test_utils::ScriptedTransport;

    fn session() -> RiverSession {
        let local = Arc::new(LocalStore::in_memory());
        let sync = SyncCoordinator::offline(&SyncConfig::default(), local);
        RiverSession::new(&RiverConfig::default(), Arc::new(ScriptedTransport::new()), sync)
    }

    fn ask(argv: &[&str]) -> ArgMatches {
        let mut args = vec!["riverctl", "ask", "river"];
        args.extend_from_slice(argv);
        args.push("hi");
        let matches = cli().try_get_matches_from(args).unwrap();
        matches.subcommand_matches("ask").unwrap().clone()
    }

    #[test]
    fn explicit_model_takes_the_backend() {
        let model = pick_model(&session(), &ask(&["--model", "gpt-4o", "--backend", "openai"])).unwrap();
        assert_eq!(model.id, "gpt-4o");
        assert_eq!(model.backend, Backend::OpenAi);
    }

    #[test]
    fn default_model_when_backend_is_not_given() {
        let model = pick_model(&session(), &ask(&[])).unwrap();
        assert_eq!(model.id, PREFERRED_DEFAULT_MODELS[0]);
        assert_eq!(model.backend, Backend::OpenRouter);
    }

    #[test]
    fn backend_without_model_must_match_the_default() {
        let err = pick_model(&session(), &ask(&["--backend", "anthropic"])).unwrap_err();
        assert!(err.to_string().contains("--model"));
        assert!(pick_model(&session(), &ask(&["--backend", "openrouter"])).is_ok());
    }
}
