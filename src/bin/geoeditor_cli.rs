use geoeditor::{
    engine::{EditorEngine, Operation, SessionState},
    export::build_export,
    map_host::{HttpMapHost, MapSession},
    project::ProjectKind,
    store::{FileMirror, HttpRemoteSink, NullRemoteSink, ProjectStore, RemoteSink},
    workflow::ProjectAction,
};
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::{env, fs};
use tracing_subscriber::EnvFilter;

const DEFAULT_SESSION_PATH: &str = ".geoeditor_session.json";
const DEFAULT_DATA_DIR: &str = ".";
const DEFAULT_SERVER: &str = "http://localhost:5000";

#[derive(Serialize)]
struct ProjectSummary {
    id: String,
    name: String,
    kind: ProjectKind,
}

#[derive(Serialize)]
struct StateSummary {
    dataset_count: usize,
    category_count: usize,
    featurelayer_count: usize,
    projects: Vec<ProjectSummary>,
    current_step: geoeditor::workflow::Step,
    draft_project: Option<String>,
}

struct GlobalArgs {
    session_path: String,
    data_dir: String,
    server: Option<String>,
    cmd_idx: usize,
}

fn usage() {
    eprintln!(
        "Usage:\n  \
  geoeditor_cli --version\n  \
  geoeditor_cli [FLAGS] capabilities\n  \
  geoeditor_cli [FLAGS] op '<operation-json>'\n  \
  geoeditor_cli [FLAGS] state-summary\n  \
  geoeditor_cli [FLAGS] list-projects\n  \
  geoeditor_cli [FLAGS] export PROJECT_ID OUTPUT.json\n  \
  geoeditor_cli [FLAGS] delete-project PROJECT_ID\n\n  \
  Flags:\n  \
  --state PATH     session file (default {DEFAULT_SESSION_PATH})\n  \
  --data-dir DIR   project record directory (default current dir)\n  \
  --server URL     sync and load through this server\n\n  \
  Tip: pass @file.json instead of inline JSON"
    );
}

fn load_json_arg(value: &str) -> Result<String> {
    if let Some(path) = value.strip_prefix('@') {
        fs::read_to_string(path).with_context(|| format!("Could not read JSON file '{path}'"))
    } else {
        Ok(value.to_string())
    }
}

fn load_session(path: &str) -> Result<SessionState> {
    if std::path::Path::new(path).exists() {
        Ok(SessionState::load_from_path(path)?)
    } else {
        Ok(SessionState::default())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Could not serialize JSON output")?;
    println!("{text}");
    Ok(())
}

fn parse_global_args(args: &[String]) -> GlobalArgs {
    let mut parsed = GlobalArgs {
        session_path: DEFAULT_SESSION_PATH.to_string(),
        data_dir: DEFAULT_DATA_DIR.to_string(),
        server: None,
        cmd_idx: 1,
    };
    let mut i = 1;
    while i + 1 < args.len() {
        match args[i].as_str() {
            "--state" => parsed.session_path = args[i + 1].clone(),
            "--data-dir" => parsed.data_dir = args[i + 1].clone(),
            "--server" => parsed.server = Some(args[i + 1].clone()),
            _ => break,
        }
        i += 2;
    }
    parsed.cmd_idx = i;
    parsed
}

fn build_engine(global: &GlobalArgs) -> EditorEngine {
    let mirror = FileMirror::new(global.data_dir.clone());
    let remote: Box<dyn RemoteSink> = match &global.server {
        Some(url) => Box::new(HttpRemoteSink::new(url.clone())),
        None => Box::new(NullRemoteSink),
    };
    let store = ProjectStore::new(Box::new(mirror), remote);
    let base = global.server.as_deref().unwrap_or(DEFAULT_SERVER);
    let gateway = Box::new(geoeditor::data_source::HttpGateway::new(base));
    let map = MapSession::new(Box::new(HttpMapHost::new(base)));
    EditorEngine::new(store, gateway, map)
}

fn summarize_state(engine: &EditorEngine) -> StateSummary {
    let collections = engine.store().collections();
    let mut projects: Vec<ProjectSummary> = Vec::new();
    for d in &collections.datasets {
        projects.push(ProjectSummary {
            id: d.id.clone(),
            name: d.name.clone(),
            kind: ProjectKind::Dataset,
        });
    }
    for c in &collections.categories {
        projects.push(ProjectSummary {
            id: c.id.clone(),
            name: c.name.clone(),
            kind: ProjectKind::Category,
        });
    }
    for f in &collections.featurelayers {
        projects.push(ProjectSummary {
            id: f.id.clone(),
            name: f.name.clone(),
            kind: ProjectKind::FeatureLayer,
        });
    }
    projects.sort_by(|a, b| a.id.cmp(&b.id));

    StateSummary {
        dataset_count: collections.datasets.len(),
        category_count: collections.categories.len(),
        featurelayer_count: collections.featurelayers.len(),
        projects,
        current_step: engine.workflow().current_step(),
        draft_project: engine.draft_project().map(|p| p.id().to_string()),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        bail!("Missing command");
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("geoeditor {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let global = parse_global_args(&args);
    if args.len() <= global.cmd_idx {
        usage();
        bail!("Missing command");
    }
    let command = &args[global.cmd_idx];
    let cmd_idx = global.cmd_idx;

    match command.as_str() {
        "capabilities" => print_json(&EditorEngine::capabilities()),
        "op" => {
            if args.len() <= cmd_idx + 1 {
                usage();
                bail!("Missing operation JSON");
            }
            let json = load_json_arg(&args[cmd_idx + 1])?;
            let op: Operation =
                serde_json::from_str(&json).context("Invalid operation JSON")?;

            let mut engine = build_engine(&global);
            engine.restore_session(load_session(&global.session_path)?);
            let result = engine.apply(op)?;
            engine.session().save_to_path(&global.session_path)?;
            print_json(&result)
        }
        "state-summary" => {
            let mut engine = build_engine(&global);
            engine.restore_session(load_session(&global.session_path)?);
            print_json(&summarize_state(&engine))
        }
        "list-projects" => {
            let engine = build_engine(&global);
            print_json(&summarize_state(&engine).projects)
        }
        "export" => {
            if args.len() <= cmd_idx + 2 {
                usage();
                bail!("export requires: PROJECT_ID OUTPUT.json");
            }
            let id = &args[cmd_idx + 1];
            let output = &args[cmd_idx + 2];
            let engine = build_engine(&global);
            let project = engine
                .store()
                .find(id)
                .ok_or_else(|| anyhow!("Project '{id}' not found"))?;
            let config = build_export(&project, ProjectAction::View);
            config.save_to_path(output)?;
            println!("Wrote export for '{id}' to '{output}'");
            Ok(())
        }
        "delete-project" => {
            if args.len() <= cmd_idx + 1 {
                usage();
                bail!("Missing project id");
            }
            let id = args[cmd_idx + 1].clone();
            let mut engine = build_engine(&global);
            engine.restore_session(load_session(&global.session_path)?);
            let result = engine.apply(Operation::DeleteProject { id })?;
            engine.session().save_to_path(&global.session_path)?;
            print_json(&result)
        }
        _ => {
            usage();
            Err(anyhow!("Unknown command '{command}'"))
        }
    }
}
