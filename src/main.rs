mod app;
mod event;
mod ui;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use lifeline::config::Config;
use lifeline::offline::{Destination, OfflineRequest, OfflineStore};
use lifeline::session::{SessionStore, SessionToken};
use lifeline::{logging, ClientContext};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "lifeline")]
#[command(about = "Connectivity, session and offline tooling for a storefront backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lifeline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Backend base URL, overriding config and environment
  #[arg(long)]
  api_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Probe the health endpoints once; exits non-zero when unreachable
  Probe,
  /// List a resource collection
  List {
    kind: String,
    /// Query parameter as key=value, repeatable
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
  },
  /// Fetch one item by slug or id
  Get { kind: String, slug_or_id: String },
  /// Inspect or change the persisted session
  Session {
    #[command(subcommand)]
    action: SessionAction,
  },
  /// Manage the offline cache
  Offline {
    #[command(subcommand)]
    action: OfflineAction,
  },
  /// Interactive connectivity console
  Console,
}

#[derive(Subcommand, Debug)]
enum SessionAction {
  /// Store the token from LIFELINE_TOKEN
  Login,
  Status,
  Refresh,
  Logout,
}

#[derive(Subcommand, Debug)]
enum OfflineAction {
  /// Precache the configured assets under the current generation
  Install,
  /// Drop every other generation
  Activate,
  /// Fetch a path through the offline cache
  Fetch {
    path: String,
    /// Treat the request as this kind of resource instead of guessing
    #[arg(long = "as", value_enum)]
    destination: Option<FetchAs>,
  },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum FetchAs {
  Page,
  Image,
  Other,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
  raw
    .split_once('=')
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(url) = args.api_url {
    config.api.base_url = url;
  }

  // The console owns the terminal, so it logs to a file
  let _guard = if matches!(args.command, Command::Console) {
    Some(logging::init_file(&Config::data_dir()?.join("logs"))?)
  } else {
    logging::init_stderr()?;
    None
  };

  let ctx = ClientContext::new(config, Some(SessionStore::open_default()?))?;

  match args.command {
    Command::Probe => {
      let result = ctx.prober.probe().await;
      ctx.status.apply_probe(&result);
      match result.endpoint {
        Some(endpoint) if result.available => println!("reachable via {}", endpoint),
        _ => {
          let status = ctx.status.status();
          return Err(eyre!(
            "{}",
            status.banner_text().unwrap_or("Backend unreachable")
          ));
        }
      }
    }
    Command::List { kind, params } => {
      let params: Map<String, Value> = params
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
      let items = ctx.resources().list(&kind, &Value::Object(params)).await;
      println!("{}", serde_json::to_string_pretty(&items)?);
    }
    Command::Get { kind, slug_or_id } => match ctx.resources().get_by_slug_or_id(&kind, &slug_or_id).await {
      Some(item) => println!("{}", serde_json::to_string_pretty(&item)?),
      None => return Err(eyre!("{} '{}' not found", kind, slug_or_id)),
    },
    Command::Session { action } => run_session(&ctx, action).await?,
    Command::Offline { action } => run_offline(&ctx, action).await?,
    Command::Console => {
      let mut app = app::App::new(ctx);
      app.run().await?;
    }
  }

  Ok(())
}

async fn run_session(ctx: &ClientContext, action: SessionAction) -> Result<()> {
  match action {
    SessionAction::Login => {
      let (token, expires_in) = Config::get_session_token()?;
      ctx
        .session
        .login(SessionToken::expiring_in(token, chrono::Duration::seconds(expires_in)));
      println!("session stored");
    }
    SessionAction::Status => {
      let snapshot = ctx.session.tick();
      match snapshot.expires_at {
        Some(at) => println!("{} (expires {})", snapshot.state.label(), at.to_rfc3339()),
        None => println!("{}", snapshot.state.label()),
      }
    }
    SessionAction::Refresh => {
      let token = ctx.session.refresh().await?;
      println!("session refreshed, expires {}", token.expires_at.to_rfc3339());
    }
    SessionAction::Logout => {
      ctx.logout();
      println!("signed out");
    }
  }
  Ok(())
}

async fn run_offline(ctx: &ClientContext, action: OfflineAction) -> Result<()> {
  let store = Arc::new(match &ctx.config.offline.store_path {
    Some(path) => OfflineStore::open(path)?,
    None => OfflineStore::open_default()?,
  });
  let cache = ctx.offline(store)?;

  match action {
    OfflineAction::Install => {
      let count = cache.install().await?;
      println!("installed {} assets as {}", count, cache.generation());
    }
    OfflineAction::Activate => {
      let removed = cache.activate()?;
      println!("activated {}, removed {} stale entries", cache.generation(), removed);
    }
    OfflineAction::Fetch { path, destination } => {
      let url = url::Url::parse(ctx.config.api.base())
        .and_then(|base| base.join(&path))
        .map_err(|e| eyre!("Invalid path '{}': {}", path, e))?;
      let mut request = OfflineRequest::get(url);
      if let Some(kind) = destination {
        request = request.with_destination(match kind {
          FetchAs::Page => Destination::Navigation,
          FetchAs::Image => Destination::Image,
          FetchAs::Other => Destination::Other,
        });
      }
      let handled = cache.handle(&request).await?;
      println!(
        "{} via {:?}, {} bytes",
        handled.response.status,
        handled.served_from,
        handled.response.body.len()
      );
    }
  }
  Ok(())
}
