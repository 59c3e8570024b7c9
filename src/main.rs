mod config;
mod db;
mod error;
mod logging;
mod offline;
mod shopping;
mod store;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use offline::{
  ControlMessage, ControllerSettings, HttpNetwork, OfflineController, Request, SqliteCacheStorage,
};
use shopping::{NewItem, ShoppingState};
use store::Store;

#[derive(Parser, Debug)]
#[command(name = "spesa")]
#[command(about = "A local-first shopping list with an offline asset cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/spesa/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  #[command(flatten)]
  Shopping(ShoppingCommand),
  /// Manage the offline asset cache
  #[command(subcommand)]
  Assets(AssetsCommand),
}

/// Which list a command works on.
#[derive(clap::Args, Debug, Clone, Default)]
struct ListSelect {
  /// List to work on (default: the oldest list)
  #[arg(short, long)]
  list: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ShoppingCommand {
  /// Show all lists with their item counts
  Lists {
    #[command(flatten)]
    select: ListSelect,
  },
  /// Manage lists
  #[command(subcommand)]
  List(ListCommand),
  /// Show the items of the current list
  Items {
    #[command(flatten)]
    select: ListSelect,
  },
  /// Add an item to the current list
  Add {
    text: String,
    #[arg(short, long)]
    qty: Option<String>,
    #[arg(short, long)]
    unit: Option<String>,
    #[command(flatten)]
    select: ListSelect,
  },
  /// Mark an item done, or not done again
  Toggle {
    id: String,
    #[command(flatten)]
    select: ListSelect,
  },
  /// Delete an item
  Rm {
    id: String,
    #[command(flatten)]
    select: ListSelect,
  },
  /// Show store and cache locations
  Info,
}

impl ShoppingCommand {
  fn selected_list(&self) -> Option<&str> {
    let select = match self {
      ShoppingCommand::Lists { select }
      | ShoppingCommand::Items { select }
      | ShoppingCommand::Add { select, .. }
      | ShoppingCommand::Toggle { select, .. }
      | ShoppingCommand::Rm { select, .. }
      | ShoppingCommand::List(ListCommand::Rename { select, .. })
      | ShoppingCommand::List(ListCommand::Rm { select, .. }) => select,
      ShoppingCommand::List(ListCommand::Add { .. })
      | ShoppingCommand::List(ListCommand::Dup { .. })
      | ShoppingCommand::Info => return None,
    };
    select.list.as_deref()
  }
}

#[derive(Subcommand, Debug)]
enum ListCommand {
  /// Create a list and make it current
  Add { name: String },
  /// Rename a list
  Rename {
    id: String,
    name: String,
    #[command(flatten)]
    select: ListSelect,
  },
  /// Delete a list and all of its items
  Rm {
    id: String,
    #[command(flatten)]
    select: ListSelect,
  },
  /// Copy a list with its items, all marked not done, and make it current
  Dup { id: String },
}

#[derive(Subcommand, Debug)]
enum AssetsCommand {
  /// Precache the current release and activate it
  Update,
  /// Fetch a path through the offline cache
  Fetch {
    path: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// List cache buckets
  Buckets,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config::data_dir()?.join("logs"))?;

  match args.command {
    Command::Assets(cmd) => run_assets(&config, cmd).await,
    Command::Shopping(cmd) => {
      let store = Store::new(config.database_path()?);
      run_shopping(&store, &config, cmd).await
    }
  }
}

async fn run_shopping(store: &Store, config: &config::Config, cmd: ShoppingCommand) -> Result<()> {
  let list = cmd.selected_list();
  let state = shopping::init(store, list).await?;
  if let Some(wanted) = list {
    if state.current_list_id != wanted {
      return Err(eyre!("No list with id {}", wanted));
    }
  }

  match cmd {
    ShoppingCommand::Lists { .. } => print_lists(store, &state).await?,
    ShoppingCommand::List(ListCommand::Add { name }) => {
      let state = shopping::create_list(store, state, &name).await?;
      print_lists(store, &state).await?;
    }
    ShoppingCommand::List(ListCommand::Rename { id, name, .. }) => {
      let state = shopping::rename_list(store, state, &id, &name).await?;
      print_lists(store, &state).await?;
    }
    ShoppingCommand::List(ListCommand::Rm { id, .. }) => {
      let state = shopping::delete_list(store, state, &id).await?;
      print_lists(store, &state).await?;
    }
    ShoppingCommand::List(ListCommand::Dup { id }) => {
      let state = shopping::duplicate_list(store, state, &id).await?;
      print_items(store, &state).await?;
    }
    ShoppingCommand::Items { .. } => print_items(store, &state).await?,
    ShoppingCommand::Add {
      text, qty, unit, ..
    } => {
      let new = NewItem {
        text,
        qty,
        unit,
      };
      let item = shopping::add_item(store, &state.current_list_id, new).await?;
      info!(id = %item.id, "item added from cli");
      print_items(store, &state).await?;
    }
    ShoppingCommand::Toggle { id, .. } => {
      shopping::toggle_item(store, &id).await?;
      print_items(store, &state).await?;
    }
    ShoppingCommand::Rm { id, .. } => {
      shopping::delete_item(store, &id).await?;
      print_items(store, &state).await?;
    }
    ShoppingCommand::Info => {
      println!("database: {}", config.database_path()?.display());
      println!("schema:   v{}", store.schema_version().await?);
      println!("cache:    {}", config.cache_path()?.display());
      println!("bucket:   {}", config.offline.bucket_name());
    }
  }

  Ok(())
}

async fn print_lists(store: &Store, state: &ShoppingState) -> Result<()> {
  for summary in shopping::summaries(store, state).await? {
    let marker = if summary.list.id == state.current_list_id {
      "*"
    } else {
      " "
    };
    println!(
      "{} {}  {} ({})",
      marker, summary.list.id, summary.list.name, summary.item_count
    );
  }
  Ok(())
}

async fn print_items(store: &Store, state: &ShoppingState) -> Result<()> {
  let state = shopping::refresh(store, state.clone()).await?;
  let items = shopping::items(store, &state.current_list_id).await?;

  if let Some(list) = state.current_list() {
    println!("{} ({})", list.name, items.len());
  }
  for item in items {
    let check = if item.done { "x" } else { " " };
    let meta = match (&item.qty, &item.unit) {
      (Some(q), Some(u)) => format!("  {} {}", q, u),
      (Some(q), None) => format!("  {}", q),
      (None, Some(u)) => format!("  {}", u),
      (None, None) => String::new(),
    };
    println!("[{}] {}  {}{}", check, item.id, item.text, meta);
  }
  Ok(())
}

async fn run_assets(config: &config::Config, cmd: AssetsCommand) -> Result<()> {
  let settings = ControllerSettings::from_config(&config.offline)?;
  let storage = SqliteCacheStorage::open(&config.cache_path()?)?;
  let network = HttpNetwork::new(Duration::from_secs(config.offline.request_timeout_secs))?;
  let controller = OfflineController::new(settings, storage, network);

  match cmd {
    AssetsCommand::Update => {
      let report = controller.update().await?;
      println!("precached {} assets into {}", report.precached, controller.bucket());

      let mut removed = report.removed_buckets;
      if !report.activated {
        println!("waiting; send {} on stdin to activate", skip_waiting_message()?);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
          if let Some(gone) = controller.post_message(line.trim()).await? {
            removed = gone;
            break;
          }
        }
      }

      for name in &removed {
        println!("removed {}", name);
      }
      println!("state: {}", controller.state());
    }
    AssetsCommand::Fetch { path, navigate } => {
      if !controller.resume()? {
        return Err(eyre!(
          "Release {} is not installed; run `spesa assets update` first",
          controller.bucket()
        ));
      }

      let url = config.offline.origin_url()?.join(&path)?;
      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };

      let outcome = controller.handle_fetch(request).await?;
      println!(
        "{} {} bytes via {}{}",
        outcome.response.status,
        outcome.response.body.len(),
        outcome.source,
        outcome
          .response
          .header("content-type")
          .map(|ct| format!(" ({})", ct))
          .unwrap_or_default()
      );
      if let Some(revalidation) = outcome.revalidation {
        revalidation.await?;
      }
    }
    AssetsCommand::Buckets => {
      for name in controller.buckets()? {
        let marker = if name == controller.bucket() { "*" } else { " " };
        println!("{} {}", marker, name);
      }
    }
  }

  Ok(())
}

fn skip_waiting_message() -> Result<String> {
  Ok(serde_json::to_string(&ControlMessage::SkipWaiting)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_list_flag_selects_list_for_shopping_commands() {
    let args = Args::try_parse_from(["spesa", "add", "Milk", "-q", "2", "-l", "abc"]).unwrap();
    match args.command {
      Command::Shopping(cmd) => assert_eq!(cmd.selected_list(), Some("abc")),
      other => panic!("unexpected command {:?}", other),
    }

    let args = Args::try_parse_from(["spesa", "list", "rm", "x", "--list", "abc"]).unwrap();
    match args.command {
      Command::Shopping(cmd) => assert_eq!(cmd.selected_list(), Some("abc")),
      other => panic!("unexpected command {:?}", other),
    }
  }

  #[test]
  fn test_list_flag_rejected_for_assets() {
    assert!(Args::try_parse_from(["spesa", "assets", "buckets", "-l", "abc"]).is_err());
    assert!(Args::try_parse_from(["spesa", "-l", "abc", "assets", "update"]).is_err());
    assert!(Args::try_parse_from(["spesa", "assets", "buckets"]).is_ok());
  }
}
