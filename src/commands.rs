//! Command-line commands and the wiring they run against.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::app::{App, Registration};
use crate::cache::{CacheStorage, NoopStorage, SqliteStorage};
use crate::config::Config;
use crate::connectivity::ReachabilityProbe;
use crate::dataverse::{AbsenceData, DataverseClient, ParticipationData};
use crate::event::EventHandler;
use crate::http::{Fetcher, HttpFetcher, Request};
use crate::queue::{DrainOutcome, OfflineQueue, SqliteKeyValueStore};
use crate::worker::{
  self, ClientMessage, ControlMessage, ServiceWorker, WorkerHandle, WorkerSettings,
  BACKGROUND_SYNC_TAG,
};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Cache the static asset manifest as a new generation
  Install,
  /// Activate the waiting cache generation now
  Activate,
  /// Fetch a URL through the caching layer
  Fetch {
    url: Url,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
  },
  /// Register participation or absence for today
  #[command(subcommand)]
  Register(RegisterCommand),
  /// List operations waiting for connectivity
  Queue,
  /// Replay the offline queue now
  Sync,
  /// Show your most recent absences
  Absences {
    #[arg(long, default_value_t = 10)]
    limit: usize,
  },
  /// Show your most recent participations
  Participations {
    #[arg(long, default_value_t = 10)]
    limit: usize,
  },
  /// Keep running: probe connectivity and sync whenever it returns
  Watch,
}

#[derive(Subcommand, Debug)]
pub enum RegisterCommand {
  Participation,
  Absence {
    /// Syk, Permisjon or Annet
    #[arg(long = "type")]
    absence_type: String,
    #[arg(long)]
    description: Option<String>,
  },
}

/// Everything a command needs, wired up once per process.
pub struct Context {
  config: Config,
  worker: WorkerHandle,
  dataverse: DataverseClient,
  probe: ReachabilityProbe,
  app: App,
  forced_offline: bool,
}

impl Context {
  pub async fn build(
    config: Config,
    data_dir: &Path,
    session: Session,
    forced_offline: bool,
  ) -> Result<Self> {
    let storage: Arc<dyn CacheStorage> = if config.offline.enabled {
      Arc::new(SqliteStorage::open(&data_dir.join("cache.db"))?)
    } else {
      Arc::new(NoopStorage)
    };

    let network: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(None)?);
    let worker = worker::spawn(ServiceWorker::new(
      WorkerSettings::from_config(&config)?,
      storage,
      network,
    )?);

    let store = Arc::new(SqliteKeyValueStore::open(&data_dir.join("storage.db"))?);
    let queue = Arc::new(OfflineQueue::load(store));

    let dataverse = DataverseClient::new(
      &config,
      Arc::new(worker.clone()),
      Config::get_access_token(),
    )?;

    let probe = ReachabilityProbe::new(
      Arc::new(HttpFetcher::new(Some(config.connectivity.timeout()))?),
      config.probe_url(),
    );
    let online = !forced_offline && probe.check().await;
    info!(online, forced_offline, "initial connectivity");

    let user_id = session.resolve(&config, &dataverse, online).await;

    let app = App::new(
      user_id,
      online,
      queue,
      Arc::new(dataverse.clone()),
      config.sync.failure_policy,
    );

    Ok(Self {
      config,
      worker,
      dataverse,
      probe,
      app,
      forced_offline,
    })
  }
}

/// Who the process acts as, before it is resolved to a backend user id.
#[derive(Debug, Clone, Default)]
pub struct Session {
  pub user_id: Option<String>,
  pub entra_id: Option<String>,
}

impl Session {
  /// A backend user id wins. An Entra id is looked up, and the user record is
  /// created when missing and online. Lookup failures leave no session.
  async fn resolve(
    self,
    config: &Config,
    dataverse: &DataverseClient,
    online: bool,
  ) -> Option<String> {
    if let Some(user_id) = self.user_id {
      return Some(user_id);
    }
    let entra_id = self.entra_id?;

    let user = if online {
      dataverse
        .get_or_create_user(&config.session.new_user(&entra_id))
        .await
    } else {
      // Served from the response cache when the network is down
      dataverse
        .get_user_by_entra_id(&entra_id)
        .await
        .and_then(|user| user.ok_or_else(|| eyre!("No user record for {}", entra_id)))
    };

    match user {
      Ok(user) => {
        info!(user_id = %user.id, name = user.name.as_deref().unwrap_or("-"), "signed in");
        Some(user.id)
      }
      Err(e) => {
        warn!(error = %e, entra_id = %entra_id, "could not resolve user");
        None
      }
    }
  }
}

pub async fn execute(command: Command, mut ctx: Context) -> Result<()> {
  match command {
    Command::Install => {
      ctx.worker.install().await?;
      print_status(&ctx.worker).await?;
    }
    Command::Activate => {
      ctx.worker.post_message(ControlMessage::SkipWaiting)?;
      print_status(&ctx.worker).await?;
    }
    Command::Fetch {
      url,
      navigate,
      accept,
    } => {
      let mut request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };
      if let Some(accept) = accept {
        request = request.with_header("Accept", &accept);
      }

      let response = ctx.worker.fetch(&request).await?;
      println!("{} {}", response.status, response.status_text);
      for (name, value) in &response.headers {
        println!("{}: {}", name, value);
      }
      println!();
      println!("{}", response.text());
    }
    Command::Register(register) => {
      let message = match register {
        RegisterCommand::Participation => {
          match ctx
            .app
            .register_participation(ParticipationData::default())
            .await?
          {
            Registration::Sent => "Deltakelse registrert!",
            Registration::Queued => "Deltakelse lagret for synkronisering",
          }
        }
        RegisterCommand::Absence {
          absence_type,
          description,
        } => {
          let data = AbsenceData::new(&absence_type, description.as_deref());
          match ctx.app.register_absence(data).await? {
            Registration::Sent => "Fravær registrert!",
            Registration::Queued => "Fravær lagret for synkronisering",
          }
        }
      };
      println!("{}", message);
    }
    Command::Queue => {
      let items = ctx.app.queue().items();
      if items.is_empty() {
        println!("No pending operations");
      }
      for item in items {
        println!(
          "{}  {:<13}  {}  attempts={}  {}",
          item.id,
          item.kind.to_string(),
          item.timestamp.to_rfc3339(),
          item.attempts,
          item.data
        );
      }
    }
    Command::Sync => {
      // Round-trip through the worker the way a platform sync event would
      let mut messages = ctx.worker.connect()?;
      ctx.worker.sync(BACKGROUND_SYNC_TAG)?;
      match messages.recv().await {
        Some(ClientMessage::BackgroundSync { message }) => {
          info!(%message, "worker requested sync")
        }
        None => return Err(eyre!("Worker closed the client channel")),
      }

      match ctx.app.sync_now().await? {
        DrainOutcome::AlreadyRunning => println!("A sync is already running"),
        DrainOutcome::Completed(report) => println!(
          "Synced {} of {} operation(s); {} dropped, {} kept for retry",
          report.succeeded, report.attempted, report.dropped, report.requeued
        ),
      }
    }
    Command::Absences { limit } => {
      let user_id = ctx
        .app
        .user_id()
        .ok_or_else(|| eyre!("User data not available; sign in with --user or --entra-id"))?;

      let absences = ctx.dataverse.get_absences(user_id, limit).await?;
      if absences.is_empty() {
        println!("Ingen data funnet.");
      }
      for absence in absences {
        println!(
          "{}  {:<10}  {:<10}  {}",
          absence.date,
          absence.absence_type.as_deref().unwrap_or("-"),
          absence.status.as_deref().unwrap_or("-"),
          absence.description.as_deref().unwrap_or("")
        );
      }
    }
    Command::Participations { limit } => {
      let user_id = ctx
        .app
        .user_id()
        .ok_or_else(|| eyre!("User data not available; sign in with --user or --entra-id"))?;

      let participations = ctx.dataverse.get_participations(user_id, limit).await?;
      if participations.is_empty() {
        println!("Ingen data funnet.");
      }
      for participation in participations {
        println!(
          "{}  {}",
          participation.date,
          participation.status.as_deref().unwrap_or("-")
        );
      }
    }
    Command::Watch => watch(&mut ctx).await?,
  }

  Ok(())
}

async fn watch(ctx: &mut Context) -> Result<()> {
  if let Err(e) = ctx.worker.install().await {
    warn!(error = %e, "cache install failed, previous generation keeps serving");
  }

  let mut events = EventHandler::new();
  events.forward_worker_messages(ctx.worker.connect()?);
  events.forward_ctrl_c();

  let probe = if ctx.forced_offline {
    None
  } else {
    Some(ctx.probe.clone().spawn(
      ctx.config.connectivity.interval(),
      ctx.app.is_online(),
      events.sender(),
    ))
  };

  let mut connectivity = ctx.app.connectivity();
  tokio::spawn(async move {
    while connectivity.changed().await.is_ok() {
      let online = *connectivity.borrow_and_update();
      let status = if online {
        "Tilkoblet til internett"
      } else {
        "Du er i offline-modus"
      };
      println!("{}", status);
    }
  });

  println!(
    "Watching ({}), Ctrl-C to stop",
    if ctx.app.is_online() { "online" } else { "offline" }
  );
  ctx.app.run(&mut events).await?;

  if let Some(probe) = probe {
    probe.abort();
  }
  Ok(())
}

async fn print_status(worker: &WorkerHandle) -> Result<()> {
  let status = worker.status().await?;
  println!("cache:   {} ({})", status.cache_name, status.state);
  println!("active:  {}", status.active.as_deref().unwrap_or("-"));
  println!("waiting: {}", status.waiting.as_deref().unwrap_or("-"));
  println!("entries: {}", status.entries);
  Ok(())
}
