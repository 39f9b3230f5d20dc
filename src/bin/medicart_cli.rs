use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use medicart_api::{
    config::{self, AppConfig},
    db::{self, DbPool},
    events::{Event, EventSender},
    openapi::ApiDocV1,
    services::OrderHistoryService,
};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;
use utoipa::OpenApi;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Needs neither configuration nor a database.
        Commands::Openapi => {
            println!("{}", ApiDocV1::openapi().to_pretty_json()?);
        }
        Commands::Migrate => {
            let context = CliContext::initialize().await?;
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            report(cli.json, "Migrations applied", json!({ "migrated": true }))?;
        }
        Commands::RebuildHistory(args) => {
            let context = CliContext::initialize().await?;
            handle_rebuild_history(&context, args, cli.json).await?;
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "medicart", about = "Medicart maintenance CLI", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Rebuild the order-history projection from stored orders
    RebuildHistory(RebuildHistoryArgs),
    /// Print the OpenAPI document
    Openapi,
}

#[derive(Args)]
#[command(group(
    clap::ArgGroup::new("target").required(true).args(["user_id", "all"])
))]
struct RebuildHistoryArgs {
    /// Rebuild a single user's history
    #[arg(long)]
    user_id: Option<Uuid>,
    /// Rebuild every user's history
    #[arg(long, action = ArgAction::SetTrue)]
    all: bool,
}

struct CliContext {
    _config: AppConfig,
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(32);
        let event_sender = Arc::new(EventSender::new(event_tx));

        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                debug!(target: "medicart_cli", event = ?event, "received async event");
            }
        });

        Ok(Self {
            _config: config,
            db,
            event_sender,
        })
    }

    fn order_history_service(&self) -> OrderHistoryService {
        OrderHistoryService::new(self.db.clone(), self.event_sender.clone())
    }
}

async fn handle_rebuild_history(
    context: &CliContext,
    args: RebuildHistoryArgs,
    json: bool,
) -> Result<()> {
    let service = context.order_history_service();

    match args.user_id {
        Some(user_id) => {
            let entries = service
                .rebuild_for_user(user_id)
                .await
                .with_context(|| format!("failed to rebuild history for {}", user_id))?;
            report(
                json,
                &format!("Rebuilt {} history entries for user {}", entries, user_id),
                json!({ "userId": user_id, "entries": entries }),
            )
        }
        None => {
            let entries = service
                .rebuild_all()
                .await
                .context("failed to rebuild order history")?;
            report(
                json,
                &format!("Rebuilt {} history entries", entries),
                json!({ "entries": entries }),
            )
        }
    }
}

fn report(json: bool, message: &str, value: serde_json::Value) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", message);
    }
    Ok(())
}
