// This is the entry point of the Discord bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases, APIs)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::moderation::ModerationService;
use crate::discord::automod_handler;
use crate::discord::guild_actions::{SerenityModerationActions, SerenityNotifySink};
use crate::discord::{Data, Error};
use crate::infra::moderation::SqliteModStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// How often stale spam-tracking buckets are swept out of memory.
const RATE_STATE_SWEEP_SECS: u64 = 300;

/// Event handler for non-command Discord events.
/// Every guild message runs through the moderation pipeline here.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if let Err(e) = automod_handler::handle_message(ctx, new_message, data).await {
                tracing::error!("Automod pipeline failed: {}", e);
            }
        }

        _ => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Get Discord bot token from environment
    let token = std::env::var("DISCORD_TOKEN").expect(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    );

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    let data_dir = "data";
    std::fs::create_dir_all(data_dir).expect("Failed to create data directory for SQLite files");
    let moderation_db_path = format!("{}/moderation.db", data_dir);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create the store here; the service itself is assembled in the framework
    // setup closure once an HTTP client exists.

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{}?mode=rwc", moderation_db_path))
        .await
        .expect("Failed to connect to moderation DB");
    let mod_store = SqliteModStore::new(pool);
    mod_store
        .migrate()
        .await
        .expect("Failed to migrate moderation DB");

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================
    // Configure the poise framework with our commands and settings.

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            // Register all our commands here
            commands: vec![
                discord::commands::moderation::warn(),
                discord::commands::moderation::warnings(),
                discord::commands::moderation::clearwarns(),
                discord::commands::moderation::infractions(),
                discord::commands::moderation::clear(),
                discord::commands::moderation::kick(),
                discord::commands::moderation::ban(),
                discord::commands::automod::automod(),
            ],
            // Event handler for messages and other events
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, ready, framework| {
            Box::pin(async move {
                println!("🤖 Bot is starting up...");

                // Register slash commands globally (can take up to an hour to propagate)
                // For faster development, use register_in_guild instead:
                // poise::builtins::register_in_guild(ctx, &framework.options().commands, guild_id).await?;
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                println!("✅ Commands registered!");

                let actions = SerenityModerationActions::new(ctx.http.clone());
                let notifier = SerenityNotifySink::new(ctx.http.clone());
                let moderation = Arc::new(ModerationService::new(mod_store, actions, notifier));
                moderation.set_bot_identity(ready.user.id.get());

                // Background sweep so per-user spam buckets don't pile up in
                // guilds that went quiet.
                let sweep_service = Arc::clone(&moderation);
                tokio::spawn(async move {
                    use std::time::Duration as StdDuration;
                    use tokio::time::sleep;

                    loop {
                        sleep(StdDuration::from_secs(RATE_STATE_SWEEP_SECS)).await;
                        sweep_service.sweep_rate_state();
                        tracing::debug!("Swept stale spam-tracking buckets");
                    }
                });

                println!("🚀 Bot is ready!");

                Ok(Data { moderation })
            })
        })
        .build();

    // Create the client and start the bot
    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
