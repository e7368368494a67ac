use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use interview_core::feedback::{FeedbackOutcome, PipelineOptions, generate_feedback};
use interview_core::generic_types::SessionDescriptor;
use interview_core::persistence::RetryPolicy;
use interview_core::reviewer::{Scorer, ScorerClient};
use interview_core::session_state::InterviewSession;
use interview_core::store::{InterviewStore, SqliteInterviewStore};
use interview_service::config::Config;
use interview_service::dispatcher::ActionDispatcher;
use interview_service::prompt_loader;
use interview_service::routes;
use interview_service::voice_adapter::RealtimeVoiceConnector;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Voice interview practice service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the interview HTTP API
    Serve,
    /// Run one live voice session for an existing interview in this terminal
    Rehearse {
        interview_id: String,
        /// Score the captured answers once the session ends
        #[arg(long)]
        feedback: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting interview service...");

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();

    // --- 4. Load Prompts ---
    let prompts = prompt_loader::load_prompt_book(&config.prompts_dir)
        .context("Failed to load LLM prompts")?;

    // --- 5. Initialize Store and API Clients ---
    let store: Arc<dyn InterviewStore> = Arc::new(
        SqliteInterviewStore::connect(&config.database_url)
            .await
            .context("Failed to open interview database")?,
    );
    let scorer_client = ScorerClient::new(
        config.scoring_provider,
        config.scoring_api_key.clone(),
        config.scoring_models.clone(),
        prompts.clone(),
        config.scoring_timeout,
    );
    tracing::info!("Scoring with {}", scorer_client.provider());
    let scorer: Arc<dyn Scorer> = Arc::new(scorer_client);
    let policy = RetryPolicy::default().with_max_attempts(config.persist_max_attempts);
    let pipeline = PipelineOptions {
        item_timeout: config.scoring_timeout,
    };

    match args.command {
        Command::Serve => {
            let dispatcher = ActionDispatcher::new(store, scorer)
                .with_retry_policy(policy)
                .with_pipeline_options(pipeline)
                .with_voice(
                    prompts,
                    config.voice.profile.clone(),
                    config.voice.workflow_id.clone(),
                );

            let listener = tokio::net::TcpListener::bind(config.bind_address)
                .await
                .with_context(|| format!("Failed to bind {}", config.bind_address))?;
            tracing::info!("Interview API listening on {}", config.bind_address);

            axum::serve(listener, routes::router(dispatcher))
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Command::Rehearse {
            interview_id,
            feedback,
        } => {
            let interview = store
                .get(&interview_id)
                .await?
                .with_context(|| format!("Interview {interview_id} not found"))?;
            let descriptor = SessionDescriptor::for_interview(
                &interview,
                &config.voice.profile,
                &prompts,
                config.voice.workflow_id.as_deref(),
            );
            let connector = Arc::new(RealtimeVoiceConnector::new(&config.voice));
            let mut session =
                InterviewSession::new(interview, descriptor, connector, store.clone(), policy);

            let stop = session.stop_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Ctrl-C received, ending the session.");
                    stop.stop();
                }
            });

            let mut progress = session.progress();
            let printer = tokio::spawn(async move {
                while progress.changed().await.is_ok() {
                    let p = *progress.borrow_and_update();
                    println!(
                        "[{:?}] question {}/{} ({} answered)",
                        p.state,
                        (p.cursor + 1).min(p.total),
                        p.total,
                        p.captured
                    );
                }
            });

            let outcome = session.conduct().await;
            printer.abort();
            let outcome = outcome.context("Voice session failed")?;
            println!(
                "Session ended ({:?}): {} answer(s) captured.",
                outcome.end_reason,
                outcome.captured.len()
            );
            if !outcome.unpersisted.is_empty() {
                println!(
                    "Warning: answers for questions {:?} were not saved.",
                    outcome.unpersisted
                );
            }

            if feedback {
                match generate_feedback(store.as_ref(), scorer.as_ref(), &interview_id, &pipeline)
                    .await
                    .context("Feedback generation failed")?
                {
                    FeedbackOutcome::Generated {
                        overall_score,
                        items,
                    } => {
                        for item in &items {
                            println!(
                                "Q{} scored {}/10: {}",
                                item.question_index + 1,
                                item.score,
                                item.tips
                            );
                        }
                        println!("Overall score: {overall_score:.1}");
                    }
                    FeedbackOutcome::AlreadyCompleted { overall_score } => {
                        println!("Feedback already generated (overall score {overall_score:?}).");
                    }
                }
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received.");
}
