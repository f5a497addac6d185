use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::time::ChronoLocal;
use voicenav_core::{
    AppState, Collaborators, ConnectionState, ControllerConfig, SessionConfig, SessionController,
    SessionLog, SharedAppState, ToolDispatcher, tool_schemas,
};
use voicenav_service::audio_adapter::{CpalMicrophone, CpalSpeaker};
use voicenav_service::config::Config;
use voicenav_service::gemini_adapter::GeminiConnector;
use voicenav_service::instructions;

/// How often new session log entries are printed.
const LOG_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(version, about = "Voice navigation assistant for the clinic app")]
struct Cli {
    /// Prebuilt voice of the assistant. Overrides VOICENAV_VOICE.
    #[arg(long)]
    voice: Option<String>,
    /// Text or markdown file with the system instruction.
    #[arg(long)]
    instructions: Option<PathBuf>,
    /// Input device name. Defaults to the system default.
    #[arg(long)]
    input_device: Option<String>,
    /// Output device name. Defaults to the system default.
    #[arg(long)]
    output_device: Option<String>,
    /// Print the available audio devices and exit.
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Parse Command-Line Arguments ---
    let args = Cli::parse();

    if args.list_devices {
        println!("Input devices:\n{}", voicenav_native_utils::device::get_available_inputs()?);
        println!("Output devices:\n{}", voicenav_native_utils::device::get_available_outputs()?);
        return Ok(());
    }

    // --- 2. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 3. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting voicenav service...");

    // --- 4. Load Instructions ---
    let system_instruction = instructions::load_instructions(args.instructions.as_deref())
        .context("Failed to load system instruction")?;

    // --- 5. Session Controller Setup ---
    let app_state = SharedAppState::new();
    let log = SessionLog::new();
    let controller_config = ControllerConfig {
        session: SessionConfig {
            voice: args.voice.unwrap_or(config.voice),
            system_instruction,
            tools: tool_schemas(),
        },
        capture_interval: config.capture_interval,
    };
    let collaborators = Collaborators {
        connector: Arc::new(GeminiConnector::new(&config.gemini_api_key, &config.model)),
        microphone: Arc::new(CpalMicrophone::new(args.input_device)),
        speaker: Arc::new(CpalSpeaker::new(args.output_device)),
        dispatcher: ToolDispatcher::new(Arc::new(app_state.clone())),
    };
    let controller = SessionController::spawn(controller_config, collaborators, log.clone());

    // --- 6. Connect ---
    controller
        .connect()
        .await
        .context("Failed to start voice session")?;
    println!("Connected. Speak to navigate the app; press Ctrl+C to quit.");
    print_app_state(&app_state.snapshot());

    // --- 7. Main Loop ---
    let mut ui_rx = app_state.subscribe();
    let mut state_rx = controller.subscribe();
    let mut log_ticker = tokio::time::interval(LOG_POLL_INTERVAL);
    let mut printed = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Ctrl+C received, shutting down.");
                break;
            }
            changed = ui_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = ui_rx.borrow_and_update().clone();
                print_app_state(&snapshot);
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                if state == ConnectionState::Idle {
                    println!("Session ended.");
                    break;
                }
            }
            _ = log_ticker.tick() => {
                printed = print_new_entries(&log, printed);
            }
        }
    }

    // --- 8. Shutdown ---
    controller.disconnect().await?;
    print_new_entries(&log, printed);
    Ok(())
}

fn print_new_entries(log: &SessionLog, printed: usize) -> usize {
    let entries = log.since(printed);
    for entry in &entries {
        println!("{}", entry);
    }
    printed + entries.len()
}

fn print_app_state(state: &AppState) {
    let form = state
        .form
        .iter()
        .map(|(field, value)| format!("{}={:?}", field, value))
        .collect::<Vec<_>>()
        .join(", ");
    println!("[app] section: {} | form: {}", state.active_section, form);
}
