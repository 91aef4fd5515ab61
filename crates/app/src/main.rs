mod logging;
mod settings;
mod shutdown;

use std::sync::Arc;

use clap::Parser;

use voxjockey_audio::device::DeviceManager;
use voxjockey_brain::fast_brain::PromptCallback;
use voxjockey_brain::slow_brain::SummaryCallback;
use voxjockey_osc::PromptResult;
use voxjockey_stt::backend::{KyutaiBackend, MockBackend, MoshiBackend, SttBackend};
use voxjockey_supervisor::{BackendFactory, Supervisor};

use settings::{Cli, SttBackendChoice};

fn backend_factory(choice: SttBackendChoice) -> BackendFactory {
    match choice {
        SttBackendChoice::Mock => Arc::new(|| Box::new(MockBackend::new(vec![])) as Box<dyn SttBackend>),
        SttBackendChoice::Moshi => {
            Arc::new(|| Box::new(MoshiBackend::new("kyutai/moshika-mlx-q8")) as Box<dyn SttBackend>)
        }
        SttBackendChoice::Kyutai => {
            Arc::new(|| Box::new(KyutaiBackend::new("kyutai/stt-1b-en_fr")) as Box<dyn SttBackend>)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard = logging::init()?;
    tracing::info!("starting voxjockey");

    let cli = Cli::parse();

    if cli.list_devices {
        let dm = DeviceManager::new()?;
        println!("Input devices (host: {:?}):", dm.host_id());
        for d in dm.enumerate_devices() {
            let marker = if d.is_default { " (default)" } else { "" };
            println!("- {}{}", d.name, marker);
        }
        return Ok(());
    }

    let config = settings::resolve_config(&cli)?;
    tracing::info!(
        osc_target = %format!("{}:{}", config.osc_ip, config.osc_port),
        llm_endpoint = %config.llm_endpoint,
        fast_rate_s = config.fast_rate_s,
        history_s = config.history_s,
        stt_backend = ?cli.stt_backend,
        "resolved configuration"
    );

    let settings_file = cli.settings_file.clone();

    let prompt_callback: PromptCallback = Arc::new(|result: PromptResult| {
        tracing::info!(
            prompt = %result.prompt,
            style = %result.style,
            mood = %result.mood,
            "fast brain emitted a visual prompt"
        );
    });
    let summary_callback: SummaryCallback = Arc::new(|address: &str, text: String| {
        tracing::info!(address, %text, "slow brain emitted a summary");
    });

    let supervisor = Supervisor::new(
        config,
        backend_factory(cli.stt_backend),
        Some(prompt_callback),
        Some(summary_callback),
    )?;

    let shutdown = shutdown::ShutdownGuard::install();

    supervisor.start().await?;
    tracing::info!("pipeline running; press ctrl-c to stop");

    shutdown.wait().await;

    tracing::info!("stopping pipeline");
    let config_snapshot = supervisor.config_handle().snapshot();
    supervisor.stop().await?;
    settings::save_persisted_settings(&settings_file, &config_snapshot);

    Ok(())
}
