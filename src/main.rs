use std::env;
use std::process::ExitCode;

use mlm_eng::csv::{member_rows, read_commands, write_members};
use mlm_eng::{BonusSettings, Engine, InMemoryStore, SettingsRegistry};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: mlm-eng <commands.csv>");
        return ExitCode::FAILURE;
    };

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let settings = match BonusSettings::from_env() {
        Ok(Some(settings)) => SettingsRegistry::with_active(settings),
        Ok(None) => Ok(SettingsRegistry::with_defaults()),
        Err(e) => Err(e),
    };
    let settings = match settings {
        Ok(registry) => registry,
        Err(e) => {
            error!("invalid bonus settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    let commands = match read_commands(path) {
        Ok(commands) => commands,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = Engine::with_store(InMemoryStore::new(), settings);
    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(command) => {
                    if cmd_sender.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(cmd_receiver)).await;

    for item in engine.reconciliation() {
        warn!(member = item.member, reason = %item.reason, "placement awaits reconciliation");
    }

    if let Err(e) = write_members(member_rows(&engine)) {
        error!("failed to write report: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
