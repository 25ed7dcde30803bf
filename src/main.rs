use clap::Parser;
use color_eyre::eyre::Report;
use notification_hub::Settings;
use notification_hub::layers::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Report> {
    Telemetry.install()?;

    let settings = Settings::parse();
    tracing::debug!(?settings, "Parsed settings");

    notification_hub::run(settings).await
}
