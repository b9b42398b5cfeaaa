//! Provision the default JetStream topology.
//!
//! Safe to run repeatedly: streams that already exist are left as they are.

use event_delivery::{connect, disconnect, EventsConfig, Provisioned, StreamAdmin};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = EventsConfig::from_env()?;
    tracing::info!(url = %config.nats_url, "Provisioning event streams");

    let conn = connect(&config.connection_config()).await?;
    let admin = StreamAdmin::new(conn.jetstream());

    let result = admin.ensure_default_streams().await;
    match &result {
        Ok(outcomes) => {
            let created = outcomes
                .iter()
                .filter(|(_, outcome)| *outcome == Provisioned::Created)
                .count();
            for (stream, outcome) in outcomes {
                tracing::info!(stream = %stream, outcome = ?outcome, "Stream provisioned");
            }
            tracing::info!(
                created = created,
                existing = outcomes.len() - created,
                "Event streams ready"
            );
        }
        Err(e) => tracing::error!(error = %e, "Stream provisioning failed"),
    }

    disconnect(Some(&conn)).await?;
    result?;
    Ok(())
}
