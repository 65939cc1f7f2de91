//! serve command - run the HTTP trigger receiver

use alarmcast_core::NotifierConfig;
use alarmcast_handler::NotifierServer;
use anyhow::Result;
use tracing::{info, warn};

pub async fn serve(config: NotifierConfig) -> Result<()> {
    config.validate()?;

    let settings = config.broker_settings();
    if let Err(err) = settings.validate() {
        // Every audio event will fail until this is fixed
        warn!("{}", err);
    }

    info!(
        bucket = config.trigger.bucket.as_deref().unwrap_or("*"),
        topic = %settings.topic,
        qos = %settings.qos,
        "Starting trigger receiver"
    );

    NotifierServer::new(config).run().await?;
    Ok(())
}
