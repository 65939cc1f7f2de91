//! handle command - run the upload handler once

use alarmcast_core::types::{TriggerPayload, UploadEvent};
use alarmcast_core::NotifierConfig;
use alarmcast_handler::{HandleOutcome, UploadHandler};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::info;

/// Where the event comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    Direct { bucket: String, path: String },
    /// Trigger payload file, or stdin for `-`
    Payload(PathBuf),
}

pub async fn handle(config: NotifierConfig, source: EventSource) -> Result<()> {
    config.validate()?;

    let events = read_events(&source).await?;
    if events.is_empty() {
        info!("Trigger payload carried no upload events");
        return Ok(());
    }

    let signer = alarmcast_storage::signer_from_config(&config.storage).await?;
    let handler = UploadHandler::new(signer, config.broker_settings())
        .url_ttl_secs(config.storage.url_expiry_secs);

    for event in &events {
        if let Some(bucket) = &config.trigger.bucket {
            if &event.bucket != bucket {
                println!("ignored {}/{}", event.bucket, event.path);
                continue;
            }
        }

        match handler.handle(event).await? {
            HandleOutcome::Skipped => println!("skipped {}/{}", event.bucket, event.path),
            HandleOutcome::Published(receipt) => println!(
                "published {}/{} to {} (qos {}, {:?})",
                event.bucket, event.path, receipt.topic, receipt.qos, receipt.elapsed
            ),
        }
    }

    Ok(())
}

async fn read_events(source: &EventSource) -> Result<Vec<UploadEvent>> {
    match source {
        EventSource::Direct { bucket, path } => Ok(vec![UploadEvent::new(bucket, path)]),
        EventSource::Payload(file) => {
            let body = read_payload(file).await?;
            let payload = TriggerPayload::from_json(&body)?;
            Ok(payload.upload_events()?)
        }
    }
}

async fn read_payload(file: &Path) -> Result<Vec<u8>> {
    if file == Path::new("-") {
        let mut body = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut body)
            .await
            .context("Failed to read trigger payload from stdin")?;
        return Ok(body);
    }

    tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read trigger payload {:?}", file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_direct_source() {
        let events = read_events(&EventSource::Direct {
            bucket: "b".into(),
            path: "audio/alarm1.mp3".into(),
        })
        .await
        .unwrap();
        assert_eq!(events, vec![UploadEvent::new("b", "audio/alarm1.mp3")]);
    }

    #[tokio::test]
    async fn test_payload_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"Records":[{"eventName":"ObjectCreated:Put","s3":{"bucket":{"name":"b"},"object":{"key":"audio/my+alarm%281%29.mp3"}}}]}"#,
        )
        .unwrap();

        let events = read_events(&EventSource::Payload(file.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(events, vec![UploadEvent::new("b", "audio/my alarm(1).mp3")]);
    }

    #[tokio::test]
    async fn test_missing_payload_file() {
        let source = EventSource::Payload(PathBuf::from("/nonexistent/event.json"));
        assert!(read_events(&source).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();
        let err = read_events(&EventSource::Payload(file.path().to_path_buf()))
            .await
            .unwrap_err();
        let err = err.downcast::<alarmcast_core::Error>().unwrap();
        assert_eq!(err.code(), "InvalidEvent");
    }
}
