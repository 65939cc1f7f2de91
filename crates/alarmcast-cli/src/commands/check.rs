//! check-config command - report resolved configuration without connecting

use alarmcast_core::config::SignerKind;
use alarmcast_core::NotifierConfig;
use anyhow::{bail, Result};

pub fn check_config(config: &NotifierConfig) -> Result<()> {
    let settings = config.broker_settings();

    println!("broker.url:       {}", present(settings.has_url()));
    println!("broker.username:  {}", present(settings.has_username()));
    println!("broker.password:  {}", present(settings.has_password()));
    println!("broker.topic:     {}", settings.topic);
    println!("broker.qos:       {}", settings.qos);
    println!("broker.timeout:   {:?}", settings.timeout);
    println!(
        "broker.ca_file:   {}",
        settings
            .ca_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "platform roots".to_string())
    );
    println!(
        "storage.signer:   {}",
        match config.storage.signer {
            SignerKind::Offline => "offline",
            SignerKind::Sdk => "sdk",
        }
    );
    println!("storage.expiry:   {}s", config.storage.url_expiry_secs);
    println!(
        "trigger.bucket:   {}",
        config.trigger.bucket.as_deref().unwrap_or("(any)")
    );

    let problems = problems(config);
    if problems.is_empty() {
        println!("\nconfiguration OK");
        return Ok(());
    }

    println!();
    for problem in &problems {
        println!("error: {}", problem);
    }
    bail!("{} configuration problem(s) found", problems.len())
}

fn present(set: bool) -> &'static str {
    if set {
        "set"
    } else {
        "MISSING"
    }
}

fn problems(config: &NotifierConfig) -> Vec<String> {
    let mut problems = Vec::new();
    if let Err(err) = config.validate() {
        problems.push(err.to_string());
    }
    if let Err(err) = config.broker_settings().validate() {
        problems.push(err.to_string());
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> NotifierConfig {
        let mut config = NotifierConfig::default();
        config.broker.url = "mqtts://broker.example.com".into();
        config.broker.username = "device".into();
        config.broker.password = "secret".into();
        config
    }

    #[test]
    fn test_complete_config() {
        assert!(problems(&complete()).is_empty());
        assert!(check_config(&complete()).is_ok());
    }

    #[test]
    fn test_missing_password_reported() {
        let mut config = complete();
        config.broker.password = String::new();

        let problems = problems(&config);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("broker.password"));
        assert!(check_config(&config).is_err());
    }

    #[test]
    fn test_multiple_problems() {
        let mut config = NotifierConfig::default();
        config.broker.timeout_secs = 60;
        assert_eq!(problems(&config).len(), 2);
    }
}
