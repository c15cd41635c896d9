use std::path::Path;

use anyhow::Context;
use murmur_application::SpeechConfig;

pub fn run(file: Option<&Path>, path_only: bool) -> anyhow::Result<()> {
    let default_path = SpeechConfig::default_path();
    let source = file.map(Path::to_path_buf).or(default_path);

    if path_only {
        match source {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("no configuration directory on this platform"),
        }
        return Ok(());
    }

    let config = match file {
        Some(path) => {
            let mut config = SpeechConfig::load_from(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.apply_env(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
        None => SpeechConfig::load()?,
    };

    let mut redacted = config;
    for secret in [&mut redacted.api_key, &mut redacted.conversation_api_key] {
        if !secret.is_empty() {
            *secret = "********".to_string();
        }
    }
    println!("{}", serde_json::to_string_pretty(&redacted)?);
    Ok(())
}
