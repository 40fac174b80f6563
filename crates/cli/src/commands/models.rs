//! `physiogold models`: list models for an API key and show the selection.

use physiogold_core::provider::{Credential, ModelDescriptor, ProviderFactory};
use physiogold_providers::{GeminiFactory, ModelSelector, SelectionSource};
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    api_key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let credential = Credential::new(api_key).ok_or("API key is empty")?;

    let provider = GeminiFactory::from_settings(&config.provider).build(&credential)?;
    let selector = ModelSelector::from_settings(&config.provider);

    let models = provider.list_models().await?;
    println!("Models visible to this key ({}):", models.len());
    for line in describe(&models, &config.provider.generation_capability) {
        println!("   {line}");
    }

    let selection = selector.select(provider.as_ref()).await;
    println!();
    match selection.source {
        SelectionSource::Discovered => println!("Selected: {}", selection.model),
        SelectionSource::Fallback => println!("Selected: {} (fallback)", selection.model),
    }

    Ok(())
}

fn describe(models: &[ModelDescriptor], capability: &str) -> Vec<String> {
    models
        .iter()
        .map(|m| {
            let marker = if m.supports(capability) { "*" } else { " " };
            match &m.display_name {
                Some(name) => format!("{marker} {} ({name})", m.id),
                None => format!("{marker} {}", m.id),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_generation_capable_models() {
        let mut flash = ModelDescriptor::new("models/gemini-1.5-flash", &["generateContent"]);
        flash.display_name = Some("Gemini 1.5 Flash".into());
        let embed = ModelDescriptor::new("models/embedding-001", &["embedContent"]);

        let lines = describe(&[flash, embed], "generateContent");
        assert_eq!(lines[0], "* models/gemini-1.5-flash (Gemini 1.5 Flash)");
        assert_eq!(lines[1], "  models/embedding-001");
    }
}
