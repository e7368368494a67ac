use anyhow::{Context, Result};
use interview_core::prompts::PromptBook;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Reads every `*.md` file in `dir_path`, keyed by file stem.
pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}

/// Builds the prompt book, falling back to the built-in prompts when the
/// directory is absent.
pub fn load_prompt_book(dir_path: &Path) -> Result<PromptBook> {
    if !dir_path.exists() {
        tracing::warn!(
            "Prompts directory {} not found, using built-in prompts",
            dir_path.display()
        );
        return Ok(PromptBook::default());
    }
    let prompts = load_prompts(dir_path)?;
    tracing::info!("Loaded {} prompt overrides.", prompts.len());
    Ok(PromptBook::from_map(prompts))
}
