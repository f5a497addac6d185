use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// System instruction used when none is given on the command line.
pub const DEFAULT_INSTRUCTIONS: &str = "\
You are the voice assistant of a clinic management app. Keep answers short and friendly.
When the user asks to go somewhere, call navigate_to_section with one of: home, services, \
appointments, patients, settings.
When the user dictates contact details, call fill_form_field once per field with fieldName \
one of: name, email, phone, message, and the value they gave.
If a tool reports an error, tell the user what went wrong and offer the valid choices.";

/// Reads the system instruction from a text or markdown file, or returns the
/// built-in default.
pub fn load_instructions(path: Option<&Path>) -> Result<String> {
    let Some(path) = path else {
        return Ok(DEFAULT_INSTRUCTIONS.to_string());
    };

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read instructions file: {}", path.display()))?;
    let content = content.trim();
    if content.is_empty() {
        anyhow::bail!("Instructions file is empty: {}", path.display());
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_instructions_from_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("assistant.md");
        let mut file = File::create(&path)?;
        writeln!(file, "\nOnly speak French.\n")?;

        assert_eq!(load_instructions(Some(&path))?, "Only speak French.");
        Ok(())
    }

    #[test]
    fn test_default_instructions_mention_both_tools() -> Result<()> {
        let instructions = load_instructions(None)?;

        assert!(instructions.contains("navigate_to_section"));
        assert!(instructions.contains("fill_form_field"));
        Ok(())
    }

    #[test]
    fn test_missing_or_empty_file_is_an_error() -> Result<()> {
        assert!(load_instructions(Some(Path::new("nonexistent_instructions.md"))).is_err());

        let dir = tempdir()?;
        let path = dir.path().join("empty.txt");
        File::create(&path)?;
        assert!(load_instructions(Some(&path)).is_err());
        Ok(())
    }
}
