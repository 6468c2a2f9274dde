use dialoguer::Password;
use tracing::error;

/// Asks the cardholder for the PIN on the terminal.
pub fn prompt(prompt: &str) -> scdcard::Result<String> {
    Password::new().with_prompt(prompt).interact().map_err(|e| {
        error!("Failed to read the PIN: {}", e);
        scdcard::Error::InvalidValue
    })
}
