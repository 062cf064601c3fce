//! One-shot command-line sign-in.
//!
//! Prints the authorization URL, waits for the operator to paste the redirect URL
//! (or just the code) and writes the resulting token to stdout as one JSON line.

use crate::auth::oauth::{generate_state, parse_callback_input, OAuth2Client, Token};
use crate::error::{AppError, UsageError};
use std::io::{BufRead, Write};
use tracing::{debug, info};

/// Run the CLI flow with a freshly generated state.
///
/// The consent URL and the paste prompt go to `prompt` whatever the log level;
/// only the token JSON is written to `output`.
pub async fn run<R: BufRead, P: Write, W: Write>(
    client: &OAuth2Client,
    input: R,
    prompt: P,
    output: W,
) -> Result<Token, AppError> {
    run_with_state(client, &generate_state(), input, prompt, output).await
}

async fn run_with_state<R: BufRead, P: Write, W: Write>(
    client: &OAuth2Client,
    state: &str,
    mut input: R,
    mut prompt: P,
    mut output: W,
) -> Result<Token, AppError> {
    let auth_url = client.authorization_url(state)?;
    info!("Requesting scopes: {}", client.provider().scopes.join(" "));
    info!("Visit URL: {}", auth_url);

    writeln!(prompt, "Visit URL: {}", auth_url)?;
    write!(prompt, "Paste the redirect URL (or the code) and press enter: ")?;
    prompt.flush()?;

    // Blocks until the operator answers; nothing else runs in CLI mode.
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(UsageError::EmptyInput.into());
    }

    let code = parse_callback_input(&line)?;
    code.verify_state(state)?;
    debug!("Authorization code received, exchanging");

    let token = client.exchange_code(&code.code).await?;

    let json = serde_json::to_string(&token)?;
    writeln!(output, "{}", json)?;
    output.flush()?;

    Ok(token)
}
