use anyhow::Result;
use std::io::{BufRead, Write};

use crate::api::{CompletionRequest, CompletionService};
use crate::error::RemoteError;
use crate::transcript::{Transcript, Turn};

pub const GREETING: &str = "Welcome to the Terminal ChatGPT, please enter exit if you had enough!";
pub const FAREWELL: &str = "Goodbye!";
pub const USER_PROMPT: &str = "You: ";
pub const REPLY_PREFIX: &str = "GPT: ";

const EXIT_SENTINEL: &str = "exit";

/// How much of the conversation is sent with each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Send the whole transcript to the chat endpoint.
    Chat,
    /// Send only the latest prompt to the plain completion endpoint.
    Plain,
}

/// One line read from the terminal, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Exit,
    Blank,
    Prompt(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            Input::Blank
        } else if line.eq_ignore_ascii_case(EXIT_SENTINEL) {
            Input::Exit
        } else {
            Input::Prompt(line.to_string())
        }
    }
}

/// Sends `text` as the next user turn and returns the extended transcript
/// together with the reply.
///
/// On failure nothing is recorded: the caller keeps `transcript` as it was.
pub async fn submit<S>(
    service: &S,
    mode: Mode,
    transcript: &Transcript,
    text: &str,
) -> Result<(Transcript, String), RemoteError>
where
    S: CompletionService + ?Sized,
{
    let pending = transcript.with_turn(Turn::user(text));
    let request = match mode {
        Mode::Chat => CompletionRequest::Chat(pending.turns()),
        Mode::Plain => CompletionRequest::Prompt(text),
    };

    let reply = service.complete(request).await?;
    let updated = pending.with_turn(Turn::assistant(reply.as_str()));
    Ok((updated, reply))
}

/// The read / submit / print loop over a pair of terminal streams.
pub struct ChatLoop<S> {
    service: S,
    mode: Mode,
}

impl<S: CompletionService> ChatLoop<S> {
    pub fn new(service: S, mode: Mode) -> Self {
        ChatLoop { service, mode }
    }

    /// Runs until the sentinel is read or `input` is exhausted and returns the
    /// final transcript.
    ///
    /// Remote failures are written to `output` and the loop carries on. Only
    /// failures of the streams themselves end the loop with an error.
    pub async fn run<R, W>(&self, mut input: R, output: &mut W) -> Result<Transcript>
    where
        R: BufRead,
        W: Write,
    {
        let mut transcript = Transcript::new();
        writeln!(output, "{}", GREETING)?;

        loop {
            write!(output, "{}", USER_PROMPT)?;
            output.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                // end of input behaves like the sentinel
                writeln!(output)?;
                break;
            }

            let text = match Input::parse(&line) {
                Input::Exit => break,
                Input::Blank => continue,
                Input::Prompt(text) => text,
            };

            match submit(&self.service, self.mode, &transcript, &text).await {
                Ok((updated, reply)) => {
                    transcript = updated;
                    writeln!(output, "{}{}", REPLY_PREFIX, reply)?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, turns = transcript.len(), "turn failed");
                    writeln!(output, "Error: {}", e)?;
                }
            }
        }

        writeln!(output, "{}", FAREWELL)?;
        output.flush()?;
        tracing::debug!(turns = transcript.len(), "conversation ended");
        Ok(transcript)
    }
}
