// Worker-side half of the dialog bridge
//
// A worker process writes a request line to stdout and blocks on one line of
// stdin. BridgeClient wraps that exchange over any BufRead/Write pair so it can
// drive real stdio or in-memory buffers in tests.

use crate::services::bridge::{
    BridgeRequest, BridgeResponse, BridgeTokens, decode_response, encode_request,
};
use std::io::{self, BufRead, Write};

pub struct BridgeClient<R: BufRead, W: Write> {
    tokens: BridgeTokens,
    input: R,
    output: W,
}

impl BridgeClient<io::StdinLock<'static>, io::Stdout> {
    /// Client over the process stdio, using tokens from the environment.
    pub fn from_env() -> Self {
        Self::new(BridgeTokens::from_env(), io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> BridgeClient<R, W> {
    pub fn new(tokens: BridgeTokens, input: R, output: W) -> Self {
        Self {
            tokens,
            input,
            output,
        }
    }

    pub fn tokens(&self) -> &BridgeTokens {
        &self.tokens
    }

    /// Send one request and block for its answer.
    pub fn request(&mut self, request: &BridgeRequest) -> io::Result<BridgeResponse> {
        let line = encode_request(&self.tokens, request);
        writeln!(self.output, "{}", line)?;
        self.output.flush()?;
        self.read_answer()
    }

    /// Block for one answer line. EOF reads as a cancel.
    pub fn read_answer(&mut self) -> io::Result<BridgeResponse> {
        let mut answer = String::new();
        let read = self.input.read_line(&mut answer)?;
        let answer = (read > 0).then_some(answer.as_str());
        Ok(decode_response(&self.tokens, answer))
    }

    /// Print a plain log line (not a bridge request).
    pub fn log(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.output, "{}", line)?;
        self.output.flush()
    }

    pub fn alert(&mut self, text: &str, title: &str) -> io::Result<()> {
        self.request(&BridgeRequest::alert(text, title))
            .map(|_| ())
    }

    /// Ask for free text. `None` when the operator cancelled.
    pub fn prompt(&mut self, request: BridgeRequest) -> io::Result<Option<String>> {
        Ok(match self.request(&request)? {
            BridgeResponse::Ack => Some(String::new()),
            BridgeResponse::Value(value) => Some(value),
            BridgeResponse::Cancel => None,
        })
    }

    /// Ask the operator to pick one of `buttons`. Always yields a label.
    pub fn confirm(&mut self, text: &str, title: &str, buttons: &[&str]) -> io::Result<String> {
        let request = BridgeRequest::confirm(text, title, buttons);
        Ok(match self.request(&request)? {
            BridgeResponse::Value(label) if request.buttons.contains(&label) => label,
            BridgeResponse::Value(label) => {
                tracing::warn!("Unexpected confirm answer '{}', using fallback", label);
                request.confirm_fallback()
            }
            BridgeResponse::Ack | BridgeResponse::Cancel => request.confirm_fallback(),
        })
    }
}
