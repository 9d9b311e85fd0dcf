//! Scripted worker for demos and end-to-end tests.
//!
//! Speaks the dialog bridge over stdio like a real automation script. The
//! scenario comes from `MDF_DEMO_SCENARIO`:
//!
//! - `prompt`: logs a greeting, asks for a code, echoes the answer
//! - `malformed`: emits a bridge line with a broken payload and reports the answer
//! - `wait`: asks for input, reports the answer, then idles until killed
//! - `alert`: shows one alert
//! - `confirm`: asks Yes/No and echoes the choice
//! - `lines:<n>`: prints `n` numbered lines as fast as possible
//! - `exit:<code>`: exits with `code`
//! - anything else: a short tour of every dialog with progress updates

use anyhow::{Context, Result, bail};
use automdf::services::bridge::{BridgeRequest, BridgeResponse};
use automdf::services::bridge_client::BridgeClient;
use camino::Utf8PathBuf;
use serde_json::json;
use std::io::{BufRead, Write};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

const SCENARIO_ENV: &str = "MDF_DEMO_SCENARIO";
const PROGRESS_ENV: &str = "MDF_PROGRESS_FILE";

fn main() -> ExitCode {
    let scenario = std::env::var(SCENARIO_ENV).unwrap_or_default();
    let mut client = BridgeClient::from_env();

    match run(&scenario, &mut client) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            // Last words go to stderr, which the supervisor also captures
            eprintln!("[ERROR] {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run<R: BufRead, W: Write>(scenario: &str, client: &mut BridgeClient<R, W>) -> Result<u8> {
    let (name, argument) = scenario
        .split_once(':')
        .map_or((scenario, None), |(name, arg)| (name, Some(arg)));

    match name.trim() {
        "prompt" => prompt_once(client),
        "malformed" => malformed(client),
        "wait" => wait_forever(client),
        "alert" => {
            client.alert("Demo alert", "Demo")?;
            client.log("[INFO] alert acknowledged")?;
            Ok(0)
        }
        "confirm" => {
            let choice = client.confirm("Continue the demo?", "Demo", &["Yes", "No"])?;
            client.log(&format!("[INFO] choice: {}", choice))?;
            Ok(0)
        }
        "lines" => {
            let count: u32 = parse_argument(argument, "line count")?;
            for i in 0..count {
                client.log(&format!("[INFO] line {}", i))?;
            }
            Ok(0)
        }
        "exit" => {
            let code: u8 = parse_argument(argument, "exit code")?;
            client.log(&format!("[INFO] exiting with {}", code))?;
            Ok(code)
        }
        _ => tour(client),
    }
}

fn parse_argument<T: std::str::FromStr>(argument: Option<&str>, what: &str) -> Result<T> {
    let Some(raw) = argument else {
        bail!("missing {}", what);
    };
    raw.trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid {}: {}", what, raw))
}

fn prompt_once<R: BufRead, W: Write>(client: &mut BridgeClient<R, W>) -> Result<u8> {
    client.log("[INFO] hello")?;
    let request = BridgeRequest::prompt("Enter code", "Demo", "").with_require_input(true);
    match client.prompt(request)? {
        Some(answer) => {
            client.log(&format!("[INFO] answer: {}", answer))?;
            Ok(0)
        }
        None => {
            client.log("[WARNING] prompt cancelled")?;
            Ok(2)
        }
    }
}

fn malformed<R: BufRead, W: Write>(client: &mut BridgeClient<R, W>) -> Result<u8> {
    let line = format!("{}{{not json", client.tokens().prefix);
    client.log(&line)?;
    let response = client.read_answer()?;
    client.log(&format!("[INFO] response: {}", describe(&response)))?;
    Ok(0)
}

fn describe(response: &BridgeResponse) -> String {
    match response {
        BridgeResponse::Ack => "ack".to_string(),
        BridgeResponse::Cancel => "cancel".to_string(),
        BridgeResponse::Value(value) => format!("value {}", value),
    }
}

fn wait_forever<R: BufRead, W: Write>(client: &mut BridgeClient<R, W>) -> Result<u8> {
    let response = client.request(&BridgeRequest::prompt("Waiting for the operator", "Demo", ""))?;
    client.log(&format!("[INFO] response: {}", describe(&response)))?;
    loop {
        thread::sleep(Duration::from_millis(200));
    }
}

fn tour<R: BufRead, W: Write>(client: &mut BridgeClient<R, W>) -> Result<u8> {
    let progress = std::env::var(PROGRESS_ENV).ok().map(Utf8PathBuf::from);
    let steps = [
        "Opening portal",
        "Reading shipment",
        "Filling form",
        "Submitting",
    ];

    client.log("[AutoMDF][INFO] Demo run started")?;
    for (index, step) in steps.iter().enumerate() {
        write_progress(progress.as_ref(), "running", index, steps.len(), step)?;
        client.log(&format!("[INFO] {}", step))?;
        thread::sleep(Duration::from_millis(400));

        if index == 1 {
            let code = client.prompt(
                BridgeRequest::prompt("Shipment number", "Demo", "")
                    .with_require_input(true)
                    .with_cancel_message("Cancelling stops the demo. Cancel anyway?"),
            )?;
            let Some(code) = code else {
                client.log("[WARNING] Demo cancelled by operator")?;
                write_progress(progress.as_ref(), "error", index, steps.len(), step)?;
                return Ok(2);
            };
            client.log(&format!("[INFO] Shipment {}", code.trim()))?;
        }
        if index == 2 {
            let choice = client.confirm("Submit the form?", "Demo", &["Submit", "Cancel"])?;
            client.log(&format!("[INFO] Operator chose {}", choice))?;
        }
    }

    write_progress(progress.as_ref(), "completed", steps.len(), steps.len(), "Done")?;
    client.alert("Demo finished", "Demo")?;
    Ok(0)
}

fn write_progress(
    path: Option<&Utf8PathBuf>,
    status: &str,
    done: usize,
    total: usize,
    step: &str,
) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let remaining = total.saturating_sub(done) as f64 * 0.4;
    let snapshot = json!({
        "status": status,
        "percentage": done as f64 * 100.0 / total.max(1) as f64,
        "current_step": step,
        "estimated_time_remaining": remaining,
    });
    std::fs::write(path, snapshot.to_string())
        .with_context(|| format!("Failed to write progress file {}", path))
}
