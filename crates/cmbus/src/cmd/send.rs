use std::fs;
use std::time::Duration;

use cmbus_frame::{Envelope, RecvMode, StreamConfig};
use cmbus_plugin::connect_with_config;
use serde_json::Value;

use crate::cmd::SendArgs;
use crate::exit::{frame_error, plugin_error, CliError, CliResult, NAK, SUCCESS, USAGE};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let envelope = build_envelope(&args)?;

    let config = StreamConfig {
        read_timeout: Some(wait_timeout),
        write_timeout: Some(wait_timeout),
        ..StreamConfig::default()
    };
    let mut conn = connect_with_config(&args.path, config)
        .map_err(|err| plugin_error("connect failed", err))?;
    conn.send(&envelope)
        .map_err(|err| plugin_error("send failed", err))?;

    if !args.wait {
        return Ok(SUCCESS);
    }

    let reply = conn
        .recv(RecvMode::Blocking)
        .map_err(|err| plugin_error("receive failed", err))?;
    let msg = cmbus_frame::decode(&reply).map_err(|err| frame_error("invalid reply", err))?;
    print_message(&msg, format);

    Ok(if reply.is_nak() { NAK } else { SUCCESS })
}

fn build_envelope(args: &SendArgs) -> CliResult<Envelope> {
    let json = args
        .json
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
    let data = resolve_data(args)?;

    cmbus_frame::encode(&args.tag, json.as_ref(), data.as_deref())
        .map_err(|err| frame_error("cannot build envelope", err))
}

fn resolve_data(args: &SendArgs) -> CliResult<Option<Vec<u8>>> {
    if let Some(data) = &args.data {
        return Ok(Some(data.as_bytes().to_vec()));
    }
    if let Some(path) = &args.file {
        return fs::read(path).map(Some).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(None)
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
