use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use cmbus_frame::{Message, NAK_SUFFIX};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    tag: &'a str,
    nak: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    json: Option<&'a Value>,
    data_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    timestamp: String,
}

pub fn print_message(msg: &Message, format: OutputFormat) {
    let nak = msg.tag.ends_with(NAK_SUFFIX);
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                tag: &msg.tag,
                nak,
                json: msg.json.as_ref(),
                data_size: msg.data_len(),
                data: msg.data.as_deref().map(data_preview),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TAG", "JSON", "DATA"])
                .add_row(vec![
                    msg.tag.clone(),
                    json_preview(msg.json.as_ref()),
                    msg.data.as_deref().map(data_preview).unwrap_or_default(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "tag={} json={} size={}",
                msg.tag,
                json_preview(msg.json.as_ref()),
                msg.data_len()
            );
        }
        OutputFormat::Raw => {
            if let Some(data) = &msg.data {
                print_raw(data);
            } else if let Some(json) = &msg.json {
                print_raw(json.to_string().as_bytes());
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn json_preview(json: Option<&Value>) -> String {
    json.map(Value::to_string).unwrap_or_default()
}

fn data_preview(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", data.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
