use atty::Stream;
use color_eyre::Result;
use replica_core::{CommandStatus, ExecutionOutcome};
use serde_json::{json, Value};

use crate::dispatch::CommandInfo;
use crate::style::Style;

#[derive(Clone, Copy, Debug)]
pub struct OutputOptions {
    pub quiet: bool,
    pub json: bool,
    pub no_color: bool,
}

pub fn emit_output(
    opts: &OutputOptions,
    info: CommandInfo,
    outcome: &ExecutionOutcome,
) -> Result<i32> {
    let code = outcome.status.exit_code();

    if opts.json {
        let payload = to_json_response(info, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    if let CommandStatus::Ok = outcome.status {
        if opts.quiet {
            return Ok(code);
        }
        let style = Style::new(opts.no_color, atty::is(Stream::Stdout));
        if is_passthrough(&outcome.details) {
            println!("{}", outcome.message.trim_end());
            return Ok(code);
        }
        println!("{}", style.status(outcome.status, &format_status_message(info, &outcome.message)));
        for (label, value) in summary_fields(&outcome.details) {
            println!("{}", style.field(label, &value));
        }
        if let Some(hint) = hint_from_details(&outcome.details) {
            println!("{}", style.warning(&format!("Warning: {hint}")));
        }
        return Ok(code);
    }

    let style = Style::new(opts.no_color, atty::is(Stream::Stderr));
    let header = match error_code(&outcome.details) {
        Some(code) => format!("{code}  {}", format_status_message(info, &outcome.message)),
        None => format_status_message(info, &outcome.message),
    };
    eprintln!("{}", style.status(outcome.status, &header));
    if opts.quiet {
        return Ok(code);
    }
    let causes = collect_causes(&outcome.details);
    if !causes.is_empty() {
        eprintln!();
        eprintln!("Why:");
        for cause in causes {
            eprintln!("  • {cause}");
        }
    }
    if let Some(hint) = hint_from_details(&outcome.details) {
        eprintln!();
        eprintln!("Fix:");
        eprintln!("{}", style.info(&format!("  • {hint}")));
    }
    Ok(code)
}

/// `{status, message, details}` envelope printed under `--json`.
pub fn to_json_response(info: CommandInfo, outcome: &ExecutionOutcome) -> Value {
    let status = match outcome.status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "error",
    };
    let details = match &outcome.details {
        Value::Object(_) => outcome.details.clone(),
        Value::Null => json!({}),
        other => json!({ "value": other }),
    };
    json!({
        "status": status,
        "message": format_status_message(info, &outcome.message),
        "details": details,
    })
}

pub fn format_status_message(info: CommandInfo, message: &str) -> String {
    let prefix = format!("replica {}", info.name);
    if message.is_empty() {
        prefix
    } else if message.starts_with(&prefix) {
        message.to_string()
    } else {
        format!("{prefix}: {message}")
    }
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}

fn error_code(details: &Value) -> Option<&str> {
    details.get("code").and_then(Value::as_str)
}

fn is_passthrough(details: &Value) -> bool {
    details
        .as_object()
        .and_then(|map| map.get("passthrough"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn collect_causes(details: &Value) -> Vec<String> {
    let mut causes: Vec<String> = details
        .get("causes")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if let Some(problems) = details
        .get("problems")
        .or_else(|| details.pointer("/verification/problems"))
        .and_then(Value::as_array)
    {
        causes.extend(problems.iter().filter_map(Value::as_str).map(str::to_string));
    }
    causes
}

/// Short human summary of a pipeline report.
fn summary_fields(details: &Value) -> Vec<(&'static str, String)> {
    let mut fields = Vec::new();
    if let Some(mode) = details.get("mode").and_then(Value::as_str) {
        fields.push(("mode", mode.to_string()));
    }
    if let Some(entries) = details.pointer("/build/entries").and_then(Value::as_array) {
        fields.push(("entries", entries.len().to_string()));
    }
    if let Some(module) = details.pointer("/inject/module").and_then(Value::as_str) {
        fields.push(("module", module.to_string()));
    }
    if let Some(fingerprint) = details.get("certificate_sha256").and_then(Value::as_str) {
        fields.push(("certificate", fingerprint.to_string()));
    }
    if let Some(result) = details.pointer("/verification/result").and_then(Value::as_str) {
        fields.push(("verification", result.replace('_', " ")));
    }
    fields
}
