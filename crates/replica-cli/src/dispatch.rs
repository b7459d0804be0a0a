use std::fs;
use std::path::Path;
use std::sync::Arc;

use color_eyre::Result;
use replica_core::{
    read_config, spawn_pipeline, verify_container, ClonePayload, CommandStatus, Config,
    ExecutionOutcome, PayloadBundle, Pipeline, PipelineError, PipelineReport, PipelineRequest,
    VerificationOutcome,
};
use serde_json::{json, Value};

use crate::cli::{CloneArgs, CommandCli, SignArgs, TargetArgs, UpdateArgs};

/// Name shown in status lines and JSON envelopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: &'static str,
}

impl CommandInfo {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

pub fn dispatch_command(
    config: &Config,
    command: &CommandCli,
) -> Result<(CommandInfo, ExecutionOutcome)> {
    match command {
        CommandCli::Update(args) => {
            let info = CommandInfo::new("update");
            let request = update_request(args);
            Ok((info, run_pipeline(config, request)?))
        }
        CommandCli::Clone(args) => {
            let info = CommandInfo::new("clone");
            let request = clone_request(args);
            Ok((info, run_pipeline(config, request)?))
        }
        CommandCli::Sign(SignArgs { target }) => {
            let info = CommandInfo::new("sign");
            let request = pipeline_request(target, None);
            Ok((info, run_pipeline(config, request)?))
        }
        CommandCli::Verify(args) => Ok((CommandInfo::new("verify"), verify(config, &args.apk))),
        CommandCli::ShowConfig(args) => Ok((
            CommandInfo::new("show-config"),
            show_config(config, args.apk.as_deref()),
        )),
    }
}

fn pipeline_request(target: &TargetArgs, bundle: Option<PayloadBundle>) -> PipelineRequest {
    let request = PipelineRequest::new(&target.source, &target.destination, bundle);
    match &target.package {
        Some(package) => request.with_identity(package),
        None => request,
    }
}

fn update_request(args: &UpdateArgs) -> PipelineRequest {
    let mut bundle = PayloadBundle::config_only(&args.config);
    if let Some(data) = &args.bundled_data {
        bundle = bundle.with_bundled_data(data);
    }
    pipeline_request(&args.target, Some(bundle))
}

fn clone_request(args: &CloneArgs) -> PipelineRequest {
    let mut payload = ClonePayload::new(&args.module, args.libs.clone());
    if let Some(abi) = &args.abi {
        payload.abi.clone_from(abi);
    }
    let mut bundle = PayloadBundle::first_clone(&args.config, payload);
    if let Some(data) = &args.bundled_data {
        bundle = bundle.with_bundled_data(data);
    }
    pipeline_request(&args.target, Some(bundle))
}

fn run_pipeline(config: &Config, request: PipelineRequest) -> Result<ExecutionOutcome> {
    let pipeline = Arc::new(Pipeline::new(config.clone()));
    let result = spawn_pipeline(pipeline, request).and_then(replica_core::PipelineHandle::join);
    Ok(match result {
        Ok(report) => report_outcome(&report)?,
        Err(err) => error_outcome(&err),
    })
}

fn report_outcome(report: &PipelineReport) -> Result<ExecutionOutcome> {
    let mut details = serde_json::to_value(report)?;
    if let (Value::Object(map), Some(first)) = (&mut details, report.warnings.first()) {
        map.insert(
            "hint".to_string(),
            Value::String(format!("{first} (use --strict-verify to fail instead)")),
        );
    }
    let message = format!(
        "wrote {} (signed {})",
        report.destination.display(),
        report.schemes
    );
    Ok(ExecutionOutcome::success(message, details))
}

fn error_outcome(err: &PipelineError) -> ExecutionOutcome {
    let message = err.to_string();
    if err.is_user_error() {
        ExecutionOutcome::user_error(message, err.details())
    } else {
        ExecutionOutcome::failure(message, err.details())
    }
}

fn verify(config: &Config, apk: &Path) -> ExecutionOutcome {
    let expected = config.signing().schemes;
    let bytes = match fs::read(apk) {
        Ok(bytes) => bytes,
        Err(err) => {
            return ExecutionOutcome::user_error(
                format!("cannot read {}", apk.display()),
                json!({
                    "reason": "unreadable_container",
                    "path": apk.display().to_string(),
                    "error": err.to_string(),
                }),
            )
        }
    };
    let outcome = verify_container(&bytes, expected);
    let details = json!({
        "path": apk.display().to_string(),
        "expected": expected,
        "verification": outcome,
    });
    match outcome {
        VerificationOutcome::Verified { .. } => {
            ExecutionOutcome::success(format!("{} is signed ({expected})", apk.display()), details)
        }
        VerificationOutcome::NotVerified { problems } => {
            let mut outcome = ExecutionOutcome::user_error(
                format!("{} failed verification: {}", apk.display(), problems.join("; ")),
                details,
            );
            if let Value::Object(map) = &mut outcome.details {
                map.insert(
                    "hint".to_string(),
                    Value::String("re-sign the package with `replica sign`".to_string()),
                );
            }
            outcome
        }
        VerificationOutcome::Unsupported => ExecutionOutcome {
            status: CommandStatus::Failure,
            message: "verification is not supported in this build".to_string(),
            details,
        },
    }
}

fn show_config(config: &Config, apk: Option<&Path>) -> ExecutionOutcome {
    let Some(apk) = apk else {
        let details = json!({ "settings": config });
        return ExecutionOutcome::success("effective settings", details);
    };
    match read_config(apk) {
        Ok(Some(bytes)) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let document = serde_json::from_slice::<Value>(&bytes).ok();
            let details = json!({
                "path": apk.display().to_string(),
                "document": document,
                "raw": text,
                "passthrough": true,
            });
            ExecutionOutcome::success(text, details)
        }
        Ok(None) => ExecutionOutcome::user_error(
            format!("{} has no assets/cloner.json", apk.display()),
            json!({
                "reason": "missing_config",
                "path": apk.display().to_string(),
                "hint": "run `replica clone` or `replica update` to add one",
            }),
        ),
        Err(err) => error_outcome(&err),
    }
}
