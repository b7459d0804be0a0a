use clap::Parser;
use color_eyre::Result;
use replica_core::Config;

mod cli;
mod dispatch;
mod output;
mod style;

use cli::ReplicaCli;
use output::OutputOptions;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = ReplicaCli::parse();
    init_tracing(cli.trace, cli.verbose, cli.quiet);

    let config = effective_config(Config::from_env(), &cli);
    tracing::debug!(?config, "effective configuration");
    let (info, outcome) = dispatch::dispatch_command(&config, &cli.command)?;
    let opts = OutputOptions {
        quiet: cli.quiet,
        json: cli.json,
        no_color: cli.no_color,
    };
    let code = output::emit_output(&opts, info, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("replica={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Layers command-line overrides on top of the environment snapshot.
fn effective_config(mut config: Config, cli: &ReplicaCli) -> Config {
    if cli.timings {
        config.set_timings(true);
    }
    let args = &cli.signing;
    let signing = config.signing_mut();
    if let Some(keystore) = &args.keystore {
        signing.keystore.clone_from(keystore);
    }
    if let Some(alias) = &args.alias {
        signing.alias.clone_from(alias);
    }
    if args.no_v1 {
        signing.schemes.v1 = false;
    }
    if args.no_v2 {
        signing.schemes.v2 = false;
    }
    if args.enable_v3 {
        signing.schemes.v3 = true;
    }
    if args.no_verify {
        signing.verify = false;
    }
    if args.strict_verify {
        signing.verify = true;
        signing.strict_verify = true;
    }
    if let Some(scratch) = &args.scratch_dir {
        config.workspace_mut().scratch_root.clone_from(scratch);
    }
    config
}
