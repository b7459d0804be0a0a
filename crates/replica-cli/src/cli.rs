use std::path::PathBuf;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};

pub const REPLICA_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nGlobal options:\n{options}\n";

pub const REPLICA_BEFORE_HELP: &str = concat!(
    "replica ",
    env!("CARGO_PKG_VERSION"),
    " – APK repackaging and re-signing\n\n",
    "\x1b[1;36mRepackage\x1b[0m\n",
    "  update           Replace assets/cloner.json in a clone and re-sign it.\n",
    "  clone            First-time clone: config, hook module and native libraries.\n",
    "  sign             Re-sign a package without changing its contents.\n\n",
    "\x1b[1;36mInspect\x1b[0m\n",
    "  verify           Check the v1/v2/v3 signatures of a package.\n",
    "  show-config      Print a package's cloner.json, or the effective settings.\n",
);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    propagate_version = false,
    disable_help_subcommand = true,
    before_help = REPLICA_BEFORE_HELP,
    help_template = REPLICA_HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct ReplicaCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[arg(long, help = "Log how long each pipeline stage takes (REPLICA_TIMINGS)", global = true)]
    pub timings: bool,
    #[command(flatten)]
    pub signing: SigningArgs,
    #[command(subcommand)]
    pub command: CommandCli,
}

/// Overrides layered on top of the `REPLICA_*` environment.
#[derive(Args, Debug, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SigningArgs {
    #[arg(
        long,
        value_parser = value_parser!(PathBuf),
        help = "PKCS#12 keystore (overrides REPLICA_KEYSTORE)",
        global = true
    )]
    pub keystore: Option<PathBuf>,
    #[arg(long, help = "Key alias inside the keystore (overrides REPLICA_KEY_ALIAS)", global = true)]
    pub alias: Option<String>,
    #[arg(
        long,
        value_parser = value_parser!(PathBuf),
        help = "Parent directory for scratch workspaces (overrides REPLICA_SCRATCH_DIR)",
        global = true
    )]
    pub scratch_dir: Option<PathBuf>,
    #[arg(long, help = "Skip the v1 (JAR) signature", global = true)]
    pub no_v1: bool,
    #[arg(long, help = "Skip the v2 signing block", global = true)]
    pub no_v2: bool,
    #[arg(long, help = "Also write a v3 signing block", global = true)]
    pub enable_v3: bool,
    #[arg(
        long,
        help = "Skip self-verification after signing",
        conflicts_with = "strict_verify",
        global = true
    )]
    pub no_verify: bool,
    #[arg(
        long,
        help = "Fail instead of warning when self-verification fails",
        global = true
    )]
    pub strict_verify: bool,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(
        about = "Replace the configuration document of an existing clone and re-sign it.",
        override_usage = "replica update <SOURCE> <DEST> --config FILE [--bundled-data ZIP]"
    )]
    Update(UpdateArgs),
    #[command(
        about = "Create a first clone: config, hook module and native libraries.",
        override_usage = "replica clone <SOURCE> <DEST> --config FILE --module DEX [--lib SO ...]"
    )]
    Clone(CloneArgs),
    #[command(
        about = "Re-sign a package without changing its contents.",
        override_usage = "replica sign <SOURCE> <DEST>"
    )]
    Sign(SignArgs),
    #[command(
        about = "Verify the signatures of a package against the enabled schemes.",
        override_usage = "replica verify <APK>"
    )]
    Verify(VerifyArgs),
    #[command(
        about = "Print a package's cloner.json, or the effective settings without one.",
        override_usage = "replica show-config [APK]"
    )]
    ShowConfig(ShowConfigArgs),
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    #[arg(value_name = "SOURCE", value_parser = value_parser!(PathBuf), help = "Package to read")]
    pub source: PathBuf,
    #[arg(value_name = "DEST", value_parser = value_parser!(PathBuf), help = "Where the signed package is written")]
    pub destination: PathBuf,
    #[arg(
        long,
        value_name = "ID",
        help = "Package identity used for locking (defaults to SOURCE)"
    )]
    pub package: Option<String>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    #[arg(long, value_name = "FILE", value_parser = value_parser!(PathBuf), help = "New assets/cloner.json")]
    pub config: PathBuf,
    #[arg(
        long,
        value_name = "ZIP",
        value_parser = value_parser!(PathBuf),
        help = "Application data archive to ship with the package"
    )]
    pub bundled_data: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CloneArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    #[arg(long, value_name = "FILE", value_parser = value_parser!(PathBuf), help = "assets/cloner.json for the clone")]
    pub config: PathBuf,
    #[arg(long, value_name = "DEX", value_parser = value_parser!(PathBuf), help = "Executable module placed in the next classesN.dex slot")]
    pub module: PathBuf,
    #[arg(
        long = "lib",
        value_name = "SO",
        value_parser = value_parser!(PathBuf),
        help = "Native library to inject (repeatable)"
    )]
    pub libs: Vec<PathBuf>,
    #[arg(long, value_name = "ABI", help = "ABI directory for native libraries [default: arm64-v8a]")]
    pub abi: Option<String>,
    #[arg(
        long,
        value_name = "ZIP",
        value_parser = value_parser!(PathBuf),
        help = "Application data archive to ship with the clone"
    )]
    pub bundled_data: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[arg(value_name = "APK", value_parser = value_parser!(PathBuf))]
    pub apk: PathBuf,
}

#[derive(Args, Debug)]
pub struct ShowConfigArgs {
    #[arg(value_name = "APK", value_parser = value_parser!(PathBuf))]
    pub apk: Option<PathBuf>,
}
