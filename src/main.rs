use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use rbscm::capabilities::Capabilities;
use rbscm::config::{CONFIG_FILE, ClientKind, RbscmConfig};
use rbscm::diff::DiffOptions;
use rbscm::patch::PatchRequest;
use rbscm::{AnyClient, ScmClient, telemetry};

/// Revision-control front end for code review uploads
///
/// Resolves revisions, produces unified diffs and applies patches for
/// Perforce workspaces and git working trees.
///
/// EXAMPLES:
///
///   rbscm diff                 # default pending changelist / working tree
///   rbscm diff 12345           # one changelist or commit
///   rbscm diff 100 120         # submitted range
///   rbscm patch review.diff --px 1
#[derive(Parser)]
#[command(name = "rbscm")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Repository type (auto, perforce, git); overrides the config file
    #[arg(long, global = true, env = "RBSCM_REPOSITORY_TYPE")]
    repository_type: Option<ClientKind>,

    /// Config file (default: .rbscm.toml in the current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server capability mapping as a JSON file
    #[arg(long, global = true)]
    capabilities: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(long, short = 'd', global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the diff for a revision range
    Diff {
        /// Zero, one or two revisions
        revisions: Vec<String>,

        /// Only include these files
        #[arg(long = "include", short = 'I')]
        include_files: Vec<String>,

        /// Leave out files matching these glob patterns
        #[arg(long = "exclude", short = 'X')]
        exclude_patterns: Vec<String>,

        /// Show moves as a delete and an add
        #[arg(long)]
        no_renames: bool,

        /// Print a JSON object with the diff and its metadata
        #[arg(long)]
        json: bool,

        /// Extra arguments for the native diff tool
        #[arg(last = true)]
        extra_args: Vec<String>,
    },

    /// Print the resolved revision range as JSON
    Revisions {
        /// Zero, one or two revisions
        revisions: Vec<String>,
    },

    /// Apply a patch file to the working copy
    Patch {
        /// The diff to apply
        file: PathBuf,

        /// Strip this many leading path components
        #[arg(long)]
        px: Option<usize>,

        /// Reverse the patch
        #[arg(long, short = 'R')]
        revert: bool,

        /// Directory the diff was generated relative to
        #[arg(long, default_value = "")]
        base_path: String,

        /// Directory the patch is applied from, within the repository
        #[arg(long, default_value = "")]
        base_dir: String,
    },

    /// Print repository information as JSON
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.global.debug);

    let cwd = std::env::current_dir().context("could not determine the current directory")?;
    let client = open_client(&cli.global, &cwd)?;

    match cli.command {
        Commands::Diff {
            revisions,
            include_files,
            exclude_patterns,
            no_renames,
            json,
            extra_args,
        } => {
            let options = DiffOptions {
                include_files,
                exclude_patterns,
                no_renames,
                extra_args,
            };
            diff(&client, &revisions, &options, json)
        }
        Commands::Revisions { revisions } => {
            let range = client.parse_revision_spec(&revisions)?;
            println!("{}", serde_json::to_string_pretty(&range)?);
            Ok(())
        }
        Commands::Patch {
            file,
            px,
            revert,
            base_path,
            base_dir,
        } => patch(&client, &file, px, revert, &base_path, &base_dir),
        Commands::Info => info(&client),
    }
}

fn open_client(global: &GlobalArgs, cwd: &Path) -> Result<AnyClient> {
    let config_path = global.config.clone().unwrap_or_else(|| cwd.join(CONFIG_FILE));
    let config = RbscmConfig::load(&config_path)?;
    let kind = global.repository_type.unwrap_or(config.client.kind);

    let mut client = AnyClient::from_kind(kind, cwd, &config)?;
    if let Some(path) = &global.capabilities {
        let caps = Capabilities::load(path)
            .with_context(|| format!("could not load capabilities from {}", path.display()))?;
        client.set_capabilities(caps);
    }
    Ok(client)
}

fn diff(client: &AnyClient, revisions: &[String], options: &DiffOptions, json: bool) -> Result<()> {
    let range = client.parse_revision_spec(revisions)?;
    let result = client.diff(&range, options)?;
    let mut stdout = std::io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut stdout, &result)?;
        writeln!(stdout)?;
    } else {
        stdout.write_all(&result.diff)?;
    }
    Ok(())
}

fn patch(
    client: &AnyClient,
    file: &Path,
    strip_count: Option<usize>,
    revert: bool,
    base_path: &str,
    base_dir: &str,
) -> Result<()> {
    let diff = std::fs::read(file).with_context(|| format!("could not read {}", file.display()))?;
    let request = PatchRequest {
        diff: &diff,
        base_path,
        base_dir,
        strip_count,
        revert,
    };
    let outcome = client.apply_patch(&request)?;
    print!("{}", outcome.output);
    if !outcome.applied {
        anyhow::bail!(
            "the patch did not apply cleanly{}",
            if outcome.rejected_files.is_empty() {
                String::new()
            } else {
                format!("; rejected: {}", outcome.rejected_files.join(", "))
            }
        );
    }
    Ok(())
}

fn info(client: &AnyClient) -> Result<()> {
    let info = serde_json::json!({
        "client": client.scmclient_id(),
        "features": client.features(),
        "local_path": client.get_local_path()?,
        "repository": client.get_repository_info()?,
        "repository_name": client.get_repository_name()?,
        "server": client.scan_for_server()?,
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
