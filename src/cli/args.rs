//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--cwd <path>`: Run as if in that directory
//! - `--debug`: Enable debug logging
//! - `--no-interactive`: Never prompt
//! - `--quiet` / `-q`: Minimal output
//! - `--assembly <dir>`: Assembly directory
//! - `--endpoint <url>`: Provisioning service

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::engine::ApprovalPolicy;
use crate::provision::DeployMethod;
use crate::ui::prompts::stdio_is_terminal;

/// Stackpilot - deploy, diff and roll back infrastructure stacks
#[derive(Parser, Debug)]
#[command(name = "sp")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run as if sp was started in this directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output; implies --no-interactive
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable interactive prompts
    #[arg(long, global = true)]
    pub no_interactive: bool,

    /// Assembly directory (overrides `assembly` from config)
    #[arg(long, global = true, value_name = "DIR")]
    pub assembly: Option<PathBuf>,

    /// Provisioning service URL (overrides `endpoint` from config)
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }

    /// Prompts are allowed unless disabled or stdio is not a terminal.
    pub fn interactive(&self) -> bool {
        !(self.no_interactive || self.quiet) && stdio_is_terminal()
    }
}

/// Deploy method as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Direct,
    ChangeSet,
}

impl From<MethodArg> for DeployMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Direct => DeployMethod::Direct,
            MethodArg::ChangeSet => DeployMethod::ChangeSet,
        }
    }
}

/// Options shared by `deploy` and `watch`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct DeployArgs {
    /// Stacks to deploy (glob patterns; default all)
    pub patterns: Vec<String>,

    /// Only deploy the named stacks, not their dependencies
    #[arg(short, long)]
    pub exclusively: bool,

    /// Skip confirmations and deploy unchanged templates
    #[arg(short, long)]
    pub force: bool,

    /// Deploy without rollback (faster iteration on failures)
    #[arg(long)]
    pub no_rollback: bool,

    /// Maximum number of stacks deployed at once
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Publish assets one at a time
    #[arg(long)]
    pub no_asset_parallelism: bool,

    /// Build each asset just before its stack instead of all up front
    #[arg(long)]
    pub no_asset_prebuild: bool,

    /// Asset ids that are never built
    #[arg(long = "build-exclude", value_name = "ASSET")]
    pub build_exclude: Vec<String>,

    /// Parameter overrides (`Stack:Key=Value`, `*:Key=Value` or `Key=Value`)
    #[arg(long = "parameters", value_name = "KEY=VALUE")]
    pub parameters: Vec<String>,

    /// Do not reuse previous values for parameters that are not overridden
    #[arg(long)]
    pub no_previous_parameters: bool,

    /// Tags for every stack (replace the stacks' own tags)
    #[arg(long = "tags", short = 't', value_name = "KEY=VALUE")]
    pub tags: Vec<String>,

    /// Notification topic ARNs
    #[arg(long = "notification-arns", value_name = "ARN")]
    pub notification_arns: Vec<String>,

    /// Write stack outputs to this JSON file
    #[arg(long, short = 'O', value_name = "FILE")]
    pub outputs_file: Option<PathBuf>,

    /// How stack updates are applied
    #[arg(long, value_enum)]
    pub method: Option<MethodArg>,

    /// Name of the changeset (with --method change-set)
    #[arg(long, value_name = "NAME")]
    pub change_set_name: Option<String>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Deploy stacks
    #[command(
        name = "deploy",
        long_about = "Deploy stacks from the assembly.\n\n\
            Stacks deploy in dependency order. Assets are built and published \
            before the stacks that use them. Security-sensitive changes ask for \
            approval according to --require-approval.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Deploy everything
    sp deploy

    # Deploy one stack and its dependencies
    sp deploy App

    # Deploy four stacks at a time, writing outputs
    sp deploy --concurrency 4 -O outputs.json

    # Override a parameter for one stack and one for all
    sp deploy --parameters App:Size=large --parameters '*:Stage=prod'"
    )]
    Deploy {
        #[command(flatten)]
        args: DeployArgs,

        /// When to ask for approval of security changes
        #[arg(long, value_enum)]
        require_approval: Option<ApprovalPolicy>,
    },

    /// Compare deployed stacks with the assembly
    #[command(
        name = "diff",
        after_help = "\
WORKFLOW EXAMPLES:
    # Show all differences
    sp diff

    # Fail CI when anything would change
    sp diff --fail

    # Compare a local template with a deployed stack
    sp diff App --template old.json"
    )]
    Diff {
        /// Stacks to compare (glob patterns; default all)
        patterns: Vec<String>,

        /// Only compare the named stacks, not their dependencies
        #[arg(short, long)]
        exclusively: bool,

        /// Exit with status 1 if there are differences
        #[arg(long)]
        fail: bool,

        /// Only show security-relevant changes
        #[arg(long)]
        security_only: bool,

        /// Lines of context in property diffs
        #[arg(long, default_value_t = 3, value_name = "N")]
        context_lines: usize,

        /// Compare against this template instead of the deployed one
        #[arg(long, value_name = "FILE")]
        template: Option<PathBuf>,

        /// Logical id renames applied to the deployed template
        #[arg(long = "mappings", value_name = "OLD=NEW")]
        mappings: Vec<String>,

        /// Do not create a changeset to detect replacements
        #[arg(long)]
        no_change_set: bool,
    },

    /// Destroy stacks
    Destroy {
        /// Stacks to destroy (glob patterns)
        patterns: Vec<String>,

        /// Destroy every stack
        #[arg(long)]
        all: bool,

        /// Only destroy the named stacks, not their dependents
        #[arg(short, long)]
        exclusively: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Roll stacks back to their last stable state
    Rollback {
        /// Stacks to roll back (glob patterns)
        patterns: Vec<String>,

        /// Roll back every stack
        #[arg(long)]
        all: bool,

        /// Orphan resources that fail to roll back
        #[arg(short, long)]
        force: bool,

        /// Logical id of a resource to orphan
        #[arg(long, value_name = "LOGICAL_ID")]
        orphan: Vec<String>,
    },

    /// Redeploy whenever files change
    Watch {
        #[command(flatten)]
        args: DeployArgs,

        /// Only react to changes matching these globs
        #[arg(long, value_name = "GLOB")]
        include: Vec<String>,

        /// Ignore changes matching these globs
        #[arg(long, value_name = "GLOB")]
        exclude: Vec<String>,
    },

    /// List stacks in the assembly
    #[command(name = "list", alias = "ls")]
    List {
        /// Stacks to list (glob patterns; default all)
        patterns: Vec<String>,

        /// Show dependencies
        #[arg(short, long)]
        long: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_deploy_flags() {
        let cli = Cli::try_parse_from([
            "sp",
            "deploy",
            "App*",
            "--concurrency",
            "3",
            "--parameters",
            "App:Size=large",
            "--require-approval",
            "any-change",
            "--method",
            "change-set",
        ])
        .unwrap();
        match cli.command {
            Command::Deploy {
                args,
                require_approval,
            } => {
                assert_eq!(args.patterns, vec!["App*"]);
                assert_eq!(args.concurrency, Some(3));
                assert_eq!(args.parameters, vec!["App:Size=large"]);
                assert_eq!(require_approval, Some(ApprovalPolicy::AnyChange));
                assert_eq!(args.method, Some(MethodArg::ChangeSet));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sp", "list", "--assembly", "out", "--quiet"]).unwrap();
        assert_eq!(cli.assembly, Some(PathBuf::from("out")));
        assert!(cli.quiet);
        assert!(!cli.interactive());
    }

    #[test]
    fn diff_defaults() {
        let cli = Cli::try_parse_from(["sp", "diff"]).unwrap();
        match cli.command {
            Command::Diff {
                context_lines,
                fail,
                no_change_set,
                ..
            } => {
                assert_eq!(context_lines, 3);
                assert!(!fail);
                assert!(!no_change_set);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
