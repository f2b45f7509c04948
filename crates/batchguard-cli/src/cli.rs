use batchguard_core::params::ConnectionParams;
use batchguard_core::{exit_codes, Error};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "batchguard")]
#[command(
    about = "Batchguard - run batch routines exactly once per reference date",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (defaults to ./batchguard.toml when present)
    #[arg(long, env = "BATCHGUARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

// Required connection values default to empty so validation can report the
// exact flag that is missing.

#[derive(Args, Debug, Clone)]
pub struct IssuerArgs {
    /// Issuer server address (host, host:port or host,port)
    #[arg(long, env = "BATCHGUARD_ISSUER_SERVER", default_value = "")]
    pub issuer_server: String,

    /// Issuer database name
    #[arg(long, env = "BATCHGUARD_ISSUER_DATABASE", default_value = "")]
    pub issuer_database: String,

    /// Issuer login
    #[arg(long, env = "BATCHGUARD_ISSUER_USER", default_value = "")]
    pub issuer_user: String,

    /// Issuer password (may be empty)
    #[arg(
        long,
        env = "BATCHGUARD_ISSUER_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub issuer_password: String,
}

impl From<IssuerArgs> for ConnectionParams {
    fn from(args: IssuerArgs) -> Self {
        ConnectionParams {
            server: args.issuer_server,
            database: args.issuer_database,
            user: args.issuer_user,
            password: args.issuer_password,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AuditArgs {
    /// Audit server address (host, host:port or host,port)
    #[arg(long, env = "BATCHGUARD_AUDIT_SERVER", default_value = "")]
    pub audit_server: String,

    /// Audit database name
    #[arg(long, env = "BATCHGUARD_AUDIT_DATABASE", default_value = "")]
    pub audit_database: String,

    /// Audit login
    #[arg(long, env = "BATCHGUARD_AUDIT_USER", default_value = "")]
    pub audit_user: String,

    /// Audit password (may be empty)
    #[arg(
        long,
        env = "BATCHGUARD_AUDIT_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub audit_password: String,
}

impl From<AuditArgs> for ConnectionParams {
    fn from(args: AuditArgs) -> Self {
        ConnectionParams {
            server: args.audit_server,
            database: args.audit_database,
            user: args.audit_user,
            password: args.audit_password,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a routine once for the reference date and record the attempt
    Execute {
        #[command(flatten)]
        issuer: IssuerArgs,

        #[command(flatten)]
        audit: AuditArgs,

        /// Routine to run
        #[arg(long, env = "BATCHGUARD_ISSUER_ROUTINE", default_value = "")]
        issuer_routine: String,

        /// Reference date (YYYY-MM-DD, defaults to yesterday)
        #[arg(long, env = "BATCHGUARD_RUN_DATE")]
        run_date: Option<String>,

        /// Run again after a failed or abandoned attempt
        #[arg(long, env = "BATCHGUARD_FORCE_EXECUTION")]
        force_execution: bool,

        /// Remove the routine from the batch catalog before running it
        #[arg(long, env = "BATCHGUARD_REMOVE_FROM_BATCH")]
        remove_from_batch: bool,
    },

    /// Check that the issuer's batch for the reference date has completed
    ValidateBatch {
        #[command(flatten)]
        issuer: IssuerArgs,

        /// Reference date (YYYY-MM-DD, defaults to yesterday)
        #[arg(long, env = "BATCHGUARD_RUN_DATE")]
        run_date: Option<String>,

        /// Also require every complementary sub-process to have finished
        #[arg(long, env = "BATCHGUARD_WAIT_BATCH_COMPLEMENT")]
        wait_batch_complement: bool,
    },

    /// Run a clearing routine (no arguments, no catalog or rerun checks) and
    /// record the attempt
    ExecuteClearing {
        #[command(flatten)]
        issuer: IssuerArgs,

        #[command(flatten)]
        audit: AuditArgs,

        /// Clearing routine to run
        #[arg(long, env = "BATCHGUARD_ISSUER_ROUTINE", default_value = "")]
        issuer_routine: String,
    },

    /// Create the execution history table in the audit database
    InitAuditSchema {
        #[command(flatten)]
        audit: AuditArgs,
    },
}

impl Commands {
    /// Exit code for a failed run of this subcommand.
    pub fn exit_code(&self, err: &Error) -> u8 {
        match self {
            Commands::ExecuteClearing { .. } => err.clearing_exit_code(),
            _ => err.exit_code(),
        }
    }

    /// Exit code for a settings problem detected before the subcommand runs.
    pub fn usage_exit_code(&self) -> u8 {
        match self {
            Commands::ExecuteClearing { .. } => exit_codes::CLEARING_PARAMETER_ERROR,
            _ => exit_codes::PARAM_REQUIRED_EMPTY,
        }
    }
}

/// Exit code for a command line clap rejected.
pub fn rejected_exit_code(args: impl IntoIterator<Item = String>) -> u8 {
    if args.into_iter().any(|arg| arg == "execute-clearing") {
        exit_codes::CLEARING_PARAMETER_ERROR
    } else {
        exit_codes::PARAM_REQUIRED_EMPTY
    }
}
