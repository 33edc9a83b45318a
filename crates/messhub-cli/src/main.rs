use std::process::ExitCode;

use clap::{Parser, Subcommand};
use messhub_membership::ServiceError;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod points;
mod renewal;
mod runtime;
mod session;
mod stores;

use points::PointsCommands;
use renewal::RenewalCommands;
use runtime::Runtime;

#[derive(Debug, Parser)]
#[command(name = "messhub")]
#[command(about = "Mess membership renewals and loyalty points")]
struct Cli {
    /// Mess to operate on
    #[arg(long, global = true, env = "MESSHUB_MESS_ID")]
    mess: Option<Uuid>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Initialize all stores and print their state
    Init,
    /// Sign in with email and password
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long, env = "MESSHUB_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// End the current session and reset every store
    SignOut,
    /// Check whether a renewal request can be submitted
    Eligibility {
        /// Member to check (defaults to the signed-in user)
        #[arg(long)]
        member: Option<Uuid>,
    },
    /// Renewal request management
    Renewal {
        #[command(subcommand)]
        command: RenewalCommands,
    },
    /// Loyalty points
    Points {
        #[command(subcommand)]
        command: PointsCommands,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = messhub_core::load_app_config_from_env()?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let Some(command) = cli.command else {
        println!("messhub ready; run `messhub --help` for commands");
        return Ok(ExitCode::SUCCESS);
    };

    let runtime = Runtime::start(config, cli.mess).await?;
    match run(&runtime, command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) if report(&err) => Ok(ExitCode::FAILURE),
        Err(err) => Err(err),
    }
}

async fn run(runtime: &Runtime, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Init => {
            stores::print_store_states(runtime);
            Ok(())
        }
        Commands::SignIn { email, password } => {
            session::run_sign_in(runtime, &email, &password).await
        }
        Commands::SignOut => session::run_sign_out(runtime).await,
        Commands::Eligibility { member } => renewal::run_eligibility(runtime, member).await,
        Commands::Renewal { command } => renewal::dispatch(runtime, command).await,
        Commands::Points { command } => points::dispatch(runtime, command).await,
    }
}

/// Prints the user-facing message and recovery options of a classified
/// error. Returns `false` when `err` still needs printing.
fn report(err: &anyhow::Error) -> bool {
    let Some(lines) = report_lines(err) else {
        return false;
    };
    for line in lines {
        eprintln!("{line}");
    }
    true
}

fn report_lines(err: &anyhow::Error) -> Option<Vec<String>> {
    match err.downcast_ref::<ServiceError>()? {
        ServiceError::App(app) => {
            let mut lines = vec![format!("{} ({})", app.message, app.kind)];
            let labels = app.action_labels();
            if !labels.is_empty() {
                lines.push(format!("options: {}", labels.join(", ")));
            }
            Some(lines)
        }
        ServiceError::Ineligible(eligibility) => Some(vec![format!(
            "{} [{}]",
            eligibility.message, eligibility.code
        )]),
        ServiceError::Throttled(_) => None,
    }
}

#[cfg(test)]
mod tests;
