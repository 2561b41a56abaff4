use clap::Args;
use gatekeeper::config::AppConfig;
use gatekeeper::context::GatekeeperContext;
use gatekeeper::error::AppError;
use gatekeeper::export::write_applications;
use gatekeeper::telemetry;
use gatekeeper::workflows::membership::{Application, MembershipError, Nickname};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub(crate) struct CheckArgs {
    /// In-game nickname to look up
    pub(crate) nickname: String,
}

#[derive(Args, Debug)]
pub(crate) struct PurgeArgs {
    /// In-game nickname whose application should be deleted
    pub(crate) nickname: String,
}

#[derive(Args, Debug)]
pub(crate) struct PendingArgs {
    /// Maximum number of applications to list
    #[arg(long, default_value_t = 50)]
    pub(crate) limit: usize,
}

#[derive(Args, Debug)]
pub(crate) struct ExportArgs {
    /// Destination file; standard output when omitted
    #[arg(long, short)]
    pub(crate) output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct RconArgs {
    /// Console command and its arguments, e.g. `whitelist list`
    #[arg(required = true, num_args = 1..)]
    pub(crate) command: Vec<String>,
}

async fn open() -> Result<GatekeeperContext, AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    GatekeeperContext::connect(&config).await
}

pub(crate) async fn check(args: CheckArgs) -> Result<(), AppError> {
    let nickname = Nickname::from_stored(args.nickname);
    let context = open().await?;

    match context.service().query_status(&nickname).await? {
        Some(application) => render_application(&application),
        None => println!("No application found for {nickname}"),
    }

    context.shutdown().await;
    Ok(())
}

pub(crate) async fn purge(args: PurgeArgs) -> Result<(), AppError> {
    let nickname = Nickname::from_stored(args.nickname);
    let context = open().await?;

    let result = context.service().purge_record(&nickname).await;
    context.shutdown().await;

    match result {
        Ok(()) => {
            println!("Application for {nickname} deleted");
            Ok(())
        }
        Err(MembershipError::NotFound(_)) => {
            println!("No application found for {nickname}");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) async fn pending(args: PendingArgs) -> Result<(), AppError> {
    let context = open().await?;
    let applications = context.service().pending(args.limit.max(1)).await?;

    if applications.is_empty() {
        println!("No pending applications");
    } else {
        println!("Pending applications ({})", applications.len());
        for application in &applications {
            println!(
                "- {} (requester {}) submitted {}",
                application.nickname,
                application.requester_id,
                application.created_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    context.shutdown().await;
    Ok(())
}

pub(crate) async fn export(args: ExportArgs) -> Result<(), AppError> {
    let context = open().await?;
    let applications = context.service().all(usize::MAX).await?;

    let written = match &args.output {
        Some(path) => write_applications(BufWriter::new(File::create(path)?), &applications)?,
        None => write_applications(io::stdout().lock(), &applications)?,
    };
    info!(rows = written, output = ?args.output, "applications exported");

    context.shutdown().await;
    Ok(())
}

pub(crate) async fn rcon(args: RconArgs) -> Result<(), AppError> {
    let context = open().await?;
    let command = args.command.join(" ");

    let result = context.service().console_command(&command).await;
    context.shutdown().await;

    let response = result?;
    if response.is_empty() {
        println!("(no response)");
    } else {
        println!("{response}");
    }
    Ok(())
}

fn render_application(application: &Application) {
    println!("Application for {}", application.nickname);
    println!("- status: {}", application.status);
    println!("- requester: {}", application.requester_id);
    println!(
        "- submitted: {}",
        application.created_at.format("%Y-%m-%d %H:%M")
    );
    if let Some(processed_at) = application.processed_at {
        println!(
            "- processed: {} by {}",
            processed_at.format("%Y-%m-%d %H:%M"),
            application.processed_by.as_deref().unwrap_or("unknown")
        );
    }
    for (question, answer) in application.answers().into_iter().skip(1) {
        println!("  {}: {}", question.label(), answer);
    }
}
