//! Renewal request command handlers.

use std::time::Duration;

use clap::Subcommand;
use messhub_core::{NewRenewalRequest, RenewalRequest};
use messhub_membership::LookupOptions;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::runtime::Runtime;

/// Sub-commands available under `renewal`.
#[derive(Debug, Subcommand)]
pub enum RenewalCommands {
    /// Show the latest pending renewal request
    Show {
        /// Member to look up (defaults to the signed-in user)
        #[arg(long)]
        member: Option<Uuid>,
        /// Give up on the lookup after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Submit a renewal request
    Request {
        /// Plan to renew onto
        #[arg(long)]
        plan: Uuid,
        /// Amount due before any points discount
        #[arg(long)]
        amount: Decimal,
        /// Points to redeem against the amount
        #[arg(long, default_value = "0")]
        points: i64,
        /// Membership being renewed, if any
        #[arg(long)]
        membership: Option<Uuid>,
        #[arg(long)]
        notes: Option<String>,
        /// Member requesting (defaults to the signed-in user)
        #[arg(long)]
        member: Option<Uuid>,
    },
    /// Cancel a pending renewal request
    Cancel {
        /// Request id
        #[arg(long)]
        request: Uuid,
    },
    /// Print every change to a renewal request until interrupted
    Watch {
        /// Request id
        #[arg(long)]
        request: Uuid,
    },
}

pub(crate) async fn dispatch(runtime: &Runtime, command: RenewalCommands) -> anyhow::Result<()> {
    match command {
        RenewalCommands::Show { member, timeout_ms } => {
            run_renewal_show(runtime, member, timeout_ms).await
        }
        RenewalCommands::Request {
            plan,
            amount,
            points,
            membership,
            notes,
            member,
        } => {
            let request = NewRenewalRequest {
                member_id: runtime.member(member)?,
                mess_id: runtime.mess()?,
                membership_id: membership,
                plan_id: plan,
                points_used: points,
                amount,
                notes,
            };
            run_renewal_request(runtime, request).await
        }
        RenewalCommands::Cancel { request } => run_renewal_cancel(runtime, request).await,
        RenewalCommands::Watch { request } => run_renewal_watch(runtime, request).await,
    }
}

fn print_request(request: &RenewalRequest) {
    println!("request   {}", request.id);
    println!("status    {}", request.status);
    println!("plan      {}", request.plan_id);
    println!("amount    {}", request.amount);
    println!("points    {}", request.points_used);
    println!("requested {}", request.requested_at.format("%Y-%m-%d %H:%M"));
    if let Some(notes) = &request.notes {
        println!("notes     {notes}");
    }
}

/// # Errors
///
/// Returns an error if no member or mess is selected or the check fails.
pub(crate) async fn run_eligibility(runtime: &Runtime, member: Option<Uuid>) -> anyhow::Result<()> {
    let member = runtime.member(member)?;
    let mess = runtime.mess()?;
    let eligibility = runtime
        .membership
        .check_renewal_eligibility(member, mess)
        .await?;
    println!("{}: {}", eligibility.code, eligibility.message);
    Ok(())
}

async fn run_renewal_show(
    runtime: &Runtime,
    member: Option<Uuid>,
    timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let member = runtime.member(member)?;
    let mess = runtime.mess()?;
    let options = timeout_ms.map_or_else(LookupOptions::default, |ms| {
        LookupOptions::with_timeout(Duration::from_millis(ms))
    });

    match runtime
        .membership
        .get_current_renewal_request(member, mess, options)
        .await?
    {
        Some(request) => print_request(&request),
        None => println!("no pending renewal request"),
    }
    Ok(())
}

async fn run_renewal_request(runtime: &Runtime, request: NewRenewalRequest) -> anyhow::Result<()> {
    let created = runtime.membership.create_renewal_request(request).await?;
    println!("renewal requested");
    print_request(&created);
    Ok(())
}

async fn run_renewal_cancel(runtime: &Runtime, request_id: Uuid) -> anyhow::Result<()> {
    let cancelled = runtime.membership.cancel_renewal_request(request_id).await?;
    println!("renewal request {} is now {}", cancelled.id, cancelled.status);
    Ok(())
}

async fn run_renewal_watch(runtime: &Runtime, request_id: Uuid) -> anyhow::Result<()> {
    let subscription = runtime
        .membership
        .subscribe_to_renewal_request(request_id, |request| {
            println!(
                "{} renewal request {} is {}",
                chrono::Utc::now().format("%H:%M:%S"),
                request.id,
                request.status
            );
        });
    println!("watching renewal request {request_id}; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    subscription.unsubscribe();
    Ok(())
}
