//! Loyalty points command handlers.

use clap::Subcommand;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::runtime::Runtime;

/// Sub-commands available under `points`.
#[derive(Debug, Subcommand)]
pub enum PointsCommands {
    /// Show the current points balance
    Balance {
        /// Member to look up (defaults to the signed-in user)
        #[arg(long)]
        member: Option<Uuid>,
    },
    /// List points transactions, newest first
    History {
        #[arg(long)]
        member: Option<Uuid>,
        /// 1-based page number
        #[arg(long, default_value = "1")]
        page: u64,
        #[arg(long, default_value = "20")]
        per_page: u64,
    },
    /// Preview the discount points would give on an amount
    Benefit {
        #[arg(long)]
        member: Option<Uuid>,
        /// Amount due before the discount
        #[arg(long)]
        amount: Decimal,
    },
}

pub(crate) async fn dispatch(runtime: &Runtime, command: PointsCommands) -> anyhow::Result<()> {
    match command {
        PointsCommands::Balance { member } => run_points_balance(runtime, member).await,
        PointsCommands::History {
            member,
            page,
            per_page,
        } => run_points_history(runtime, member, page, per_page).await,
        PointsCommands::Benefit { member, amount } => {
            run_points_benefit(runtime, member, amount).await
        }
    }
}

async fn run_points_balance(runtime: &Runtime, member: Option<Uuid>) -> anyhow::Result<()> {
    let member = runtime.member(member)?;
    let balance = runtime
        .membership
        .get_points_balance(member, runtime.mess()?)
        .await?;
    println!("points balance: {balance}");
    Ok(())
}

async fn run_points_history(
    runtime: &Runtime,
    member: Option<Uuid>,
    page: u64,
    per_page: u64,
) -> anyhow::Result<()> {
    let member = runtime.member(member)?;
    let result = runtime
        .membership
        .get_points_transactions(member, runtime.mess()?, page, per_page)
        .await?;

    if result.items.is_empty() {
        println!("no points transactions on page {page}");
        return Ok(());
    }

    println!("{:<18}{:<10}{:>8}  DESCRIPTION", "DATE", "TYPE", "POINTS");
    for tx in &result.items {
        println!(
            "{:<18}{:<10}{:>8}  {}",
            tx.created_at.format("%Y-%m-%d %H:%M"),
            tx.transaction_type.to_string(),
            tx.points,
            tx.description.as_deref().unwrap_or("")
        );
    }
    if let Some(total) = result.total {
        println!("page {page} of {}", total.div_ceil(per_page.max(1)).max(1));
    }
    Ok(())
}

async fn run_points_benefit(
    runtime: &Runtime,
    member: Option<Uuid>,
    amount: Decimal,
) -> anyhow::Result<()> {
    let member = runtime.member(member)?;
    let benefit = runtime
        .membership
        .calculate_points_benefit(member, runtime.mess()?, amount)
        .await?;
    println!("available points  {}", benefit.available_points);
    println!("points to use     {}", benefit.points_to_use);
    println!("discount          {}", benefit.discount_amount);
    println!("final amount      {}", benefit.final_amount);
    Ok(())
}
