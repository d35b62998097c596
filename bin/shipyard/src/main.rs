//! shipyard deploys and configures a declared set of contracts, once.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, DeployArgs};
use shipyard_deploy::{
    DeployOptions, Deployer, ForceRedeploy, NetworkName, RunReport, Scheduled, Step, StepKind, StepOutcome,
    stale_dependents,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let deployer = Deployer::load_from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Command::Deploy(args) => deploy(&deployer, args).await,
        Command::List { network } => list(&deployer, &network),
        Command::Stale { network, artifact } => stale(&deployer, &network, &artifact),
        Command::Config => {
            print!("{}", deployer.to_toml()?);
            Ok(())
        }
    }
}

async fn deploy(deployer: &Deployer, args: DeployArgs) -> Result<()> {
    let options = DeployOptions {
        selection: args.selection(),
        force: args.force(),
        network: args.network,
    };

    if args.dry_run {
        return print_plan(deployer, &options);
    }

    tokio::select! {
        result = deployer.deploy(&options) => {
            let report = result.context("Deployment failed")?;
            print_report(&report);
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Received Ctrl+C, abandoning in-flight waits");
            anyhow::bail!("Interrupted; submitted deployments are journaled and resumed by the next run")
        }
    }
}

fn print_plan(deployer: &Deployer, options: &DeployOptions) -> Result<()> {
    let plan = deployer.plan(&options.network, &options.selection)?;
    let ledger = deployer.open_ledger_read_only()?;
    plan.check_references(|name| ledger.get(&options.network, name).is_some())?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["#", "Step", "Kind", "Tags", "Action"]);

    for (position, planned) in plan.steps().iter().enumerate() {
        let name = planned.step.name();
        let action = match &planned.step {
            Step::Deploy(_) if options.force.applies_to(name) => "redeploy".to_string(),
            Step::Deploy(_) => match ledger.get(&options.network, name) {
                Some(record) => format!("skip ({})", record.address),
                None if ledger.pending(&options.network, name)?.is_some() => "resume".to_string(),
                None => "deploy".to_string(),
            },
            Step::Configure(batch) => format!("configure ({} calls)", batch.calls.len()),
        };
        let tags: Vec<&str> = planned.step.tags().iter().map(String::as_str).collect();
        table.add_row(vec![
            (position + 1).to_string(),
            name.to_string(),
            planned.step.kind().to_string(),
            tags.join(","),
            action,
        ]);
    }

    println!("Execution plan for {} ({} steps)", options.network, plan.len());
    println!("{table}");
    if options.force != ForceRedeploy::None {
        println!("Forced redeploys do not cascade; run `shipyard stale` afterwards.");
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Step", "Outcome", "Detail"]);

    for step in &report.steps {
        let (outcome, detail) = match &step.outcome {
            StepOutcome::Deployed(deployment) => (
                deployment.outcome.to_string(),
                deployment.record.address.to_string(),
            ),
            StepOutcome::Configured(batch) => (
                "configured".to_string(),
                format!("{} executed, {} skipped", batch.executed.len(), batch.skipped.len()),
            ),
        };
        table.add_row(vec![step.name.clone(), outcome, detail]);
    }

    println!("{table}");
    println!(
        "{} deployed, {} recovered, {} skipped, {} configured",
        report.deployed(),
        report.recovered(),
        report.skipped(),
        report.configured()
    );
}

fn list(deployer: &Deployer, network: &NetworkName) -> Result<()> {
    deployer.network(network)?;
    let ledger = deployer.open_ledger_read_only()?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Name", "Contract", "Address", "Transaction", "Block", "Deployed at"]);
    for (name, record) in ledger.all(network) {
        table.add_row(vec![
            name,
            record.contract,
            record.address.to_string(),
            record.receipt.tx_hash.to_string(),
            record.receipt.block_number.to_string(),
            record.deployed_at,
        ]);
    }

    println!("Deployments on {network} recorded in {}", ledger.root().display());
    println!("{table}");
    Ok(())
}

fn stale(deployer: &Deployer, network: &NetworkName, artifact: &str) -> Result<()> {
    deployer.network(network)?;
    let ledger = deployer.open_ledger_read_only()?;
    let dependents = stale_dependents(&deployer.steps, &ledger, network, artifact)?;

    if dependents.is_empty() {
        println!("No stale dependents of {artifact} on {network}");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Dependent", "Kind", "Reason"]);
    for dependent in &dependents {
        table.add_row(vec![
            dependent.name.clone(),
            dependent.kind.to_string(),
            dependent.reason.to_string(),
        ]);
    }

    println!("Stale dependents of {artifact} on {network}");
    println!("{table}");

    let (deploys, batches): (Vec<_>, Vec<_>) = dependents
        .iter()
        .partition(|dependent| dependent.kind == StepKind::Deploy);
    if !deploys.is_empty() {
        let names: Vec<&str> = deploys.iter().map(|d| d.name.as_str()).collect();
        println!(
            "Redeploy them with: shipyard deploy --network {network} --redeploy {}",
            names.join(",")
        );
    }
    for batch in batches {
        println!("Review the skip guards of `{}`: they may compare against an outdated address", batch.name);
    }
    Ok(())
}
