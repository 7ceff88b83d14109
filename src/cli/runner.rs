use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assembly::{ComputeParams, RecordState};
use crate::cache::{LookupTableCache, LookupTableStore, RpcLookupTableSource};
use crate::cli::args::{Cli, Command, RequestArgs, SlotArgs, SubmitArgs};
use crate::cli::request::load_request;
use crate::config::AppConfig;
use crate::context::ExecutionContext;
use crate::maintenance::{close_buffer, close_record, execute_record, inspect_slot};
use crate::pipeline::{AttemptOutcome, Pipeline, PipelineReport};
use crate::relay::{
    BundleClient, HttpRelayTransport, SimulationReport, TipSelector, encode_transaction,
};

pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let ctx = ExecutionContext::from_config(&config)?;
    info!(
        target: "cli",
        creator = %ctx.creator(),
        program = %ctx.program_id,
        "执行上下文就绪"
    );

    match cli.command {
        Command::Submit(args) => submit(&ctx, config, args).await,
        Command::Simulate(args) => simulate(&ctx, &config, args).await,
        Command::Execute(args) => execute(&ctx, &config, args).await,
        Command::CloseBuffer(args) => {
            let signature = close_buffer(&ctx, args.slot).await?;
            println!("{signature}");
            Ok(())
        }
        Command::CloseRecord(args) => {
            let signature = close_record(&ctx, args.slot).await?;
            println!("{signature}");
            Ok(())
        }
        Command::Inspect(args) => inspect(&ctx, args).await,
    }
}

async fn build_cache(ctx: &ExecutionContext, config: &AppConfig) -> Arc<LookupTableCache> {
    let source = Arc::new(RpcLookupTableSource::new(ctx.rpc.clone()));
    let max_age = config.cache.max_age();
    let cache = if config.cache.persist {
        let store = LookupTableStore::new(config.cache.dir.clone());
        LookupTableCache::open(source, store, max_age).await
    } else {
        LookupTableCache::in_memory(source, max_age)
    };
    Arc::new(cache)
}

fn build_relay(config: &AppConfig) -> Result<BundleClient> {
    let relay = &config.relay;
    let transport = HttpRelayTransport::new(
        &relay.endpoint,
        relay.uuid.as_deref(),
        &relay.bundle_error_api,
        relay.request_timeout(),
    )?;
    Ok(BundleClient::new(
        Arc::new(transport),
        relay.max_bundle_transactions,
    ))
}

async fn build_pipeline(ctx: &ExecutionContext, config: &AppConfig) -> Result<Pipeline> {
    let cache = build_cache(ctx, config).await;
    let relay = build_relay(config)?;
    let tips = TipSelector::from_config(&config.relay.tip);
    Ok(Pipeline::new(ctx, cache, relay, tips, &config.pipeline)?)
}

async fn submit(ctx: &ExecutionContext, mut config: AppConfig, args: SubmitArgs) -> Result<()> {
    if let Some(slot) = args.slot {
        config.pipeline.first_slot_index = slot;
    }
    if let Some(attempts) = args.max_attempts {
        config.pipeline.max_attempts = attempts;
    }
    if args.skip_simulation {
        config.pipeline.simulate = false;
    }

    let request = load_request(&args.request.request, ctx.creator()).await?;
    let cancel = CancellationToken::new();
    let pipeline = build_pipeline(ctx, &config).await?.with_cancel(cancel.clone());

    if args.dry_run {
        let bundle = pipeline
            .prepare(&request, config.pipeline.first_slot_index)
            .await?;
        info!(
            target: "cli",
            buffer = %bundle.buffer,
            record = %bundle.record,
            count = bundle.len(),
            "dry-run：bundle 已组装，未发送"
        );
        for (role, tx) in bundle.roles.iter().zip(&bundle.transactions) {
            println!("{}\t{}", role.label(), encode_transaction(tx)?);
        }
        return Ok(());
    }

    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target: "cli", "收到终止信号，停止提交");
            watcher.cancel();
        }
    });

    let report = pipeline.run_with_retries(&request).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &PipelineReport) {
    println!(
        "attempts={} slot={} buffer={} record={} outcome={}",
        report.attempts,
        report.slot_index,
        report.buffer,
        report.record,
        report.outcome.label()
    );
    match &report.outcome {
        AttemptOutcome::Landed(landed) => {
            println!("bundle={} slot={:?}", landed.bundle_id, landed.slot);
            for tx in &landed.transactions {
                println!(
                    "  {} cu={:?} err={}",
                    tx.signature,
                    tx.compute_units,
                    tx.error.as_deref().unwrap_or("-")
                );
            }
        }
        AttemptOutcome::Failed(failed) => {
            println!("bundle={} detail={:?}", failed.bundle_id, failed.detail);
        }
        AttemptOutcome::SimulationRejected { index, reason } => {
            println!("index={index} reason={reason}");
        }
        AttemptOutcome::Invalid {
            bundle_id,
            reconciliation,
        }
        | AttemptOutcome::TimedOut {
            bundle_id,
            reconciliation,
        } => {
            warn!(
                target: "cli",
                bundle_id = %bundle_id,
                reconciliation = ?reconciliation,
                "bundle 结果不确定，请用 inspect 核对"
            );
            println!("bundle={bundle_id} reconciliation={reconciliation:?}");
        }
    }
}

async fn simulate(ctx: &ExecutionContext, config: &AppConfig, args: RequestArgs) -> Result<()> {
    let request = load_request(&args.request, ctx.creator()).await?;
    let pipeline = build_pipeline(ctx, config).await?;
    match pipeline.simulate_only(&request).await? {
        SimulationReport::Succeeded { units } => {
            for (index, unit) in units.iter().enumerate() {
                println!("#{index} cu={unit:?}");
            }
        }
        SimulationReport::Failed { index, reason } => {
            println!("failed index={index} reason={reason}");
        }
    }
    Ok(())
}

async fn execute(ctx: &ExecutionContext, config: &AppConfig, args: SlotArgs) -> Result<()> {
    let cache = build_cache(ctx, config).await;
    let compute: ComputeParams = config.pipeline.compute.into();
    let signature = execute_record(ctx, &cache, compute, args.slot).await?;
    println!("{signature}");
    Ok(())
}

async fn inspect(ctx: &ExecutionContext, args: SlotArgs) -> Result<()> {
    let report = inspect_slot(ctx, args.slot).await?;
    println!("slot={}", report.slot_index);
    match &report.staged {
        Some(staged) => println!(
            "buffer={} staged={}/{} hash_ok={}",
            report.buffer,
            staged.staged_len(),
            staged.final_buffer_size,
            staged.hash_matches()
        ),
        None => println!("buffer={} (不存在)", report.buffer),
    }
    match &report.record_state {
        RecordState::Loaded(account) => println!(
            "record={} accounts={} instructions={} ephemeral_signers={}",
            report.record,
            account.message.num_addressable_accounts(),
            account.message.instructions.len(),
            account.ephemeral_signer_count()
        ),
        RecordState::NotCreated => println!("record={} (不存在)", report.record),
    }
    Ok(())
}
