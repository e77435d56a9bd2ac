#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;

use bazaar_kernel_contracts::records::LIST_LIMIT_MAX;
use bazaar_kernel_contracts::unsynced::OperationKind;
use bazaar_storage::KeyValueStore;

use crate::client::{ApiClient, ClientError, ListFilter};
use crate::export::{simulations_csv, transactions_csv};
use crate::offline::{OfflineError, OfflineReconciliationCounter};
use crate::{Command, DeleteArgs, ExportArgs, ListArgs, RecordTable, SimulateArgs, UploadArgs};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Offline(#[from] OfflineError),
    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not render output: {0}")]
    Render(#[from] serde_json::Error),
}

/// Updates the counter from the result of one write.
///
/// A reply with `synced=false` or a failure that may not have reached the
/// store adds exactly one entry; a synced reply clears that kind.
pub fn record_write_outcome<S: KeyValueStore>(
    counter: &mut OfflineReconciliationCounter<S>,
    kind: OperationKind,
    attempted_payload: &str,
    outcome: Result<bool, &ClientError>,
) -> Result<(), OfflineError> {
    match outcome {
        Ok(true) => {
            counter.record_sync_success(kind)?;
        }
        Ok(false) => {
            counter.record_failure(kind, attempted_payload, "store unavailable")?;
        }
        Err(e) if e.is_unsynced() => {
            counter.record_failure(kind, attempted_payload, e.to_string())?;
        }
        Err(_) => {}
    }
    Ok(())
}

pub fn execute<S: KeyValueStore>(
    command: Command,
    client: &ApiClient,
    counter: &mut OfflineReconciliationCounter<S>,
) -> Result<String, CommandError> {
    match command {
        Command::Upload(args) => upload(args, client, counter),
        Command::Simulate(args) => simulate(args, client, counter),
        Command::List(args) => list(args, client),
        Command::Delete(args) => delete(args, client),
        Command::Status => status(client, counter),
        Command::Export(args) => export(args, client),
    }
}

fn upload<S: KeyValueStore>(
    args: UploadArgs,
    client: &ApiClient,
    counter: &mut OfflineReconciliationCounter<S>,
) -> Result<String, CommandError> {
    let attempted = serde_json::json!({
        "file": args.file.display().to_string(),
        "source": args.source,
        "hint": args.hint,
    })
    .to_string();
    let res = client.upload_receipt(&args.file, args.source.as_deref(), args.hint.as_deref());
    record_write_outcome(
        counter,
        OperationKind::ReceiptUpload,
        &attempted,
        res.as_ref().map(|r| r.synced),
    )?;
    let reply = res?;
    Ok(format!(
        "{}\n{}",
        sync_line(reply.synced, reply.record_id.as_ref().map(|id| id.as_str()), counter.count()),
        serde_json::to_string_pretty(&reply.result)?
    ))
}

fn simulate<S: KeyValueStore>(
    args: SimulateArgs,
    client: &ApiClient,
    counter: &mut OfflineReconciliationCounter<S>,
) -> Result<String, CommandError> {
    let query = args.query.join(" ");
    let attempted = serde_json::json!({ "query": query }).to_string();
    let res = client.simulate(&query);
    record_write_outcome(
        counter,
        OperationKind::Simulation,
        &attempted,
        res.as_ref().map(|r| r.synced),
    )?;
    let reply = res?;
    let o = &reply.result.outcome;
    let mut out = sync_line(
        reply.synced,
        reply.record_id.as_ref().map(|id| id.as_str()),
        counter.count(),
    );
    out.push_str(&format!(
        "\n{} on {} (confidence {})\n  weekly revenue {} -> {}\n  weekly profit  {} -> {}",
        o.scenario.as_str(),
        o.item,
        o.confidence.value(),
        o.before.weekly_revenue,
        o.after.weekly_revenue,
        o.before.weekly_profit,
        o.after.weekly_profit,
    ));
    for rec in &o.recommendations {
        out.push_str(&format!("\n  - {rec}"));
    }
    Ok(out)
}

fn sync_line(synced: bool, record_id: Option<&str>, unsynced: u64) -> String {
    match (synced, record_id) {
        (true, Some(id)) => format!("saved as {id}"),
        _ => format!("not saved: store unavailable ({unsynced} unsynced)"),
    }
}

fn list(args: ListArgs, client: &ApiClient) -> Result<String, CommandError> {
    let filter = ListFilter {
        limit: args.limit,
        offset: args.offset,
        created_after: args.after,
        created_before: args.before,
        source: args.source,
    };
    match args.table {
        RecordTable::Transactions => {
            let page = client.list_transactions(&filter)?;
            if args.json {
                return Ok(serde_json::to_string_pretty(&page)?);
            }
            let mut out = format!("{} transactions (more: {})", page.total, page.has_more);
            for t in &page.items {
                let total = t
                    .record
                    .final_payload()
                    .as_receipt()
                    .and_then(|r| r.total)
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string());
                out.push_str(&format!(
                    "\n  {} {} total={} {}",
                    t.id.as_str(),
                    t.source,
                    total,
                    t.record.decision_basis().as_str()
                ));
            }
            Ok(out)
        }
        RecordTable::Simulations => {
            let page = client.list_simulations(&filter)?;
            if args.json {
                return Ok(serde_json::to_string_pretty(&page)?);
            }
            let mut out = format!("{} simulations (more: {})", page.total, page.has_more);
            for s in &page.items {
                out.push_str(&format!(
                    "\n  {} {} {} {:?}",
                    s.id.as_str(),
                    s.outcome.scenario.as_str(),
                    s.outcome.item,
                    s.query
                ));
            }
            Ok(out)
        }
    }
}

fn delete(args: DeleteArgs, client: &ApiClient) -> Result<String, CommandError> {
    match args.table {
        RecordTable::Transactions => client.delete_transaction(&args.id)?,
        RecordTable::Simulations => client.delete_simulation(&args.id)?,
    }
    Ok(format!("deleted {}", args.id))
}

fn status<S: KeyValueStore>(
    client: &ApiClient,
    counter: &OfflineReconciliationCounter<S>,
) -> Result<String, CommandError> {
    let ready = match client.ready() {
        Ok(true) => "ready",
        Ok(false) => "store unavailable",
        Err(e) => {
            tracing::debug!(error = %e, "readiness probe failed");
            "unreachable"
        }
    };
    let mut out = format!("server: {ready}\nunsynced writes: {}", counter.count());
    for kind in [OperationKind::ReceiptUpload, OperationKind::Simulation] {
        let n = counter.pending_of(kind);
        if n > 0 {
            out.push_str(&format!("\n  {}: {n}", kind.as_str()));
        }
    }
    if ready == "ready" {
        let stats = client.stats()?;
        out.push_str(&format!(
            "\ntransactions: {}\nsimulations: {}",
            stats.transactions_total, stats.simulations_total
        ));
        for (scenario, n) in &stats.simulations_by_scenario {
            out.push_str(&format!("\n  {scenario}: {n}"));
        }
    }
    Ok(out)
}

fn export(args: ExportArgs, client: &ApiClient) -> Result<String, CommandError> {
    let csv = match args.table {
        RecordTable::Transactions => transactions_csv(&collect_pages(|f| {
            client
                .list_transactions(f)
                .map(|p| (p.items, p.has_more))
        })?),
        RecordTable::Simulations => simulations_csv(&collect_pages(|f| {
            client
                .list_simulations(f)
                .map(|p| (p.items, p.has_more))
        })?),
    };
    match args.out {
        Some(path) => {
            fs::write(&path, csv.as_bytes()).map_err(|source| CommandError::Write {
                path: path.clone(),
                source,
            })?;
            Ok(format!("wrote {}", path.display()))
        }
        None => Ok(csv),
    }
}

/// Walks every page of a listing at the maximum page size.
fn collect_pages<T>(
    mut fetch: impl FnMut(&ListFilter) -> Result<(Vec<T>, bool), ClientError>,
) -> Result<Vec<T>, ClientError> {
    let mut all = Vec::new();
    let mut offset = 0u32;
    loop {
        let filter = ListFilter {
            limit: Some(LIST_LIMIT_MAX),
            offset: Some(offset),
            ..ListFilter::default()
        };
        let (items, has_more) = fetch(&filter)?;
        let fetched = items.len() as u32;
        all.extend(items);
        if !has_more || fetched == 0 {
            return Ok(all);
        }
        offset = offset.saturating_add(fetched);
    }
}
