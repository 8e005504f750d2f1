use anyhow::{bail, Context};
use keygraph::{FileStore, GraphConfig, GraphDb};
use std::io::Read;
use std::sync::Arc;

const USAGE: &str = "usage: keygraph <data-dir> [script-file]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(data_dir) = args.next() else {
        bail!(USAGE);
    };
    let script = match args.next() {
        Some(path) => std::fs::read_to_string(&path).with_context(|| format!("reading script {}", path))?,
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text).context("reading script from stdin")?;
            text
        }
    };

    let config = match std::env::var("KEYGRAPH_CONFIG") {
        Ok(path) => GraphConfig::load(&path).with_context(|| format!("loading config {}", path))?,
        Err(_) => GraphConfig::default(),
    };

    let store = FileStore::open(&data_dir)
        .await
        .with_context(|| format!("opening data directory {}", data_dir))?;
    let (db, report) = GraphDb::open(Arc::new(store), config).await?;
    tracing::info!(
        "Keygraph v{}: recovered {} actions (last lsn {})",
        keygraph::version(),
        report.actions_replayed,
        report.last_lsn
    );

    let result = db.execute_batch(&script).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    let ok = result.is_ok();
    db.close().await?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
