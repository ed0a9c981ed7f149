use anyhow::{bail, Context, Result};

use crate::cache::Cache;
use crate::cli::config::Config;
use crate::cli::{DeleteArgs, DumpArgs, GetArgs, SetArgs};
use crate::record::Record;

/// Open a cache over the configured file store and wait for its bootstrap.
pub async fn open_cache(config: &Config) -> Result<Cache> {
    let store = config.store()?;
    tracing::debug!(root = %store.root().display(), "using file store");
    let cache = Cache::launch(
        config.cache_options(),
        store,
        config.dataset_builder(),
        config.request_timeout(),
    );
    if !cache.ready().await {
        let reason = cache
            .last_error()
            .unwrap_or_else(|| "no data loaded".to_string());
        bail!("Failed to load {}: {}", cache.storage_key(), reason);
    }
    Ok(cache)
}

/// Wait for queued writes and surface any failure they hit.
async fn settle(cache: &Cache) -> Result<()> {
    cache.flush().await;
    if let Some(error) = cache.last_error() {
        bail!("{}", error);
    }
    Ok(())
}

pub async fn execute_hydrate(config: &Config) -> Result<()> {
    let cache = open_cache(config).await?;
    let outcome = cache.hydrate().await;
    if !outcome.is_loaded() {
        bail!("Failed to hydrate {}: {}", cache.storage_key(), outcome);
    }
    println!("{}: {} records", cache.storage_key(), cache.len());
    Ok(())
}

pub async fn execute_get(config: &Config, args: GetArgs) -> Result<()> {
    let cache = open_cache(config).await?;
    match cache.get(args.key) {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => bail!("Record {} not found", args.key),
    }
    Ok(())
}

pub async fn execute_set(config: &Config, args: SetArgs) -> Result<()> {
    let record: Record = serde_json::from_str(&args.record)
        .with_context(|| format!("Record must be a JSON object: {}", args.record))?;

    let cache = open_cache(config).await?;
    for column in cache.columns().iter().filter(|c| c.read_only) {
        let current = cache.get(args.key).and_then(|r| r.get(&column.name).cloned());
        let incoming = record.get(&column.name);
        if current.is_some() && current.as_ref() != incoming {
            bail!("Column {} is read-only", column.name);
        }
    }

    let confirmation = cache.set(args.key, record);
    settle(&cache).await?;
    println!("{}", confirmation);
    Ok(())
}

pub async fn execute_delete(config: &Config, args: DeleteArgs) -> Result<()> {
    let cache = open_cache(config).await?;
    let removed = cache.delete(args.key);
    settle(&cache).await?;
    println!("{}", removed);
    Ok(())
}

pub fn execute_columns(config: &Config) -> Result<()> {
    let columns = config.schema.columns();
    let width = columns.iter().map(|c| c.name.len()).max().unwrap_or(4).max(4);
    println!("{:<width$}  {:<8}  READ-ONLY", "NAME", "TYPE", width = width);
    for column in columns {
        println!(
            "{:<width$}  {:<8}  {}",
            column.name,
            column.column_type.as_str(),
            if column.read_only { "yes" } else { "no" },
            width = width
        );
    }
    Ok(())
}

pub async fn execute_dump(config: &Config, args: DumpArgs) -> Result<()> {
    let cache = open_cache(config).await?;
    let limit = args.limit.unwrap_or(usize::MAX);
    for row in cache.rows().into_iter().take(limit) {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path, size: usize) -> Config {
        let mut config = Config::default();
        config.size = size;
        config.storage.dir = Some(dir.to_path_buf());
        config
    }

    #[tokio::test]
    async fn test_set_then_get_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 4);

        execute_set(
            &config,
            SetArgs {
                key: 2,
                record: r#"{"ID": 2, "Call_Sign": "KQED"}"#.to_string(),
            },
        )
        .await
        .unwrap();

        let cache = open_cache(&config).await.unwrap();
        assert_eq!(cache.get(2).unwrap()["Call_Sign"], "KQED");
        assert_eq!(cache.len(), 4);
    }

    #[tokio::test]
    async fn test_set_rejects_read_only_change() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 4);
        let result = execute_set(
            &config,
            SetArgs {
                key: 1,
                record: r#"{"ID": 100}"#.to_string(),
            },
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn test_set_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 1);
        let result = execute_set(
            &config,
            SetArgs {
                key: 0,
                record: "[1, 2]".to_string(),
            },
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_hydrate_seeds_then_loads() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 3);
        execute_hydrate(&config).await.unwrap();

        // second run loads what the first one persisted
        execute_hydrate(&config).await.unwrap();
        let cache = open_cache(&config).await.unwrap();
        assert!(cache.hydrate().await.is_loaded());
        assert_eq!(cache.len(), 3);
    }
}
