//! Group administration: `embstore group add | list | remove`.

use anyhow::Result;

use embedstore_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_group_add(config: &Config, name: &str) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let group = store.create_group(name).await?;

    println!("group created");
    println!("  name: {}", group.name);
    println!("  flag: {} ({:#x})", group.flag_name, group.flag.bits());

    store.pool().close().await;
    Ok(())
}

pub async fn run_group_list(config: &Config) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let groups = store.list_groups().await?;
    let files = store.list_files(None).await?;
    store.pool().close().await;

    if groups.is_empty() {
        println!("No groups.");
        return Ok(());
    }

    println!("{:<24} {:<8} {:>18} {:>6}   CREATED", "GROUP", "FLAG", "MASK", "FILES");
    println!("{}", "-".repeat(76));
    for group in &groups {
        let file_count = files
            .iter()
            .filter(|f| f.group_name == group.name && f.is_enabled)
            .count();
        println!(
            "{:<24} {:<8} {:>18} {:>6}   {}",
            group.name,
            group.flag_name,
            format!("{:#x}", group.flag.bits()),
            file_count,
            group.created.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub async fn run_group_remove(config: &Config, name: &str) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let group = store.remove_group(name).await?;

    println!("group removed");
    println!("  name: {}", group.name);
    println!("  retired flag: {}", group.flag_name);

    store.pool().close().await;
    Ok(())
}
