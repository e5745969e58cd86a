//! Scan for MOCUTE controllers, bond with the first one found and print
//! its HID input reports.
//!
//! Run with: cargo run --example scan_and_connect
//!
//! To match a different controller:
//!   cargo run --example scan_and_connect -- --name 8BitDo

use ble_hid_link::ble::BtleplugAdapter;
use ble_hid_link::{ConnectionState, DeviceManager, ManagerConfig, Result};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_hid_link=debug".parse().unwrap()),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut config = ManagerConfig::default().with_operation_timeout(Duration::from_secs(30));
    if let Some(name) = args
        .iter()
        .position(|arg| arg == "--name")
        .and_then(|i| args.get(i + 1))
    {
        config = config.with_name_filter(name.clone());
    }

    println!(
        "Scanning for controllers named like \"{}\"...\n",
        config.name_filter
    );

    let adapter = BtleplugAdapter::new().await?;
    let manager = DeviceManager::start(Arc::new(adapter), config).await?;

    let _notice_handle = manager.on_notice(|notice| {
        println!("[notice] {}", notice);
    });

    let _report_handle = manager.on_notification(|event| {
        println!("{} {:02x?}", event.peripheral, event.value.as_ref());
    });

    for device in manager.discovered_devices() {
        println!(
            "Known from a previous session: {} ({})",
            device.display_name(),
            device.id
        );
    }

    manager.request_scan().await?;
    tokio::time::sleep(manager.config().scan_duration).await;

    let devices = manager.discovered_devices();
    let Some(target) = devices.iter().find(|d| d.connection_state.can_connect()) else {
        println!("No controller found. Is it in pairing mode?");
        manager.shutdown().await?;
        return Ok(());
    };

    println!("Connecting to {} ({})...", target.display_name(), target.id);
    manager.request_connect(&target.id)?;

    let mut lists = manager.subscribe_devices();
    let id = target.id.clone();

    println!("Press Ctrl+C to disconnect and exit.\n");

    loop {
        tokio::select! {
            changed = lists.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = lists
                    .borrow()
                    .discovered
                    .iter()
                    .find(|r| r.id == id)
                    .map(|r| r.connection_state);
                if let Some(state) = state {
                    println!("{} is {}", id, state);
                    if state == ConnectionState::Error {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted!");
                manager.request_disconnect(&id)?;
                tokio::time::sleep(Duration::from_secs(2)).await;
                break;
            }
        }
    }

    manager.shutdown().await?;
    println!("\nDone!");

    Ok(())
}
