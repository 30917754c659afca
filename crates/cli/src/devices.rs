//! `personctl devices` subcommands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::info;
use uuid::Uuid;

use personctl_core::db::Database;
use personctl_core::devices::DeviceRemoval;
use personctl_core::models::DeviceInfo;
use personctl_core::pipeline::IdentityMutationPipeline;

use crate::find_person;

#[derive(Subcommand, Debug)]
pub enum DevicesAction {
    /// List the devices bound to a person.
    List {
        /// inum or login name of the person.
        person: String,
    },

    /// Remove one device by its UUID.
    Remove {
        /// inum or login name of the person.
        person: String,

        uuid: Uuid,
    },

    /// Bind a new device to a person.
    Register {
        /// inum or login name of the person.
        person: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        platform: Option<String>,

        #[arg(long = "type")]
        device_type: Option<String>,

        #[arg(long)]
        os_name: Option<String>,

        #[arg(long)]
        os_version: Option<String>,
    },

    /// Import device blobs from a JSON file (one object or an array).
    Import {
        /// inum or login name of the person.
        person: String,

        file: PathBuf,
    },
}

pub fn run(db: &Database, pipeline: &IdentityMutationPipeline, action: DevicesAction) -> Result<()> {
    let devices = pipeline.devices();

    match action {
        DevicesAction::List { person } => {
            let person = find_person(db, &person)?;
            let listing = devices
                .list_devices(person.id())
                .context("failed to list devices")?;

            if listing.devices.is_empty() && listing.is_clean() {
                println!("No devices bound to {}.", person.uid);
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["UUID", "Name", "Type", "Platform", "OS"]);
            for device in &listing.devices {
                let info = &device.info;
                let os = match (&info.os_name, &info.os_version) {
                    (Some(name), Some(version)) => format!("{name} {version}"),
                    (Some(name), None) => name.clone(),
                    _ => "-".to_string(),
                };
                table.add_row(vec![
                    Cell::new(info.uuid),
                    Cell::new(info.name.as_deref().unwrap_or("-")),
                    Cell::new(info.device_type.as_deref().unwrap_or("-")),
                    Cell::new(info.platform.as_deref().unwrap_or("-")),
                    Cell::new(os),
                ]);
            }
            println!("{table}");

            for failure in &listing.failures {
                println!("  [WARN] record {} is unreadable: {}", failure.record_id, failure.source);
            }
            Ok(())
        }

        DevicesAction::Remove { person, uuid } => {
            let person = find_person(db, &person)?;
            let mut scratch = Vec::new();
            match devices.remove_device(person.id(), uuid, &mut scratch) {
                DeviceRemoval::Removed => {
                    info!(inum = person.id(), %uuid, "device removed");
                    println!("Device {} removed from {}", uuid, person.uid);
                    Ok(())
                }
                DeviceRemoval::NotFound => {
                    anyhow::bail!("device {} is not bound to {}", uuid, person.uid)
                }
                DeviceRemoval::Failed(reason) => {
                    anyhow::bail!("failed to remove device {}: {}", uuid, reason)
                }
            }
        }

        DevicesAction::Register {
            person,
            name,
            platform,
            device_type,
            os_name,
            os_version,
        } => {
            let person = find_person(db, &person)?;
            let info = DeviceInfo {
                name,
                platform,
                device_type,
                os_name,
                os_version,
                ..DeviceInfo::new()
            };
            let record_id = devices
                .register_device(person.id(), &info)
                .context("failed to register device")?;
            println!("Device {} registered for {}", info.uuid, person.uid);
            println!("  record: {}", record_id);
            Ok(())
        }

        DevicesAction::Import { person, file } => {
            let person = find_person(db, &person)?;
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;

            let mut imported = 0;
            for blob in split_blobs(&content)? {
                devices
                    .import_raw(person.id(), &blob)
                    .context("failed to import device")?;
                imported += 1;
            }
            info!(inum = person.id(), imported, file = %file.display(), "device blobs imported");
            println!("{} device record(s) imported for {}", imported, person.uid);
            Ok(())
        }
    }
}

/// One blob per array element, or the whole document otherwise.
fn split_blobs(content: &str) -> Result<Vec<String>> {
    let value: serde_json::Value =
        serde_json::from_str(content).context("device file is not valid JSON")?;
    match value {
        serde_json::Value::Array(items) => Ok(items.iter().map(|item| item.to_string()).collect()),
        other => Ok(vec![other.to_string()]),
    }
}
