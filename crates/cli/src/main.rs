//! personctl command-line management tool.
//!
//! Provides subcommands for adding, updating, deleting and inspecting person
//! entries through the mutation pipeline, managing their authentication
//! devices, viewing the audit log, and generating / validating configuration
//! files.

mod devices;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use personctl_core::config::AppConfig;
use personctl_core::db::{Database, DirectorySettings};
use personctl_core::models::{CustomAttribute, PersonRecord, PersonStatus};
use personctl_core::pipeline::{EditSession, IdentityMutationPipeline};
use personctl_core::store::DirectoryStore;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// personctl command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "personctl",
    version,
    about = "Validate and apply changes to directory person entries"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "~/.config/personctl/config.toml"
    )]
    config: String,

    /// Log filter (overrides `[logging] level`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./personctl.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Create a person.
    Add(PersonArgs),

    /// Change a stored person.
    Update {
        /// inum of the person.
        inum: String,

        #[command(flatten)]
        person: PersonArgs,

        /// Remove every external-auth binding of this provider.
        #[arg(long = "remove-external")]
        remove_external: Vec<String>,
    },

    /// Delete a person (and, if configured, their devices).
    Delete {
        /// inum or login name of the person.
        person: String,
    },

    /// Show one person.
    Show {
        /// inum or login name of the person.
        person: String,

        /// Print the record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List people.
    List {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Manage authentication devices.
    Devices {
        #[command(subcommand)]
        action: devices::DevicesAction,
    },

    /// Show recent audit log entries.
    Audit {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

/// Fields shared by `add` and `update`. Unset flags leave the field alone.
#[derive(clap::Args, Debug, Default)]
struct PersonArgs {
    /// Login name.
    #[arg(long)]
    uid: Option<String>,

    #[arg(long)]
    given_name: Option<String>,

    #[arg(long)]
    display_name: Option<String>,

    /// Contact address.
    #[arg(long)]
    mail: Option<String>,

    /// active or inactive.
    #[arg(long, value_parser = parse_status)]
    status: Option<PersonStatus>,

    /// Custom attribute as NAME=VALUE. Repeat a name for several values;
    /// an empty value clears the attribute.
    #[arg(long = "attr", value_parser = parse_attr)]
    attributes: Vec<(String, String)>,

    /// Additional object class.
    #[arg(long = "object-class")]
    object_classes: Vec<String>,

    /// External-auth binding as PROVIDER:VALUE.
    #[arg(long = "external")]
    external_uids: Vec<String>,

    #[arg(long)]
    password: Option<String>,

    #[arg(long)]
    confirm_password: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = expand_tilde(&cli.config);

    match cli.command {
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_init(&output)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_validate(&config_path)
        }
        command => {
            let config = load_config(&config_path)?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));
            let db = open_database(&config)?;
            debug!(
                config = %config_path.display(),
                database = %config.directory.database.display(),
                "database opened"
            );

            match command {
                Commands::Add(args) => cmd_add(&pipeline(&db, &config), args),
                Commands::Update {
                    inum,
                    person,
                    remove_external,
                } => cmd_update(&pipeline(&db, &config), &inum, person, &remove_external),
                Commands::Delete { person } => cmd_delete(&db, &pipeline(&db, &config), &person),
                Commands::Show { person, json } => {
                    cmd_show(&db, &pipeline(&db, &config), &person, json)
                }
                Commands::List { limit } => cmd_list(&db, limit),
                Commands::Devices { action } => devices::run(&db, &pipeline(&db, &config), action),
                Commands::Audit { limit } => cmd_audit(&db, limit),
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_validate(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn open_database(config: &AppConfig) -> Result<Arc<Database>> {
    let db = Database::new(&config.directory.database)
        .context("failed to open database")?
        .with_settings(DirectorySettings::from_config(&config.directory));
    db.initialize().context("failed to initialize database")?;
    Ok(Arc::new(db))
}

fn pipeline(db: &Arc<Database>, config: &AppConfig) -> IdentityMutationPipeline {
    IdentityMutationPipeline::from_database(db.clone(), config)
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Resolve an inum or login name to a stored person.
pub(crate) fn find_person(db: &Database, key: &str) -> Result<PersonRecord> {
    if let Some(person) = db.find_by_id(key).context("failed to look up person")? {
        return Ok(person);
    }
    db.find_by_login(key)
        .context("failed to look up person")?
        .ok_or_else(|| anyhow::anyhow!("person '{}' not found", key))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# personctl configuration

[directory]
database = "/var/lib/personctl/people.db"
base_dn = "o=gluu"
org_inum = "@!1111"
org_iname = "@!1111"
password_cost = 12

[person]
object_classes = ["gluuPerson", "gluuCustomPerson"]
object_class_display_names = ["Person", "Custom Person"]
allow_modification = true
recheck_uniqueness_on_update = false
role = "admin"

[[person.attributes]]
name = "uid"
display_name = "Username"
origin = "gluuPerson"
required = true

[[person.attributes]]
name = "givenName"
display_name = "First Name"
origin = "gluuPerson"
required = true

[[person.attributes]]
name = "sn"
display_name = "Last Name"
origin = "gluuPerson"
required = true

[[person.attributes]]
name = "displayName"
display_name = "Display Name"
origin = "gluuPerson"
required = true

[[person.attributes]]
name = "mail"
display_name = "Email"
origin = "gluuPerson"
required = true

[[person.attributes]]
name = "gluuStatus"
display_name = "Status"
origin = "gluuPerson"

[[person.attributes]]
name = "telephoneNumber"
display_name = "Phone Number"
origin = "gluuCustomPerson"

[hooks]
enabled = false
# command = "/usr/local/bin/person-hook"
# args = []
cascade_devices_on_delete = true

[logging]
level = "info"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the directory settings and attribute catalog");
    println!(
        "  2. Validate with: personctl validate --config {}",
        output.display()
    );
    println!(
        "  3. Add a person: personctl --config {} add --uid jdoe ...",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All required fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let mandatory = config.person.attributes.iter().filter(|a| a.required).count();

    println!();
    println!("Configuration summary:");
    println!("  Database      : {}", config.directory.database.display());
    println!("  Base DN       : {}", config.directory.base_dn);
    println!("  Org inum      : {}", config.directory.org_inum);
    println!("  Object classes: {}", config.person.object_classes.join(", "));
    println!(
        "  Attributes    : {} ({} mandatory)",
        config.person.attributes.len(),
        mandatory
    );
    println!("  Role          : {}", config.person.role);
    println!(
        "  Modification  : {}",
        if config.person.allow_modification {
            "allowed"
        } else {
            "DISABLED"
        }
    );
    println!(
        "  Hook command  : {}",
        match (&config.hooks.command, config.hooks.enabled) {
            (Some(cmd), true) => cmd.display().to_string(),
            (Some(_), false) => "configured, disabled".to_string(),
            (None, _) => "none".to_string(),
        }
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_add(pipeline: &IdentityMutationPipeline, args: PersonArgs) -> Result<()> {
    let mut session = pipeline.start_add().context("failed to start add session")?;
    info!(attributes = session.attributes.len(), "add session started");
    apply_person_args(&mut session, args);

    let saved = pipeline
        .commit(&mut session)
        .context("failed to add person")?;
    info!(inum = saved.id(), uid = %saved.uid, "add committed");

    println!("Person {} created", saved.uid);
    println!("  inum : {}", saved.id());
    println!("  dn   : {}", saved.dn.as_deref().unwrap_or("-"));
    Ok(())
}

fn cmd_update(
    pipeline: &IdentityMutationPipeline,
    inum: &str,
    args: PersonArgs,
    remove_external: &[String],
) -> Result<()> {
    let mut session = pipeline
        .start_update(inum)
        .context("failed to start update session")?;
    info!(inum, devices = session.devices().len(), "update session started");

    for provider in remove_external {
        let removed = session.remove_external_auth(provider);
        if removed == 0 {
            println!("No external-auth binding for provider '{}'", provider);
        }
    }
    apply_person_args(&mut session, args);

    let saved = pipeline
        .commit(&mut session)
        .context("failed to update person")?;
    info!(inum = saved.id(), uid = %saved.uid, "update committed");
    println!("Person {} ({}) updated", saved.uid, saved.id());
    Ok(())
}

fn cmd_delete(db: &Database, pipeline: &IdentityMutationPipeline, key: &str) -> Result<()> {
    let person = find_person(db, key)?;
    pipeline.delete(&person).context("failed to delete person")?;
    info!(inum = person.id(), uid = %person.uid, "person deleted");
    println!("Person {} ({}) deleted", person.uid, person.id());
    Ok(())
}

fn cmd_show(db: &Database, pipeline: &IdentityMutationPipeline, key: &str, json: bool) -> Result<()> {
    let person = find_person(db, key)?;

    if json {
        let out = serde_json::to_string_pretty(&person).context("failed to encode person")?;
        println!("{}", out);
        return Ok(());
    }

    println!("Person: {}", person.uid);
    println!("========{}", "=".repeat(person.uid.len()));
    println!();
    println!("  inum         : {}", person.id());
    println!("  iname        : {}", person.iname.as_deref().unwrap_or("-"));
    println!("  dn           : {}", person.dn.as_deref().unwrap_or("-"));
    println!("  Given name   : {}", person.given_name.as_deref().unwrap_or("-"));
    println!("  Display name : {}", person.display_name.as_deref().unwrap_or("-"));
    println!("  Mail         : {}", person.mail.as_deref().unwrap_or("-"));
    println!("  Status       : {}", person.status);
    println!("  Object class : {}", person.object_classes.join(", "));

    if !person.external_uids.is_empty() {
        println!("  External auth:");
        for binding in person.external_bindings() {
            println!("    - {}", binding);
        }
    }

    if !person.custom_attributes.is_empty() {
        println!();
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Attribute", "Values"]);
        for attr in &person.custom_attributes {
            table.add_row(vec![Cell::new(&attr.name), Cell::new(attr.values.join(", "))]);
        }
        println!("{table}");
    }

    let listing = pipeline
        .devices()
        .list_devices(person.id())
        .context("failed to list devices")?;
    println!();
    println!(
        "{} device(s){}",
        listing.devices.len(),
        if listing.failures.is_empty() {
            String::new()
        } else {
            format!(", {} unreadable", listing.failures.len())
        }
    );

    Ok(())
}

fn cmd_list(db: &Database, limit: u32) -> Result<()> {
    let people = db.list_people(limit).context("failed to list people")?;

    if people.is_empty() {
        println!("No people found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["uid", "inum", "Display name", "Mail", "Status"]);
    for person in &people {
        table.add_row(vec![
            Cell::new(&person.uid),
            Cell::new(person.id()),
            Cell::new(person.display_name.as_deref().unwrap_or("-")),
            Cell::new(person.mail.as_deref().unwrap_or("-")),
            Cell::new(person.status),
        ]);
    }
    println!("{table}");
    println!();
    println!(
        "{} of {} people shown",
        people.len(),
        db.count_people().context("failed to count people")?
    );

    Ok(())
}

fn cmd_audit(db: &Database, limit: u32) -> Result<()> {
    let entries = db
        .list_audit_log(limit)
        .context("failed to list audit entries")?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Timestamp", "Action", "inum", "OK", "Details"]);
    for entry in &entries {
        table.add_row(vec![
            Cell::new(&entry.created_at),
            Cell::new(&entry.action),
            Cell::new(entry.inum.as_deref().unwrap_or("-")),
            Cell::new(if entry.success { "yes" } else { "no" }),
            Cell::new(truncate(entry.details.as_deref().unwrap_or(""), 50)),
        ]);
    }
    println!("{table}");
    println!();
    println!(
        "{} of {} entries shown",
        entries.len(),
        db.count_audit_log().context("failed to count audit entries")?
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// Argument handling
// ---------------------------------------------------------------------------

fn apply_person_args(session: &mut EditSession, args: PersonArgs) {
    let person = &mut session.person;
    if let Some(uid) = args.uid {
        person.uid = uid;
    }
    if let Some(given) = args.given_name {
        person.given_name = Some(given);
    }
    if let Some(display) = args.display_name {
        person.display_name = Some(display);
    }
    if let Some(mail) = args.mail {
        person.mail = Some(mail);
    }
    person.object_classes.extend(args.object_classes);
    person.external_uids.extend(args.external_uids);

    if let Some(status) = args.status {
        session.status = status;
    }

    for (name, values) in group_attributes(args.attributes) {
        match session.attributes.iter_mut().find(|a| a.is_named(&name)) {
            Some(attr) => attr.values = values,
            None => session.attributes.push(CustomAttribute::multi(name, values)),
        }
    }

    if let Some(password) = args.password {
        session.set_password(password);
    }
    if let Some(confirm) = args.confirm_password {
        session.confirm_password(confirm);
    }
}

/// Collect repeated `NAME=VALUE` flags into one value list per name.
fn group_attributes(pairs: Vec<(String, String)>) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (name, value) in pairs {
        let index = match grouped.iter().position(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(index) => index,
            None => {
                grouped.push((name, Vec::new()));
                grouped.len() - 1
            }
        };
        if !value.is_empty() {
            grouped[index].1.push(value);
        }
    }
    grouped
}

fn parse_attr(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}

fn parse_status(raw: &str) -> Result<PersonStatus, String> {
    PersonStatus::from_str_val(raw)
        .ok_or_else(|| format!("unknown status '{raw}', use active or inactive"))
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attr() {
        assert_eq!(parse_attr("sn=Doe").unwrap(), ("sn".into(), "Doe".into()));
        assert_eq!(parse_attr("title=").unwrap(), ("title".into(), String::new()));
        assert_eq!(parse_attr("note=a=b").unwrap().1, "a=b");
        assert!(parse_attr("=x").is_err());
        assert!(parse_attr("nothing").is_err());
    }

    #[test]
    fn test_group_attributes() {
        let grouped = group_attributes(vec![
            ("mobile".into(), "1".into()),
            ("sn".into(), "Doe".into()),
            ("Mobile".into(), "2".into()),
            ("title".into(), String::new()),
        ]);
        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped[0].1, vec!["1", "2"]);
        assert!(grouped[2].1.is_empty());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("Inactive").unwrap(), PersonStatus::Inactive);
        assert!(parse_status("gone").is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("personctl.toml");
        cmd_init(&path).unwrap();
        let config = AppConfig::load_and_validate(&path).unwrap();
        assert_eq!(config.person.object_classes.len(), 2);
        assert!(cmd_init(&path).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_cli_parses_update_flags() {
        let cli = Cli::try_parse_from([
            "personctl",
            "update",
            "@!1111!0000!ABCD.EF01",
            "--attr",
            "sn=Doe",
            "--status",
            "inactive",
            "--remove-external",
            "google",
        ])
        .unwrap();
        match cli.command {
            Commands::Update {
                inum,
                person,
                remove_external,
            } => {
                assert_eq!(inum, "@!1111!0000!ABCD.EF01");
                assert_eq!(person.status, Some(PersonStatus::Inactive));
                assert_eq!(person.attributes.len(), 1);
                assert_eq!(remove_external, vec!["google"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
