use campusdb::auth::{NewUser, UserFilter};
use campusdb::{seed, AuditFilter, CampusConfig, Record, Store};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process;

/// campusdb CLI: manage a college ERP store from the command line
#[derive(Parser)]
#[command(name = "campusdb", version, about)]
struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "CAMPUSDB_DB_PATH", default_value = "campusdb.sqlite")]
    db: PathBuf,

    /// Optional YAML configuration file
    #[arg(long, env = "CAMPUSDB_CONFIG")]
    config: Option<PathBuf>,

    /// User id recorded on audit entries written by this command
    #[arg(long)]
    actor: Option<String>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Create missing tables and the default admin account
    Setup {
        /// Drop every table and recreate it empty
        #[arg(long)]
        reset: bool,
    },

    /// Insert sample users and an admission application
    Seed,

    /// Row counts per table
    Stats,

    /// Manage user accounts
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },

    /// Check a user's credentials
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Query the audit log, newest first
    Audit {
        #[arg(long)]
        sheet: Option<String>,
        #[arg(long)]
        entity: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        user: Option<String>,
        /// Inclusive lower bound on the entry timestamp
        #[arg(long)]
        from: Option<String>,
        /// Inclusive upper bound on the entry timestamp
        #[arg(long)]
        to: Option<String>,
    },

    /// Institution dashboard, or one student's with --student
    Dashboard {
        #[arg(long)]
        student: Option<String>,
    },

    /// Get a single record by id
    Get {
        /// Table name
        table: String,
        /// Record id
        id: String,
    },

    /// List the records of a table
    List {
        /// Table name
        table: String,
        /// Equality filters (e.g. --filter status=pending)
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
    },

    /// Insert a record
    Insert {
        /// Table name
        table: String,
        /// Field values (e.g. --field title="Data Structures")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Update fields of a record
    Update {
        /// Table name
        table: String,
        /// Record id
        id: String,
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Delete a record (soft delete where the table defines one)
    Delete {
        /// Table name
        table: String,
        /// Record id
        id: String,
    },
}

#[derive(Subcommand)]
enum UsersCommand {
    /// List accounts
    List {
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },
    /// Create an account
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        role: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Show one account
    Get { id: String },
    /// Deactivate an account
    Delete { id: String },
    /// Change an account's password
    Passwd {
        id: String,
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| {
        format!("Invalid key=value pair: no '=' found in '{s}'")
    })?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => CampusConfig::load(path)?,
        None => CampusConfig::default(),
    };
    if let Some(actor) = cli.actor {
        config.audit.actor = actor;
    }
    let store = Store::open(&cli.db, config)?;
    let format = &cli.format;

    match cli.command {
        Command::Setup { reset } => {
            let tables = if reset {
                store.provision()?
            } else {
                store.ensure_tables()?
            };
            let admin = seed::bootstrap_admin(&store)?;
            print_output(
                &serde_json::json!({
                    "tables_created": tables,
                    "admin_created": admin.is_some(),
                }),
                format,
            )?;
        }

        Command::Seed => {
            let report = seed::seed_sample_data(&store)?;
            print_output(&report, format)?;
        }

        Command::Stats => {
            print_output(&store.stats()?, format)?;
        }

        Command::Users { command } => run_users(&store, command, format)?,

        Command::Login { email, password } => {
            let profile = store.users().login(&email, &password)?;
            print_output(&profile, format)?;
        }

        Command::Audit {
            sheet,
            entity,
            action,
            user,
            from,
            to,
        } => {
            let filter = AuditFilter {
                sheet_name: sheet,
                entity_id: entity,
                action,
                user_id: user,
                start_date: from,
                end_date: to,
            };
            print_output(&store.audit().logs(&filter)?, format)?;
        }

        Command::Dashboard { student } => match student {
            Some(id) => print_output(&store.dashboard().student(&id)?, format)?,
            None => print_output(&store.dashboard().stats()?, format)?,
        },

        Command::Get { table, id } => {
            print_output(&store.collection(&table)?.get(&id)?, format)?;
        }

        Command::List { table, filters } => {
            let records = store.collection(&table)?.list(&fields_to_record(&filters))?;
            print_output(&records, format)?;
        }

        Command::Insert { table, fields } => {
            let created = store.collection(&table)?.create(fields_to_record(&fields))?;
            print_output(&created, format)?;
        }

        Command::Update { table, id, fields } => {
            let updated = store
                .collection(&table)?
                .update(&id, &fields_to_record(&fields))?;
            print_output(&updated, format)?;
        }

        Command::Delete { table, id } => {
            store.collection(&table)?.delete(&id)?;
            print_output(&serde_json::json!({ "ok": true, "deleted": id }), format)?;
        }
    }

    Ok(())
}

fn run_users(
    store: &Store,
    command: UsersCommand,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let users = store.users();
    match command {
        UsersCommand::List { role, active } => {
            print_output(&users.get_all_users(&UserFilter { role, active })?, format)?;
        }
        UsersCommand::Create {
            username,
            email,
            password,
            role,
            display_name,
        } => {
            let user = NewUser {
                username,
                email,
                password,
                role,
                display_name,
                notes: None,
            };
            print_output(&users.create_user(&user)?, format)?;
        }
        UsersCommand::Get { id } => print_output(&users.get_user(&id)?, format)?,
        UsersCommand::Delete { id } => {
            users.delete_user(&id)?;
            print_output(&serde_json::json!({ "ok": true, "deactivated": id }), format)?;
        }
        UsersCommand::Passwd { id, old, new } => {
            users.change_password(&id, &old, &new)?;
            print_output(&serde_json::json!({ "ok": true }), format)?;
        }
    }
    Ok(())
}

fn print_output<T: Serialize>(
    value: &T,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// `key=value` pairs as a record. Values that parse as JSON keep their type.
fn fields_to_record(fields: &[(String, String)]) -> Record {
    fields
        .iter()
        .map(|(key, val)| {
            let value =
                serde_json::from_str(val).unwrap_or(serde_json::Value::String(val.clone()));
            (key.clone(), value)
        })
        .collect()
}
