//! anyattr command line tool.
//!
//! Manages schemas, any types and owners in a store chosen by `--backend` /
//! `--db` or by the `ANYATTR_STORAGE` / `ANYATTR_DB_PATH` environment
//! variables. Every command prints a JSON document on success; failures go
//! to stderr with exit code 1 (rejected input), 2 (not found) or 3
//! (storage).
//!
//! Log output is controlled with `RUST_LOG`.

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use anyattr_core::{AnyKey, AnyTypeKind};
use anyattr_storage::{open_store, StorageConfig, StorageKind};

use commands::{CodecArgs, CreateArgs, DerivedArgs, PlainArgs, SetArgs, VirtualArgs};
use error::CliError;

#[derive(Parser)]
#[command(name = "anyattr", about = "Schema-driven typed attribute store")]
struct Cli {
    /// Storage backend: relational or graph.
    #[arg(long, global = true)]
    backend: Option<StorageKind>,

    /// Database file (SQLite file or graph snapshot).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Name recorded as creator / last modifier.
    #[arg(long, global = true, default_value = "admin")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Define, list or delete schemas.
    #[command(subcommand)]
    Schema(SchemaCommand),

    /// Define schema classes.
    #[command(subcommand)]
    Class(ClassCommand),

    /// Define any types.
    #[command(subcommand, name = "any-type")]
    AnyType(AnyTypeCommand),

    /// Define and list external resources.
    #[command(subcommand)]
    Resource(ResourceCommand),

    /// Create, inspect, edit and delete owners.
    #[command(subcommand)]
    Any(AnyCommand),

    /// Parse and format raw values without a store.
    #[command(subcommand)]
    Codec(CodecCommand),

    /// Inspect resource mappings.
    #[command(subcommand)]
    Mapping(MappingCommand),
}

#[derive(Subcommand)]
enum SchemaCommand {
    DefinePlain(PlainArgs),
    DefineDerived(DerivedArgs),
    DefineVirtual(VirtualArgs),
    List,
    Delete { key: String },
}

#[derive(Subcommand)]
enum ClassCommand {
    Define { key: String },
}

#[derive(Subcommand)]
enum AnyTypeCommand {
    Define {
        key: String,

        /// USER, GROUP or ANY_OBJECT.
        #[arg(short, long, default_value = "ANY_OBJECT")]
        kind: AnyTypeKind,

        #[arg(short, long, value_delimiter = ',')]
        classes: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ResourceCommand {
    /// Store a resource read from a JSON file.
    Define { file: PathBuf },
    List,
}

#[derive(Subcommand)]
enum AnyCommand {
    Create(CreateArgs),
    Show {
        key: AnyKey,
    },
    List {
        #[arg(short, long)]
        kind: Option<AnyTypeKind>,
    },
    Set(SetArgs),
    /// Make an owner a member of a group.
    Join {
        key: AnyKey,
        group: AnyKey,
    },
    /// Allow members of an any type to use classes inside a group.
    Extend {
        group: AnyKey,
        #[arg(short = 't', long = "type")]
        any_type: String,
        #[arg(short, long, value_delimiter = ',')]
        classes: Vec<String>,
    },
    Delete {
        key: AnyKey,
    },
}

#[derive(Subcommand)]
enum CodecCommand {
    Parse(CodecArgs),
    Format(CodecArgs),
}

#[derive(Subcommand)]
enum MappingCommand {
    /// Mapping items of a resource selected by purpose.
    Items {
        resource: String,
        #[arg(short = 't', long = "type", default_value = "USER")]
        any_type: String,
        /// SYNCHRONIZATION, PROPAGATION, BOTH or NONE.
        #[arg(short, long, default_value = "BOTH")]
        purpose: String,
    },
    /// Connector attributes an owner would be propagated with.
    Prepare {
        key: AnyKey,
        resource: String,
        #[arg(long)]
        password: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(json) => {
            let text = serde_json::to_string_pretty(&json)
                .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize result: {}\"}}", e));
            println!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    process::exit(exit_code);
}

fn storage_config(backend: Option<StorageKind>, db: Option<PathBuf>) -> Result<StorageConfig, CliError> {
    let mut config = StorageConfig::from_env().map_err(CliError::BadRequest)?;
    if let Some(kind) = backend {
        config.kind = kind;
    }
    if db.is_some() {
        config.path = db;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<Value, CliError> {
    let Cli {
        backend,
        db,
        actor,
        command,
    } = cli;

    // codec commands never touch the store
    let command = match command {
        Commands::Codec(CodecCommand::Parse(args)) => return commands::run_codec_parse(args),
        Commands::Codec(CodecCommand::Format(args)) => return commands::run_codec_format(args),
        other => other,
    };

    let mut store = open_store(&storage_config(backend, db)?)?;
    let store = store.as_mut();
    let actor = actor.as_str();
    match command {
        Commands::Schema(SchemaCommand::DefinePlain(args)) => commands::run_define_plain(store, args),
        Commands::Schema(SchemaCommand::DefineDerived(args)) => commands::run_define_derived(store, args),
        Commands::Schema(SchemaCommand::DefineVirtual(args)) => commands::run_define_virtual(store, args),
        Commands::Schema(SchemaCommand::List) => commands::run_schema_list(store),
        Commands::Schema(SchemaCommand::Delete { key }) => commands::run_schema_delete(store, &key),
        Commands::Class(ClassCommand::Define { key }) => commands::run_class_define(store, &key),
        Commands::AnyType(AnyTypeCommand::Define { key, kind, classes }) => {
            commands::run_any_type_define(store, &key, kind, &classes)
        }
        Commands::Resource(ResourceCommand::Define { file }) => commands::run_resource_define(store, &file),
        Commands::Resource(ResourceCommand::List) => commands::run_resource_list(store),
        Commands::Any(AnyCommand::Create(args)) => commands::run_any_create(store, args, actor),
        Commands::Any(AnyCommand::Show { key }) => commands::run_any_show(store, key),
        Commands::Any(AnyCommand::List { kind }) => commands::run_any_list(store, kind),
        Commands::Any(AnyCommand::Set(args)) => commands::run_any_set(store, args, actor),
        Commands::Any(AnyCommand::Join { key, group }) => commands::run_any_join(store, key, group, actor),
        Commands::Any(AnyCommand::Extend {
            group,
            any_type,
            classes,
        }) => commands::run_any_extend(store, group, &any_type, &classes, actor),
        Commands::Any(AnyCommand::Delete { key }) => commands::run_any_delete(store, key),
        Commands::Mapping(MappingCommand::Items {
            resource,
            any_type,
            purpose,
        }) => commands::run_mapping_items(store, &resource, &any_type, &purpose),
        Commands::Mapping(MappingCommand::Prepare { key, resource, password }) => {
            commands::run_mapping_prepare(store, key, &resource, password.as_deref())
        }
        Commands::Codec(_) => Err(CliError::BadRequest("codec commands do not use a store".into())),
    }
}
