use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "crx",
    about = "Browse and edit a crx content repository stored as a JSON fixture",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Repository fixture to open
    #[arg(long, global = true, default_value = "repository.json")]
    pub fixture: PathBuf,

    /// Session settings (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Workspace to log into, overriding the config file
    #[arg(short, long, global = true)]
    pub workspace: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an empty repository fixture
    Init(InitArgs),
    /// List child nodes and properties of a node
    Ls(LsArgs),
    /// Print a property value
    Cat(CatArgs),
    /// Print the node tree below a path
    Tree(TreeArgs),
    /// Create a node
    Add(AddArgs),
    /// Set a property, or remove it when no value is given
    Set(SetArgs),
    /// Move a node
    Mv(MvArgs),
    /// Remove a node or property
    Rm(RmArgs),
    /// Run a query against the repository
    Query(QueryArgs),
    /// List registered namespaces
    Namespaces,
}

#[derive(Args)]
pub struct InitArgs {
    /// Workspace name stored in the fixture
    #[arg(long, default_value = "default")]
    pub name: String,
    /// Overwrite an existing fixture
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct LsArgs {
    #[arg(default_value = "/")]
    pub path: String,
    /// Name pattern, e.g. "jcr:*|title"
    #[arg(long)]
    pub filter: Option<String>,
}

#[derive(Args)]
pub struct CatArgs {
    pub path: String,
}

#[derive(Args)]
pub struct TreeArgs {
    #[arg(default_value = "/")]
    pub path: String,
    /// Maximum depth below the start node
    #[arg(short, long)]
    pub depth: Option<usize>,
    /// Show properties too
    #[arg(short, long)]
    pub properties: bool,
}

/// Options shared by commands that change the repository.
#[derive(Args, Clone, Copy)]
pub struct WriteArgs {
    /// Show the pending changes without saving
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct AddArgs {
    pub path: String,
    /// Primary node type
    #[arg(short = 't', long = "type")]
    pub node_type: Option<String>,
    /// Mixin types to add
    #[arg(short, long)]
    pub mixin: Vec<String>,
    #[command(flatten)]
    pub write: WriteArgs,
}

#[derive(Args)]
pub struct SetArgs {
    /// Absolute property path
    pub path: String,
    /// Values; more than one, or --multiple, makes a multi-valued property
    pub values: Vec<String>,
    /// Property type, e.g. Long or Boolean
    #[arg(short = 't', long = "type")]
    pub property_type: Option<String>,
    #[arg(long)]
    pub multiple: bool,
    #[command(flatten)]
    pub write: WriteArgs,
}

#[derive(Args)]
pub struct MvArgs {
    pub src: String,
    pub dst: String,
    #[command(flatten)]
    pub write: WriteArgs,
}

#[derive(Args)]
pub struct RmArgs {
    pub path: String,
    #[command(flatten)]
    pub write: WriteArgs,
}

#[derive(Args)]
pub struct QueryArgs {
    pub statement: String,
    #[arg(short, long, default_value = "JCR-SQL2")]
    pub language: String,
    #[arg(long)]
    pub limit: Option<u64>,
    #[arg(long)]
    pub offset: Option<u64>,
}
