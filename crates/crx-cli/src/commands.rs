use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use colored::Colorize;
use crx_session::{NodeRef, ObjectManager, PendingChanges, PropertyRef, Session, SessionConfig};
use crx_transport::{InMemoryTransport, Query};
use crx_types::{path, NameFilter, PropertyType, PropertyValue, Value};
use serde_json::json;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(cli, &mut out)
}

/// Run one command, writing its report to `out`.
pub fn execute(cli: Cli, out: &mut dyn Write) -> anyhow::Result<()> {
    let ctx = Context {
        fixture: cli.fixture,
        config: cli.config,
        workspace: cli.workspace,
        format: cli.format,
    };
    match cli.command {
        Command::Init(args) => cmd_init(&ctx, args, out),
        Command::Ls(args) => cmd_ls(&ctx, args, out),
        Command::Cat(args) => cmd_cat(&ctx, args, out),
        Command::Tree(args) => cmd_tree(&ctx, args, out),
        Command::Add(args) => cmd_add(&ctx, args, out),
        Command::Set(args) => cmd_set(&ctx, args, out),
        Command::Mv(args) => cmd_mv(&ctx, args, out),
        Command::Rm(args) => cmd_rm(&ctx, args, out),
        Command::Query(args) => cmd_query(&ctx, args, out),
        Command::Namespaces => cmd_namespaces(&ctx, out),
    }
}

struct Context {
    fixture: PathBuf,
    config: Option<PathBuf>,
    workspace: Option<String>,
    format: OutputFormat,
}

/// An open session over a fixture-backed transport.
struct Repository {
    transport: Arc<InMemoryTransport>,
    session: Session,
}

impl Context {
    fn open(&self) -> anyhow::Result<Repository> {
        let json = fs::read_to_string(&self.fixture)
            .with_context(|| format!("cannot read fixture {}", self.fixture.display()))?;
        let transport = Arc::new(InMemoryTransport::from_fixture_json(&json)?);
        let mut config = match &self.config {
            Some(p) => SessionConfig::load(p)?,
            None => SessionConfig::default(),
        };
        if let Some(workspace) = &self.workspace {
            config.workspace = workspace.clone();
        }
        let session = Session::login(transport.clone(), &config)?;
        Ok(Repository { transport, session })
    }

    /// Report the staged changes, then save them and rewrite the fixture
    /// unless this is a dry run.
    fn finish(&self, mut repo: Repository, write: WriteArgs, out: &mut dyn Write) -> anyhow::Result<()> {
        let changes = repo.session.pending_changes()?;
        print_changes(out, &changes, self.format)?;
        if write.dry_run || changes.is_clean() {
            return Ok(());
        }
        repo.session.save()?;
        let json = repo.transport.to_fixture_json()?;
        fs::write(&self.fixture, json)
            .with_context(|| format!("cannot write fixture {}", self.fixture.display()))?;
        repo.session.logout()?;
        if self.format == OutputFormat::Text {
            writeln!(
                out,
                "{} Saved {} change(s) to {}",
                "✓".green().bold(),
                changes.total_entries(),
                self.fixture.display()
            )?;
        }
        Ok(())
    }
}

fn cmd_init(ctx: &Context, args: InitArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    if ctx.fixture.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", ctx.fixture.display());
    }
    let fixture = json!({
        "workspace": args.name,
        "nodes": { "/": { "primary_type": "rep:root" } },
    });
    fs::write(&ctx.fixture, serde_json::to_string_pretty(&fixture)?)
        .with_context(|| format!("cannot write fixture {}", ctx.fixture.display()))?;
    writeln!(
        out,
        "{} Initialized repository in {}",
        "✓".green().bold(),
        ctx.fixture.display().to_string().bold()
    )?;
    writeln!(out, "  Workspace: {}", args.name.yellow())?;
    Ok(())
}

fn cmd_ls(ctx: &Context, args: LsArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let mut repo = ctx.open()?;
    let node = repo.session.node(&args.path)?;
    let filter = args.filter.as_deref().map(NameFilter::from);
    let om = repo.session.object_manager()?;
    let children = node.nodes(om, filter.as_ref())?;
    let properties = node.properties(filter.as_ref())?;

    match ctx.format {
        OutputFormat::Json => {
            let listing = json!({
                "path": node.path(),
                "primary_type": node.primary_type(),
                "nodes": children
                    .iter()
                    .map(|c| json!({ "name": c.name(), "primary_type": c.primary_type() }))
                    .collect::<Vec<_>>(),
                "properties": properties.iter().map(property_json).collect::<Vec<_>>(),
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&listing)?)?;
        }
        OutputFormat::Text => {
            writeln!(out, "{} [{}]", node.path().bold(), node.primary_type().cyan())?;
            for child in &children {
                writeln!(out, "  {}/  [{}]", child.name().blue().bold(), child.primary_type().cyan())?;
            }
            for prop in &properties {
                writeln!(out, "  {} = {}", prop.name().yellow(), describe_value(prop))?;
            }
        }
    }
    Ok(())
}

fn cmd_cat(ctx: &Context, args: CatArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let mut repo = ctx.open()?;
    let prop = repo.session.property(&args.path)?;
    if ctx.format == OutputFormat::Json {
        writeln!(out, "{}", serde_json::to_string_pretty(&property_json(&prop))?)?;
        return Ok(());
    }
    if prop.property_type() == PropertyType::Binary {
        let om = repo.session.object_manager()?;
        for content in prop.binary(om)? {
            out.write_all(&content)?;
        }
        return Ok(());
    }
    if let Some(value) = prop.value() {
        for v in value.values() {
            writeln!(out, "{v}")?;
        }
    }
    Ok(())
}

fn cmd_tree(ctx: &Context, args: TreeArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let mut repo = ctx.open()?;
    let start = repo.session.node(&args.path)?;
    let om = repo.session.object_manager()?;
    let walk = TreeWalk {
        max_depth: args.depth,
        properties: args.properties,
    };
    match ctx.format {
        OutputFormat::Json => {
            let tree = walk.to_json(&start, om, 0)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&tree)?)?;
        }
        OutputFormat::Text => walk.print(&start, om, 0, out)?,
    }
    Ok(())
}

struct TreeWalk {
    max_depth: Option<usize>,
    properties: bool,
}

impl TreeWalk {
    fn descend(&self, depth: usize) -> bool {
        self.max_depth.map_or(true, |max| depth < max)
    }

    fn print(
        &self,
        node: &NodeRef,
        om: &mut ObjectManager,
        depth: usize,
        out: &mut dyn Write,
    ) -> anyhow::Result<()> {
        let indent = "  ".repeat(depth);
        let label = if depth == 0 { node.path() } else { node.name() };
        writeln!(out, "{indent}{} [{}]", label.bold(), node.primary_type().cyan())?;
        if self.properties {
            for prop in node.properties(None)? {
                writeln!(out, "{indent}  - {} = {}", prop.name().yellow(), describe_value(&prop))?;
            }
        }
        if self.descend(depth) {
            for child in node.nodes(om, None)? {
                self.print(&child, om, depth + 1, out)?;
            }
        }
        Ok(())
    }

    fn to_json(
        &self,
        node: &NodeRef,
        om: &mut ObjectManager,
        depth: usize,
    ) -> anyhow::Result<serde_json::Value> {
        let mut entry = json!({
            "path": node.path(),
            "primary_type": node.primary_type(),
        });
        if self.properties {
            entry["properties"] = node
                .properties(None)?
                .iter()
                .map(property_json)
                .collect();
        }
        if self.descend(depth) {
            let mut children = Vec::new();
            for child in node.nodes(om, None)? {
                children.push(self.to_json(&child, om, depth + 1)?);
            }
            entry["nodes"] = children.into();
        }
        Ok(entry)
    }
}

fn cmd_add(ctx: &Context, args: AddArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    path::validate_absolute(&args.path)?;
    let mut repo = ctx.open()?;
    let parent = repo.session.node(&path::parent(&args.path))?;
    let om = repo.session.object_manager()?;
    let node = parent.add_node(om, path::name(&args.path), args.node_type.as_deref())?;
    for mixin in &args.mixin {
        node.add_mixin(om, mixin)?;
    }
    ctx.finish(repo, args.write, out)
}

fn cmd_set(ctx: &Context, args: SetArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    path::validate_absolute(&args.path)?;
    let property_type = args
        .property_type
        .as_deref()
        .map(str::parse::<PropertyType>)
        .transpose()?;
    let value = match args.values.as_slice() {
        [] => None,
        [single] if !args.multiple => Some(PropertyValue::from(single.as_str())),
        many => Some(PropertyValue::Multiple(
            many.iter().map(|v| Value::from(v.as_str())).collect(),
        )),
    };

    let mut repo = ctx.open()?;
    let node = repo.session.node(&path::parent(&args.path))?;
    let name = path::name(&args.path);
    let om = repo.session.object_manager()?;
    if value.is_none() && !node.has_property(om, name)? {
        bail!("no property at {}", args.path);
    }
    node.set_property(om, name, value, property_type)?;
    ctx.finish(repo, args.write, out)
}

fn cmd_mv(ctx: &Context, args: MvArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let mut repo = ctx.open()?;
    repo.session.move_item(&args.src, &args.dst)?;
    ctx.finish(repo, args.write, out)
}

fn cmd_rm(ctx: &Context, args: RmArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let mut repo = ctx.open()?;
    repo.session.remove_item(&args.path)?;
    ctx.finish(repo, args.write, out)
}

fn cmd_query(ctx: &Context, args: QueryArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let mut repo = ctx.open()?;
    let mut query = Query::new(args.language, args.statement);
    query.limit = args.limit;
    query.offset = args.offset;
    let result = repo.session.execute_query(&query)?;
    let columns = result.column_names();

    let om = repo.session.object_manager()?;
    let mut nodes = Vec::new();
    for node in result.nodes(om) {
        nodes.push(node?);
    }

    match ctx.format {
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = result
                .rows()
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|c| (c.clone(), json!(row.value(c).map(ToString::to_string))))
                        .collect::<serde_json::Map<_, _>>()
                        .into()
                })
                .collect();
            let report = json!({
                "columns": columns,
                "rows": rows,
                "nodes": nodes.iter().map(NodeRef::path).collect::<Vec<_>>(),
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        }
        OutputFormat::Text => {
            writeln!(out, "{} row(s)", result.len().to_string().bold())?;
            for row in result.rows() {
                let cells: Vec<String> = columns
                    .iter()
                    .map(|c| {
                        let value = row.value(c).map(ToString::to_string).unwrap_or_default();
                        format!("{}={}", c.dimmed(), value)
                    })
                    .collect();
                writeln!(out, "  {}", cells.join("  "))?;
            }
            for node in &nodes {
                writeln!(out, "  {} [{}]", node.path().bold(), node.primary_type().cyan())?;
            }
        }
    }
    Ok(())
}

fn cmd_namespaces(ctx: &Context, out: &mut dyn Write) -> anyhow::Result<()> {
    let repo = ctx.open()?;
    let mut mappings = serde_json::Map::new();
    for prefix in repo.session.namespace_prefixes()? {
        let uri = repo.session.namespace_uri(&prefix)?;
        mappings.insert(prefix, uri.into());
    }
    match ctx.format {
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(&mappings)?)?;
        }
        OutputFormat::Text => {
            for (prefix, uri) in &mappings {
                let uri = uri.as_str().unwrap_or_default();
                let prefix = if prefix.is_empty() { "(default)" } else { prefix.as_str() };
                writeln!(out, "  {:<12} {}", prefix.yellow(), uri)?;
            }
        }
    }
    Ok(())
}

fn print_changes(out: &mut dyn Write, changes: &PendingChanges, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        writeln!(out, "{}", serde_json::to_string_pretty(changes)?)?;
        return Ok(());
    }
    if changes.is_clean() {
        writeln!(out, "Nothing to save.")?;
        return Ok(());
    }
    writeln!(out, "Pending changes ({}):", changes.total_entries())?;
    for p in &changes.removed {
        writeln!(out, "  {} {}", "removed: ".red(), p)?;
    }
    for m in &changes.moved {
        writeln!(out, "  {} {} -> {}", "moved:   ".yellow(), m.from, m.to)?;
    }
    for p in &changes.added {
        writeln!(out, "  {} {}", "added:   ".green(), p)?;
    }
    for p in &changes.modified {
        writeln!(out, "  {} {}", "modified:".blue(), p)?;
    }
    Ok(())
}

fn describe_value(prop: &PropertyRef) -> String {
    if prop.property_type() == PropertyType::Binary {
        return format!("<binary, {} bytes>", prop.length().total());
    }
    match prop.value() {
        Some(value) if prop.property_type() == PropertyType::String => value.to_string(),
        Some(value) => format!("{value} ({})", prop.property_type()),
        None => String::new(),
    }
}

fn property_json(prop: &PropertyRef) -> serde_json::Value {
    let value = if prop.property_type() == PropertyType::Binary {
        json!({ "length": prop.length().total() })
    } else {
        match prop.value() {
            Some(PropertyValue::Single(v)) => json!(v.to_string()),
            Some(PropertyValue::Multiple(vs)) => {
                json!(vs.iter().map(ToString::to_string).collect::<Vec<_>>())
            }
            None => serde_json::Value::Null,
        }
    };
    json!({
        "name": prop.name(),
        "type": prop.property_type().name(),
        "multiple": prop.is_multiple(),
        "value": value,
    })
}
