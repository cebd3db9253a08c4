//! Lua configuration unit loader.
//!
//! Units run with a prelude providing the declaration constructors, then must
//! return a table of binding name to `Join`. Conversion from Lua values to
//! model types happens after evaluation, so every conversion error carries the
//! binding name and the field path that failed.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::{FromLua, Lua, LuaOptions, Result as LuaResult, StdLib, Table, Value};
use tracing::debug;

use super::{LoadError, LoadResult};
use crate::model::{
    Declarations, EntitySource, EventSource, GroupByRef, Join, JoinPart, KeyMapping, MetaData,
    Query, Source, TableRef,
};

/// Name of the Lua registry table caching `import` results.
const IMPORT_CACHE: &str = "joindecl.imports";

/// Lua unit loader.
pub struct LuaLoader;

impl LuaLoader {
    /// Loaded before the unit to define `Join`, `JoinPart`, `Source`, etc.
    const PRELUDE: &'static str = include_str!("prelude.lua");
}

/// Standard libraries available to units. No `io`, `os` or `package`.
fn unit_libs() -> StdLib {
    StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8
}

/// Import resolution state.
struct ImportState {
    /// Directory of each file being evaluated, innermost last
    dirs: Vec<PathBuf>,
    /// Files currently being evaluated, for cycle detection
    in_progress: Vec<PathBuf>,
}

impl LuaLoader {
    /// Load the joins exported by a Lua file.
    pub fn load(path: &Path) -> LoadResult<Declarations> {
        let content = std::fs::read_to_string(path)?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let base_path = canonical.parent().unwrap_or(Path::new(".")).to_path_buf();

        Self::load_with_base(&content, path, base_path, canonical)
    }

    /// Load the joins exported by Lua source held in memory.
    pub fn load_from_str(content: &str, unit_name: &str) -> LoadResult<Declarations> {
        let path = PathBuf::from(unit_name);
        let base_path = path.parent().unwrap_or(Path::new(".")).to_path_buf();

        Self::load_with_base(content, &path, base_path, path.clone())
    }

    fn load_with_base(
        content: &str,
        path: &Path,
        base_path: PathBuf,
        root: PathBuf,
    ) -> LoadResult<Declarations> {
        let unit = path.display().to_string();
        let lua_error = |e: mlua::Error| LoadError::Lua {
            file: unit.clone(),
            message: e.to_string(),
        };

        let lua = Lua::new_with(unit_libs(), LuaOptions::default()).map_err(lua_error)?;
        Self::register_globals(&lua, base_path, root).map_err(lua_error)?;

        lua.load(Self::PRELUDE)
            .set_name("joindecl://prelude.lua")
            .exec()
            .map_err(|e| LoadError::Lua {
                file: "prelude.lua".to_string(),
                message: format!("Error in prelude: {}", e),
            })?;

        let exported: Value = lua
            .load(content)
            .set_name(unit.as_str())
            .eval()
            .map_err(lua_error)?;

        let exports = match exported {
            Value::Table(table) => table,
            other => {
                return Err(LoadError::NotATable {
                    file: unit.clone(),
                    found: other.type_name().to_string(),
                })
            }
        };

        let naming = UnitNaming::from_path(path);
        let mut declarations = Declarations::new(unit.clone());

        for pair in exports.pairs::<Value, Value>() {
            let (key, value) = pair.map_err(lua_error)?;
            let name = match key {
                Value::String(s) => s.to_string_lossy().to_string(),
                other => {
                    return Err(LoadError::InvalidDeclaration {
                        file: unit.clone(),
                        name: format!("{:?}", other),
                        path: "<binding>".to_string(),
                        message: "binding names must be strings".to_string(),
                    })
                }
            };

            let ctx = Context::root(&unit, &name);
            let mut join = parse_join(&value, &ctx)?;

            if join.meta.team.is_none() {
                join.meta.team = naming.team.clone();
            }
            if join.meta.name.is_none() {
                join.meta.name = Some(naming.qualify(join.meta.team.as_deref(), &name));
            }

            declarations.joins.push((name, join));
        }

        declarations.joins.sort_by(|a, b| a.0.cmp(&b.0));

        debug!(
            unit = %unit,
            joins = declarations.joins.len(),
            "loaded configuration unit"
        );

        Ok(declarations)
    }

    fn register_globals(lua: &Lua, base_path: PathBuf, root: PathBuf) -> LuaResult<()> {
        let globals = lua.globals();

        // Units only reach other files through `import`
        globals.set("dofile", Value::Nil)?;
        globals.set("loadfile", Value::Nil)?;

        lua.set_named_registry_value(IMPORT_CACHE, lua.create_table()?)?;

        let state = Rc::new(RefCell::new(ImportState {
            dirs: vec![base_path],
            in_progress: vec![root],
        }));

        // import "path" - evaluates a shared unit once and returns its value
        let import_fn = lua.create_function(move |lua, import_path: String| {
            let resolved = {
                let state = state.borrow();
                let base = state.dirs.last().map(PathBuf::as_path).unwrap_or(Path::new("."));
                resolve_import_path(base, &import_path)
            };
            let resolved = resolved.canonicalize().unwrap_or(resolved);
            let key = resolved.display().to_string();

            let cache: Table = lua.named_registry_value(IMPORT_CACHE)?;
            let cached: Value = cache.get(key.as_str())?;
            if !cached.is_nil() {
                return Ok(cached);
            }

            if state.borrow().in_progress.contains(&resolved) {
                return Err(mlua::Error::external(format!(
                    "Circular import detected: {}",
                    import_path
                )));
            }

            let content = std::fs::read_to_string(&resolved).map_err(|e| {
                mlua::Error::external(format!("Failed to import '{}': {}", import_path, e))
            })?;

            {
                let mut state = state.borrow_mut();
                state.in_progress.push(resolved.clone());
                state
                    .dirs
                    .push(resolved.parent().unwrap_or(Path::new(".")).to_path_buf());
            }
            let result = lua
                .load(content.as_str())
                .set_name(key.as_str())
                .eval::<Value>();
            {
                let mut state = state.borrow_mut();
                state.in_progress.pop();
                state.dirs.pop();
            }

            let value = result.map_err(|e| {
                mlua::Error::external(format!(
                    "Error in imported file '{}': {}",
                    import_path, e
                ))
            })?;

            // Units returning nothing still run only once
            let stored = if value.is_nil() {
                Value::Boolean(true)
            } else {
                value
            };
            cache.set(key.as_str(), stored.clone())?;
            Ok(stored)
        })?;
        globals.set("import", import_fn)?;

        Ok(())
    }
}

fn resolve_import_path(base: &Path, import_path: &str) -> PathBuf {
    let path = Path::new(import_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Derives team and qualified names from a unit path such as
/// `joins/sample_team/sample_join.lua`.
struct UnitNaming {
    team: Option<String>,
    stem: String,
}

impl UnitNaming {
    fn from_path(path: &Path) -> Self {
        let team = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unit")
            .to_string();

        Self { team, stem }
    }

    fn qualify(&self, team: Option<&str>, binding: &str) -> String {
        match team {
            Some(team) => format!("{}.{}.{}", team, self.stem, binding),
            None => format!("{}.{}", self.stem, binding),
        }
    }
}

// =============================================================================
// Conversion from Lua values
// =============================================================================

/// Location of the value being converted, for error messages.
#[derive(Clone)]
struct Context<'a> {
    unit: &'a str,
    declaration: &'a str,
    path: String,
}

impl<'a> Context<'a> {
    fn root(unit: &'a str, declaration: &'a str) -> Self {
        Self {
            unit,
            declaration,
            path: declaration.to_string(),
        }
    }

    fn field(&self, key: &str) -> Self {
        Self {
            path: format!("{}.{}", self.path, key),
            ..self.clone()
        }
    }

    fn index(&self, i: usize) -> Self {
        Self {
            path: format!("{}[{}]", self.path, i),
            ..self.clone()
        }
    }

    fn invalid(&self, message: impl Into<String>) -> LoadError {
        LoadError::InvalidDeclaration {
            file: self.unit.to_string(),
            name: self.declaration.to_string(),
            path: self.path.clone(),
            message: message.into(),
        }
    }
}

/// The `_kind` tag set by prelude constructors, if any.
fn kind_of(table: &Table) -> Option<String> {
    table.raw_get::<Option<String>>("_kind").ok().flatten()
}

/// Accept a table built by `kind`'s constructor, or an untagged plain table.
fn expect_table(value: &Value, kind: &str, ctx: &Context) -> LoadResult<Table> {
    match value {
        Value::Table(table) => match kind_of(table) {
            Some(tag) if tag != kind => Err(ctx.invalid(format!(
                "expected {} {{ ... }}, found {} {{ ... }}",
                kind, tag
            ))),
            _ => Ok(table.clone()),
        },
        other => Err(ctx.invalid(format!(
            "expected {} {{ ... }}, found {}",
            kind,
            other.type_name()
        ))),
    }
}

fn get_optional<T: FromLua>(table: &Table, key: &str, ctx: &Context) -> LoadResult<Option<T>> {
    table
        .get::<Option<T>>(key)
        .map_err(|e| ctx.field(key).invalid(format!("invalid value: {}", e)))
}

fn get_required<T: FromLua>(table: &Table, key: &str, ctx: &Context) -> LoadResult<T> {
    get_optional(table, key, ctx)?
        .ok_or_else(|| ctx.field(key).invalid("missing required field"))
}

/// A boolean flag; absent means `false`. Other types are rejected rather than
/// read by Lua truthiness.
fn get_flag(table: &Table, key: &str, ctx: &Context) -> LoadResult<bool> {
    match get_optional::<Value>(table, key, ctx)? {
        None => Ok(false),
        Some(Value::Boolean(flag)) => Ok(flag),
        Some(other) => Err(ctx
            .field(key)
            .invalid(format!("expected a boolean, found {}", other.type_name()))),
    }
}

fn get_string_map(table: &Table, key: &str, ctx: &Context) -> LoadResult<BTreeMap<String, String>> {
    let mut result = BTreeMap::new();
    if let Some(map) = get_optional::<Table>(table, key, ctx)? {
        for pair in map.pairs::<String, String>() {
            let (k, v) = pair.map_err(|e| {
                ctx.field(key)
                    .invalid(format!("expected string keys and values: {}", e))
            })?;
            result.insert(k, v);
        }
    }
    Ok(result)
}

fn get_string_list(table: &Table, key: &str, ctx: &Context) -> LoadResult<Vec<String>> {
    let mut result = Vec::new();
    if let Some(list) = get_optional::<Table>(table, key, ctx)? {
        for (i, value) in list.sequence_values::<String>().enumerate() {
            let value = value.map_err(|e| {
                ctx.field(key)
                    .index(i)
                    .invalid(format!("expected a string: {}", e))
            })?;
            result.push(value);
        }
    }
    Ok(result)
}

fn parse_join(value: &Value, ctx: &Context) -> LoadResult<Join> {
    let table = expect_table(value, "Join", ctx)?;

    let left_value: Value = get_optional(&table, "left", ctx)?
        .ok_or_else(|| ctx.field("left").invalid("missing required field"))?;
    let left = parse_source(&left_value, &ctx.field("left"))?;

    let mut right_parts = Vec::new();
    if let Some(parts) = get_optional::<Table>(&table, "rightParts", ctx)? {
        let parts_ctx = ctx.field("rightParts");
        for (i, part) in parts.sequence_values::<Value>().enumerate() {
            let part = part.map_err(|e| parts_ctx.index(i).invalid(e.to_string()))?;
            right_parts.push(parse_join_part(&part, &parts_ctx.index(i))?);
        }
    }

    let meta = match get_optional::<Value>(&table, "metaData", ctx)? {
        Some(value) => parse_meta_data(&value, &ctx.field("metaData"))?,
        None => MetaData::default(),
    };

    Ok(Join {
        left,
        right_parts,
        online: get_flag(&table, "online", ctx)?,
        production: get_flag(&table, "production", ctx)?,
        meta,
    })
}

fn parse_source(value: &Value, ctx: &Context) -> LoadResult<Source> {
    // `left = EventSource { ... }` is shorthand for `Source { events = ... }`
    if let Value::Table(table) = value {
        match kind_of(table).as_deref() {
            Some("EventSource") => return parse_event_source(value, ctx).map(Source::Events),
            Some("EntitySource") => {
                return parse_entity_source(value, ctx).map(Source::Entities)
            }
            _ => {}
        }
    }

    let table = expect_table(value, "Source", ctx)?;
    let events: Option<Value> = get_optional(&table, "events", ctx)?;
    let entities: Option<Value> = get_optional(&table, "entities", ctx)?;

    match (events, entities) {
        (Some(events), None) => parse_event_source(&events, &ctx.field("events")).map(Source::Events),
        (None, Some(entities)) => {
            parse_entity_source(&entities, &ctx.field("entities")).map(Source::Entities)
        }
        (None, None) => Err(ctx.invalid("Source must set exactly one of events, entities (found none)")),
        (Some(_), Some(_)) => Err(ctx.invalid("Source must set exactly one of events, entities (found both)")),
    }
}

fn parse_table_ref(value: &Value, ctx: &Context) -> LoadResult<TableRef> {
    match value {
        Value::String(s) => Ok(TableRef::Literal(s.to_string_lossy().to_string())),
        Value::Table(table) if kind_of(table).as_deref() == Some("StagingQueryRef") => {
            let name: String = get_required(table, "name", ctx)?;
            Ok(TableRef::StagingQuery(name))
        }
        other => Err(ctx.invalid(format!(
            "expected a table name or staging_query_output_table(...), found {}",
            other.type_name()
        ))),
    }
}

fn get_table_ref(table: &Table, key: &str, ctx: &Context) -> LoadResult<Option<TableRef>> {
    match get_optional::<Value>(table, key, ctx)? {
        Some(value) => parse_table_ref(&value, &ctx.field(key)).map(Some),
        None => Ok(None),
    }
}

fn parse_event_source(value: &Value, ctx: &Context) -> LoadResult<EventSource> {
    let table = expect_table(value, "EventSource", ctx)?;

    let source_table = get_table_ref(&table, "table", ctx)?
        .ok_or_else(|| ctx.field("table").invalid("missing required field"))?;

    Ok(EventSource {
        table: source_table,
        topic: get_optional(&table, "topic", ctx)?,
        query: parse_required_query(&table, ctx)?,
        is_cumulative: get_flag(&table, "isCumulative", ctx)?,
    })
}

fn parse_entity_source(value: &Value, ctx: &Context) -> LoadResult<EntitySource> {
    let table = expect_table(value, "EntitySource", ctx)?;

    let snapshot_table = get_table_ref(&table, "snapshotTable", ctx)?
        .ok_or_else(|| ctx.field("snapshotTable").invalid("missing required field"))?;

    Ok(EntitySource {
        snapshot_table,
        mutation_table: get_table_ref(&table, "mutationTable", ctx)?,
        mutation_topic: get_optional(&table, "mutationTopic", ctx)?,
        query: parse_required_query(&table, ctx)?,
    })
}

fn parse_required_query(table: &Table, ctx: &Context) -> LoadResult<Query> {
    let value: Value = get_optional(table, "query", ctx)?
        .ok_or_else(|| ctx.field("query").invalid("missing required field"))?;
    parse_query(&value, &ctx.field("query"))
}

fn parse_query(value: &Value, ctx: &Context) -> LoadResult<Query> {
    let table = expect_table(value, "Query", ctx)?;

    Ok(Query {
        start_partition: get_optional(&table, "startPartition", ctx)?,
        end_partition: get_optional(&table, "endPartition", ctx)?,
        selects: get_string_map(&table, "selects", ctx)?,
        wheres: get_string_list(&table, "wheres", ctx)?,
        time_column: get_optional(&table, "timeColumn", ctx)?,
        setups: get_string_list(&table, "setups", ctx)?,
    })
}

fn parse_join_part(value: &Value, ctx: &Context) -> LoadResult<JoinPart> {
    let table = expect_table(value, "JoinPart", ctx)?;

    let group_by_value: Value = get_optional(&table, "group_by", ctx)?
        .ok_or_else(|| ctx.field("group_by").invalid("missing required field"))?;
    let group_by = parse_group_by_ref(&group_by_value, &ctx.field("group_by"))?;

    // Lua tables are unordered; sort so loads are reproducible
    let key_mapping: KeyMapping = get_string_map(&table, "keyMapping", ctx)?
        .into_iter()
        .collect();

    Ok(JoinPart {
        group_by,
        key_mapping,
        prefix: get_optional(&table, "prefix", ctx)?,
    })
}

fn parse_group_by_ref(value: &Value, ctx: &Context) -> LoadResult<GroupByRef> {
    match value {
        Value::String(s) => Ok(GroupByRef::new(s.to_string_lossy().to_string())),
        Value::Table(table) if kind_of(table).as_deref() == Some("GroupByRef") => {
            let name: String = get_required(table, "name", ctx)?;
            Ok(GroupByRef::new(name))
        }
        other => Err(ctx.invalid(format!(
            "expected group_by(\"name\"), found {}",
            other.type_name()
        ))),
    }
}

fn parse_meta_data(value: &Value, ctx: &Context) -> LoadResult<MetaData> {
    let table = expect_table(value, "MetaData", ctx)?;

    Ok(MetaData {
        name: get_optional(&table, "name", ctx)?,
        team: get_optional(&table, "team", ctx)?,
        output_namespace: get_optional(&table, "outputNamespace", ctx)?,
        sample_percent: get_optional(&table, "samplePercent", ctx)?,
    })
}
