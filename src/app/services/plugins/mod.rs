//! User-authored markdown extensions.
//!
//! Each enabled [`ExtensionSpec`] is a Lua chunk. It is evaluated once, in its
//! own environment, with the capability object as its only argument, and
//! must return a table:
//!
//! ```lua
//! local api = ...
//! return {
//!   name = "Highlights",
//!   css = ".hl { background: yellow }",
//!   transform = function(text) return (text:gsub("%(c%)", "©")) end,
//!   use = function(md)
//!     md:inline("==(.-)==", function(m, inner) return api.inline(inner, "hl", "mark") end)
//!   end,
//!   allow = { tags = { "mark" } },
//! }
//! ```
//!
//! Compilation never fails as a whole: a broken plugin is recorded in
//! [`CompiledPlugins::errors`] and skipped, everything else still applies.

mod api;
mod rules;
mod sandbox;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use log::{debug, warn};
use mlua::{Function, Table, Value};

use crate::app::domain::{ExtensionSpec, RenderSettings};
use crate::app::infrastructure::error::{PluginError, lua_error_message};

pub use api::{sanitize_class, sanitize_tag, wrap_markup};

use rules::{RuleTable, Staging};
use sandbox::Sandbox;

/// Tags and attributes a plugin asks the sanitizer to keep. Names are
/// lowercased; the denylist still applies on top.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowListAdditions {
    pub tags: BTreeSet<String>,
    pub attributes: BTreeSet<String>,
}

impl AllowListAdditions {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.attributes.is_empty()
    }

    pub fn extend(&mut self, other: &AllowListAdditions) {
        self.tags.extend(other.tags.iter().cloned());
        self.attributes.extend(other.attributes.iter().cloned());
    }
}

/// What one plugin contributed.
pub struct CompiledExtension {
    pub id: String,
    pub name: Option<String>,
    pub stylesheet: Option<String>,
    /// Number of grammar rules committed from `use`.
    pub rules: usize,
    pub allow_list: AllowListAdditions,
    transform: Option<Function>,
}

impl CompiledExtension {
    pub fn has_transform(&self) -> bool {
        self.transform.is_some()
    }
}

impl fmt::Debug for CompiledExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExtension")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stylesheet", &self.stylesheet)
            .field("transform", &self.transform.is_some())
            .field("rules", &self.rules)
            .field("allow_list", &self.allow_list)
            .finish()
    }
}

/// Render-ready result of plugin compilation. Owns a Lua state, so it stays
/// on the thread that built it.
pub struct PluginRuntime {
    extensions: Vec<CompiledExtension>,
    rules: RuleTable,
    allow_list: AllowListAdditions,
    // Declared last: Lua values above are released before the state.
    sandbox: Option<Sandbox>,
}

impl fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("extensions", &self.extensions)
            .field("rules", &self.rules.len())
            .field("allow_list", &self.allow_list)
            .finish()
    }
}

impl Default for PluginRuntime {
    fn default() -> Self {
        Self::empty()
    }
}

impl PluginRuntime {
    /// A runtime with no plugins; rendering with it is plain markdown.
    pub fn empty() -> Self {
        Self {
            extensions: Vec::new(),
            rules: RuleTable::default(),
            allow_list: AllowListAdditions::default(),
            sandbox: None,
        }
    }

    pub fn extensions(&self) -> &[CompiledExtension] {
        &self.extensions
    }

    /// Union of every plugin's allow-list request.
    pub fn allow_list(&self) -> &AllowListAdditions {
        &self.allow_list
    }

    /// Run the `transform` chain. A step that errors or returns something
    /// other than a string is skipped.
    pub fn preprocess(&self, text: &str) -> String {
        let Some(sandbox) = &self.sandbox else {
            return text.to_string();
        };

        let mut current = text.to_string();
        for ext in &self.extensions {
            let Some(transform) = &ext.transform else {
                continue;
            };
            match sandbox.guarded(|| transform.call::<Value>(current.as_str())) {
                Ok(Value::String(out)) => current = out.to_string_lossy().to_string(),
                Ok(other) => debug!(
                    "transform of plugin '{}' returned {}, skipped",
                    ext.id,
                    other.type_name()
                ),
                Err(e) => debug!(
                    "transform of plugin '{}' failed, skipped: {}",
                    ext.id,
                    lua_error_message(&e)
                ),
            }
        }
        current
    }

    /// Replace registered `:::` containers with plugin HTML.
    pub fn expand_containers(&self, text: &str) -> String {
        match &self.sandbox {
            Some(sandbox) => self.rules.expand_containers(sandbox, text),
            None => text.to_string(),
        }
    }

    /// HTML for a run of prose text, or `None` when no inline rule matched.
    pub fn apply_inline(&self, text: &str) -> Option<String> {
        self.rules.apply_inline(self.sandbox.as_ref()?, text)
    }

    /// HTML for a fenced block claimed by a plugin `fence` rule.
    pub fn render_fence(&self, lang: &str, code: &str, info: &str) -> Option<String> {
        if lang.is_empty() {
            return None;
        }
        self.rules.render_fence(self.sandbox.as_ref()?, lang, code, info)
    }
}

/// Output of [`compile_plugins`].
#[derive(Debug, Default)]
pub struct CompiledPlugins {
    pub runtime: PluginRuntime,
    /// Plugin stylesheets in spec order, blank-line separated. Not scoped.
    pub stylesheet: String,
    /// Failure message per spec id.
    pub errors: BTreeMap<String, String>,
}

/// Compile the enabled specs, in order, into a runtime handle.
pub fn compile_plugins(specs: &[ExtensionSpec], settings: &RenderSettings) -> CompiledPlugins {
    let enabled: Vec<&ExtensionSpec> = specs.iter().filter(|s| s.enabled).collect();
    if enabled.is_empty() {
        return CompiledPlugins::default();
    }

    let sandbox = match Sandbox::new(settings) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            let message = lua_error_message(&e);
            warn!("could not create plugin sandbox: {}", message);
            return CompiledPlugins {
                errors: enabled
                    .iter()
                    .map(|s| (s.id.clone(), message.clone()))
                    .collect(),
                ..Default::default()
            };
        }
    };

    let mut runtime = PluginRuntime::empty();
    let mut errors = BTreeMap::new();

    for spec in enabled {
        match compile_one(&sandbox, spec, &mut runtime.rules) {
            Ok((extension, use_error)) => {
                if let Some(err) = use_error {
                    warn!("plugin '{}': {}", spec.display_name(), err);
                    errors.insert(spec.id.clone(), err.to_string());
                }
                runtime.allow_list.extend(&extension.allow_list);
                runtime.extensions.push(extension);
            }
            Err(err) => {
                warn!("plugin '{}' failed to compile: {}", spec.display_name(), err);
                errors.insert(spec.id.clone(), err.to_string());
            }
        }
    }

    let stylesheet = runtime
        .extensions
        .iter()
        .filter_map(|e| e.stylesheet.as_deref())
        .filter(|css| !css.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    runtime.sandbox = Some(sandbox);
    CompiledPlugins {
        runtime,
        stylesheet,
        errors,
    }
}

/// Evaluate one spec. A failing `use` hook still yields the extension (its
/// stylesheet, transform and allow-list stand) together with the error.
fn compile_one(
    sandbox: &Sandbox,
    spec: &ExtensionSpec,
    rules: &mut RuleTable,
) -> Result<(CompiledExtension, Option<PluginError>), PluginError> {
    if spec.code.trim().is_empty() {
        return Err(PluginError::EmptySource);
    }

    let lua = sandbox.lua();
    let env = sandbox.environment().map_err(|e| PluginError::script(&e))?;
    let api = api::create_api(lua).map_err(|e| PluginError::script(&e))?;

    let value = sandbox
        .guarded(|| {
            lua.load(spec.code.as_str())
                .set_name(format!("={}", spec.display_name()))
                .set_environment(env)
                .call::<Value>(api)
        })
        .map_err(|e| PluginError::script(&e))?;

    let table = match value {
        Value::Table(table) => table,
        other => return Err(PluginError::NotATable(other.type_name().to_string())),
    };

    let stylesheet = string_field(&table, "css")?.or(string_field(&table, "stylesheet")?);
    let name = string_field(&table, "name")?;
    let allow_list = allow_field(&table)?;

    let transform = match table.get::<Value>("transform").map_err(|e| PluginError::script(&e))? {
        Value::Function(f) => Some(f),
        Value::Nil => None,
        other => {
            debug!(
                "plugin '{}': transform is {}, ignored",
                spec.display_name(),
                other.type_name()
            );
            None
        }
    };

    let mut committed = 0;
    let mut use_error = None;
    if let Value::Function(hook) = table.get::<Value>("use").map_err(|e| PluginError::script(&e))? {
        let staging: Staging = Rc::default();
        let handle = rules::parser_handle(sandbox, &spec.id, &staging).map_err(|e| PluginError::script(&e))?;
        match sandbox.guarded(|| hook.call::<()>(handle)) {
            Ok(()) => {
                let staged = staging.take();
                committed = staged.len();
                rules.commit(staged);
            }
            Err(e) => use_error = Some(PluginError::use_failed(&e)),
        }
    }

    Ok((
        CompiledExtension {
            id: spec.id.clone(),
            name,
            stylesheet,
            rules: committed,
            allow_list,
            transform,
        },
        use_error,
    ))
}

/// A string (or number) field; other types are ignored.
fn string_field(table: &Table, key: &str) -> Result<Option<String>, PluginError> {
    match table.get::<Value>(key).map_err(|e| PluginError::script(&e))? {
        Value::String(s) => Ok(Some(s.to_string_lossy().to_string())),
        Value::Integer(n) => Ok(Some(n.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Ok(None),
    }
}

fn allow_field(table: &Table) -> Result<AllowListAdditions, PluginError> {
    let Value::Table(allow) = table.get::<Value>("allow").map_err(|e| PluginError::script(&e))? else {
        return Ok(AllowListAdditions::default());
    };
    Ok(AllowListAdditions {
        tags: name_list(&allow, "tags")?,
        attributes: name_list(&allow, "attributes")?,
    })
}

fn name_list(table: &Table, key: &str) -> Result<BTreeSet<String>, PluginError> {
    let Value::Table(list) = table.get::<Value>(key).map_err(|e| PluginError::script(&e))? else {
        return Ok(BTreeSet::new());
    };
    let mut names = BTreeSet::new();
    for value in list.sequence_values::<Value>() {
        if let Value::String(s) = value.map_err(|e| PluginError::script(&e))? {
            let name = s.to_string_lossy().trim().to_ascii_lowercase();
            if !name.is_empty() {
                names.insert(name);
            }
        }
    }
    Ok(names)
}
