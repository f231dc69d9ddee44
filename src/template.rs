//! Template materialization.
//!
//! A template is a directory holding a `template.toml` manifest and a
//! `files/` tree. Directory names, file names and UTF-8 file bodies under
//! `files/` are rendered with Handlebars against the collected values.

use std::collections::BTreeMap;
use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use handlebars::{Handlebars, handlebars_helper, no_escape};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{GraftError, Result};

pub const MANIFEST_FILE: &str = "template.toml";
pub const FILES_DIR: &str = "files";

static VARIABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("variable name pattern"));

/// Parsed `template.toml`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateManifest {
    /// Name of the generated directory, rendered.
    pub directory: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Variable {
    pub name: String,
    pub prompt: Option<String>,
    /// Rendered against the values collected before this one.
    #[serde(default)]
    pub default: String,
}

impl Variable {
    pub fn label(&self) -> &str {
        self.prompt.as_deref().unwrap_or(&self.name)
    }
}

/// Values collected for a template, kept in manifest order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Values {
    entries: Vec<(String, String)>,
}

impl Values {
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// JSON object handed to Handlebars.
    pub fn context(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                .collect::<Map<String, Value>>(),
        )
    }
}

handlebars_helper!(lowercase: |value: str| value.to_lowercase());
handlebars_helper!(uppercase: |value: str| value.to_uppercase());
handlebars_helper!(snakecase: |value: str| to_snake_case(value));

/// Strict, non-escaping Handlebars registry shared by every render.
pub struct Renderer {
    registry: Handlebars<'static>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(no_escape);
        registry.register_helper("lowercase", Box::new(lowercase));
        registry.register_helper("uppercase", Box::new(uppercase));
        registry.register_helper("snakecase", Box::new(snakecase));
        Self { registry }
    }

    /// Render `source`; `origin` names the file it came from in errors.
    pub fn render(&self, origin: &Utf8Path, source: &str, values: &Values) -> Result<String> {
        self.registry
            .render_template(source, &values.context())
            .map_err(|err| GraftError::template(origin, err.to_string()))
    }
}

pub fn to_snake_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    let mut prev_lower = false;
    for ch in value.chars() {
        if ch == ' ' || ch == '-' || ch == '_' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        } else if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// A template directory on disk with its validated manifest.
#[derive(Debug)]
pub struct Template {
    root: Utf8PathBuf,
    manifest: TemplateManifest,
}

impl Template {
    pub fn load(root: &Utf8Path) -> Result<Self> {
        let manifest_path = root.join(MANIFEST_FILE);
        let raw = fs::read_to_string(&manifest_path)
            .map_err(|err| GraftError::io(format!("reading template manifest {manifest_path}"), err))?;
        let manifest: TemplateManifest = toml::from_str(&raw)
            .map_err(|err| GraftError::template(&manifest_path, err.to_string()))?;

        if manifest.directory.trim().is_empty() {
            return Err(GraftError::template(&manifest_path, "`directory` must not be empty"));
        }

        let mut seen = Vec::new();
        for variable in &manifest.variables {
            if !VARIABLE_NAME.is_match(&variable.name) {
                return Err(GraftError::template(
                    &manifest_path,
                    format!("invalid variable name `{}`", variable.name),
                ));
            }
            if seen.contains(&variable.name.as_str()) {
                return Err(GraftError::template(
                    &manifest_path,
                    format!("variable `{}` declared twice", variable.name),
                ));
            }
            seen.push(variable.name.as_str());
        }

        let files = root.join(FILES_DIR);
        if !files.is_dir() {
            return Err(GraftError::template(root, format!("missing `{FILES_DIR}/` directory")));
        }

        Ok(Self {
            root: root.to_owned(),
            manifest,
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn manifest_path(&self) -> Utf8PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Collect a value for every declared variable, in manifest order.
    ///
    /// `overrides` win outright. Otherwise `ask` receives the variable and its
    /// rendered default and returns the value to use.
    pub fn collect_values<F>(
        &self,
        renderer: &Renderer,
        overrides: &BTreeMap<String, String>,
        mut ask: F,
    ) -> Result<Values>
    where
        F: FnMut(&Variable, &str) -> Result<String>,
    {
        let manifest_path = self.manifest_path();
        if let Some(unknown) = overrides
            .keys()
            .find(|key| !self.manifest.variables.iter().any(|v| &v.name == *key))
        {
            return Err(GraftError::template(
                &manifest_path,
                format!("no variable named `{unknown}`"),
            ));
        }

        let mut values = Values::default();
        for variable in &self.manifest.variables {
            if let Some(value) = overrides.get(&variable.name) {
                values.insert(variable.name.clone(), value.clone());
                continue;
            }
            let default = renderer.render(&manifest_path, &variable.default, &values)?;
            let value = ask(variable, &default)?;
            values.insert(variable.name.clone(), value);
        }
        Ok(values)
    }

    /// Rendered name of the generated directory.
    pub fn directory_name(&self, renderer: &Renderer, values: &Values) -> Result<String> {
        let name = renderer.render(&self.manifest_path(), &self.manifest.directory, values)?;
        check_component(&self.manifest_path(), &name)?;
        Ok(name)
    }

    /// Render the template into a new directory under `parent`.
    pub fn materialize(
        &self,
        renderer: &Renderer,
        values: &Values,
        parent: &Utf8Path,
    ) -> Result<Utf8PathBuf> {
        let name = self.directory_name(renderer, values)?;
        let output = parent.join(name);
        if output.exists() {
            return Err(GraftError::template(
                &self.root,
                format!("output directory {output} already exists"),
            ));
        }
        fs::create_dir(&output)
            .map_err(|err| GraftError::io(format!("creating {output}"), err))?;
        render_tree(renderer, &self.root.join(FILES_DIR), &output, values)?;
        Ok(output)
    }
}

fn render_tree(renderer: &Renderer, src: &Utf8Path, dst: &Utf8Path, values: &Values) -> Result<()> {
    let mut entries = src
        .read_dir_utf8()
        .and_then(|iter| iter.collect::<std::io::Result<Vec<_>>>())
        .map_err(|err| GraftError::io(format!("listing {src}"), err))?;
    entries.sort_by(|a, b| a.file_name().cmp(b.file_name()));

    for entry in entries {
        let source = entry.path();
        let name = renderer.render(source, entry.file_name(), values)?;
        check_component(source, &name)?;
        let target = dst.join(&name);

        let file_type = entry
            .file_type()
            .map_err(|err| GraftError::io(format!("inspecting {source}"), err))?;
        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|err| GraftError::io(format!("creating {target}"), err))?;
            render_tree(renderer, source, &target, values)?;
            continue;
        }

        let bytes =
            fs::read(source).map_err(|err| GraftError::io(format!("reading {source}"), err))?;
        let rendered = match String::from_utf8(bytes) {
            Ok(text) => renderer.render(source, &text, values)?.into_bytes(),
            Err(raw) => raw.into_bytes(),
        };
        fs::write(&target, rendered)
            .map_err(|err| GraftError::io(format!("writing {target}"), err))?;
        let permissions = fs::metadata(source)
            .map_err(|err| GraftError::io(format!("reading metadata of {source}"), err))?
            .permissions();
        fs::set_permissions(&target, permissions)
            .map_err(|err| GraftError::io(format!("setting permissions on {target}"), err))?;
        debug!(from = %source, to = %target, "rendered");
    }
    Ok(())
}

/// Rendered names must stay a single path component.
fn check_component(origin: &Utf8Path, name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(GraftError::template(
            origin,
            format!("rendered name `{name}` is not a valid file name"),
        ));
    }
    Ok(())
}
