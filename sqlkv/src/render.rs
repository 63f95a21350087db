//! Query text rendering.
//!
//! Templates are rendered by plain text substitution: keys and values are
//! NOT escaped or bound as parameters. Callers that accept untrusted keys or
//! values must sanitize them first, or point the templates at a store that
//! tolerates arbitrary text.

use shared::config::QueryTemplates;
use shared::{Error, Result};
use tera::{Context, Tera};

/// Named string variables available to a query template.
#[derive(Clone, Debug, Default)]
pub struct QueryVars {
    pub key: Option<String>,
    pub value: Option<String>,
    pub option: Option<String>,
    pub time: Option<String>,
}

impl QueryVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.option = Some(option.into());
        self
    }

    pub fn time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }

    fn to_context(&self) -> Context {
        let mut context = Context::new();
        let pairs = [
            ("Key", &self.key),
            ("Value", &self.value),
            ("Option", &self.option),
            ("Time", &self.time),
        ];
        // Unset variables stay out of the context so templates referencing
        // them fail instead of rendering an empty string.
        for (name, value) in pairs {
            if let Some(value) = value {
                context.insert(name, value);
            }
        }
        context
    }
}

/// Renders a single template against `vars` without compiling it ahead of time.
pub fn render(template: &str, vars: &QueryVars) -> Result<String> {
    Tera::one_off(template, &vars.to_context(), false).map_err(template_error)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    Keys,
    Get,
    Set,
    Delete,
}

impl QueryKind {
    fn name(self) -> &'static str {
        match self {
            QueryKind::Keys => "keys",
            QueryKind::Get => "get",
            QueryKind::Set => "set",
            QueryKind::Delete => "delete",
        }
    }
}

/// The four client templates, parsed once.
#[derive(Debug)]
pub struct QueryRenderer {
    tera: Tera,
}

impl QueryRenderer {
    pub fn new(templates: &QueryTemplates) -> Result<Self> {
        let templates = templates.resolved();
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_templates(vec![
            (QueryKind::Keys.name(), templates.keys.as_str()),
            (QueryKind::Get.name(), templates.get.as_str()),
            (QueryKind::Set.name(), templates.set.as_str()),
            (QueryKind::Delete.name(), templates.delete.as_str()),
        ])
        .map_err(template_error)?;

        Ok(Self { tera })
    }

    pub fn render(&self, kind: QueryKind, vars: &QueryVars) -> Result<String> {
        self.tera
            .render(kind.name(), &vars.to_context())
            .map_err(template_error)
    }
}

fn template_error(err: tera::Error) -> Error {
    let mut msg = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    Error::Template(msg)
}
