//! Small Django-style template engine used for the landing page.
//!
//! Supported syntax:
//! - `{{ a.b }}` variables, resolved against a JSON context and HTML-escaped
//! - `{% if x %}…{% else %}…{% endif %}` and `{% if not x %}`
//! - `{% for item in items %}…{% endfor %}`
//! - `{% block name %}…{% endblock %}` with `{% extends "base.html" %}`
//!
//! Templates are read from the configured directory on every render, so edits
//! show up without a restart.
use crate::router::Response;
use crate::settings::TemplateSettings;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)(\{\{.*?\}\}|\{%.*?%\})").expect("template tag regex is valid")
});

const MAX_EXTENDS_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template `{0}` not found")]
    NotFound(String),
    #[error("template `{0}` extends too deeply")]
    ExtendsTooDeep(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    Variable(String),
    Tag(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Variable(String),
    If {
        condition: String,
        negated: bool,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    For {
        var_name: String,
        list_name: String,
        body: Vec<Node>,
    },
    Block {
        name: String,
        body: Vec<Node>,
    },
    Extends(String),
}

pub fn tokenize(content: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut last_end = 0;
    for mat in TAG_RE.find_iter(content) {
        if mat.start() > last_end {
            tokens.push(Token::Text(content[last_end..mat.start()].to_string()));
        }
        let raw = mat.as_str();
        if let Some(inner) = raw.strip_prefix("{{").and_then(|r| r.strip_suffix("}}")) {
            tokens.push(Token::Variable(inner.trim().to_string()));
        } else if let Some(inner) = raw.strip_prefix("{%").and_then(|r| r.strip_suffix("%}")) {
            tokens.push(Token::Tag(inner.trim().to_string()));
        }
        last_end = mat.end();
    }
    if last_end < content.len() {
        tokens.push(Token::Text(content[last_end..].to_string()));
    }
    tokens
}

pub fn parse(tokens: &[Token]) -> Vec<Node> {
    let mut idx = 0;
    parse_until(tokens, &mut idx, &[])
}

/// Consume tokens until one of `end_tags` (left unconsumed) or the end.
fn parse_until(tokens: &[Token], idx: &mut usize, end_tags: &[&str]) -> Vec<Node> {
    let mut nodes = Vec::new();
    while let Some(token) = tokens.get(*idx) {
        let tag = match token {
            Token::Text(t) => {
                nodes.push(Node::Text(t.clone()));
                *idx += 1;
                continue;
            }
            Token::Variable(v) => {
                nodes.push(Node::Variable(v.clone()));
                *idx += 1;
                continue;
            }
            Token::Tag(tag) => tag.as_str(),
        };
        if end_tags.contains(&tag) {
            break;
        }
        *idx += 1;

        if let Some(rest) = tag.strip_prefix("extends ") {
            nodes.push(Node::Extends(rest.trim().trim_matches('"').to_string()));
        } else if let Some(name) = tag.strip_prefix("block ") {
            let body = parse_until(tokens, idx, &["endblock"]);
            *idx += 1;
            nodes.push(Node::Block {
                name: name.trim().to_string(),
                body,
            });
        } else if let Some(cond) = tag.strip_prefix("if ") {
            let then_body = parse_until(tokens, idx, &["else", "endif"]);
            let mut else_body = Vec::new();
            if matches!(tokens.get(*idx), Some(Token::Tag(t)) if t == "else") {
                *idx += 1;
                else_body = parse_until(tokens, idx, &["endif"]);
            }
            *idx += 1;
            let cond = cond.trim();
            let (condition, negated) = match cond.strip_prefix("not ") {
                Some(inner) => (inner.trim().to_string(), true),
                None => (cond.to_string(), false),
            };
            nodes.push(Node::If {
                condition,
                negated,
                then_body,
                else_body,
            });
        } else if let Some(rest) = tag.strip_prefix("for ") {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            if let [var_name, "in", list_name] = parts.as_slice() {
                let body = parse_until(tokens, idx, &["endfor"]);
                *idx += 1;
                nodes.push(Node::For {
                    var_name: var_name.to_string(),
                    list_name: list_name.to_string(),
                    body,
                });
            } else {
                debug!("Skipping malformed for tag: {}", tag);
            }
        } else {
            debug!("Skipping unknown tag: {}", tag);
        }
    }
    nodes
}

fn resolve<'a>(name: &str, context: &'a Value) -> Option<&'a Value> {
    name.split('.')
        .try_fold(context, |current, key| match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
        other => other.to_string(),
    }
}

/// Replace blocks in `nodes` with the child's blocks of the same name.
fn merge_blocks(nodes: &[Node], child_blocks: &HashMap<String, Vec<Node>>) -> Vec<Node> {
    nodes
        .iter()
        .map(|node| match node {
            Node::Block { name, body } => Node::Block {
                name: name.clone(),
                body: child_blocks
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| merge_blocks(body, child_blocks)),
            },
            Node::If {
                condition,
                negated,
                then_body,
                else_body,
            } => Node::If {
                condition: condition.clone(),
                negated: *negated,
                then_body: merge_blocks(then_body, child_blocks),
                else_body: merge_blocks(else_body, child_blocks),
            },
            Node::For {
                var_name,
                list_name,
                body,
            } => Node::For {
                var_name: var_name.clone(),
                list_name: list_name.clone(),
                body: merge_blocks(body, child_blocks),
            },
            other => other.clone(),
        })
        .collect()
}

pub fn render_nodes(nodes: &[Node], context: &Value) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Variable(name) => {
                if let Some(value) = resolve(name, context) {
                    out.push_str(&escape_html(&display(value)));
                }
            }
            Node::If {
                condition,
                negated,
                then_body,
                else_body,
            } => {
                if is_truthy(resolve(condition, context)) != *negated {
                    out.push_str(&render_nodes(then_body, context));
                } else {
                    out.push_str(&render_nodes(else_body, context));
                }
            }
            Node::For {
                var_name,
                list_name,
                body,
            } => {
                if let Some(Value::Array(items)) = resolve(list_name, context) {
                    for item in items {
                        let mut local = match context {
                            Value::Object(map) => map.clone(),
                            _ => serde_json::Map::new(),
                        };
                        local.insert(var_name.clone(), item.clone());
                        out.push_str(&render_nodes(body, &Value::Object(local)));
                    }
                }
            }
            Node::Block { body, .. } => out.push_str(&render_nodes(body, context)),
            Node::Extends(_) => {}
        }
    }
    out
}

/// Loads templates by name from one directory.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    dir: PathBuf,
}

impl TemplateEngine {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        TemplateEngine {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn load(&self, name: &str) -> Result<Vec<Node>, TemplateError> {
        let path = self.dir.join(name);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            debug!("Cannot read template {}: {}", path.display(), e);
            TemplateError::NotFound(name.to_string())
        })?;
        Ok(parse(&tokenize(&content)))
    }

    /// Render `name`, following `{% extends %}` up to the root template.
    pub fn render(&self, name: &str, context: &Value) -> Result<String, TemplateError> {
        let mut nodes = self.load(name)?;
        let mut blocks: HashMap<String, Vec<Node>> = HashMap::new();

        for _ in 0..MAX_EXTENDS_DEPTH {
            let parent = nodes.iter().find_map(|n| match n {
                Node::Extends(base) => Some(base.clone()),
                _ => None,
            });
            let Some(parent) = parent else {
                return Ok(render_nodes(&merge_blocks(&nodes, &blocks), context));
            };
            // Blocks from the most-derived template win.
            for node in &nodes {
                if let Node::Block { name, body } = node {
                    if !blocks.contains_key(name) {
                        let merged = merge_blocks(body, &blocks);
                        blocks.insert(name.clone(), merged);
                    }
                }
            }
            nodes = self.load(&parent)?;
        }
        Err(TemplateError::ExtendsTooDeep(name.to_string()))
    }
}

/// Render a template into an HTML response; a missing template is a 404 page.
pub fn render_template(settings: &TemplateSettings, name: &str, context: &Value) -> Response {
    match TemplateEngine::new(&settings.dir).render(name, context) {
        Ok(html) => Response::html(200, html),
        Err(TemplateError::NotFound(missing)) => {
            Response::html(404, format!("Template '{}' not found", missing))
        }
        Err(e) => {
            log::error!("Template rendering failed: {}", e);
            Response::html(500, "Template error")
        }
    }
}
