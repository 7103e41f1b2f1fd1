//! Single-pass directive resolver with caching
//!
//! Field values may embed directives inside `{{ }}`:
//!
//! | Directive | Meaning |
//! |-----------|---------|
//! | `param NAME` | value of a module parameter, resolved lexically |
//! | `lookup DOTTED` | scope-aware reference into another vertex |
//! | `noderef "ID"` | direct vertex reference (desugared form) |
//! | `X \| f` | apply field accessor `f` to the value of `X` |
//!
//! Templates are tokenized once and the parse is cached process-wide as an
//! immutable `Arc` snapshot, so repeated renders of the same template skip
//! the scanner entirely.

use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::debug;

use crate::fields::{eval_terms, FieldError};
use crate::graph::{self, Graph};
use crate::preprocess::{desugar_call_scoped, ResolveError};
use crate::resource::module::ModulePreparer;
use crate::resource::{Render, Value};
use crate::store::RenderStore;

/// Rendering failures, each carrying the vertex and directive context.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template syntax error in {vertex}: {detail}")]
    Syntax { vertex: String, detail: String },

    #[error("in {vertex}, directive \"{directive}\": {source}")]
    Directive {
        vertex: String,
        directive: String,
        #[source]
        source: FieldError,
    },

    #[error("in {vertex}, directive \"{directive}\": {source}")]
    Resolve {
        vertex: String,
        directive: String,
        #[source]
        source: ResolveError,
    },

    #[error("unknown parameter \"{name}\" referenced from {vertex}")]
    UnknownParam { vertex: String, name: String },

    #[error("in {vertex}, directive \"{directive}\" is pending: value not resolvable yet")]
    Pending { vertex: String, directive: String },
}

impl RenderError {
    /// Pending failures may clear up once more of the graph has rendered.
    pub fn is_pending(&self) -> bool {
        matches!(self, RenderError::Pending { .. })
    }
}

// ============================================================================
// TOKENIZER
// ============================================================================

/// The head of a directive pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Head {
    Param(String),
    Lookup(String),
    NodeRef(String),
}

/// One parsed `{{ }}` block: a head plus trailing field accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// Original text inside the braces, kept for error context.
    pub text: String,
    pub head: Head,
    pub accessors: Vec<String>,
}

/// A parsed template fragment.
#[derive(Debug, Clone)]
pub enum Token {
    /// Range into the original template string.
    Literal(Range<usize>),
    Directive(Directive),
}

/// Cache of parsed templates; entries are immutable once inserted.
static TEMPLATE_CACHE: Lazy<DashMap<String, Arc<Vec<Token>>>> = Lazy::new(DashMap::new);

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_dotted_path(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_name)
}

fn parse_head(stage: &str) -> Result<Head, String> {
    // the desugared form wraps the head in parens
    let stage = stage
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(stage)
        .trim();

    if let Some(rest) = stage.strip_prefix("param ") {
        let name = rest.trim();
        if !is_name(name) {
            return Err(format!("bad parameter name \"{name}\""));
        }
        return Ok(Head::Param(name.to_string()));
    }
    if let Some(rest) = stage.strip_prefix("lookup ") {
        let path = rest.trim().trim_matches('"');
        if !is_dotted_path(path) {
            return Err(format!("bad lookup path \"{path}\""));
        }
        return Ok(Head::Lookup(path.to_string()));
    }
    if let Some(rest) = stage.strip_prefix("noderef ") {
        let id = rest.trim();
        let id = id
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .ok_or_else(|| format!("noderef id must be quoted, got {id}"))?;
        if !is_dotted_path(id) {
            return Err(format!("bad noderef id \"{id}\""));
        }
        return Ok(Head::NodeRef(id.to_string()));
    }
    Err(format!("unknown directive \"{stage}\""))
}

fn parse_directive(text: &str) -> Result<Directive, String> {
    let mut stages = text.split('|').map(str::trim);
    let head = parse_head(stages.next().unwrap_or(""))?;

    let mut accessors = Vec::new();
    for stage in stages {
        if !is_name(stage) {
            return Err(format!("bad field accessor \"{stage}\""));
        }
        accessors.push(stage.to_string());
    }
    Ok(Directive {
        text: text.trim().to_string(),
        head,
        accessors,
    })
}

/// Parse a template into tokens, consulting the process-wide cache.
pub fn tokenize(template: &str) -> Result<Arc<Vec<Token>>, String> {
    if let Some(cached) = TEMPLATE_CACHE.get(template) {
        return Ok(Arc::clone(&cached));
    }

    let mut tokens = Vec::new();
    let mut cursor = 0;
    while let Some(open) = template[cursor..].find("{{") {
        let open = cursor + open;
        let close = template[open..]
            .find("}}")
            .map(|idx| open + idx)
            .ok_or_else(|| format!("unclosed directive at byte {open}"))?;

        if open > cursor {
            tokens.push(Token::Literal(cursor..open));
        }
        let inner = &template[open + 2..close];
        tokens.push(Token::Directive(parse_directive(inner)?));
        cursor = close + 2;
    }
    if cursor < template.len() {
        tokens.push(Token::Literal(cursor..template.len()));
    }

    let tokens = Arc::new(tokens);
    TEMPLATE_CACHE.insert(template.to_string(), Arc::clone(&tokens));
    Ok(tokens)
}

/// Heads of every directive in a template, in order. Used to discover the
/// dependency edges a template implies before the render pass starts.
pub fn reference_heads(template: &str) -> Result<Vec<Head>, String> {
    let tokens = tokenize(template)?;
    Ok(tokens
        .iter()
        .filter_map(|t| match t {
            Token::Directive(d) => Some(d.head.clone()),
            Token::Literal(_) => None,
        })
        .collect())
}

// ============================================================================
// RENDERER
// ============================================================================

/// Per-vertex renderer handed to preparers during the render pass.
///
/// Reads only: the graph structure (frozen) and the store entries of
/// already-rendered vertices.
pub struct Renderer {
    graph: Arc<Graph>,
    store: RenderStore,
    vertex: Arc<str>,
}

impl Renderer {
    pub fn new(graph: Arc<Graph>, store: RenderStore, vertex: Arc<str>) -> Self {
        Self {
            graph,
            store,
            vertex,
        }
    }

    pub fn vertex(&self) -> &str {
        &self.vertex
    }

    fn eval_directive(&self, directive: &Directive) -> Result<Value, RenderError> {
        let ctx_directive = || directive.text.clone();
        let ctx_vertex = || self.vertex.to_string();

        let (target, mut terms): (Value, Vec<String>) = match &directive.head {
            Head::Param(name) => (self.find_param(name)?, Vec::new()),
            Head::Lookup(path) => {
                let split = desugar_call_scoped(&self.graph, path, &self.vertex).map_err(|e| {
                    RenderError::Resolve {
                        vertex: ctx_vertex(),
                        directive: ctx_directive(),
                        source: e,
                    }
                })?;
                let terms: Vec<String> = split.terms().iter().map(|t| t.to_string()).collect();
                if terms.is_empty() && directive.accessors.is_empty() {
                    return Ok(Value::NodeRef(split.vertex));
                }
                let record =
                    self.store
                        .record(&split.vertex)
                        .ok_or_else(|| RenderError::Pending {
                            vertex: ctx_vertex(),
                            directive: ctx_directive(),
                        })?;
                (Value::Record(record), terms)
            }
            Head::NodeRef(id) => {
                let vertex_id =
                    self.graph
                        .resolve_id(id)
                        .ok_or_else(|| RenderError::Resolve {
                            vertex: ctx_vertex(),
                            directive: ctx_directive(),
                            source: ResolveError::MissingVertex { path: id.clone() },
                        })?;
                if directive.accessors.is_empty() {
                    return Ok(Value::NodeRef(vertex_id));
                }
                let record =
                    self.store
                        .record(&vertex_id)
                        .ok_or_else(|| RenderError::Pending {
                            vertex: ctx_vertex(),
                            directive: ctx_directive(),
                        })?;
                (Value::Record(record), Vec::new())
            }
        };

        terms.extend(directive.accessors.iter().cloned());
        if terms.is_empty() {
            return Ok(target);
        }

        let term_refs: Vec<&str> = terms.iter().map(String::as_str).collect();
        eval_terms(&target, &term_refs).map_err(|e| match e {
            FieldError::Unresolvable => RenderError::Pending {
                vertex: ctx_vertex(),
                directive: ctx_directive(),
            },
            other => RenderError::Directive {
                vertex: ctx_vertex(),
                directive: ctx_directive(),
                source: other,
            },
        })
    }

    /// Lexical parameter resolution: nearest enclosing module that declares
    /// the name wins, searching outward scope by scope.
    fn find_param(&self, name: &str) -> Result<Value, RenderError> {
        let mut cur: String = self.vertex.to_string();
        loop {
            let marker = graph::sibling_id(&cur, crate::resource::module::MARKER_LEAF);
            if let Some(value) = self.params_of(&marker, name) {
                return Ok(value);
            }
            let parent = graph::parent_id(&cur).to_string();
            if let Some(value) = self.params_of(&parent, name) {
                return Ok(value);
            }
            if parent == cur {
                return Err(RenderError::UnknownParam {
                    vertex: self.vertex.to_string(),
                    name: name.to_string(),
                });
            }
            cur = parent;
        }
    }

    fn params_of(&self, id: &str, name: &str) -> Option<Value> {
        let meta = self.graph.get(id)?;
        let module = meta.preparer().as_any().downcast_ref::<ModulePreparer>()?;
        module.param(name)
    }
}

impl Render for Renderer {
    fn render(&self, field: &str, raw: &str) -> Result<String, RenderError> {
        let tokens = tokenize(raw).map_err(|detail| RenderError::Syntax {
            vertex: self.vertex.to_string(),
            detail,
        })?;

        let mut out = String::with_capacity(raw.len());
        for token in tokens.iter() {
            match token {
                Token::Literal(range) => out.push_str(&raw[range.clone()]),
                Token::Directive(directive) => {
                    let value = self.eval_directive(directive)?;
                    out.push_str(&value.render_string());
                }
            }
        }
        debug!(vertex = %self.vertex, field, "rendered field");
        Ok(out)
    }
}
