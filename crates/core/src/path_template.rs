//! Filesystem path templates.
//!
//! A template definition such as
//! `/deliveries/{prj}/{prj}_{delivery_date}[_{Episode}]_v{delivery_version}`
//! is parsed into literal text, `{key}` substitutions and optional `[...]`
//! sections. Optional sections are dropped when any key inside them has
//! no value. Templates work both ways: [`PathTemplate::apply_fields`]
//! builds a path from fields and [`PathTemplate::get_fields`] extracts the
//! fields back out of a concrete path.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Timestamp format used when a timestamp key declares none.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PathTemplateError {
    #[error("Invalid template \"{template}\": {reason}")]
    Parse { template: String, reason: String },

    #[error("Template \"{template}\" is missing a value for key \"{key}\"")]
    MissingField { template: String, key: String },

    #[error("Invalid value \"{value}\" for template key \"{key}\"")]
    InvalidValue { key: String, value: String },

    #[error("Path \"{path}\" does not match template \"{template}\"")]
    NoMatch { template: String, path: String },
}

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Timestamp(NaiveDateTime),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Str(s) => s.parse().ok(),
            Self::Timestamp(_) => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Convert a JSON value from a record or a key default.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self::Str(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Int(i)),
                None => Some(Self::Str(n.to_string())),
            },
            Value::Bool(b) => Some(Self::Str(b.to_string())),
            other => Some(Self::Str(other.to_string())),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Timestamp(t) => {
                f.write_str(&format_timestamp(t, DEFAULT_TIMESTAMP_FORMAT).unwrap_or_default())
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::Timestamp(value)
    }
}

/// Key name to value.
pub type TemplateFields = BTreeMap<String, FieldValue>;

/// Format a timestamp with a strftime pattern. Returns `None` for
/// malformed patterns instead of panicking.
pub fn format_timestamp(timestamp: &NaiveDateTime, pattern: &str) -> Option<String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return None;
    }

    let mut out = String::new();
    write!(out, "{}", timestamp.format_with_items(items.into_iter())).ok()?;
    Some(out)
}

fn parse_timestamp(value: &str, pattern: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, pattern)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, pattern)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    #[serde(alias = "string")]
    Str,
    #[serde(alias = "integer")]
    Int,
    Timestamp,
}

/// Declaration of a template key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateKey {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub key_type: KeyType,
    /// Zero padding for integers, e.g. `"03"`.
    #[serde(default)]
    pub format_spec: Option<String>,
    /// strftime pattern for timestamps.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
    /// `"Entity.field"` binding used to fill the key from cached records.
    #[serde(default)]
    pub shotgrid_field: Option<String>,
}

impl TemplateKey {
    pub fn string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn integer(name: &str, default: Option<i64>) -> Self {
        Self {
            name: name.to_string(),
            key_type: KeyType::Int,
            default: default.map(Value::from),
            ..Self::default()
        }
    }

    /// Split `shotgrid_field` into `(entity_type, field)`.
    pub fn shotgrid_binding(&self) -> Option<(&str, &str)> {
        self.shotgrid_field.as_deref()?.split_once('.')
    }

    fn timestamp_format(&self) -> &str {
        self.format.as_deref().unwrap_or(DEFAULT_TIMESTAMP_FORMAT)
    }

    fn pad_width(&self) -> usize {
        self.format_spec
            .as_deref()
            .and_then(|spec| spec.trim_start_matches('0').parse().ok())
            .unwrap_or(0)
    }

    /// Value used when no field is supplied.
    fn default_value(&self) -> Option<FieldValue> {
        match (&self.key_type, &self.default) {
            (KeyType::Timestamp, None) => Some(FieldValue::Timestamp(Local::now().naive_local())),
            (KeyType::Timestamp, Some(Value::String(s))) if s == "now" => {
                Some(FieldValue::Timestamp(Local::now().naive_local()))
            }
            (_, Some(value)) => FieldValue::from_json(value),
            (_, None) => None,
        }
    }

    fn render(&self, value: &FieldValue) -> Result<String, PathTemplateError> {
        match (self.key_type, value) {
            (KeyType::Int, value) => {
                let number = value.as_int().ok_or_else(|| PathTemplateError::InvalidValue {
                    key: self.name.clone(),
                    value: value.to_string(),
                })?;
                Ok(format!("{number:0width$}", width = self.pad_width()))
            }
            (KeyType::Timestamp, FieldValue::Timestamp(t)) => {
                format_timestamp(t, self.timestamp_format()).ok_or_else(|| {
                    PathTemplateError::InvalidValue {
                        key: self.name.clone(),
                        value: self.timestamp_format().to_string(),
                    }
                })
            }
            (_, value) => Ok(value.to_string()),
        }
    }

    fn pattern(&self) -> String {
        match self.key_type {
            KeyType::Str => r"[^/]+?".to_string(),
            KeyType::Int => r"-?\d+".to_string(),
            KeyType::Timestamp => strftime_pattern(self.timestamp_format()),
        }
    }

    fn parse(&self, raw: &str) -> Result<FieldValue, PathTemplateError> {
        let invalid = || PathTemplateError::InvalidValue {
            key: self.name.clone(),
            value: raw.to_string(),
        };
        match self.key_type {
            KeyType::Str => Ok(FieldValue::Str(raw.to_string())),
            KeyType::Int => raw.parse().map(FieldValue::Int).map_err(|_| invalid()),
            KeyType::Timestamp => parse_timestamp(raw, self.timestamp_format())
                .map(FieldValue::Timestamp)
                .ok_or_else(invalid),
        }
    }
}

/// Translate a strftime pattern into a regex fragment.
fn strftime_pattern(format: &str) -> String {
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push_str(&regex::escape(&c.to_string()));
            continue;
        }
        match chars.next() {
            Some('Y') => out.push_str(r"\d{4}"),
            Some('y' | 'm' | 'd' | 'H' | 'M' | 'S') => out.push_str(r"\d{2}"),
            Some('j') => out.push_str(r"\d{3}"),
            Some('%') => out.push('%'),
            _ => out.push_str(".+?"),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Key(String),
    Optional(Vec<Segment>),
}

#[derive(Debug, Clone)]
pub struct PathTemplate {
    name: String,
    definition: String,
    segments: Vec<Segment>,
    keys: BTreeMap<String, TemplateKey>,
    matcher: Regex,
    /// Key name per regex capture group, in group order.
    groups: Vec<String>,
}

impl PathTemplate {
    /// Parse a template definition. Keys the template uses that are not
    /// declared in `declared` are treated as plain strings.
    pub fn new(
        name: &str,
        definition: &str,
        declared: &BTreeMap<String, TemplateKey>,
    ) -> Result<Self, PathTemplateError> {
        let normalized = definition.replace('\\', "/");
        let segments = parse_segments(name, &normalized)?;

        let mut keys = BTreeMap::new();
        collect_keys(&segments, &mut |key| {
            let mut decl = declared
                .get(key)
                .cloned()
                .unwrap_or_else(|| TemplateKey::string(key));
            decl.name = key.to_string();
            keys.insert(key.to_string(), decl);
        });

        let mut groups = Vec::new();
        let body = build_pattern(&segments, &keys, &mut groups);
        let matcher = Regex::new(&format!("^{body}$")).map_err(|e| PathTemplateError::Parse {
            template: name.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            name: name.to_string(),
            definition: normalized,
            segments,
            keys,
            matcher,
            groups,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Keys used by this template.
    pub fn keys(&self) -> impl Iterator<Item = &TemplateKey> {
        self.keys.values()
    }

    pub fn has_key(&self, name: &str) -> bool {
        self.keys.contains_key(name)
    }

    /// Build a concrete path.
    pub fn apply_fields(&self, fields: &TemplateFields) -> Result<String, PathTemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Optional(inner) => {
                    if let Some(rendered) = self.render_optional(inner, fields)? {
                        out.push_str(&rendered);
                    }
                }
                other => out.push_str(&self.render_required(other, fields)?),
            }
        }
        Ok(out)
    }

    /// Extract fields from a concrete path. Fails when the path does not
    /// match the template.
    pub fn get_fields(&self, path: &str) -> Result<TemplateFields, PathTemplateError> {
        let normalized = path.replace('\\', "/");
        let no_match = || PathTemplateError::NoMatch {
            template: self.name.clone(),
            path: normalized.clone(),
        };

        let caps = self.matcher.captures(&normalized).ok_or_else(no_match)?;

        let mut fields = TemplateFields::new();
        for (index, key_name) in self.groups.iter().enumerate() {
            let Some(raw) = caps.get(index + 1) else {
                continue;
            };
            let Some(key) = self.keys.get(key_name) else {
                continue;
            };
            let value = key.parse(raw.as_str())?;
            match fields.get(key_name) {
                Some(existing) if *existing != value => return Err(no_match()),
                _ => {
                    fields.insert(key_name.clone(), value);
                }
            }
        }
        Ok(fields)
    }

    /// Like [`Self::get_fields`] but `None` instead of an error.
    pub fn validate_and_get_fields(&self, path: &str) -> Option<TemplateFields> {
        self.get_fields(path).ok()
    }

    fn value_for(&self, key: &str, fields: &TemplateFields) -> Option<FieldValue> {
        fields
            .get(key)
            .cloned()
            .or_else(|| self.keys.get(key).and_then(TemplateKey::default_value))
    }

    fn render_required(
        &self,
        segment: &Segment,
        fields: &TemplateFields,
    ) -> Result<String, PathTemplateError> {
        match segment {
            Segment::Literal(text) => Ok(text.clone()),
            Segment::Key(key) => {
                let value = self.value_for(key, fields).ok_or_else(|| {
                    PathTemplateError::MissingField {
                        template: self.name.clone(),
                        key: key.clone(),
                    }
                })?;
                match self.keys.get(key) {
                    Some(decl) => decl.render(&value),
                    None => Ok(value.to_string()),
                }
            }
            Segment::Optional(inner) => Ok(self.render_optional(inner, fields)?.unwrap_or_default()),
        }
    }

    fn render_optional(
        &self,
        inner: &[Segment],
        fields: &TemplateFields,
    ) -> Result<Option<String>, PathTemplateError> {
        let mut out = String::new();
        for segment in inner {
            if let Segment::Key(key) = segment {
                if self.value_for(key, fields).is_none() {
                    return Ok(None);
                }
            }
            out.push_str(&self.render_required(segment, fields)?);
        }
        Ok(Some(out))
    }
}

fn parse_segments(name: &str, definition: &str) -> Result<Vec<Segment>, PathTemplateError> {
    let error = |reason: &str| PathTemplateError::Parse {
        template: name.to_string(),
        reason: reason.to_string(),
    };

    let mut root: Vec<Segment> = Vec::new();
    let mut optional: Option<Vec<Segment>> = None;
    let mut literal = String::new();
    let mut chars = definition.chars();

    fn flush(literal: &mut String, target: &mut Vec<Segment>) {
        if !literal.is_empty() {
            target.push(Segment::Literal(std::mem::take(literal)));
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(k) => key.push(k),
                        None => return Err(error("unclosed '{'")),
                    }
                }
                if key.is_empty() {
                    return Err(error("empty key"));
                }
                let target = optional.as_mut().unwrap_or(&mut root);
                flush(&mut literal, target);
                target.push(Segment::Key(key));
            }
            '[' => {
                if optional.is_some() {
                    return Err(error("nested optional sections"));
                }
                flush(&mut literal, &mut root);
                optional = Some(Vec::new());
            }
            ']' => {
                let Some(mut inner) = optional.take() else {
                    return Err(error("unmatched ']'"));
                };
                flush(&mut literal, &mut inner);
                root.push(Segment::Optional(inner));
            }
            '}' => return Err(error("unmatched '}'")),
            other => literal.push(other),
        }
    }

    if optional.is_some() {
        return Err(error("unclosed '['"));
    }
    flush(&mut literal, &mut root);
    Ok(root)
}

fn collect_keys(segments: &[Segment], visit: &mut impl FnMut(&str)) {
    for segment in segments {
        match segment {
            Segment::Key(key) => visit(key),
            Segment::Optional(inner) => collect_keys(inner, visit),
            Segment::Literal(_) => {}
        }
    }
}

fn build_pattern(
    segments: &[Segment],
    keys: &BTreeMap<String, TemplateKey>,
    groups: &mut Vec<String>,
) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(&regex::escape(text)),
            Segment::Key(key) => {
                let pattern = keys
                    .get(key)
                    .map(TemplateKey::pattern)
                    .unwrap_or_else(|| r"[^/]+?".to_string());
                out.push('(');
                out.push_str(&pattern);
                out.push(')');
                groups.push(key.clone());
            }
            Segment::Optional(inner) => {
                out.push_str("(?:");
                out.push_str(&build_pattern(inner, keys, groups));
                out.push_str(")?");
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Template sets
// ---------------------------------------------------------------------------

/// Template section of the application settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateConfig {
    #[serde(default)]
    pub keys: BTreeMap<String, TemplateKey>,
    #[serde(default)]
    pub paths: BTreeMap<String, String>,
}

/// All named path templates of a configuration.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    keys: BTreeMap<String, TemplateKey>,
    templates: BTreeMap<String, PathTemplate>,
}

impl TemplateSet {
    pub fn from_config(config: &TemplateConfig) -> Result<Self, PathTemplateError> {
        let mut keys = config.keys.clone();
        for (name, key) in keys.iter_mut() {
            key.name = name.clone();
        }

        let templates = config
            .paths
            .iter()
            .map(|(name, definition)| {
                PathTemplate::new(name, definition, &keys).map(|t| (name.clone(), t))
            })
            .collect::<Result<_, _>>()?;

        Ok(Self { keys, templates })
    }

    pub fn get(&self, name: &str) -> Option<&PathTemplate> {
        self.templates.get(name)
    }

    /// Look up a template that the configuration must define.
    pub fn require(&self, name: &str) -> Result<&PathTemplate, CoreError> {
        self.get(name).ok_or_else(|| {
            CoreError::Configuration(format!("Path template \"{name}\" is not configured"))
        })
    }

    /// Every declared key plus the keys used by any template.
    pub fn all_keys(&self) -> BTreeMap<String, TemplateKey> {
        let mut keys = self.keys.clone();
        for template in self.templates.values() {
            for key in template.keys() {
                keys.entry(key.name.clone()).or_insert_with(|| key.clone());
            }
        }
        keys
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
