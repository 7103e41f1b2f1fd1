//! Structural field access over resource records
//!
//! Every resource kind exposes its fields through a static declaration table
//! instead of runtime reflection. This module flattens those tables into a
//! per-value field map (embedded records lifted into the outer namespace)
//! and a per-type case-fold map (lowercase name -> canonical name), the
//! latter cached process-wide.
//!
//! Flattening rules for embedded records:
//! 1. outer fields shadow equally-named embedded fields
//! 2. a name lifted from two or more embedded records is ambiguous and is
//!    dropped, unless the outer record declares it directly
//! 3. a nil embedded record contributes no lifted fields, but its own name
//!    stays accessible and yields null

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::resource::Value;

/// Errors from field lookup and path traversal.
#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    /// The path is well formed but hit a null value. Recoverable: the value
    /// may materialize once more of the graph has rendered.
    #[error("field is unresolvable")]
    Unresolvable,

    #[error("{type_name} has no field named \"{field}\", must be one of: {valid:?}")]
    MissingField {
        type_name: String,
        field: String,
        valid: Vec<String>,
    },

    #[error("cannot access fields of non-record value of kind {0}")]
    NotARecord(String),
}

impl FieldError {
    fn missing(type_name: &str, field: &str, mut valid: Vec<String>) -> Self {
        valid.sort();
        FieldError::MissingField {
            type_name: type_name.to_string(),
            field: field.to_string(),
            valid,
        }
    }
}

// ============================================================================
// RECORD CONTRACT
// ============================================================================

/// Declared metadata for one field of a record.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    /// For embedded sub-records: the schema of the embedded type.
    pub embedded: Option<fn() -> &'static [FieldDef]>,
    pub required: bool,
    /// Mutually-exclusive group tag; at most one field per group may be set.
    pub exclusive: Option<&'static str>,
    /// Enumerated valid values; empty means unconstrained.
    pub valid: &'static [&'static str],
}

impl FieldDef {
    pub const fn scalar(name: &'static str) -> Self {
        Self {
            name,
            embedded: None,
            required: false,
            exclusive: None,
            valid: &[],
        }
    }

    pub const fn embedded(name: &'static str, schema: fn() -> &'static [FieldDef]) -> Self {
        Self {
            name,
            embedded: Some(schema),
            required: false,
            exclusive: None,
            valid: &[],
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn exclusive(mut self, group: &'static str) -> Self {
        self.exclusive = Some(group);
        self
    }

    pub const fn valid(mut self, values: &'static [&'static str]) -> Self {
        self.valid = values;
        self
    }
}

/// A structured value with introspectable named fields.
///
/// Implementations keep the declaration table static; `raw_field` answers
/// for canonical names only. Case folding and flattening live here, not in
/// the records.
pub trait Record: fmt::Debug + Send + Sync {
    /// Stable type name, also the field-map cache key. For registered
    /// resource kinds this is the kind tag ("file.content", "module", ...).
    fn type_name(&self) -> &'static str;

    fn field_defs(&self) -> &'static [FieldDef];

    /// Value of a declared field by canonical name.
    fn raw_field(&self, name: &str) -> Option<Value>;

    fn as_any(&self) -> &dyn Any;
}

// ============================================================================
// VALUE-LEVEL FIELD MAP
// ============================================================================

/// Flattened map of field name -> value for one record instance, with
/// embedded records lifted per the shadowing and ambiguity rules.
pub fn field_map(record: &dyn Record) -> IndexMap<&'static str, Value> {
    let mut lifted_counts: FxHashMap<&'static str, usize> = FxHashMap::default();
    let mut declared_plain: FxHashSet<&'static str> = FxHashSet::default();
    let mut out: IndexMap<&'static str, Value> = IndexMap::new();

    for def in record.field_defs() {
        let val = record.raw_field(def.name).unwrap_or(Value::Null);
        if def.embedded.is_some() {
            if let Value::Record(sub) = &val {
                for (name, lifted) in field_map(sub.as_ref()) {
                    *lifted_counts.entry(name).or_insert(0) += 1;
                    out.entry(name).or_insert(lifted);
                }
            }
        } else {
            declared_plain.insert(def.name);
        }
        // the record's own names always win over lifted ones
        out.insert(def.name, val);
    }

    for (name, count) in lifted_counts {
        if count > 1 && !declared_plain.contains(name) {
            out.shift_remove(name);
        }
    }
    out
}

/// True if the record (after flattening) exposes `name`, case-insensitively.
pub fn has_field(record: &dyn Record, name: &str) -> bool {
    lookup_canonical_field_name(record, name).is_ok()
}

/// Canonical names declared directly on the record, in declaration order.
pub fn list_fields(value: &Value) -> Result<Vec<&'static str>, FieldError> {
    match value {
        Value::Record(r) => Ok(r.field_defs().iter().map(|d| d.name).collect()),
        other => Err(FieldError::NotARecord(other.kind_name().to_string())),
    }
}

// ============================================================================
// TYPE-LEVEL CASE-FOLD CACHE
// ============================================================================

type FoldMap = FxHashMap<String, &'static str>;

/// type name -> immutable lowercase->canonical snapshot. Populated on first
/// access, never evicted. Readers share the snapshot; a key's value never
/// changes once present.
static FOLD_CACHE: Lazy<RwLock<FxHashMap<&'static str, Arc<FoldMap>>>> =
    Lazy::new(|| RwLock::new(FxHashMap::default()));

fn add_defs_to_fold_map(defs: &[FieldDef], map: &mut FoldMap, conflicts: &mut FxHashSet<String>) {
    for def in defs {
        let lower = def.name.to_ascii_lowercase();
        if let Some(schema) = def.embedded {
            map.entry(lower).or_insert(def.name);
            add_defs_to_fold_map(schema(), map, conflicts);
        } else if map.contains_key(&lower) {
            conflicts.insert(lower);
        } else if !conflicts.contains(&lower) {
            map.insert(lower, def.name);
        }
    }
}

/// Cached lowercase -> canonical mapping for the record's type.
pub fn fold_map(record: &dyn Record) -> Arc<FoldMap> {
    let key = record.type_name();
    if let Some(cached) = FOLD_CACHE.read().get(key) {
        return Arc::clone(cached);
    }

    let mut map = FoldMap::default();
    let mut conflicts = FxHashSet::default();
    add_defs_to_fold_map(record.field_defs(), &mut map, &mut conflicts);
    let map = Arc::new(map);

    let mut cache = FOLD_CACHE.write();
    // another thread may have published first; keep its snapshot
    Arc::clone(cache.entry(key).or_insert(map))
}

/// Resolve an arbitrarily-cased field name to its canonical casing.
pub fn lookup_canonical_field_name(record: &dyn Record, name: &str) -> Result<&'static str, FieldError> {
    let folded = fold_map(record);
    let lower = name.to_ascii_lowercase();
    match folded.get(&lower) {
        Some(canonical) => Ok(canonical),
        None => Err(FieldError::missing(
            record.type_name(),
            name,
            folded.keys().cloned().collect(),
        )),
    }
}

// ============================================================================
// PATH TRAVERSAL
// ============================================================================

/// Left-fold field access: apply each term to the value produced by the
/// previous one. Terms match case-insensitively against the flattened map.
///
/// A null value anywhere along the path yields [`FieldError::Unresolvable`];
/// an unknown term yields [`FieldError::MissingField`] with the valid names.
pub fn eval_terms(value: &Value, terms: &[&str]) -> Result<Value, FieldError> {
    let mut current = value.clone();
    for term in terms {
        let record = match &current {
            Value::Record(r) => Arc::clone(r),
            Value::Null => return Err(FieldError::Unresolvable),
            other => return Err(FieldError::NotARecord(other.kind_name().to_string())),
        };

        let map = field_map(record.as_ref());
        let lower = term.to_ascii_lowercase();
        let hit = map
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&lower))
            .map(|(_, v)| v.clone());

        match hit {
            Some(Value::Null) => return Err(FieldError::Unresolvable),
            Some(next) => current = next,
            None => {
                let valid = map.keys().map(|k| k.to_ascii_lowercase()).collect();
                return Err(FieldError::missing(record.type_name(), term, valid));
            }
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // Fixture records exercising the flattening rules.

    #[derive(Debug)]
    struct Wheels {
        count: i64,
    }

    static WHEELS_FIELDS: [FieldDef; 2] = [FieldDef::scalar("count"), FieldDef::scalar("spare")];

    impl Record for Wheels {
        fn type_name(&self) -> &'static str {
            "test.wheels"
        }
        fn field_defs(&self) -> &'static [FieldDef] {
            &WHEELS_FIELDS
        }
        fn raw_field(&self, name: &str) -> Option<Value> {
            match name {
                "count" => Some(Value::Int(self.count)),
                "spare" => Some(Value::Null),
                _ => None,
            }
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct Engine {
        count: i64,
        power: i64,
    }

    static ENGINE_FIELDS: [FieldDef; 2] = [FieldDef::scalar("count"), FieldDef::scalar("power")];

    impl Record for Engine {
        fn type_name(&self) -> &'static str {
            "test.engine"
        }
        fn field_defs(&self) -> &'static [FieldDef] {
            &ENGINE_FIELDS
        }
        fn raw_field(&self, name: &str) -> Option<Value> {
            match name {
                "count" => Some(Value::Int(self.count)),
                "power" => Some(Value::Int(self.power)),
                _ => None,
            }
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Two embedded records sharing "count"; outer does not declare it.
    #[derive(Debug)]
    struct Car {
        name: &'static str,
        wheels: Option<Arc<Wheels>>,
        engine: Option<Arc<Engine>>,
    }

    static CAR_FIELDS: [FieldDef; 3] = [
        FieldDef::scalar("name"),
        FieldDef::embedded("wheels", || &WHEELS_FIELDS),
        FieldDef::embedded("engine", || &ENGINE_FIELDS),
    ];

    impl Record for Car {
        fn type_name(&self) -> &'static str {
            "test.car"
        }
        fn field_defs(&self) -> &'static [FieldDef] {
            &CAR_FIELDS
        }
        fn raw_field(&self, name: &str) -> Option<Value> {
            match name {
                "name" => Some(Value::from(self.name)),
                "wheels" => Some(match &self.wheels {
                    Some(w) => Value::Record(Arc::clone(w) as Arc<dyn Record>),
                    None => Value::Null,
                }),
                "engine" => Some(match &self.engine {
                    Some(e) => Value::Record(Arc::clone(e) as Arc<dyn Record>),
                    None => Value::Null,
                }),
                _ => None,
            }
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Same shape, but the outer record declares "count" itself.
    #[derive(Debug)]
    struct CountedCar {
        count: i64,
        wheels: Arc<Wheels>,
        engine: Arc<Engine>,
    }

    static COUNTED_CAR_FIELDS: [FieldDef; 3] = [
        FieldDef::scalar("count"),
        FieldDef::embedded("wheels", || &WHEELS_FIELDS),
        FieldDef::embedded("engine", || &ENGINE_FIELDS),
    ];

    impl Record for CountedCar {
        fn type_name(&self) -> &'static str {
            "test.counted_car"
        }
        fn field_defs(&self) -> &'static [FieldDef] {
            &COUNTED_CAR_FIELDS
        }
        fn raw_field(&self, name: &str) -> Option<Value> {
            match name {
                "count" => Some(Value::Int(self.count)),
                "wheels" => Some(Value::Record(Arc::clone(&self.wheels) as Arc<dyn Record>)),
                "engine" => Some(Value::Record(Arc::clone(&self.engine) as Arc<dyn Record>)),
                _ => None,
            }
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn car() -> Car {
        Car {
            name: "gt",
            wheels: Some(Arc::new(Wheels { count: 4 })),
            engine: Some(Arc::new(Engine { count: 1, power: 400 })),
        }
    }

    #[test]
    fn field_map_lifts_embedded_fields() {
        let map = field_map(&car());
        assert_eq!(map.get("power"), Some(&Value::Int(400)));
        assert_eq!(map.get("name"), Some(&Value::from("gt")));
    }

    #[test]
    fn ambiguous_embedded_name_is_removed() {
        let map = field_map(&car());
        // "count" comes from both wheels and engine and the outer record
        // does not declare it
        assert!(map.get("count").is_none());
    }

    #[test]
    fn outer_declaration_restores_ambiguous_name() {
        let c = CountedCar {
            count: 7,
            wheels: Arc::new(Wheels { count: 4 }),
            engine: Arc::new(Engine { count: 1, power: 400 }),
        };
        let map = field_map(&c);
        assert_eq!(map.get("count"), Some(&Value::Int(7)));
    }

    #[test]
    fn nil_embedded_contributes_nothing_but_stays_accessible() {
        let c = Car {
            name: "shell",
            wheels: None,
            engine: None,
        };
        let map = field_map(&c);
        assert_eq!(map.get("wheels"), Some(&Value::Null));
        assert!(map.get("power").is_none());
    }

    #[test]
    fn field_map_is_deterministic() {
        let c = car();
        let a = field_map(&c);
        let b = field_map(&c);
        assert_eq!(a, b);
    }

    #[test]
    fn eval_terms_walks_nested_records() {
        let c = car();
        let v = eval_terms(&Value::Record(Arc::new(c)), &["engine", "power"]).unwrap();
        assert_eq!(v, Value::Int(400));
    }

    #[test]
    fn eval_terms_null_is_unresolvable() {
        let c = Car {
            name: "shell",
            wheels: None,
            engine: None,
        };
        let err = eval_terms(&Value::Record(Arc::new(c)), &["engine", "power"]).unwrap_err();
        assert_eq!(err, FieldError::Unresolvable);
    }

    #[test]
    fn eval_terms_missing_field_lists_valid_names() {
        let c = car();
        let err = eval_terms(&Value::Record(Arc::new(c)), &["gearbox"]).unwrap_err();
        match err {
            FieldError::MissingField { field, valid, .. } => {
                assert_eq!(field, "gearbox");
                assert!(valid.contains(&"name".to_string()));
                assert!(valid.contains(&"power".to_string()));
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn eval_terms_is_case_insensitive() {
        let c = car();
        let v = eval_terms(&Value::Record(Arc::new(c)), &["ENGINE", "Power"]).unwrap();
        assert_eq!(v, Value::Int(400));
    }

    #[test]
    fn eval_terms_on_scalar_is_not_a_record() {
        let err = eval_terms(&Value::Int(1), &["x"]).unwrap_err();
        assert!(matches!(err, FieldError::NotARecord(kind) if kind == "int"));
    }

    #[test]
    fn lookup_canonical_folds_case() {
        let c = car();
        assert_eq!(lookup_canonical_field_name(&c, "NAME").unwrap(), "name");
        assert_eq!(lookup_canonical_field_name(&c, "Wheels").unwrap(), "wheels");
    }

    #[test]
    fn lookup_canonical_missing_lists_valid() {
        let c = car();
        let err = lookup_canonical_field_name(&c, "nope").unwrap_err();
        match err {
            FieldError::MissingField { valid, .. } => {
                assert!(valid.contains(&"name".to_string()));
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn fold_map_returns_shared_snapshot() {
        let c = car();
        let a = fold_map(&c);
        let b = fold_map(&c);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn fold_map_concurrent_access_is_consistent() {
        use std::thread;

        let maps: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| fold_map(&car()))
            })
            .map(|h| h.join().unwrap())
            .collect();
        for m in &maps[1..] {
            assert!(Arc::ptr_eq(&maps[0], m));
        }
    }

    #[test]
    fn has_field_and_list_fields() {
        let c = car();
        assert!(has_field(&c, "engine"));
        assert!(!has_field(&c, "gearbox"));

        let names = list_fields(&Value::Record(Arc::new(car()))).unwrap();
        assert_eq!(names, vec!["name", "wheels", "engine"]);

        let err = list_fields(&Value::Int(3)).unwrap_err();
        assert!(matches!(err, FieldError::NotARecord(_)));
    }
}
