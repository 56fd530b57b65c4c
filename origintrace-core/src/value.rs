//! Dynamic values manipulated by instrumented programs.
//!
//! Mirrors the value semantics of the instrumented language closely enough
//! that tracked execution produces exactly the values an uninstrumented run
//! would: truthiness, numeric and string coercion, and loose/strict equality.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an object, stable for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Whether an object was created as a plain object or an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Plain,
    Array,
}

/// Object storage. Properties keep insertion order.
#[derive(Debug)]
pub struct JsObject {
    id: ObjectId,
    kind: ObjectKind,
    properties: Vec<(String, Value)>,
}

impl JsObject {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Set a property, keeping the original position of an existing key.
    ///
    /// Writing an array index at or past the current length grows `length`.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let grows_to = match (self.kind, array_index(&key)) {
            (ObjectKind::Array, Some(index)) => {
                let len = match self.get("length") {
                    Some(Value::Number(n)) => *n,
                    _ => 0.0,
                };
                let needed = f64::from(index) + 1.0;
                (needed > len).then_some(needed)
            }
            _ => None,
        };
        self.put(key, value);
        if let Some(len) = grows_to {
            self.put("length".to_string(), Value::Number(len));
        }
    }

    fn put(&mut self, key: String, value: Value) {
        match self.properties.iter_mut().find(|(name, _)| *name == key) {
            Some((_, slot)) => *slot = value,
            None => self.properties.push((key, value)),
        }
    }

    /// Enumerable keys in the order `for...in` visits them: integer keys
    /// ascending first, then string keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        let mut indices: Vec<(u32, &String)> = self
            .properties
            .iter()
            .filter(|(name, _)| !(self.kind == ObjectKind::Array && name == "length"))
            .filter_map(|(name, _)| array_index(name).map(|i| (i, name)))
            .collect();
        indices.sort_by_key(|(i, _)| *i);

        let mut keys: Vec<String> = indices.into_iter().map(|(_, name)| name.clone()).collect();
        keys.extend(
            self.properties
                .iter()
                .map(|(name, _)| name)
                .filter(|name| array_index(name).is_none())
                .filter(|name| !(self.kind == ObjectKind::Array && *name == "length"))
                .cloned(),
        );
        keys
    }
}

fn array_index(key: &str) -> Option<u32> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    key.parse::<u32>().ok().filter(|i| *i != u32::MAX)
}

/// Shared handle to an object. Cloning the handle never clones the object.
#[derive(Debug, Clone)]
pub struct ObjectRef(Rc<RefCell<JsObject>>);

impl ObjectRef {
    pub fn new(kind: ObjectKind) -> Self {
        let id = ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed));
        Self(Rc::new(RefCell::new(JsObject {
            id,
            kind,
            properties: Vec::new(),
        })))
    }

    pub fn id(&self) -> ObjectId {
        self.0.borrow().id
    }

    pub fn kind(&self) -> ObjectKind {
        self.0.borrow().kind
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.0.borrow_mut().set(key, value);
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys()
    }

    /// A weak handle that does not keep the object alive.
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Weak counterpart of [`ObjectRef`].
#[derive(Debug, Clone)]
pub struct WeakObjectRef(Weak<RefCell<JsObject>>);

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// A raw (untracked) value.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(ObjectRef),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => !(n.is_nan() || *n == 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Object(obj) => match obj.kind() {
                // An array converts through its string form ("" -> 0, "7" -> 7).
                ObjectKind::Array => string_to_number(&self.to_display_string()),
                ObjectKind::Plain => f64::NAN,
            },
        }
    }

    /// The string conversion the language applies in concatenation and
    /// `String(value)`.
    pub fn to_display_string(&self) -> String {
        self.display_with(&mut Vec::new())
    }

    /// `visiting` holds the arrays currently being joined; an array that
    /// contains itself joins as "" at the inner occurrence.
    fn display_with(&self, visiting: &mut Vec<ObjectId>) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.clone(),
            Value::Object(obj) => match obj.kind() {
                ObjectKind::Plain => "[object Object]".to_string(),
                ObjectKind::Array => {
                    let id = obj.id();
                    if visiting.contains(&id) {
                        return String::new();
                    }
                    visiting.push(id);
                    let len = obj
                        .get("length")
                        .map(|v| v.to_number())
                        .unwrap_or(0.0)
                        .max(0.0) as usize;
                    let joined = (0..len)
                        .map(|i| match obj.get(&i.to_string()) {
                            Some(v) if !v.is_nullish() => v.display_with(visiting),
                            _ => String::new(),
                        })
                        .collect::<Vec<_>>()
                        .join(",");
                    visiting.pop();
                    joined
                }
            },
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                Value::Number(self.to_number()).loose_equals(&Value::Number(other.to_number()))
            }
            (Value::Object(_), _) | (_, Value::Object(_)) => {
                let (obj, prim) = if matches!(self, Value::Object(_)) {
                    (self, other)
                } else {
                    (other, self)
                };
                Value::String(obj.to_display_string()).loose_equals(prim)
            }
            (Value::String(a), Value::String(b)) => a == b,
            _ => self.to_number() == other.to_number(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let radix = [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)]
        .into_iter()
        .find_map(|(prefix, radix)| trimmed.strip_prefix(prefix).map(|digits| (digits, radix)));
    let parsed = if let Some((digits, radix)) = radix {
        // Signs are not allowed after a radix prefix.
        if digits.starts_with(['+', '-']) {
            None
        } else {
            u64::from_str_radix(digits, radix).ok().map(|n| n as f64)
        }
    } else {
        match trimmed {
            "Infinity" | "+Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            // Rust accepts "inf"/"nan" spellings the language does not.
            t if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => None,
            t => t.parse::<f64>().ok(),
        }
    };
    parsed.unwrap_or(f64::NAN)
}

/// Format a number the way the language's `Number.prototype.toString` does
/// for the common cases.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if (1e-6..1e21).contains(&abs) {
        return format!("{n}");
    }
    let formatted = format!("{n:e}");
    match formatted.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
        _ => formatted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::string("").truthy());
        assert!(Value::string("hi").truthy());
        assert!(!Value::Number(0.0).truthy());
        assert!(!Value::Number(f64::NAN).truthy());
        assert!(Value::Number(-3.0).truthy());
        assert!(!Value::Undefined.truthy());
        assert!(!Value::Null.truthy());
        assert!(Value::Object(ObjectRef::new(ObjectKind::Plain)).truthy());
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(123456.0), "123456");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(Value::string("").to_number(), 0.0);
        assert_eq!(Value::string("  42 ").to_number(), 42.0);
        assert_eq!(Value::string("0x10").to_number(), 16.0);
        assert!(Value::string("abc").to_number().is_nan());
        assert!(Value::string("inf").to_number().is_nan());
        assert_eq!(Value::string("-Infinity").to_number(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_loose_and_strict_equality() {
        assert!(Value::string("a").loose_equals(&Value::string("a")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::string("1").loose_equals(&Value::Number(1.0)));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        assert!(!Value::Number(0.0).loose_equals(&Value::Null));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));
    }

    #[test]
    fn test_object_identity_equality() {
        let a = ObjectRef::new(ObjectKind::Plain);
        let b = ObjectRef::new(ObjectKind::Plain);
        assert!(Value::Object(a.clone()).strict_equals(&Value::Object(a.clone())));
        assert!(!Value::Object(a).loose_equals(&Value::Object(b)));
    }

    #[test]
    fn test_keys_order() {
        let obj = ObjectRef::new(ObjectKind::Plain);
        obj.set("b", Value::Null);
        obj.set("2", Value::Null);
        obj.set("a", Value::Null);
        obj.set("1", Value::Null);
        assert_eq!(obj.keys(), vec!["1", "2", "b", "a"]);
    }

    #[test]
    fn test_array_display_string() {
        let arr = ObjectRef::new(ObjectKind::Array);
        arr.set("0", Value::Number(1.0));
        arr.set("1", Value::Null);
        arr.set("2", Value::string("x"));
        arr.set("length", Value::Number(3.0));
        assert_eq!(Value::Object(arr.clone()).to_display_string(), "1,,x");
        assert_eq!(arr.keys(), vec!["0", "1", "2"]);
    }

    #[test]
    fn test_cyclic_array_joins_as_empty() {
        let arr = ObjectRef::new(ObjectKind::Array);
        arr.set("0", Value::string("a"));
        arr.set("1", Value::Object(arr.clone()));
        assert_eq!(Value::Object(arr.clone()).to_display_string(), "a,");

        let only_self = ObjectRef::new(ObjectKind::Array);
        only_self.set("0", Value::Object(only_self.clone()));
        assert_eq!(Value::Object(only_self).to_display_string(), "");

        let outer = ObjectRef::new(ObjectKind::Array);
        outer.set("0", Value::Object(arr.clone()));
        outer.set("1", Value::Object(arr.clone()));
        assert_eq!(Value::Object(outer).to_display_string(), "a,,a,");
        assert!(Value::Object(arr).to_number().is_nan());
    }

    #[test]
    fn test_index_write_grows_length() {
        let arr = ObjectRef::new(ObjectKind::Array);
        arr.set("2", Value::string("c"));
        assert_eq!(arr.get("length").map(|v| v.to_number()), Some(3.0));
        arr.set("0", Value::string("a"));
        assert_eq!(arr.get("length").map(|v| v.to_number()), Some(3.0));
        assert_eq!(Value::Object(arr).to_display_string(), "a,,c");

        let plain = ObjectRef::new(ObjectKind::Plain);
        plain.set("0", Value::Null);
        assert!(plain.get("length").is_none());
    }

    #[test]
    fn test_binary_and_octal_strings() {
        assert_eq!(Value::string("0b101").to_number(), 5.0);
        assert_eq!(Value::string(" 0B11 ").to_number(), 3.0);
        assert_eq!(Value::string("0o17").to_number(), 15.0);
        assert_eq!(Value::string("0O7").to_number(), 7.0);
        assert!(Value::string("0b2").to_number().is_nan());
        assert!(Value::string("0o").to_number().is_nan());
        assert!(Value::string("0x-1").to_number().is_nan());
    }

    #[test]
    fn test_weak_handle_does_not_keep_alive() {
        let obj = ObjectRef::new(ObjectKind::Plain);
        let weak = obj.downgrade();
        assert!(weak.is_alive());
        drop(obj);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }
}
