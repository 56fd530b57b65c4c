//! Operation dispatch layer.
//!
//! Instrumented code routes every intercepted construct through a
//! [`Tracer`]. The tracer promotes untracked arguments to `UnknownOperation`
//! leaves, executes the operation exactly as the uninstrumented language
//! would, and appends a log entry describing how the result was produced.
//!
//! Operations that cannot be expressed as "arguments in, value out" have
//! dedicated entry points: [`Tracer::logical`] takes the right operand as a
//! closure so it is only evaluated when the language would evaluate it,
//! [`Tracer::member_access`] hands the accessed object back to its caller
//! explicitly, and [`Tracer::for_in_keys`] yields one tracked key per
//! enumerable property.

use tracing::debug;

use crate::error::{DispatchError, Result};
use crate::oplog::{ExtraArgs, NewEntry, OffsetMap, OperationKind, OperationLog, TrackingRef};
use crate::property_table::PropertyTable;
use crate::value::{ObjectKind, ObjectRef, Value};

/// A raw value paired with the entry that produced it.
#[derive(Debug, Clone)]
pub struct Tracked {
    pub value: Value,
    pub tracking: Option<TrackingRef>,
}

impl Tracked {
    pub fn new(value: Value, tracking: TrackingRef) -> Self {
        Self {
            value,
            tracking: Some(tracking),
        }
    }

    /// A value with no known provenance.
    pub fn untracked(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            tracking: None,
        }
    }

    pub fn undefined() -> Self {
        Self::untracked(Value::Undefined)
    }
}

/// Result of a member read together with the object it was read from.
#[derive(Debug, Clone)]
pub struct MemberRead {
    pub value: Tracked,
    pub object: Tracked,
}

/// Records tracked operations into an [`OperationLog`].
pub struct Tracer {
    log: OperationLog,
    properties: PropertyTable,
}

impl Tracer {
    pub fn new() -> Self {
        Self::with_parts(OperationLog::new(), PropertyTable::new())
    }

    pub fn with_parts(log: OperationLog, properties: PropertyTable) -> Self {
        Self { log, properties }
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn properties(&self) -> &PropertyTable {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyTable {
        &mut self.properties
    }

    /// Append an entry directly. Used by the DOM interception layer.
    pub fn record(&mut self, entry: NewEntry) -> Result<TrackingRef> {
        self.log.append(entry)
    }

    /// Return the argument's reference, synthesizing an `UnknownOperation`
    /// leaf for untracked values. Every call on an untracked value creates a
    /// fresh leaf.
    pub fn ensure_tracked(&mut self, arg: &Tracked) -> Result<TrackingRef> {
        match arg.tracking {
            Some(tracking) => Ok(tracking),
            None => {
                let tracking = self
                    .log
                    .append(NewEntry::new(OperationKind::UnknownOperation, &arg.value))?;
                debug!(index = tracking.0, "promoted untracked value to unknown leaf");
                Ok(tracking)
            }
        }
    }

    pub fn string_literal(&mut self, s: &str) -> Result<Tracked> {
        self.dispatch(
            OperationKind::StringLiteral,
            vec![Tracked::untracked(s)],
            ExtraArgs::default(),
        )
    }

    pub fn number_literal(&mut self, n: f64) -> Result<Tracked> {
        self.dispatch(
            OperationKind::NumericLiteral,
            vec![Tracked::untracked(n)],
            ExtraArgs::default(),
        )
    }

    /// Run one operation and record its result.
    pub fn dispatch(
        &mut self,
        kind: OperationKind,
        args: Vec<Tracked>,
        extra: ExtraArgs,
    ) -> Result<Tracked> {
        if kind.is_literal() {
            let [arg] = expect_args::<1>(kind, args)?;
            let tracking = self.log.append(NewEntry::new(kind, &arg.value).extra(extra))?;
            return Ok(Tracked::new(arg.value, tracking));
        }

        match kind {
            OperationKind::Add
            | OperationKind::Subtract
            | OperationKind::Multiply
            | OperationKind::Divide
            | OperationKind::Remainder
            | OperationKind::LooseEquals
            | OperationKind::LooseNotEquals
            | OperationKind::StrictEquals
            | OperationKind::StrictNotEquals => {
                let [left, right] = expect_args::<2>(kind, args)?;
                self.binary(kind, left, right, extra)
            }
            OperationKind::Concatenate => self.concatenate(args, extra),
            OperationKind::Not | OperationKind::TypeOf | OperationKind::ToString => {
                let [arg] = expect_args::<1>(kind, args)?;
                self.unary(kind, arg, extra)
            }
            OperationKind::ObjectLiteral => self.object_literal(args, extra),
            OperationKind::ArrayLiteral => self.array_literal(args, extra),
            OperationKind::AssignProperty => {
                let [object, key, value] = expect_args::<3>(kind, args)?;
                self.assign_property(object, key, value, extra)
            }
            OperationKind::MemberAccess => {
                let [object, key] = expect_args::<2>(kind, args)?;
                Ok(self.member_access(object, key, extra)?.value)
            }
            OperationKind::StringLiteral
            | OperationKind::NumericLiteral
            | OperationKind::BooleanLiteral
            | OperationKind::NullLiteral
            | OperationKind::UndefinedLiteral
            | OperationKind::UnknownOperation
            | OperationKind::LogicalAnd
            | OperationKind::LogicalOr
            | OperationKind::ForInKey
            | OperationKind::CreateElement
            | OperationKind::CreateTextNode
            | OperationKind::AssignInnerHtml
            | OperationKind::AssignOuterHtml
            | OperationKind::InsertAdjacentHtml
            | OperationKind::AttributeAssignment
            | OperationKind::AssignTextContent
            | OperationKind::InitialPageHtml
            | OperationKind::HtmlFileContent => Err(DispatchError::NotDispatchable { kind }.into()),
        }
    }

    fn binary(
        &mut self,
        kind: OperationKind,
        left: Tracked,
        right: Tracked,
        extra: ExtraArgs,
    ) -> Result<Tracked> {
        let inputs = vec![self.ensure_tracked(&left)?, self.ensure_tracked(&right)?];
        let (l, r) = (&left.value, &right.value);

        let mut offset_map = OffsetMap::None;
        let value = match kind {
            OperationKind::Add => {
                if is_string_like(l) || is_string_like(r) {
                    let (ls, rs) = (l.to_display_string(), r.to_display_string());
                    offset_map = OffsetMap::Segments {
                        lengths: vec![ls.chars().count(), rs.chars().count()],
                    };
                    Value::String(ls + &rs)
                } else {
                    Value::Number(l.to_number() + r.to_number())
                }
            }
            OperationKind::Subtract => Value::Number(l.to_number() - r.to_number()),
            OperationKind::Multiply => Value::Number(l.to_number() * r.to_number()),
            OperationKind::Divide => Value::Number(l.to_number() / r.to_number()),
            OperationKind::Remainder => Value::Number(l.to_number() % r.to_number()),
            OperationKind::LooseEquals => Value::Bool(l.loose_equals(r)),
            OperationKind::LooseNotEquals => Value::Bool(!l.loose_equals(r)),
            OperationKind::StrictEquals => Value::Bool(l.strict_equals(r)),
            OperationKind::StrictNotEquals => Value::Bool(!l.strict_equals(r)),
            _ => return Err(DispatchError::NotDispatchable { kind }.into()),
        };

        let tracking = self.log.append(
            NewEntry::new(kind, &value)
                .inputs(inputs)
                .extra(extra)
                .offset_map(offset_map),
        )?;
        Ok(Tracked::new(value, tracking))
    }

    fn concatenate(&mut self, args: Vec<Tracked>, extra: ExtraArgs) -> Result<Tracked> {
        let mut inputs = Vec::with_capacity(args.len());
        let mut lengths = Vec::with_capacity(args.len());
        let mut joined = String::new();
        for arg in &args {
            inputs.push(self.ensure_tracked(arg)?);
            let part = arg.value.to_display_string();
            lengths.push(part.chars().count());
            joined.push_str(&part);
        }
        let value = Value::String(joined);
        let tracking = self.log.append(
            NewEntry::new(OperationKind::Concatenate, &value)
                .inputs(inputs)
                .extra(extra)
                .offset_map(OffsetMap::Segments { lengths }),
        )?;
        Ok(Tracked::new(value, tracking))
    }

    fn unary(&mut self, kind: OperationKind, arg: Tracked, extra: ExtraArgs) -> Result<Tracked> {
        let input = self.ensure_tracked(&arg)?;
        let (value, offset_map) = match kind {
            OperationKind::Not => (Value::Bool(!arg.value.truthy()), OffsetMap::None),
            OperationKind::TypeOf => (Value::string(arg.value.type_of()), OffsetMap::None),
            _ => (
                Value::String(arg.value.to_display_string()),
                OffsetMap::Identity { input: 0 },
            ),
        };
        let tracking = self.log.append(
            NewEntry::new(kind, &value)
                .inputs(vec![input])
                .extra(extra)
                .offset_map(offset_map),
        )?;
        Ok(Tracked::new(value, tracking))
    }

    /// `args` alternate key, value, key, value.
    fn object_literal(&mut self, args: Vec<Tracked>, extra: ExtraArgs) -> Result<Tracked> {
        if args.len() % 2 != 0 {
            return Err(DispatchError::ArityMismatch {
                kind: OperationKind::ObjectLiteral,
                expected: args.len() + 1,
                found: args.len(),
            }
            .into());
        }

        let object = ObjectRef::new(ObjectKind::Plain);
        let mut inputs = Vec::with_capacity(args.len());
        for pair in args.chunks(2) {
            let (key, value) = (&pair[0], &pair[1]);
            let key_ref = self.ensure_tracked(key)?;
            let value_ref = self.ensure_tracked(value)?;
            let name = key.value.to_display_string();
            object.set(name.clone(), value.value.clone());
            self.properties.record_key_tracking(&object, &name, key_ref);
            self.properties
                .record_property_tracking(&object, &name, value_ref);
            inputs.push(key_ref);
            inputs.push(value_ref);
        }

        let value = Value::Object(object);
        let tracking = self.log.append(
            NewEntry::new(OperationKind::ObjectLiteral, &value)
                .inputs(inputs)
                .extra(extra),
        )?;
        Ok(Tracked::new(value, tracking))
    }

    fn array_literal(&mut self, args: Vec<Tracked>, extra: ExtraArgs) -> Result<Tracked> {
        let array = ObjectRef::new(ObjectKind::Array);
        let mut inputs = Vec::with_capacity(args.len());
        for (i, element) in args.iter().enumerate() {
            let element_ref = self.ensure_tracked(element)?;
            let key = i.to_string();
            array.set(key.clone(), element.value.clone());
            self.properties
                .record_property_tracking(&array, &key, element_ref);
            inputs.push(element_ref);
        }
        array.set("length", Value::Number(args.len() as f64));

        let value = Value::Object(array);
        let tracking = self.log.append(
            NewEntry::new(OperationKind::ArrayLiteral, &value)
                .inputs(inputs)
                .extra(extra),
        )?;
        Ok(Tracked::new(value, tracking))
    }

    /// `object[key] = value`. Evaluates to the assigned value.
    pub fn assign_property(
        &mut self,
        object: Tracked,
        key: Tracked,
        value: Tracked,
        extra: ExtraArgs,
    ) -> Result<Tracked> {
        let target = match &object.value {
            Value::Object(target) => Some(target.clone()),
            v if v.is_nullish() => {
                return Err(DispatchError::TypeError {
                    message: format!(
                        "Cannot set properties of {} (setting '{}')",
                        v.to_display_string(),
                        key.value.to_display_string()
                    ),
                }
                .into());
            }
            // Writes to primitives are silently dropped.
            _ => None,
        };

        let name = key.value.to_display_string();
        let inputs = vec![
            self.ensure_tracked(&object)?,
            self.ensure_tracked(&key)?,
            self.ensure_tracked(&value)?,
        ];
        let key_ref = inputs[1];
        let tracking = self.log.append(
            NewEntry::new(OperationKind::AssignProperty, &value.value)
                .inputs(inputs)
                .extra(extra.with_detail("property", name.clone()))
                .offset_map(OffsetMap::Identity { input: 2 }),
        )?;

        if let Some(target) = target {
            target.set(name.clone(), value.value.clone());
            self.properties
                .record_property_tracking(&target, &name, tracking);
            self.properties.record_key_tracking(&target, &name, key_ref);
        }
        Ok(Tracked::new(value.value, tracking))
    }

    /// `object[key]`. Returns the read value and the object it came from,
    /// so a caller that needs the receiver (a method call) gets it directly.
    pub fn member_access(
        &mut self,
        object: Tracked,
        key: Tracked,
        extra: ExtraArgs,
    ) -> Result<MemberRead> {
        let name = key.value.to_display_string();
        let (value, value_tracking, offset_map) = match &object.value {
            Value::Object(target) => {
                let value = target.get(&name).unwrap_or(Value::Undefined);
                let tracking = self.properties.lookup_property_tracking(target, &name);
                (value, tracking, OffsetMap::Identity { input: 2 })
            }
            Value::String(s) => {
                if name == "length" {
                    (
                        Value::Number(s.chars().count() as f64),
                        None,
                        OffsetMap::None,
                    )
                } else if let Some(ch) = name
                    .parse::<usize>()
                    .ok()
                    .filter(|i| i.to_string() == name)
                    .and_then(|i| s.chars().nth(i).map(|c| (i, c)))
                {
                    (
                        Value::String(ch.1.to_string()),
                        object.tracking,
                        OffsetMap::Shifted {
                            input: 0,
                            shift: ch.0,
                        },
                    )
                } else {
                    (Value::Undefined, None, OffsetMap::None)
                }
            }
            v if v.is_nullish() => {
                return Err(DispatchError::TypeError {
                    message: format!(
                        "Cannot read properties of {} (reading '{}')",
                        v.to_display_string(),
                        name
                    ),
                }
                .into());
            }
            _ => (Value::Undefined, None, OffsetMap::None),
        };

        let object_ref = self.ensure_tracked(&object)?;
        let key_ref = self.ensure_tracked(&key)?;
        let mut inputs = vec![object_ref, key_ref];
        if let OffsetMap::Identity { .. } = offset_map {
            inputs.push(self.ensure_tracked(&Tracked {
                value: value.clone(),
                tracking: value_tracking,
            })?);
        }

        let tracking = self.log.append(
            NewEntry::new(OperationKind::MemberAccess, &value)
                .inputs(inputs)
                .extra(extra.with_detail("property", name))
                .offset_map(offset_map),
        )?;

        Ok(MemberRead {
            value: Tracked::new(value, tracking),
            object: Tracked {
                value: object.value,
                tracking: Some(object_ref),
            },
        })
    }

    /// `left && right()` / `left || right()`. `right` runs only when the
    /// language would evaluate it.
    pub fn logical<F>(
        &mut self,
        kind: OperationKind,
        left: Tracked,
        right: F,
        extra: ExtraArgs,
    ) -> Result<Tracked>
    where
        F: FnOnce(&mut Tracer) -> Result<Tracked>,
    {
        let short_circuits = match kind {
            OperationKind::LogicalAnd => !left.value.truthy(),
            OperationKind::LogicalOr => left.value.truthy(),
            _ => return Err(DispatchError::NotDispatchable { kind }.into()),
        };

        let left_ref = self.ensure_tracked(&left)?;
        let (value, inputs, chosen) = if short_circuits {
            (left.value, vec![left_ref], 0)
        } else {
            let right = right(self)?;
            let right_ref = self.ensure_tracked(&right)?;
            (right.value, vec![left_ref, right_ref], 1)
        };

        let tracking = self.log.append(
            NewEntry::new(kind, &value)
                .inputs(inputs)
                .extra(extra)
                .offset_map(OffsetMap::Identity { input: chosen }),
        )?;
        Ok(Tracked::new(value, tracking))
    }

    /// Keys visited by `for (key in object)`. Keys written by the program
    /// keep the provenance of the key expression that created them.
    pub fn for_in_keys(&mut self, object: Tracked) -> Result<Vec<Tracked>> {
        let keys: Vec<(String, Option<TrackingRef>)> = match &object.value {
            Value::Object(target) => target
                .keys()
                .into_iter()
                .map(|key| {
                    let key_ref = self.properties.lookup_key_tracking(target, &key);
                    (key, key_ref)
                })
                .collect(),
            Value::String(s) => (0..s.chars().count()).map(|i| (i.to_string(), None)).collect(),
            _ => Vec::new(),
        };
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let object_ref = self.ensure_tracked(&object)?;
        let mut tracked = Vec::with_capacity(keys.len());
        for (key, key_ref) in keys {
            let value = Value::String(key);
            let entry = match key_ref {
                Some(key_ref) => NewEntry::new(OperationKind::ForInKey, &value)
                    .inputs(vec![object_ref, key_ref])
                    .offset_map(OffsetMap::Identity { input: 1 }),
                None => NewEntry::new(OperationKind::ForInKey, &value).inputs(vec![object_ref]),
            };
            let tracking = self.log.append(entry)?;
            tracked.push(Tracked::new(value, tracking));
        }
        Ok(tracked)
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Objects convert to strings when added, so they behave like strings here.
fn is_string_like(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Object(_))
}

fn expect_args<const N: usize>(kind: OperationKind, args: Vec<Tracked>) -> Result<[Tracked; N]> {
    let found = args.len();
    args.try_into().map_err(|_| {
        DispatchError::ArityMismatch {
            kind,
            expected: N,
            found,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TraceError;

    #[test]
    fn test_untracked_argument_is_promoted() {
        let mut tracer = Tracer::new();
        let result = tracer
            .dispatch(
                OperationKind::Divide,
                vec![Tracked::untracked(1.0), Tracked::untracked(2.0)],
                ExtraArgs::default(),
            )
            .unwrap();
        assert!(matches!(result.value, Value::Number(n) if n == 0.5));

        let entry = tracer.log().get(result.tracking.unwrap()).unwrap();
        assert_eq!(entry.kind, OperationKind::Divide);
        for input in &entry.inputs {
            assert_eq!(
                tracer.log().get(*input).unwrap().kind,
                OperationKind::UnknownOperation
            );
        }
    }

    #[test]
    fn test_promotion_is_not_deduplicated() {
        let mut tracer = Tracer::new();
        let value = Tracked::untracked("same");
        let a = tracer.ensure_tracked(&value).unwrap();
        let b = tracer.ensure_tracked(&value).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_literal_has_no_inputs() {
        let mut tracer = Tracer::new();
        let hello = tracer.string_literal("Hello").unwrap();
        let entry = tracer.log().get(hello.tracking.unwrap()).unwrap();
        assert_eq!(entry.kind, OperationKind::StringLiteral);
        assert!(entry.inputs.is_empty());
        assert_eq!(tracer.log().len(), 1);
    }

    #[test]
    fn test_add_strings_uses_segments() {
        let mut tracer = Tracer::new();
        let ab = tracer.string_literal("ab").unwrap();
        let cd = tracer.string_literal("cd").unwrap();
        let result = tracer
            .dispatch(OperationKind::Add, vec![ab, cd], ExtraArgs::default())
            .unwrap();
        assert_eq!(result.value.as_str(), Some("abcd"));
        let entry = tracer.log().get(result.tracking.unwrap()).unwrap();
        assert_eq!(entry.offset_map.resolve(2), Some((1, 0)));
    }

    #[test]
    fn test_add_numbers_has_no_offset_map() {
        let mut tracer = Tracer::new();
        let one = tracer.number_literal(1.0).unwrap();
        let two = tracer.number_literal(2.0).unwrap();
        let result = tracer
            .dispatch(OperationKind::Add, vec![one, two], ExtraArgs::default())
            .unwrap();
        assert!(matches!(result.value, Value::Number(n) if n == 3.0));
        let entry = tracer.log().get(result.tracking.unwrap()).unwrap();
        assert_eq!(entry.offset_map, OffsetMap::None);
    }

    #[test]
    fn test_add_string_and_number() {
        let mut tracer = Tracer::new();
        let a = tracer.string_literal("a").unwrap();
        let five = tracer.number_literal(5.0).unwrap();
        let result = tracer
            .dispatch(OperationKind::Add, vec![a, five], ExtraArgs::default())
            .unwrap();
        assert_eq!(result.value.as_str(), Some("a5"));
    }

    #[test]
    fn test_not_dispatchable_kinds_are_fatal() {
        let mut tracer = Tracer::new();
        let err = tracer
            .dispatch(
                OperationKind::LogicalOr,
                vec![Tracked::untracked(""), Tracked::untracked("hi")],
                ExtraArgs::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TraceError::Dispatch(DispatchError::NotDispatchable { .. })
        ));
    }

    #[test]
    fn test_arity_mismatch() {
        let mut tracer = Tracer::new();
        let err = tracer
            .dispatch(
                OperationKind::Divide,
                vec![Tracked::untracked(1.0)],
                ExtraArgs::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TraceError::Dispatch(DispatchError::ArityMismatch {
                expected: 2,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_member_access_on_undefined_is_type_error() {
        let mut tracer = Tracer::new();
        let err = tracer
            .member_access(Tracked::undefined(), Tracked::untracked("hi"), ExtraArgs::default())
            .unwrap_err();
        assert!(matches!(
            err,
            TraceError::Dispatch(DispatchError::TypeError { .. })
        ));
    }

    #[test]
    fn test_member_access_returns_object() {
        let mut tracer = Tracer::new();
        let key = tracer.string_literal("hi").unwrap();
        let there = tracer.string_literal("there").unwrap();
        let obj = tracer
            .dispatch(
                OperationKind::ObjectLiteral,
                vec![key, there],
                ExtraArgs::default(),
            )
            .unwrap();
        let read = tracer
            .member_access(obj.clone(), Tracked::untracked("hi"), ExtraArgs::default())
            .unwrap();
        assert_eq!(read.value.value.as_str(), Some("there"));
        assert_eq!(read.object.tracking, obj.tracking);
    }

    #[test]
    fn test_string_index_read_is_shifted() {
        let mut tracer = Tracer::new();
        let s = tracer.string_literal("abc").unwrap();
        let read = tracer
            .member_access(s, Tracked::untracked("2"), ExtraArgs::default())
            .unwrap();
        assert_eq!(read.value.value.as_str(), Some("c"));
        let entry = tracer.log().get(read.value.tracking.unwrap()).unwrap();
        assert_eq!(entry.offset_map.resolve(0), Some((0, 2)));
    }

    #[test]
    fn test_assign_records_property_tracking() {
        let mut tracer = Tracer::new();
        let obj = tracer
            .dispatch(OperationKind::ObjectLiteral, vec![], ExtraArgs::default())
            .unwrap();
        let value = tracer.string_literal("value").unwrap();
        let assigned = tracer
            .assign_property(
                obj.clone(),
                Tracked::untracked("prop"),
                value,
                ExtraArgs::default(),
            )
            .unwrap();
        assert_eq!(assigned.value.as_str(), Some("value"));

        let target = obj.value.as_object().unwrap();
        assert_eq!(
            tracer.properties().lookup_property_tracking(target, "prop"),
            assigned.tracking
        );
        assert_eq!(target.get("prop").unwrap().as_str(), Some("value"));
    }

    #[test]
    fn test_to_string_keeps_identity() {
        let mut tracer = Tracer::new();
        let s = tracer.string_literal("Hello").unwrap();
        let result = tracer
            .dispatch(OperationKind::ToString, vec![s], ExtraArgs::default())
            .unwrap();
        let entry = tracer.log().get(result.tracking.unwrap()).unwrap();
        assert_eq!(entry.offset_map, OffsetMap::Identity { input: 0 });
    }
}
