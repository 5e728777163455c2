use std::{
    cell::{Ref, RefCell, RefMut},
    collections::HashMap,
    fmt::{self, Debug},
    io::Write,
    rc::{Rc, Weak},
};

use miette::Diagnostic;
use thiserror::Error;
use tracing::debug;

pub const INIT_METHOD: &str = "__init__";
pub const STR_METHOD: &str = "__str__";
pub const EQ_METHOD: &str = "__eq__";
pub const LT_METHOD: &str = "__lt__";
pub const ADD_METHOD: &str = "__add__";

/// Name the receiver is bound to inside a method frame.
pub const SELF_NAME: &str = "self";

#[derive(Error, Debug, Diagnostic)]
pub enum RuntimeError {
    #[error("name `{0}` is not defined")]
    #[diagnostic(code(mython::runtime::unbound_variable))]
    UnboundVariable(String),

    #[error("`{class}` object has no field `{field}`")]
    #[diagnostic(code(mython::runtime::unknown_field))]
    UnknownField { class: String, field: String },

    #[error("expected a class instance, found {found}")]
    #[diagnostic(
        code(mython::runtime::not_an_instance),
        help("fields and methods only exist on objects created with a class")
    )]
    NotAnInstance { found: &'static str },

    #[error("class `{class}` has no method `{method}` taking {arity} argument(s)")]
    #[diagnostic(code(mython::runtime::missing_method))]
    MissingMethod {
        class: String,
        method: String,
        arity: usize,
    },

    #[error("cannot compare {lhs} with {rhs} using {operation}")]
    #[diagnostic(code(mython::runtime::incomparable))]
    IncomparableValues {
        operation: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("unsupported operand types for {operation}: {lhs} and {rhs}")]
    #[diagnostic(code(mython::runtime::unsupported_operands))]
    UnsupportedOperands {
        operation: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("division by zero")]
    #[diagnostic(code(mython::runtime::division_by_zero))]
    DivisionByZero,

    #[error("integer overflow in {operation}")]
    #[diagnostic(code(mython::runtime::overflow))]
    IntegerOverflow { operation: &'static str },

    #[error("failed to write program output")]
    #[diagnostic(code(mython::runtime::output))]
    Output(#[from] std::io::Error),
}

/// Where a program's printed output goes.
pub trait Context {
    fn output(&mut self) -> &mut dyn Write;
}

/// A context writing straight into any [`Write`] sink, such as stdout.
pub struct SimpleContext<W> {
    output: W,
}

impl<W: Write> SimpleContext<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

impl<W: Write> Context for SimpleContext<W> {
    fn output(&mut self) -> &mut dyn Write {
        &mut self.output
    }
}

/// A context that keeps everything printed in memory.
#[derive(Debug, Default)]
pub struct DummyContext {
    pub output: Vec<u8>,
}

impl DummyContext {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Context for DummyContext {
    fn output(&mut self) -> &mut dyn Write {
        &mut self.output
    }
}

/// Name-to-value table backing both call frames and instance fields.
pub type Closure = HashMap<String, ObjectHolder>;

/// The outcome of running a statement.
///
/// `Return` is the non-local exit produced by a `return` statement. Compound
/// statements pass it upward untouched until a method body turns it back into
/// a plain value; it never travels through the error channel.
#[derive(Debug, Clone)]
pub enum Flow {
    Normal(ObjectHolder),
    Return(ObjectHolder),
}

impl Flow {
    pub fn into_value(self) -> ObjectHolder {
        match self {
            Flow::Normal(value) | Flow::Return(value) => value,
        }
    }
}

pub type ExecResult = Result<Flow, RuntimeError>;

/// Something that can be run against a scope, such as a method body.
pub trait Executable: Debug {
    fn execute(&self, closure: &mut Closure, context: &mut dyn Context) -> ExecResult;
}

pub struct Method {
    pub name: String,
    pub formal_params: Vec<String>,
    pub body: Rc<dyn Executable>,
}

impl Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("formal_params", &self.formal_params)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Class {
    name: String,
    methods: Vec<Method>,
    parent: Option<Rc<Class>>,
}

impl Class {
    pub fn new(name: impl Into<String>, methods: Vec<Method>, parent: Option<Rc<Class>>) -> Self {
        Self {
            name: name.into(),
            methods,
            parent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Rc<Class>> {
        self.parent.as_ref()
    }

    /// Finds `name` on this class or the nearest ancestor that defines it.
    pub fn method(&self, name: &str) -> Option<&Method> {
        let mut class = self;
        loop {
            if let Some(method) = class.methods.iter().find(|m| m.name == name) {
                return Some(method);
            }
            class = class.parent.as_deref()?;
        }
    }

    pub fn has_method(&self, name: &str, arity: usize) -> bool {
        self.method(name)
            .is_some_and(|method| method.formal_params.len() == arity)
    }

    /// Creates an instance, running `__init__` when one accepts `args`.
    pub fn instantiate(
        self: &Rc<Self>,
        args: Vec<ObjectHolder>,
        context: &mut dyn Context,
    ) -> Result<ObjectHolder, RuntimeError> {
        debug!(class = %self.name, args = args.len(), "new instance");
        let instance = ObjectHolder::own(Object::Instance(ClassInstance::new(Rc::clone(self))));
        if self.has_method(INIT_METHOD, args.len()) {
            instance.call(INIT_METHOD, args, context)?;
        }
        Ok(instance)
    }
}

#[derive(Debug)]
pub struct ClassInstance {
    class: Rc<Class>,
    fields: RefCell<Closure>,
}

impl ClassInstance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            fields: RefCell::new(Closure::new()),
        }
    }

    pub fn class(&self) -> &Rc<Class> {
        &self.class
    }

    pub fn has_method(&self, name: &str, arity: usize) -> bool {
        self.class.has_method(name, arity)
    }

    pub fn fields(&self) -> Ref<'_, Closure> {
        self.fields.borrow()
    }

    pub fn fields_mut(&self) -> RefMut<'_, Closure> {
        self.fields.borrow_mut()
    }
}

#[derive(Debug)]
pub enum Object {
    None,
    Bool(bool),
    Number(i32),
    String(String),
    Class(Rc<Class>),
    Instance(ClassInstance),
}

impl Object {
    pub fn kind(&self) -> &'static str {
        match self {
            Object::None => "None",
            Object::Bool(_) => "Bool",
            Object::Number(_) => "Number",
            Object::String(_) => "String",
            Object::Class(_) => "Class",
            Object::Instance(_) => "ClassInstance",
        }
    }
}

#[derive(Clone)]
enum Handle {
    Owned(Rc<Object>),
    Shared(Weak<Object>),
}

/// A shared handle to a runtime value.
///
/// An empty holder means "no value was produced" and prints and tests like
/// `None`. A holder made with [`ObjectHolder::share`] does not keep its object
/// alive; it is promoted to an owning one whenever it is stored or returned.
#[derive(Clone, Default)]
pub struct ObjectHolder {
    data: Option<Handle>,
}

impl Debug for ObjectHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            None => write!(f, "ObjectHolder(empty)"),
            Some(Handle::Owned(object)) => f.debug_tuple("ObjectHolder").field(object).finish(),
            Some(Handle::Shared(weak)) => match weak.upgrade() {
                Some(object) => write!(f, "ObjectHolder(shared {})", object.kind()),
                None => write!(f, "ObjectHolder(dangling)"),
            },
        }
    }
}

impl From<Object> for ObjectHolder {
    fn from(object: Object) -> Self {
        Self::own(object)
    }
}

impl ObjectHolder {
    pub fn own(object: Object) -> Self {
        Self {
            data: Some(Handle::Owned(Rc::new(object))),
        }
    }

    pub fn share(object: &Rc<Object>) -> Self {
        Self {
            data: Some(Handle::Shared(Rc::downgrade(object))),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn number(n: i32) -> Self {
        Self::own(Object::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::own(Object::String(s.into()))
    }

    pub fn boolean(b: bool) -> Self {
        Self::own(Object::Bool(b))
    }

    pub fn get(&self) -> Option<Rc<Object>> {
        match self.data.as_ref()? {
            Handle::Owned(object) => Some(Rc::clone(object)),
            Handle::Shared(weak) => weak.upgrade(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.get().is_none()
    }

    /// Turns a non-owning handle into an owning one.
    pub fn promote(self) -> Self {
        match self.data {
            Some(Handle::Shared(weak)) => Self {
                data: weak.upgrade().map(Handle::Owned),
            },
            _ => self,
        }
    }

    pub fn as_number(&self) -> Option<i32> {
        match self.get().as_deref() {
            Some(Object::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.get().as_deref() {
            Some(Object::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self.get().as_deref() {
            Some(Object::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<Rc<Class>> {
        match self.get().as_deref() {
            Some(Object::Class(class)) => Some(Rc::clone(class)),
            _ => None,
        }
    }

    pub fn is_instance(&self) -> bool {
        matches!(self.get().as_deref(), Some(Object::Instance(_)))
    }

    pub fn kind(&self) -> &'static str {
        self.get().map_or("None", |object| object.kind())
    }

    pub fn is_true(&self) -> bool {
        match self.get().as_deref() {
            Some(Object::String(s)) => !s.is_empty(),
            Some(Object::Bool(b)) => *b,
            Some(Object::Number(n)) => *n != 0,
            Some(Object::None | Object::Class(_) | Object::Instance(_)) | None => false,
        }
    }

    /// Reads a field of an instance.
    pub fn field(&self, name: &str) -> Result<ObjectHolder, RuntimeError> {
        let object = self.get();
        let Some(Object::Instance(instance)) = object.as_deref() else {
            return Err(RuntimeError::NotAnInstance { found: self.kind() });
        };
        let value = instance.fields().get(name).cloned();
        value.ok_or_else(|| RuntimeError::UnknownField {
            class: instance.class.name.clone(),
            field: name.to_string(),
        })
    }

    pub fn set_field(&self, name: &str, value: ObjectHolder) -> Result<(), RuntimeError> {
        let object = self.get();
        let Some(Object::Instance(instance)) = object.as_deref() else {
            return Err(RuntimeError::NotAnInstance { found: self.kind() });
        };
        instance.fields_mut().insert(name.to_string(), value);
        Ok(())
    }

    pub fn has_method(&self, name: &str, arity: usize) -> bool {
        match self.get().as_deref() {
            Some(Object::Instance(instance)) => instance.has_method(name, arity),
            _ => false,
        }
    }

    /// Invokes `method` on the instance this holder points at.
    ///
    /// The method runs in a fresh frame holding `self` and one binding per
    /// formal parameter.
    #[tracing::instrument(level = "debug", skip(self, args, context))]
    pub fn call(
        &self,
        method: &str,
        args: Vec<ObjectHolder>,
        context: &mut dyn Context,
    ) -> Result<ObjectHolder, RuntimeError> {
        let Some(receiver) = self.get() else {
            return Err(RuntimeError::NotAnInstance { found: "None" });
        };
        let Object::Instance(instance) = &*receiver else {
            return Err(RuntimeError::NotAnInstance {
                found: receiver.kind(),
            });
        };
        let Some(target) = instance
            .class
            .method(method)
            .filter(|target| target.formal_params.len() == args.len())
        else {
            return Err(RuntimeError::MissingMethod {
                class: instance.class.name.clone(),
                method: method.to_string(),
                arity: args.len(),
            });
        };

        let mut frame = Closure::new();
        frame.insert(SELF_NAME.to_string(), ObjectHolder::share(&receiver));
        frame.extend(target.formal_params.iter().cloned().zip(args));

        let body = Rc::clone(&target.body);
        Ok(body.execute(&mut frame, context)?.into_value().promote())
    }

    /// Renders the value the way `print` shows it.
    pub fn to_display_string(&self, context: &mut dyn Context) -> Result<String, RuntimeError> {
        let Some(object) = self.get() else {
            return Ok("None".to_string());
        };
        Ok(match &*object {
            Object::None => "None".to_string(),
            Object::Bool(true) => "True".to_string(),
            Object::Bool(false) => "False".to_string(),
            Object::Number(n) => n.to_string(),
            Object::String(s) => s.clone(),
            Object::Class(class) => format!("Class {}", class.name),
            Object::Instance(instance) => {
                if instance.has_method(STR_METHOD, 0) {
                    self.call(STR_METHOD, Vec::new(), context)?
                        .to_display_string(context)?
                } else {
                    format!("<{} object at {:p}>", instance.class.name, Rc::as_ptr(&object))
                }
            }
        })
    }

    pub fn print(&self, context: &mut dyn Context) -> Result<(), RuntimeError> {
        let text = self.to_display_string(context)?;
        context.output().write_all(text.as_bytes())?;
        Ok(())
    }
}

fn is_none(object: Option<&Object>) -> bool {
    matches!(object, None | Some(Object::None))
}

/// Whether [`equal`] is defined for this pair of values.
pub fn can_compare_equal(lhs: &ObjectHolder, rhs: &ObjectHolder) -> bool {
    let (l, r) = (lhs.get(), rhs.get());
    match (l.as_deref(), r.as_deref()) {
        (Some(Object::String(_)), Some(Object::String(_)))
        | (Some(Object::Bool(_)), Some(Object::Bool(_)))
        | (Some(Object::Number(_)), Some(Object::Number(_))) => true,
        (Some(Object::Instance(instance)), Some(Object::Instance(_))) => {
            instance.has_method(EQ_METHOD, 1)
        }
        (l, r) => is_none(l) && is_none(r),
    }
}

pub fn equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    let (l, r) = (lhs.get(), rhs.get());
    match (l.as_deref(), r.as_deref()) {
        (Some(Object::String(a)), Some(Object::String(b))) => Ok(a == b),
        (Some(Object::Bool(a)), Some(Object::Bool(b))) => Ok(a == b),
        (Some(Object::Number(a)), Some(Object::Number(b))) => Ok(a == b),
        (Some(Object::Instance(instance)), Some(Object::Instance(_)))
            if instance.has_method(EQ_METHOD, 1) =>
        {
            Ok(lhs.call(EQ_METHOD, vec![rhs.clone()], context)?.is_true())
        }
        (l, r) if is_none(l) && is_none(r) => Ok(true),
        _ => Err(RuntimeError::IncomparableValues {
            operation: "==",
            lhs: lhs.kind(),
            rhs: rhs.kind(),
        }),
    }
}

pub fn less(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    let (l, r) = (lhs.get(), rhs.get());
    match (l.as_deref(), r.as_deref()) {
        (Some(Object::String(a)), Some(Object::String(b))) => Ok(a < b),
        (Some(Object::Bool(a)), Some(Object::Bool(b))) => Ok(a < b),
        (Some(Object::Number(a)), Some(Object::Number(b))) => Ok(a < b),
        (Some(Object::Instance(instance)), Some(Object::Instance(_)))
            if instance.has_method(LT_METHOD, 1) =>
        {
            Ok(lhs.call(LT_METHOD, vec![rhs.clone()], context)?.is_true())
        }
        _ => Err(RuntimeError::IncomparableValues {
            operation: "<",
            lhs: lhs.kind(),
            rhs: rhs.kind(),
        }),
    }
}

pub fn not_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    Ok(!equal(lhs, rhs, context)?)
}

pub fn greater(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    Ok(!less(lhs, rhs, context)? && !equal(lhs, rhs, context)?)
}

pub fn less_or_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    Ok(less(lhs, rhs, context)? || equal(lhs, rhs, context)?)
}

pub fn greater_or_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    Ok(!less(lhs, rhs, context)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// A method body returning a fixed value, standing in for parsed code.
    #[derive(Debug)]
    struct Constant(ObjectHolder);

    impl Executable for Constant {
        fn execute(&self, _: &mut Closure, _: &mut dyn Context) -> ExecResult {
            Ok(Flow::Return(self.0.clone()))
        }
    }

    /// Compares the `value` field of `self` with the one of `other`.
    #[derive(Debug)]
    struct CompareValue {
        less: bool,
    }

    impl Executable for CompareValue {
        fn execute(&self, closure: &mut Closure, context: &mut dyn Context) -> ExecResult {
            let lhs = closure[SELF_NAME].field("value")?;
            let rhs = closure["other"].field("value")?;
            let result = if self.less {
                less(&lhs, &rhs, context)?
            } else {
                equal(&lhs, &rhs, context)?
            };
            Ok(Flow::Return(ObjectHolder::boolean(result)))
        }
    }

    /// Stores the single argument into the `value` field.
    #[derive(Debug)]
    struct StoreValue;

    impl Executable for StoreValue {
        fn execute(&self, closure: &mut Closure, _: &mut dyn Context) -> ExecResult {
            closure[SELF_NAME].set_field("value", closure["value"].clone())?;
            Ok(Flow::Normal(ObjectHolder::none()))
        }
    }

    /// Hands back the receiver itself.
    #[derive(Debug)]
    struct ReturnSelf;

    impl Executable for ReturnSelf {
        fn execute(&self, closure: &mut Closure, _: &mut dyn Context) -> ExecResult {
            Ok(Flow::Return(closure[SELF_NAME].clone()))
        }
    }

    fn method(name: &str, params: &[&str], body: impl Executable + 'static) -> Method {
        Method {
            name: name.to_string(),
            formal_params: params.iter().map(|p| p.to_string()).collect(),
            body: Rc::new(body),
        }
    }

    fn boxed_value_class() -> Rc<Class> {
        Rc::new(Class::new(
            "Boxed",
            vec![
                method(INIT_METHOD, &["value"], StoreValue),
                method(EQ_METHOD, &["other"], CompareValue { less: false }),
                method(LT_METHOD, &["other"], CompareValue { less: true }),
            ],
            None,
        ))
    }

    fn boxed(class: &Rc<Class>, n: i32, context: &mut DummyContext) -> ObjectHolder {
        class
            .instantiate(vec![ObjectHolder::number(n)], context)
            .unwrap()
    }

    #[test]
    fn truthiness() {
        assert!(ObjectHolder::number(3).is_true());
        assert!(!ObjectHolder::number(0).is_true());
        assert!(ObjectHolder::string("x").is_true());
        assert!(!ObjectHolder::string("").is_true());
        assert!(ObjectHolder::boolean(true).is_true());
        assert!(!ObjectHolder::boolean(false).is_true());
        assert!(!ObjectHolder::none().is_true());
        assert!(!ObjectHolder::own(Object::None).is_true());

        let class = Rc::new(Class::new("Empty", Vec::new(), None));
        let mut context = DummyContext::default();
        let instance = class.instantiate(Vec::new(), &mut context).unwrap();
        assert!(!instance.is_true());
        assert!(!ObjectHolder::own(Object::Class(class)).is_true());
    }

    #[test]
    fn printing() {
        let mut context = DummyContext::default();
        let class = Rc::new(Class::new("Point", Vec::new(), None));
        let cases = [
            (ObjectHolder::boolean(true), "True"),
            (ObjectHolder::boolean(false), "False"),
            (ObjectHolder::number(-7), "-7"),
            (ObjectHolder::string("hi"), "hi"),
            (ObjectHolder::none(), "None"),
            (ObjectHolder::own(Object::None), "None"),
            (ObjectHolder::own(Object::Class(class)), "Class Point"),
        ];
        for (value, expected) in cases {
            assert_eq!(value.to_display_string(&mut context).unwrap(), expected);
        }
    }

    #[test]
    fn instance_prints_through_str() {
        let class = Rc::new(Class::new(
            "Named",
            vec![method(STR_METHOD, &[], Constant(ObjectHolder::string("named!")))],
            None,
        ));
        let mut context = DummyContext::default();
        let instance = class.instantiate(Vec::new(), &mut context).unwrap();
        instance.print(&mut context).unwrap();
        assert_eq!(context.text(), "named!");
    }

    #[test]
    fn instance_without_str_prints_identity() {
        let class = Rc::new(Class::new("Plain", Vec::new(), None));
        let mut context = DummyContext::default();
        let instance = class.instantiate(Vec::new(), &mut context).unwrap();
        let text = instance.to_display_string(&mut context).unwrap();
        assert!(text.starts_with("<Plain object at "), "{text}");
    }

    #[test]
    fn primitive_equality() {
        let mut context = DummyContext::default();
        let ctx = &mut context;
        assert!(equal(&ObjectHolder::number(1), &ObjectHolder::number(1), ctx).unwrap());
        assert!(!equal(&ObjectHolder::number(1), &ObjectHolder::number(2), ctx).unwrap());
        assert!(equal(&ObjectHolder::string("a"), &ObjectHolder::string("a"), ctx).unwrap());
        assert!(equal(&ObjectHolder::boolean(false), &ObjectHolder::boolean(false), ctx).unwrap());
        assert!(equal(&ObjectHolder::none(), &ObjectHolder::none(), ctx).unwrap());
        assert!(equal(&ObjectHolder::none(), &ObjectHolder::own(Object::None), ctx).unwrap());
    }

    #[test]
    fn mixed_kinds_do_not_compare() {
        let mut context = DummyContext::default();
        let err = equal(&ObjectHolder::number(1), &ObjectHolder::string("1"), &mut context)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::IncomparableValues { .. }));
        assert!(less(&ObjectHolder::none(), &ObjectHolder::none(), &mut context).is_err());
        assert!(!can_compare_equal(&ObjectHolder::boolean(true), &ObjectHolder::number(1)));
    }

    #[test]
    fn ordering() {
        let mut context = DummyContext::default();
        let ctx = &mut context;
        let (one, two) = (ObjectHolder::number(1), ObjectHolder::number(2));
        assert!(less(&ObjectHolder::string("a"), &ObjectHolder::string("b"), ctx).unwrap());
        assert!(less(&ObjectHolder::boolean(false), &ObjectHolder::boolean(true), ctx).unwrap());
        assert!(greater(&two, &one, ctx).unwrap());
        assert!(!greater(&one, &one, ctx).unwrap());
        assert!(less_or_equal(&one, &one, ctx).unwrap());
        assert!(less_or_equal(&one, &two, ctx).unwrap());
        assert!(!less_or_equal(&two, &one, ctx).unwrap());
        assert!(greater_or_equal(&one, &one, ctx).unwrap());
        assert!(!greater_or_equal(&one, &two, ctx).unwrap());
        assert!(not_equal(&one, &two, ctx).unwrap());
    }

    #[test]
    fn instances_compare_through_dunder_methods() {
        let mut context = DummyContext::default();
        let class = boxed_value_class();
        let (a, b, c) = (
            boxed(&class, 1, &mut context),
            boxed(&class, 2, &mut context),
            boxed(&class, 1, &mut context),
        );
        assert!(equal(&a, &c, &mut context).unwrap());
        assert!(!equal(&a, &b, &mut context).unwrap());
        assert!(less(&a, &b, &mut context).unwrap());
        assert!(greater(&b, &a, &mut context).unwrap());
        assert!(can_compare_equal(&a, &b));

        let plain = Rc::new(Class::new("Plain", Vec::new(), None));
        let p = plain.instantiate(Vec::new(), &mut context).unwrap();
        assert!(equal(&p, &a, &mut context).is_err());
    }

    #[test]
    fn init_runs_only_for_matching_arity() {
        let mut context = DummyContext::default();
        let class = boxed_value_class();
        let instance = boxed(&class, 5, &mut context);
        assert_eq!(instance.field("value").unwrap().as_number(), Some(5));

        let bare = class.instantiate(Vec::new(), &mut context).unwrap();
        assert!(bare.is_instance());
        assert!(matches!(
            bare.field("value"),
            Err(RuntimeError::UnknownField { .. })
        ));
    }

    #[test]
    fn subclass_methods_hide_parent_methods() {
        let parent = Rc::new(Class::new(
            "Base",
            vec![
                method("name", &[], Constant(ObjectHolder::string("base"))),
                method("only_base", &["x"], Constant(ObjectHolder::number(1))),
            ],
            None,
        ));
        let child = Rc::new(Class::new(
            "Derived",
            vec![method("name", &[], Constant(ObjectHolder::string("derived")))],
            Some(Rc::clone(&parent)),
        ));
        let mut context = DummyContext::default();
        let instance = child.instantiate(Vec::new(), &mut context).unwrap();

        let name = instance.call("name", Vec::new(), &mut context).unwrap();
        assert_eq!(name.as_string().as_deref(), Some("derived"));
        assert!(instance.has_method("only_base", 1));
        assert!(!instance.has_method("only_base", 0));
        assert!(!instance.has_method("missing", 0));
        assert_eq!(child.parent().map(|p| p.name()), Some("Base"));
    }

    #[test]
    fn calling_a_missing_method_names_it() {
        let class = Rc::new(Class::new("Empty", Vec::new(), None));
        let mut context = DummyContext::default();
        let instance = class.instantiate(Vec::new(), &mut context).unwrap();
        let err = instance.call("frobnicate", Vec::new(), &mut context).unwrap_err();
        assert_eq!(
            err.to_string(),
            "class `Empty` has no method `frobnicate` taking 0 argument(s)"
        );
        assert!(matches!(
            ObjectHolder::number(1).call("x", Vec::new(), &mut context),
            Err(RuntimeError::NotAnInstance { found: "Number" })
        ));
    }

    #[test]
    fn self_binding_does_not_own_the_receiver() {
        let class = Rc::new(Class::new(
            "Chain",
            vec![method("me", &[], ReturnSelf)],
            None,
        ));
        let mut context = DummyContext::default();
        let instance = class.instantiate(Vec::new(), &mut context).unwrap();
        let object = instance.get().unwrap();
        let before = Rc::strong_count(&object);

        let returned = instance.call("me", Vec::new(), &mut context).unwrap();
        assert!(Rc::ptr_eq(&returned.get().unwrap(), &object));
        drop(instance);
        // the returned handle was promoted, so it still keeps the object alive
        assert!(returned.is_instance());
        assert_eq!(Rc::strong_count(&object), before);

        let weak = ObjectHolder::share(&object);
        drop(returned);
        drop(object);
        assert!(weak.is_empty());
    }
}
