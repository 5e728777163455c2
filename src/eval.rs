use std::{io::Write, rc::Rc};

use tracing::debug;

use crate::runtime::{
    self, ADD_METHOD, Class, Closure, Context, ExecResult, Executable, Flow, Method, Object,
    ObjectHolder, RuntimeError,
};

/// Unwraps a normal result, or hands an early return straight to the caller.
macro_rules! propagate {
    ($flow:expr) => {
        match $flow? {
            Flow::Normal(value) => value,
            Flow::Return(value) => return Ok(Flow::Return(value)),
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
}

impl Comparator {
    pub fn apply(
        self,
        lhs: &ObjectHolder,
        rhs: &ObjectHolder,
        context: &mut dyn Context,
    ) -> Result<bool, RuntimeError> {
        match self {
            Comparator::Equal => runtime::equal(lhs, rhs, context),
            Comparator::NotEqual => runtime::not_equal(lhs, rhs, context),
            Comparator::Less => runtime::less(lhs, rhs, context),
            Comparator::Greater => runtime::greater(lhs, rhs, context),
            Comparator::LessOrEqual => runtime::less_or_equal(lhs, rhs, context),
            Comparator::GreaterOrEqual => runtime::greater_or_equal(lhs, rhs, context),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mult,
    Div,
}

impl ArithmeticOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mult => "*",
            ArithmeticOp::Div => "/",
        }
    }

    fn numbers(self, lhs: i32, rhs: i32) -> Result<i32, RuntimeError> {
        let result = match self {
            ArithmeticOp::Add => lhs.checked_add(rhs),
            ArithmeticOp::Sub => lhs.checked_sub(rhs),
            ArithmeticOp::Mult => lhs.checked_mul(rhs),
            ArithmeticOp::Div => {
                if rhs == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                lhs.checked_div(rhs)
            }
        };
        result.ok_or(RuntimeError::IntegerOverflow {
            operation: self.symbol(),
        })
    }

    pub fn apply(
        self,
        lhs: &ObjectHolder,
        rhs: &ObjectHolder,
        context: &mut dyn Context,
    ) -> Result<ObjectHolder, RuntimeError> {
        let (l, r) = (lhs.get(), rhs.get());
        match (self, l.as_deref(), r.as_deref()) {
            (op, Some(Object::Number(a)), Some(Object::Number(b))) => {
                op.numbers(*a, *b).map(ObjectHolder::number)
            }
            (ArithmeticOp::Add, Some(Object::String(a)), Some(Object::String(b))) => {
                Ok(ObjectHolder::string(format!("{a}{b}")))
            }
            (ArithmeticOp::Add, Some(Object::Instance(instance)), _)
                if instance.has_method(ADD_METHOD, 1) =>
            {
                lhs.call(ADD_METHOD, vec![rhs.clone()], context)
            }
            _ => Err(RuntimeError::UnsupportedOperands {
                operation: self.symbol(),
                lhs: lhs.kind(),
                rhs: rhs.kind(),
            }),
        }
    }
}

/// A variable, optionally followed by a chain of field names (`a.b.c`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableValue {
    name: String,
    fields: Vec<String>,
}

impl VariableValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn dotted<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn resolve(&self, closure: &Closure) -> Result<ObjectHolder, RuntimeError> {
        let mut value = closure
            .get(&self.name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnboundVariable(self.name.clone()))?;
        for field in &self.fields {
            value = value.field(field)?;
        }
        Ok(value)
    }
}

#[derive(Debug)]
pub enum PrintTarget {
    /// `print name`: shows whatever the name is bound to, or `None`.
    Variable(String),
    Expression(Box<Statement>),
    /// Space-separated; an empty list prints a bare newline.
    Expressions(Vec<Statement>),
}

impl PrintTarget {
    fn execute(&self, closure: &mut Closure, context: &mut dyn Context) -> ExecResult {
        match self {
            PrintTarget::Variable(name) => {
                // a missing name prints like an empty binding
                let value = closure.get(name).cloned().unwrap_or_default();
                value.print(context)?;
            }
            PrintTarget::Expression(argument) => {
                let value = propagate!(argument.execute(closure, context));
                value.print(context)?;
            }
            PrintTarget::Expressions(arguments) => {
                for (i, argument) in arguments.iter().enumerate() {
                    let value = propagate!(argument.execute(closure, context));
                    if i > 0 {
                        context.output().write_all(b" ")?;
                    }
                    value.print(context)?;
                }
            }
        }
        context.output().write_all(b"\n")?;
        Ok(Flow::Normal(ObjectHolder::none()))
    }
}

/// A node of a parsed mython program.
///
/// Every node runs against the current scope and yields a [`Flow`]. Only
/// [`Statement::Return`] starts an early return, and only
/// [`Statement::MethodBody`] ends one.
#[derive(Debug)]
pub enum Statement {
    Const(ObjectHolder),
    Assignment {
        name: String,
        value: Box<Statement>,
    },
    VariableValue(VariableValue),
    Print(PrintTarget),
    FieldAssignment {
        object: Box<Statement>,
        field: String,
        value: Box<Statement>,
    },
    MethodCall {
        object: Box<Statement>,
        method: String,
        args: Vec<Statement>,
    },
    NewInstance {
        class: Rc<Class>,
        args: Vec<Statement>,
    },
    Stringify(Box<Statement>),
    Arithmetic {
        op: ArithmeticOp,
        lhs: Box<Statement>,
        rhs: Box<Statement>,
    },
    Compound(Vec<Statement>),
    Return(Box<Statement>),
    MethodBody(Box<Statement>),
    ClassDefinition(Rc<Class>),
    IfElse {
        condition: Box<Statement>,
        if_body: Box<Statement>,
        else_body: Option<Box<Statement>>,
    },
    Or(Box<Statement>, Box<Statement>),
    And(Box<Statement>, Box<Statement>),
    Not(Box<Statement>),
    Comparison {
        comparator: Comparator,
        lhs: Box<Statement>,
        rhs: Box<Statement>,
    },
}

impl Statement {
    pub fn number(n: i32) -> Self {
        Statement::Const(ObjectHolder::number(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Statement::Const(ObjectHolder::string(s))
    }

    pub fn boolean(b: bool) -> Self {
        Statement::Const(ObjectHolder::boolean(b))
    }

    pub fn none() -> Self {
        Statement::Const(ObjectHolder::own(Object::None))
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Statement::VariableValue(VariableValue::new(name))
    }

    pub fn dotted<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Statement::VariableValue(VariableValue::dotted(name, fields))
    }

    pub fn assign(name: impl Into<String>, value: Statement) -> Self {
        Statement::Assignment {
            name: name.into(),
            value: Box::new(value),
        }
    }

    pub fn set_field(object: Statement, field: impl Into<String>, value: Statement) -> Self {
        Statement::FieldAssignment {
            object: Box::new(object),
            field: field.into(),
            value: Box::new(value),
        }
    }

    pub fn call(object: Statement, method: impl Into<String>, args: Vec<Statement>) -> Self {
        Statement::MethodCall {
            object: Box::new(object),
            method: method.into(),
            args,
        }
    }

    pub fn new_instance(class: &Rc<Class>, args: Vec<Statement>) -> Self {
        Statement::NewInstance {
            class: Rc::clone(class),
            args,
        }
    }

    pub fn stringify(argument: Statement) -> Self {
        Statement::Stringify(Box::new(argument))
    }

    pub fn arithmetic(op: ArithmeticOp, lhs: Statement, rhs: Statement) -> Self {
        Statement::Arithmetic {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn compare(comparator: Comparator, lhs: Statement, rhs: Statement) -> Self {
        Statement::Comparison {
            comparator,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn ret(value: Statement) -> Self {
        Statement::Return(Box::new(value))
    }

    pub fn if_else(condition: Statement, if_body: Statement, else_body: Option<Statement>) -> Self {
        Statement::IfElse {
            condition: Box::new(condition),
            if_body: Box::new(if_body),
            else_body: else_body.map(Box::new),
        }
    }

    pub fn or(lhs: Statement, rhs: Statement) -> Self {
        Statement::Or(Box::new(lhs), Box::new(rhs))
    }

    pub fn and(lhs: Statement, rhs: Statement) -> Self {
        Statement::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn not(argument: Statement) -> Self {
        Statement::Not(Box::new(argument))
    }

    pub fn print(arguments: Vec<Statement>) -> Self {
        Statement::Print(PrintTarget::Expressions(arguments))
    }

    /// Builds a method whose body is wrapped in the boundary that catches
    /// `return`.
    pub fn method<I, S>(name: impl Into<String>, params: I, body: Statement) -> Method
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Method {
            name: name.into(),
            formal_params: params.into_iter().map(Into::into).collect(),
            body: Rc::new(Statement::MethodBody(Box::new(body))),
        }
    }

    /// Runs a whole program against the global scope.
    pub fn run(
        &self,
        globals: &mut Closure,
        context: &mut dyn Context,
    ) -> Result<ObjectHolder, RuntimeError> {
        Ok(self.execute(globals, context)?.into_value())
    }

    fn evaluate_all(
        arguments: &[Statement],
        closure: &mut Closure,
        context: &mut dyn Context,
    ) -> Result<Result<Vec<ObjectHolder>, ObjectHolder>, RuntimeError> {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            match argument.execute(closure, context)? {
                Flow::Normal(value) => values.push(value),
                Flow::Return(value) => return Ok(Err(value)),
            }
        }
        Ok(Ok(values))
    }
}

impl Executable for Statement {
    fn execute(&self, closure: &mut Closure, context: &mut dyn Context) -> ExecResult {
        let value = match self {
            Statement::Const(value) => value.clone(),
            Statement::Assignment { name, value } => {
                let value = propagate!(value.execute(closure, context)).promote();
                closure.insert(name.clone(), value.clone());
                value
            }
            Statement::VariableValue(variable) => variable.resolve(closure)?,
            Statement::Print(target) => return target.execute(closure, context),
            Statement::FieldAssignment {
                object,
                field,
                value,
            } => {
                let object = propagate!(object.execute(closure, context));
                if !object.is_instance() {
                    return Err(RuntimeError::NotAnInstance {
                        found: object.kind(),
                    });
                }
                let value = propagate!(value.execute(closure, context)).promote();
                object.set_field(field, value.clone())?;
                value
            }
            Statement::MethodCall {
                object,
                method,
                args,
            } => {
                let receiver = propagate!(object.execute(closure, context));
                let args = match Self::evaluate_all(args, closure, context)? {
                    Ok(args) => args,
                    Err(returned) => return Ok(Flow::Return(returned)),
                };
                receiver.call(method, args, context)?
            }
            Statement::NewInstance { class, args } => {
                let args = match Self::evaluate_all(args, closure, context)? {
                    Ok(args) => args,
                    Err(returned) => return Ok(Flow::Return(returned)),
                };
                class.instantiate(args, context)?
            }
            Statement::Stringify(argument) => {
                let value = propagate!(argument.execute(closure, context));
                ObjectHolder::string(value.to_display_string(context)?)
            }
            Statement::Arithmetic { op, lhs, rhs } => {
                let lhs = propagate!(lhs.execute(closure, context));
                let rhs = propagate!(rhs.execute(closure, context));
                op.apply(&lhs, &rhs, context)?
            }
            Statement::Compound(statements) => {
                for statement in statements {
                    if let Flow::Return(value) = statement.execute(closure, context)? {
                        return Ok(Flow::Return(value));
                    }
                }
                ObjectHolder::none()
            }
            Statement::Return(value) => {
                let value = propagate!(value.execute(closure, context));
                return Ok(Flow::Return(value));
            }
            Statement::MethodBody(body) => match body.execute(closure, context)? {
                Flow::Return(value) => value.promote(),
                Flow::Normal(_) => ObjectHolder::none(),
            },
            Statement::ClassDefinition(class) => {
                debug!(class = class.name(), "class defined");
                let value = ObjectHolder::own(Object::Class(Rc::clone(class)));
                closure.insert(class.name().to_string(), value.clone());
                value
            }
            Statement::IfElse {
                condition,
                if_body,
                else_body,
            } => {
                let condition = propagate!(condition.execute(closure, context));
                if condition.is_true() {
                    return if_body.execute(closure, context);
                }
                match else_body {
                    Some(else_body) => return else_body.execute(closure, context),
                    None => ObjectHolder::none(),
                }
            }
            Statement::Or(lhs, rhs) => {
                let lhs = propagate!(lhs.execute(closure, context));
                if lhs.is_true() {
                    lhs
                } else {
                    propagate!(rhs.execute(closure, context))
                }
            }
            Statement::And(lhs, rhs) => {
                let lhs = propagate!(lhs.execute(closure, context));
                let rhs = propagate!(rhs.execute(closure, context));
                // true only for two truthy operands that are also equal
                let result = lhs.is_true()
                    && rhs.is_true()
                    && runtime::can_compare_equal(&lhs, &rhs)
                    && runtime::equal(&lhs, &rhs, context)?;
                ObjectHolder::boolean(result)
            }
            Statement::Not(argument) => {
                let value = propagate!(argument.execute(closure, context));
                ObjectHolder::boolean(!value.is_true())
            }
            Statement::Comparison {
                comparator,
                lhs,
                rhs,
            } => {
                let lhs = propagate!(lhs.execute(closure, context));
                let rhs = propagate!(rhs.execute(closure, context));
                ObjectHolder::boolean(comparator.apply(&lhs, &rhs, context)?)
            }
        };
        Ok(Flow::Normal(value))
    }
}
