use std::{cell::RefCell, fmt, path::PathBuf, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::Stmt,
    diagnostics::{Diagnostic, EzError, Result},
    environment::EnvironmentRef,
    runtime::ExecutionContext,
};

pub type Record = IndexMap<String, Value>;

/// Handle to a runtime value. Clones share the payload, so arrays and records
/// mutated through one handle are observed through every other.
#[derive(Clone)]
pub struct Value(pub Rc<ValueKind>);

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn null() -> Self {
        Self::new(ValueKind::Null)
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ValueKind::Boolean(value))
    }

    pub fn number(value: f64) -> Self {
        Self::new(ValueKind::Number(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::String(value.into()))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Self::new(ValueKind::Array(RefCell::new(values)))
    }

    pub fn record(entries: Record) -> Self {
        Self::new(ValueKind::Record(RefCell::new(entries)))
    }

    pub fn function(function: UserFunction) -> Self {
        Self::new(ValueKind::Function(function))
    }

    pub fn native<F>(name: impl Into<String>, arity: Option<usize>, callback: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>, &[Value]) -> Result<Value> + 'static,
    {
        Self::new(ValueKind::NativeFunction(NativeFunction::new(
            name, arity, callback,
        )))
    }

    pub fn return_signal(value: Value) -> Self {
        Self::new(ValueKind::Return(value))
    }

    pub fn host_proxy(
        module_name: impl Into<String>,
        members: Record,
        capability: Option<Rc<dyn HostCapability>>,
    ) -> Self {
        Self::new(ValueKind::HostProxy(HostProxy {
            module_name: module_name.into(),
            members: RefCell::new(members),
            capability,
        }))
    }

    pub fn kind(&self) -> &ValueKind {
        &self.0
    }

    pub fn is_truthy(&self) -> bool {
        is_truthy(self)
    }

    pub fn type_name(&self) -> &'static str {
        match &*self.0 {
            ValueKind::Null => "null",
            ValueKind::Boolean(_) => "boolean",
            ValueKind::Number(_) => "number",
            ValueKind::String(_) => "string",
            ValueKind::Array(_) => "array",
            ValueKind::Record(_) => "object",
            ValueKind::Function(_) => "function",
            ValueKind::NativeFunction(_) => "native-function",
            ValueKind::Return(_) => "return",
            ValueKind::HostProxy(_) => "host",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(&*self.0, ValueKind::Null)
    }

    pub fn is_return_signal(&self) -> bool {
        matches!(&*self.0, ValueKind::Return(_))
    }

    /// Unwraps a return signal; any other value is passed through.
    pub fn into_returned(self) -> Value {
        if let ValueKind::Return(inner) = &*self.0 {
            return inner.clone();
        }
        self
    }

    pub fn as_number(&self) -> Option<f64> {
        match &*self.0 {
            ValueKind::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &*self.0 {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &*self.0 {
            ValueKind::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Reads a record property (or host proxy member) by name.
    pub fn get_property(&self, key: &str) -> Option<Value> {
        match &*self.0 {
            ValueKind::Record(entries) => entries.borrow().get(key).cloned(),
            ValueKind::HostProxy(proxy) => proxy.member(key),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn expect_string(&self, what: &str) -> Result<String> {
        self.as_str().map(str::to_string).ok_or_else(|| {
            EzError::from(Diagnostic::runtime(format!(
                "{what} expects a string, got {}",
                self.type_name()
            )))
        })
    }
}

pub enum ValueKind {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(RefCell<Vec<Value>>),
    Record(RefCell<Record>),
    Function(UserFunction),
    NativeFunction(NativeFunction),
    Return(Value),
    HostProxy(HostProxy),
}

#[derive(Clone)]
pub struct UserFunction {
    pub name: String,
    pub params: Vec<String>,
    pub body: Rc<[Stmt]>,
    pub closure: EnvironmentRef,
    /// File of the module that defined the function, if any.
    pub origin: Option<PathBuf>,
}

pub type NativeCallback = dyn Fn(&mut ExecutionContext<'_>, &[Value]) -> Result<Value>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    /// `None` accepts any number of arguments.
    pub arity: Option<usize>,
    pub callback: Rc<NativeCallback>,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, arity: Option<usize>, callback: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>, &[Value]) -> Result<Value> + 'static,
    {
        Self {
            name: name.into(),
            arity,
            callback: Rc::new(callback),
        }
    }

    pub fn call(&self, ctx: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
        if let Some(arity) = self.arity {
            if args.len() != arity {
                return Err(EzError::from(Diagnostic::runtime(format!(
                    "{}() expects {} argument(s), got {}",
                    self.name,
                    arity,
                    args.len()
                ))));
            }
        }
        (self.callback)(ctx, args)
    }
}

/// Dispatch interface for capabilities provided by the embedding host.
pub trait HostCapability {
    fn invoke(
        &self,
        ctx: &mut ExecutionContext<'_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value>;
}

/// Opaque handle onto a host capability. Reads hit the wrapped record first;
/// any other member resolves to a method bound to the capability.
pub struct HostProxy {
    pub module_name: String,
    pub members: RefCell<Record>,
    pub capability: Option<Rc<dyn HostCapability>>,
}

impl HostProxy {
    pub fn member(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.members.borrow().get(name) {
            return Some(value.clone());
        }
        let capability = Rc::clone(self.capability.as_ref()?);
        let method = name.to_string();
        Some(Value::native(
            format!("{}.{}", self.module_name, name),
            None,
            move |ctx, args| capability.invoke(ctx, &method, args),
        ))
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match &*value.0 {
        ValueKind::Null => false,
        ValueKind::Boolean(b) => *b,
        ValueKind::Number(n) => *n != 0.0,
        ValueKind::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// `==` semantics: structural for scalars and arrays, identity for records and
/// callables, plus the null / numeric-string / boolean-number coercions.
/// Native functions and host proxies are equal only to themselves, so
/// `print == print` holds.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    equal_tracked(a, b, &mut Vec::new())
}

/// `in_progress` holds the array pairs currently being compared; meeting one
/// again means the arrays are equal along that cycle.
type PtrPair = (*const ValueKind, *const ValueKind);

fn equal_tracked(a: &Value, b: &Value, in_progress: &mut Vec<PtrPair>) -> bool {
    use ValueKind::*;
    match (&*a.0, &*b.0) {
        (Null, Null) => true,
        (Number(x), Number(y)) => x == y,
        (String(x), String(y)) => x == y,
        (Boolean(x), Boolean(y)) => x == y,
        (Array(x), Array(y)) => {
            if a.ptr_eq(b) {
                return true;
            }
            let pair = (Rc::as_ptr(&a.0), Rc::as_ptr(&b.0));
            if in_progress.contains(&pair) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return false;
            }
            in_progress.push(pair);
            let equal = x
                .iter()
                .zip(y.iter())
                .all(|(l, r)| equal_tracked(l, r, in_progress));
            in_progress.pop();
            equal
        }
        (Record(_), Record(_))
        | (Function(_), Function(_))
        | (NativeFunction(_), NativeFunction(_))
        | (HostProxy(_), HostProxy(_)) => a.ptr_eq(b),
        (Null, Boolean(b)) | (Boolean(b), Null) => !*b,
        (Null, Number(n)) | (Number(n), Null) => *n == 0.0,
        (Number(n), String(s)) | (String(s), Number(n)) => {
            parse_float_prefix(s).is_some_and(|parsed| parsed == *n)
        }
        (Boolean(b), Number(n)) | (Number(n), Boolean(b)) => {
            (if *b { 1.0 } else { 0.0 }) == *n
        }
        _ => false,
    }
}

pub fn value_to_string(value: &Value) -> String {
    value.to_string()
}

/// Parses the longest numeric prefix of `text` after leading whitespace,
/// mirroring `parseFloat`. Returns `None` when no digits are present.
pub fn parse_float_prefix(text: &str) -> Option<f64> {
    let trimmed = text.trim_start();
    let unsigned = trimmed.trim_start_matches(['+', '-']);
    if unsigned.len() + 1 < trimmed.len() {
        return None;
    }
    if unsigned.starts_with("Infinity") {
        let negative = trimmed.starts_with('-');
        return Some(if negative {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }

    let bytes = trimmed.as_bytes();
    let mut end = trimmed.len() - unsigned.len();
    let mut digits = 0;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        digits += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return None;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    trimmed[..end].parse().ok()
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.into()
    } else if n == 0.0 {
        "0".into()
    } else {
        n.to_string()
    }
}

/// Writes `value`, quoting strings when `quoted`. A collection already on
/// the `open` stack is written as `[...]` or `{...}`.
fn render(
    f: &mut fmt::Formatter<'_>,
    value: &Value,
    quoted: bool,
    open: &mut Vec<*const ValueKind>,
) -> fmt::Result {
    let ptr = Rc::as_ptr(&value.0);
    match &*value.0 {
        ValueKind::Null => write!(f, "null"),
        ValueKind::Boolean(b) => write!(f, "{b}"),
        ValueKind::Number(n) => write!(f, "{}", format_number(*n)),
        ValueKind::String(s) if quoted => write!(f, "{s:?}"),
        ValueKind::String(s) => write!(f, "{s}"),
        ValueKind::Array(_) if open.contains(&ptr) => write!(f, "[...]"),
        ValueKind::Record(_) if open.contains(&ptr) => write!(f, "{{...}}"),
        ValueKind::Array(values) => {
            open.push(ptr);
            write!(f, "[")?;
            for (idx, item) in values.borrow().iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                render(f, item, quoted, open)?;
            }
            open.pop();
            write!(f, "]")
        }
        ValueKind::Record(entries) => {
            open.push(ptr);
            write!(f, "{{")?;
            for (idx, (key, item)) in entries.borrow().iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                if quoted {
                    write!(f, "{key:?}: ")?;
                } else {
                    write!(f, "{key}: ")?;
                }
                render(f, item, quoted, open)?;
            }
            open.pop();
            write!(f, "}}")
        }
        ValueKind::Function(fun) => write!(f, "<function {}>", fun.name),
        ValueKind::NativeFunction(fun) => write!(f, "<native function {}>", fun.name),
        ValueKind::Return(inner) if quoted => {
            write!(f, "Return(")?;
            render(f, inner, quoted, open)?;
            write!(f, ")")
        }
        ValueKind::Return(inner) => render(f, inner, quoted, open),
        ValueKind::HostProxy(proxy) => write!(f, "<host module {}>", proxy.module_name),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(f, self, true, &mut Vec::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(f, self, false, &mut Vec::new())
    }
}
