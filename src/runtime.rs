use std::{
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::{
    ast::{BinaryOp, Expr, ExprKind, Literal, Stmt, StmtKind, UnaryOp},
    config::RuntimeConfig,
    diagnostics::{Diagnostic, EzError, Result, SourceSpan},
    environment::{Environment, EnvironmentRef},
    modules::ModuleManager,
    parser,
    stdlib,
    value::{UserFunction, Value, ValueKind, value_to_string, values_equal},
};

/// Statement execution seam consumed by the module manager.
pub trait Evaluator {
    /// Executes one statement in `env`. A `return` surfaces as a
    /// [`Value::return_signal`] rather than unwinding.
    fn execute_statement(
        &mut self,
        stmt: &Stmt,
        env: &EnvironmentRef,
        modules: &mut ModuleManager,
    ) -> Result<Value>;
}

/// Everything a native function may touch while it runs.
pub struct ExecutionContext<'a> {
    pub env: &'a EnvironmentRef,
    pub modules: &'a mut ModuleManager,
    pub evaluator: &'a mut dyn Evaluator,
}

/// Tree-walking evaluator for the reference front end.
#[derive(Debug, Clone)]
pub struct Executor {
    max_call_depth: usize,
    depth: usize,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(RuntimeConfig::default().max_call_depth)
    }
}

impl Evaluator for Executor {
    fn execute_statement(
        &mut self,
        stmt: &Stmt,
        env: &EnvironmentRef,
        modules: &mut ModuleManager,
    ) -> Result<Value> {
        self.execute(stmt, env, modules)
    }
}

impl Executor {
    pub fn new(max_call_depth: usize) -> Self {
        Self {
            max_call_depth,
            depth: 0,
        }
    }

    fn execute(
        &mut self,
        stmt: &Stmt,
        env: &EnvironmentRef,
        modules: &mut ModuleManager,
    ) -> Result<Value> {
        match &stmt.kind {
            StmtKind::VarDecl { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr, env, modules)?,
                    None => Value::null(),
                };
                env.borrow_mut().declare(name.clone(), value)?;
                Ok(Value::null())
            }
            StmtKind::Function { name, params, body } => {
                let function = UserFunction {
                    name: name.clone(),
                    params: params.clone(),
                    body: Rc::clone(body),
                    closure: Rc::clone(env),
                    origin: modules.current_file().map(Path::to_path_buf),
                };
                env.borrow_mut()
                    .declare(name.clone(), Value::function(function))?;
                Ok(Value::null())
            }
            StmtKind::Import { path, alias } => {
                let module = modules.load_module(path, self)?;
                let binding = match alias {
                    Some(alias) => alias.clone(),
                    None => module
                        .get_property("__name__")
                        .and_then(|name| name.as_str().map(str::to_string))
                        .ok_or_else(|| {
                            EzError::runtime("imported module has no `__name__`", stmt.span)
                        })?,
                };
                env.borrow_mut().define(binding, module);
                Ok(Value::null())
            }
            StmtKind::Expr(expr) => self.evaluate(expr, env, modules),
            StmtKind::Block(items) => self.execute_block(items, &Environment::extend(env), modules),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition, env, modules)?.is_truthy() {
                    self.execute_block(then_branch, &Environment::extend(env), modules)
                } else if let Some(branch) = else_branch {
                    self.execute_block(branch, &Environment::extend(env), modules)
                } else {
                    Ok(Value::null())
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition, env, modules)?.is_truthy() {
                    let result = self.execute_block(body, &Environment::extend(env), modules)?;
                    if result.is_return_signal() {
                        return Ok(result);
                    }
                }
                Ok(Value::null())
            }
            StmtKind::For {
                binding,
                iterable,
                body,
            } => {
                let iterable_value = self.evaluate(iterable, env, modules)?;
                for item in iterate(&iterable_value, iterable.span)? {
                    let scope = Environment::extend(env);
                    scope.borrow_mut().define(binding.clone(), item);
                    let result = self.execute_block(body, &scope, modules)?;
                    if result.is_return_signal() {
                        return Ok(result);
                    }
                }
                Ok(Value::null())
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.evaluate(expr, env, modules)?,
                    None => Value::null(),
                };
                Ok(Value::return_signal(value))
            }
        }
    }

    /// Runs `statements` directly in `scope`; callers create the scope.
    fn execute_block(
        &mut self,
        statements: &[Stmt],
        scope: &EnvironmentRef,
        modules: &mut ModuleManager,
    ) -> Result<Value> {
        let mut last = Value::null();
        for stmt in statements {
            let value = self.execute(stmt, scope, modules)?;
            if value.is_return_signal() {
                return Ok(value);
            }
            last = value;
        }
        Ok(last)
    }

    fn evaluate(
        &mut self,
        expr: &Expr,
        env: &EnvironmentRef,
        modules: &mut ModuleManager,
    ) -> Result<Value> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(literal_value(literal)),
            ExprKind::Variable(name) => Environment::lookup(env, name),
            ExprKind::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                if !self.evaluate(left, env, modules)?.is_truthy() {
                    return Ok(Value::boolean(false));
                }
                let right = self.evaluate(right, env, modules)?;
                Ok(Value::boolean(right.is_truthy()))
            }
            ExprKind::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                if self.evaluate(left, env, modules)?.is_truthy() {
                    return Ok(Value::boolean(true));
                }
                let right = self.evaluate(right, env, modules)?;
                Ok(Value::boolean(right.is_truthy()))
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.evaluate(left, env, modules)?;
                let right = self.evaluate(right, env, modules)?;
                binary(*op, &left, &right, expr.span)
            }
            ExprKind::Unary { op, expr: operand } => {
                let value = self.evaluate(operand, env, modules)?;
                match op {
                    UnaryOp::Not => Ok(Value::boolean(!value.is_truthy())),
                    UnaryOp::Negate => match value.as_number() {
                        Some(n) => Ok(Value::number(-n)),
                        None => Err(EzError::runtime(
                            format!("unary `-` expects a number, got {}", value.type_name()),
                            expr.span,
                        )),
                    },
                }
            }
            ExprKind::Assign { target, value } => {
                let value = self.evaluate(value, env, modules)?;
                self.assign(target, value.clone(), env, modules)?;
                Ok(value)
            }
            ExprKind::Call { callee, args } => {
                let callee = self.evaluate(callee, env, modules)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.evaluate(arg, env, modules)?);
                }
                self.call_value(&callee, &values, env, modules, expr.span)
            }
            ExprKind::ArrayLiteral(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.evaluate(element, env, modules)?);
                }
                Ok(Value::array(values))
            }
            ExprKind::RecordLiteral(entries) => {
                let mut record = IndexMap::new();
                for (key, value_expr) in entries {
                    let value = self.evaluate(value_expr, env, modules)?;
                    record.insert(key.clone(), value);
                }
                Ok(Value::record(record))
            }
            ExprKind::Group(inner) => self.evaluate(inner, env, modules),
            ExprKind::Index { target, index } => {
                let target = self.evaluate(target, env, modules)?;
                let index = self.evaluate(index, env, modules)?;
                read_index(&target, &index, expr.span)
            }
            ExprKind::Field { target, field } => {
                let target = self.evaluate(target, env, modules)?;
                read_field(&target, field, expr.span)
            }
        }
    }

    fn assign(
        &mut self,
        target: &Expr,
        value: Value,
        env: &EnvironmentRef,
        modules: &mut ModuleManager,
    ) -> Result<()> {
        match &target.kind {
            ExprKind::Variable(name) => Environment::assign(env, name, value),
            ExprKind::Field {
                target: owner,
                field,
            } => {
                let owner = self.evaluate(owner, env, modules)?;
                write_key(&owner, field, value, target.span)
            }
            ExprKind::Index {
                target: owner,
                index,
            } => {
                let owner = self.evaluate(owner, env, modules)?;
                let index = self.evaluate(index, env, modules)?;
                match (owner.kind(), index.kind()) {
                    (ValueKind::Array(elements), ValueKind::Number(n)) => {
                        let mut elements = elements.borrow_mut();
                        let slot = array_slot(*n, elements.len(), target.span)?;
                        elements[slot] = value;
                        Ok(())
                    }
                    (_, ValueKind::String(key)) => write_key(&owner, key, value, target.span),
                    _ => Err(EzError::runtime(
                        format!(
                            "cannot assign through index of {} with {}",
                            owner.type_name(),
                            index.type_name()
                        ),
                        target.span,
                    )),
                }
            }
            _ => Err(EzError::runtime("invalid assignment target", target.span)),
        }
    }

    /// Invokes a user or native function with already evaluated arguments.
    pub fn call_value(
        &mut self,
        callee: &Value,
        args: &[Value],
        env: &EnvironmentRef,
        modules: &mut ModuleManager,
        span: SourceSpan,
    ) -> Result<Value> {
        match callee.kind() {
            ValueKind::NativeFunction(native) => {
                let mut ctx = ExecutionContext {
                    env,
                    modules,
                    evaluator: self,
                };
                native.call(&mut ctx, args)
            }
            ValueKind::Function(function) => {
                if args.len() != function.params.len() {
                    return Err(EzError::runtime(
                        format!(
                            "function '{}' expects {} argument(s), got {}",
                            function.name,
                            function.params.len(),
                            args.len()
                        ),
                        span,
                    ));
                }
                if self.depth >= self.max_call_depth {
                    return Err(EzError::runtime(
                        format!("maximum call depth of {} exceeded", self.max_call_depth),
                        span,
                    ));
                }
                let scope = Environment::extend(&function.closure);
                {
                    let mut frame = scope.borrow_mut();
                    for (param, arg) in function.params.iter().zip(args) {
                        frame.define(param.clone(), arg.clone());
                    }
                }
                self.depth += 1;
                let result = self.execute_block(&function.body, &scope, modules);
                self.depth -= 1;
                let result = result.map_err(|err| match &function.origin {
                    Some(origin) => err.with_origin(origin),
                    None => err,
                })?;
                if result.is_return_signal() {
                    Ok(result.into_returned())
                } else {
                    Ok(Value::null())
                }
            }
            _ => Err(EzError::runtime(
                format!("value of type {} is not callable", callee.type_name()),
                span,
            )),
        }
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Number(n) => Value::number(*n),
        Literal::String(s) => Value::string(s.clone()),
        Literal::Bool(b) => Value::boolean(*b),
        Literal::Null => Value::null(),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value, span: SourceSpan) -> Result<Value> {
    use BinaryOp::*;
    let numeric: fn(f64, f64) -> Value = match op {
        Equal => return Ok(Value::boolean(values_equal(left, right))),
        NotEqual => return Ok(Value::boolean(!values_equal(left, right))),
        And => return Ok(Value::boolean(left.is_truthy() && right.is_truthy())),
        Or => return Ok(Value::boolean(left.is_truthy() || right.is_truthy())),
        Add if left.as_str().is_some() || right.as_str().is_some() => {
            return Ok(Value::string(format!(
                "{}{}",
                value_to_string(left),
                value_to_string(right)
            )));
        }
        Add => |a, b| Value::number(a + b),
        Sub => |a, b| Value::number(a - b),
        Mul => |a, b| Value::number(a * b),
        Div => |a, b| Value::number(a / b),
        Mod => |a, b| Value::number(a % b),
        Less => |a, b| Value::boolean(a < b),
        LessEqual => |a, b| Value::boolean(a <= b),
        Greater => |a, b| Value::boolean(a > b),
        GreaterEqual => |a, b| Value::boolean(a >= b),
    };

    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => Ok(numeric(a, b)),
        _ => {
            let what = if matches!(op, Less | LessEqual | Greater | GreaterEqual) {
                "comparison"
            } else {
                "arithmetic"
            };
            Err(EzError::runtime(
                format!(
                    "{what} requires numbers, got {} and {}",
                    left.type_name(),
                    right.type_name()
                ),
                span,
            ))
        }
    }
}

fn array_slot(index: f64, len: usize, span: SourceSpan) -> Result<usize> {
    let floored = index.floor();
    if floored < 0.0 || floored >= len as f64 || floored.is_nan() {
        return Err(EzError::runtime(
            format!("index {} out of bounds for length {len}", Value::number(index)),
            span,
        ));
    }
    Ok(floored as usize)
}

fn read_index(target: &Value, index: &Value, span: SourceSpan) -> Result<Value> {
    match (target.kind(), index.kind()) {
        (ValueKind::Array(elements), ValueKind::Number(n)) => {
            let elements = elements.borrow();
            let slot = array_slot(*n, elements.len(), span)?;
            Ok(elements[slot].clone())
        }
        (ValueKind::String(text), ValueKind::Number(n)) => {
            let slot = array_slot(*n, text.chars().count(), span)?;
            Ok(text
                .chars()
                .nth(slot)
                .map(|ch| Value::string(ch.to_string()))
                .unwrap_or_else(Value::null))
        }
        (ValueKind::Record(_) | ValueKind::HostProxy(_), ValueKind::String(key)) => {
            Ok(target.get_property(key).unwrap_or_else(Value::null))
        }
        _ => Err(EzError::runtime(
            format!(
                "cannot index {} with {}",
                target.type_name(),
                index.type_name()
            ),
            span,
        )),
    }
}

fn read_field(target: &Value, field: &str, span: SourceSpan) -> Result<Value> {
    match target.kind() {
        ValueKind::Record(_) | ValueKind::HostProxy(_) => {
            Ok(target.get_property(field).unwrap_or_else(Value::null))
        }
        _ => Err(EzError::runtime(
            format!("cannot read property '{field}' of {}", target.type_name()),
            span,
        )),
    }
}

fn write_key(owner: &Value, key: &str, value: Value, span: SourceSpan) -> Result<()> {
    match owner.kind() {
        ValueKind::Record(entries) => {
            entries.borrow_mut().insert(key.to_string(), value);
            Ok(())
        }
        ValueKind::HostProxy(proxy) => {
            proxy.members.borrow_mut().insert(key.to_string(), value);
            Ok(())
        }
        _ => Err(EzError::runtime(
            format!("cannot set property '{key}' on {}", owner.type_name()),
            span,
        )),
    }
}

/// Snapshot of the items a `for` loop visits.
fn iterate(value: &Value, span: SourceSpan) -> Result<Vec<Value>> {
    match value.kind() {
        ValueKind::Array(elements) => Ok(elements.borrow().clone()),
        ValueKind::String(text) => Ok(text
            .chars()
            .map(|ch| Value::string(ch.to_string()))
            .collect()),
        ValueKind::Record(entries) => Ok(entries
            .borrow()
            .keys()
            .map(|key| Value::string(key.clone()))
            .collect()),
        _ => Err(EzError::runtime(
            format!("value of type {} is not iterable", value.type_name()),
            span,
        )),
    }
}

/// Owns the global scope, the module manager and the evaluator.
pub struct Interpreter {
    config: RuntimeConfig,
    globals: EnvironmentRef,
    modules: ModuleManager,
    executor: Executor,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Built-ins live in a root scope; scripts and modules run in children of
    /// it, so user code may shadow them.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let builtins = Environment::new();
        stdlib::install(&builtins);
        let globals = Environment::extend(&builtins);
        let modules = ModuleManager::new(Rc::clone(&globals), config.modules.clone());
        let executor = Executor::new(config.max_call_depth);
        Self {
            config,
            globals,
            modules,
            executor,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Evaluates `source` in the global scope and returns the value of the
    /// last statement, or the value of a top-level `return`.
    pub fn eval_source(&mut self, source: &str) -> Result<Value> {
        let program = parser::parse_program(source)?;
        debug!(statements = program.len(), "evaluating program");
        let mut last = Value::null();
        for stmt in &program {
            let value = self
                .executor
                .execute_statement(stmt, &self.globals, &mut self.modules)?;
            if value.is_return_signal() {
                return Ok(value.into_returned());
            }
            last = value;
        }
        Ok(last)
    }

    /// Runs a script file. Relative imports inside it resolve against the
    /// script's directory.
    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)?;
        let absolute = std::path::absolute(path)?;
        self.modules
            .set_script_dir(absolute.parent().map(PathBuf::from));
        info!(script = %absolute.display(), "running script");
        self.eval_source(&source)
    }

    pub fn load_module(&mut self, path: impl AsRef<Path>) -> Result<Value> {
        self.modules.load_module(path, &mut self.executor)
    }

    pub fn unload_module(&mut self, name: &str) -> bool {
        self.modules.unload_module(name)
    }

    pub fn reload_module(&mut self, name: &str) -> Result<Value> {
        self.modules.reload_module(name, &mut self.executor)
    }

    /// Calls a function value from the host, e.g. a module export.
    pub fn call_function(&mut self, callee: &Value, args: &[Value]) -> Result<Value> {
        self.executor.call_value(
            callee,
            args,
            &self.globals,
            &mut self.modules,
            SourceSpan::default(),
        )
    }

    pub fn modules(&self) -> &ModuleManager {
        &self.modules
    }

    pub fn modules_mut(&mut self) -> &mut ModuleManager {
        &mut self.modules
    }

    pub fn globals(&self) -> &EnvironmentRef {
        &self.globals
    }

    pub fn define_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.borrow_mut().define(name, value);
    }

    /// Formats an error with a `line:col` prefix when it carries a span into
    /// `source`. Spans from module files are left to the message.
    pub fn render_error(error: &EzError, source: &str) -> String {
        if let EzError::Diagnostic(Diagnostic {
            span: Some(span),
            origin: None,
            ..
        }) = error
        {
            if span.fits(source) {
                let (line, col) = span.line_col(source);
                return format!("{line}:{col}: {error}");
            }
        }
        error.to_string()
    }
}
