use crate::{
    diagnostics::{Diagnostic, EzError, Result},
    environment::EnvironmentRef,
    runtime::ExecutionContext,
    value::{Value, ValueKind, parse_float_prefix},
};

type Builtin = fn(&mut ExecutionContext<'_>, &[Value]) -> Result<Value>;

/// Installs the built-in functions into `env`.
pub fn install(env: &EnvironmentRef) {
    let builtins: [(&str, Option<usize>, Builtin); 19] = [
        ("print", None, io_print),
        ("length", Some(1), collections_len),
        ("len", Some(1), collections_len),
        ("type_of", Some(1), type_of),
        ("str", Some(1), to_str),
        ("num", Some(1), to_num),
        ("push", Some(2), collections_push),
        ("pop", Some(1), collections_pop),
        ("keys", Some(1), collections_keys),
        ("range", None, collections_range),
        ("load_module", Some(1), modules_load),
        ("unload_module", Some(1), modules_unload),
        ("reload_module", Some(1), modules_reload),
        ("get_module", Some(1), modules_get),
        ("module_exists", Some(1), modules_exists),
        ("list_modules", Some(0), modules_list),
        ("export", Some(2), modules_export),
        ("register_handler", None, modules_register_handler),
        ("current_module", Some(0), modules_current),
    ];

    let mut scope = env.borrow_mut();
    for (name, arity, callback) in builtins {
        scope.define(name, Value::native(name, arity, callback));
    }
}

fn runtime_error(message: impl Into<String>) -> EzError {
    EzError::from(Diagnostic::runtime(message))
}

fn arity_error(name: &str, expected: &str, args: &[Value]) -> EzError {
    runtime_error(format!(
        "{name}() expects {expected} argument(s), got {}",
        args.len()
    ))
}

fn expect_number(value: &Value, name: &str) -> Result<f64> {
    value.as_number().ok_or_else(|| {
        runtime_error(format!(
            "{name}() expects a number, got {}",
            value.type_name()
        ))
    })
}

fn io_print(_: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    let line = args
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    println!("{line}");
    Ok(Value::null())
}

fn collections_len(_: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    let len = match args[0].kind() {
        ValueKind::String(s) => s.chars().count(),
        ValueKind::Array(values) => values.borrow().len(),
        ValueKind::Record(entries) => entries.borrow().len(),
        _ => {
            return Err(runtime_error(format!(
                "length() expects a string, array or object, got {}",
                args[0].type_name()
            )));
        }
    };
    Ok(Value::number(len as f64))
}

fn type_of(_: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::string(args[0].type_name()))
}

fn to_str(_: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::string(args[0].to_string()))
}

/// Numeric conversion with `parseFloat` rules for strings; unconvertible
/// input yields `NaN`.
fn to_num(_: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    let number = match args[0].kind() {
        ValueKind::Number(n) => *n,
        ValueKind::Boolean(b) => f64::from(u8::from(*b)),
        ValueKind::String(s) => parse_float_prefix(s).unwrap_or(f64::NAN),
        _ => f64::NAN,
    };
    Ok(Value::number(number))
}

fn collections_push(_: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Array(values) => {
            let mut values = values.borrow_mut();
            values.push(args[1].clone());
            Ok(Value::number(values.len() as f64))
        }
        _ => Err(runtime_error("push() expects an array as first argument")),
    }
}

fn collections_pop(_: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Array(values) => Ok(values.borrow_mut().pop().unwrap_or_else(Value::null)),
        _ => Err(runtime_error("pop() expects an array")),
    }
}

fn collections_keys(_: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    let keys: Vec<Value> = match args[0].kind() {
        ValueKind::Record(entries) => entries.borrow().keys().map(Value::string).collect(),
        ValueKind::HostProxy(proxy) => proxy.members.borrow().keys().map(Value::string).collect(),
        _ => {
            return Err(runtime_error(format!(
                "keys() expects an object, got {}",
                args[0].type_name()
            )));
        }
    };
    Ok(Value::array(keys))
}

/// `range(end)` or `range(start, end)`, counting up by one.
fn collections_range(_: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    let (start, end) = match args {
        [end] => (0.0, expect_number(end, "range")?),
        [start, end] => (expect_number(start, "range")?, expect_number(end, "range")?),
        _ => return Err(arity_error("range", "1 or 2", args)),
    };
    let mut values = Vec::new();
    let mut current = start;
    while current < end {
        values.push(Value::number(current));
        current += 1.0;
    }
    Ok(Value::array(values))
}

fn modules_load(ctx: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    let path = args[0].expect_string("load_module()")?;
    ctx.modules.load_module(&path, &mut *ctx.evaluator)
}

fn modules_unload(ctx: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    let name = args[0].expect_string("unload_module()")?;
    Ok(Value::boolean(ctx.modules.unload_module(&name)))
}

fn modules_reload(ctx: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    let name = args[0].expect_string("reload_module()")?;
    ctx.modules.reload_module(&name, &mut *ctx.evaluator)
}

fn modules_get(ctx: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    let name = args[0].expect_string("get_module()")?;
    if !ctx.modules.module_exists(&name) {
        return Ok(Value::null());
    }
    ctx.modules.get_module(&name)
}

fn modules_exists(ctx: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    let name = args[0].expect_string("module_exists()")?;
    Ok(Value::boolean(ctx.modules.module_exists(&name)))
}

fn modules_list(ctx: &mut ExecutionContext<'_>, _: &[Value]) -> Result<Value> {
    Ok(Value::array(ctx.modules.list_modules()))
}

fn modules_current(ctx: &mut ExecutionContext<'_>, _: &[Value]) -> Result<Value> {
    Ok(ctx
        .modules
        .current_module()
        .map(Value::string)
        .unwrap_or_else(Value::null))
}

fn loading_module(ctx: &ExecutionContext<'_>, name: &str) -> Result<String> {
    ctx.modules
        .current_module()
        .map(str::to_string)
        .ok_or_else(|| runtime_error(format!("{name}() can only be called while a module loads")))
}

fn modules_export(ctx: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    let module = loading_module(ctx, "export")?;
    let export_name = args[0].expect_string("export()")?;
    ctx.modules
        .export_value(&module, &export_name, args[1].clone())?;
    Ok(args[1].clone())
}

fn modules_register_handler(ctx: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Value> {
    let (module, handler) = match args {
        [handler] => (
            loading_module(ctx, "register_handler")?,
            handler.expect_string("register_handler()")?,
        ),
        [module, handler] => (
            module.expect_string("register_handler()")?,
            handler.expect_string("register_handler()")?,
        ),
        _ => return Err(arity_error("register_handler", "1 or 2", args)),
    };
    ctx.modules.register_event_handler(&module, &handler)?;
    Ok(Value::null())
}
