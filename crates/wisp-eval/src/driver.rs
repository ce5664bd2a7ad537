//! Invocation driver: calls functions and exports from the outside.
//!
//! Every entry point checks its arguments against the callee's signature,
//! runs the callee to completion in quanta, copies the typed results out,
//! and resets the thread whether the call succeeded or trapped.

use tracing::{debug, trace};
use wisp_types::{Environment, ExternalKind, Func, Module, TypedValue};

use crate::error::{InvokeError, InvokeResult};
use crate::thread::{RunStatus, Thread};
use crate::trace::trace_pc;

/// Call function `func_index` with `args`.
pub fn run_function(
    env: &mut Environment,
    thread: &mut Thread,
    func_index: usize,
    args: &[TypedValue],
) -> InvokeResult<Vec<TypedValue>> {
    let func = env
        .funcs
        .get(func_index)
        .ok_or(InvokeError::InvalidFunctionIndex(func_index))?;
    let sig = env.sigs[func.sig_index()].clone();
    let args_match = args.len() == sig.param_types.len()
        && args.iter().zip(&sig.param_types).all(|(arg, &ty)| arg.ty == ty);
    if !args_match {
        return Err(InvokeError::ArgumentTypeMismatch);
    }

    debug!(func_index, signature = %sig, "invoking function");
    thread.reset();
    let outcome = invoke(env, thread, func_index, args).map(|()| {
        let mut results: Vec<TypedValue> = sig
            .result_types
            .iter()
            .rev()
            .map(|&ty| TypedValue::new(ty, thread.pop()))
            .collect();
        results.reverse();
        results
    });
    thread.reset();

    if let Err(err) = &outcome {
        debug!(func_index, error = %err, "invocation failed");
    }
    outcome
}

fn invoke(
    env: &mut Environment,
    thread: &mut Thread,
    func_index: usize,
    args: &[TypedValue],
) -> InvokeResult<()> {
    for arg in args {
        thread.push(arg.value)?;
    }

    let entry = match &env.funcs[func_index] {
        Func::Host(_) => None,
        Func::Defined(func) => Some(
            func.offset
                .ok_or(InvokeError::InvalidFunctionIndex(func_index))?,
        ),
    };
    let Some(offset) = entry else {
        thread.call_host(env, func_index)?;
        return Ok(());
    };

    thread.set_pc(offset);
    let call_stack_return_top = thread.call_stack_top();
    let tracing_enabled = thread.options().trace;
    let quantum = thread.options().quantum.max(1);
    loop {
        let status = if tracing_enabled {
            trace!("{}", trace_pc(env, thread));
            thread.run(env, 1, call_stack_return_top)?
        } else {
            thread.run(env, quantum, call_stack_return_top)?
        };
        if status == RunStatus::Returned {
            return Ok(());
        }
    }
}

/// Run the start function of `module_index`, if it declares one.
pub fn run_start_function(
    env: &mut Environment,
    thread: &mut Thread,
    module_index: usize,
) -> InvokeResult<()> {
    let start = env
        .modules
        .get(module_index)
        .and_then(Module::as_defined)
        .and_then(|module| module.start_func_index);
    if let Some(func_index) = start {
        run_function(env, thread, func_index, &[])?;
    }
    Ok(())
}

/// Call the function exported by `module_index` as `name`.
pub fn run_export(
    env: &mut Environment,
    thread: &mut Thread,
    module_index: usize,
    name: &str,
    args: &[TypedValue],
) -> InvokeResult<Vec<TypedValue>> {
    let func_index = find_export(env, module_index, name, ExternalKind::Func)?;
    run_function(env, thread, func_index, args)
}

/// Current value of the global exported by `module_index` as `name`.
pub fn get_global_export(
    env: &Environment,
    module_index: usize,
    name: &str,
) -> InvokeResult<TypedValue> {
    let global_index = find_export(env, module_index, name, ExternalKind::Global)?;
    Ok(env.globals[global_index].typed_value)
}

/// Call every exported function of `module_index` that takes no arguments,
/// in export order.
pub fn run_all_exports(
    env: &mut Environment,
    thread: &mut Thread,
    module_index: usize,
) -> Vec<(String, InvokeResult<Vec<TypedValue>>)> {
    let nullary: Vec<(String, usize)> = match env.modules.get(module_index) {
        Some(module) => module
            .exports
            .iter()
            .filter(|export| export.kind == ExternalKind::Func)
            .filter(|export| env.func_signature(export.index).param_types.is_empty())
            .map(|export| (export.name.clone(), export.index))
            .collect(),
        None => Vec::new(),
    };
    nullary
        .into_iter()
        .map(|(name, func_index)| {
            let result = run_function(env, thread, func_index, &[]);
            (name, result)
        })
        .collect()
}

fn find_export(
    env: &Environment,
    module_index: usize,
    name: &str,
    expected: ExternalKind,
) -> InvokeResult<usize> {
    let export = env
        .get_export(module_index, name)
        .ok_or_else(|| InvokeError::UnknownExport(name.to_string()))?;
    if export.kind != expected {
        return Err(InvokeError::ExportKindMismatch {
            name: name.to_string(),
            expected,
            actual: export.kind,
        });
    }
    Ok(export.index)
}
