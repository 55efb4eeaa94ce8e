//! Function handlers available to served trees
//!
//! A tree description binds a function element to one of these by name,
//! e.g. `{ "identifier": "add", "func": "sum" }`.

use embertree_core::{FunctionRegistry, FunctionResult, Value};

pub fn registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry
        .register("echo", echo)
        .register("sum", sum)
        .register("concat", concat);
    registry
}

fn echo(arguments: &[Value]) -> FunctionResult {
    Ok(arguments.to_vec())
}

/// Integer sum when every argument is an integer, real sum otherwise
fn sum(arguments: &[Value]) -> FunctionResult {
    let integers = arguments
        .iter()
        .map(|a| match a {
            Value::Integer(i) => Some(*i),
            _ => None,
        })
        .collect::<Option<Vec<_>>>();
    if let Some(ints) = integers {
        let mut total: i64 = 0;
        for i in ints {
            total = total
                .checked_add(i)
                .ok_or_else(|| "integer overflow".to_string())?;
        }
        return Ok(vec![Value::Integer(total)]);
    }

    let mut total = 0.0;
    for argument in arguments {
        total += argument
            .as_f64()
            .ok_or_else(|| format!("not a number: {}", argument))?;
    }
    Ok(vec![Value::Real(total)])
}

fn concat(arguments: &[Value]) -> FunctionResult {
    let joined: String = arguments
        .iter()
        .map(|a| match a.as_str() {
            Some(s) => s.to_string(),
            None => a.to_string(),
        })
        .collect();
    Ok(vec![Value::String(joined)])
}
