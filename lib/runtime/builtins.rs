use anyhow::{anyhow, bail, Result};

use crate::object::{BuiltinFunction, Object};

/// Builtins are addressed by their index in this table, so entries may only
/// ever be appended.
pub static BUILTINS: [BuiltinFunction; 7] = [
    BuiltinFunction {
        name: "len",
        function: len_fn,
    },
    BuiltinFunction {
        name: "str",
        function: str_fn,
    },
    BuiltinFunction {
        name: "type",
        function: type_fn,
    },
    BuiltinFunction {
        name: "first",
        function: first_fn,
    },
    BuiltinFunction {
        name: "last",
        function: last_fn,
    },
    BuiltinFunction {
        name: "rest",
        function: rest_fn,
    },
    BuiltinFunction {
        name: "push",
        function: push_fn,
    },
];

fn check_arity(name: &str, args: &[Object], want: usize) -> Result<()> {
    if args.len() != want {
        bail!(
            "wrong number of arguments for {}: want={}, got={}",
            name,
            want,
            args.len()
        );
    }
    Ok(())
}

fn len_fn(args: Vec<Object>) -> Result<Object> {
    check_arity("len", &args, 1)?;

    match &args[0] {
        Object::String(value) => Ok(Object::Integer(value.chars().count() as i64)),
        Object::Array(value) => Ok(Object::Integer(value.len() as i64)),
        other => Err(anyhow!("argument to `len` not supported, got {}", other.object_type())),
    }
}

fn str_fn(args: Vec<Object>) -> Result<Object> {
    check_arity("str", &args, 1)?;
    Ok(Object::String(args[0].to_string()))
}

fn type_fn(args: Vec<Object>) -> Result<Object> {
    check_arity("type", &args, 1)?;
    Ok(Object::String(args[0].object_type().name().to_string()))
}

fn first_fn(args: Vec<Object>) -> Result<Object> {
    check_arity("first", &args, 1)?;

    match &args[0] {
        Object::Array(value) => Ok(value.first().cloned().unwrap_or(Object::Null)),
        other => Err(anyhow!("argument to `first` not supported, got {}", other.object_type())),
    }
}

fn last_fn(args: Vec<Object>) -> Result<Object> {
    check_arity("last", &args, 1)?;

    match &args[0] {
        Object::Array(value) => Ok(value.last().cloned().unwrap_or(Object::Null)),
        other => Err(anyhow!("argument to `last` not supported, got {}", other.object_type())),
    }
}

fn rest_fn(args: Vec<Object>) -> Result<Object> {
    check_arity("rest", &args, 1)?;

    match &args[0] {
        Object::Array(value) if value.is_empty() => Ok(Object::Null),
        Object::Array(value) => Ok(Object::Array(value[1..].to_vec())),
        other => Err(anyhow!("argument to `rest` not supported, got {}", other.object_type())),
    }
}

fn push_fn(args: Vec<Object>) -> Result<Object> {
    check_arity("push", &args, 2)?;

    match (&args[0], &args[1]) {
        (Object::Array(arr), value) => {
            let mut new_array = arr.clone();
            new_array.push(value.clone());
            Ok(Object::Array(new_array))
        }
        (other, _) => Err(anyhow!("argument to `push` not supported, got {}", other.object_type())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Object>) -> Result<Object> {
        let builtin = BUILTINS.iter().find(|builtin| builtin.name == name).unwrap();
        (builtin.function)(args)
    }

    #[test]
    fn test_builtins() {
        let array = Object::Array(vec![Object::Integer(1), Object::Integer(2)]);
        let tests = vec![
            ("len", vec![Object::String("héllo".to_string())], Object::Integer(5)),
            ("len", vec![array.clone()], Object::Integer(2)),
            ("str", vec![array.clone()], Object::String("[1, 2]".to_string())),
            ("type", vec![Object::Boolean(true)], Object::String("Boolean".to_string())),
            ("first", vec![array.clone()], Object::Integer(1)),
            ("last", vec![array.clone()], Object::Integer(2)),
            ("rest", vec![array.clone()], Object::Array(vec![Object::Integer(2)])),
            ("rest", vec![Object::Array(vec![])], Object::Null),
            (
                "push",
                vec![array, Object::Integer(3)],
                Object::Array(vec![Object::Integer(1), Object::Integer(2), Object::Integer(3)]),
            ),
        ];

        for (name, args, expected) in tests {
            assert_eq!(call(name, args).unwrap(), expected, "{name}");
        }
    }

    #[test]
    fn test_builtin_errors() {
        let tests = vec![
            ("len", vec![], "wrong number of arguments for len: want=1, got=0"),
            ("len", vec![Object::Integer(1)], "argument to `len` not supported, got Int"),
            ("push", vec![Object::Null, Object::Null], "argument to `push` not supported, got Null"),
        ];

        for (name, args, expected) in tests {
            assert_eq!(call(name, args).unwrap_err().to_string(), expected);
        }
    }
}
