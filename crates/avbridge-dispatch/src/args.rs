use std::fmt::Display;

use avbridge_engine::{Handle, Rational};
use avbridge_marshal::Value;

use crate::error::{BridgeError, Result};

/// Positional arguments of one call. Missing trailing arguments read as
/// [`Value::Null`].
pub(crate) struct Args {
    function: &'static str,
    index: usize,
    items: std::vec::IntoIter<Value>,
}

impl Args {
    pub fn new(function: &'static str, args: Vec<Value>) -> Self {
        Self {
            function,
            index: 0,
            items: args.into_iter(),
        }
    }

    pub fn next(&mut self) -> Value {
        self.index += 1;
        self.items.next().unwrap_or_default()
    }

    pub fn bad(&self, reason: impl Display) -> BridgeError {
        BridgeError::BadArgument {
            function: self.function.to_string(),
            index: self.index.saturating_sub(1),
            reason: reason.to_string(),
        }
    }

    pub fn handle(&mut self) -> Result<Handle> {
        let value = self.next();
        value.as_handle().map_err(|e| self.bad(e))
    }

    pub fn int(&mut self) -> Result<i64> {
        let value = self.next();
        value.as_int().map_err(|e| self.bad(e))
    }

    pub fn int_or(&mut self, default: i64) -> Result<i64> {
        match self.next() {
            Value::Null => Ok(default),
            value => value.as_int().map_err(|e| self.bad(e)),
        }
    }

    pub fn bool_or(&mut self, default: bool) -> Result<bool> {
        match self.next() {
            Value::Null => Ok(default),
            value => value.as_bool().map_err(|e| self.bad(e)),
        }
    }

    pub fn string(&mut self) -> Result<String> {
        match self.next() {
            Value::Str(s) => Ok(s),
            value => Err(self.bad(format_args!("expected string, found {}", value.kind()))),
        }
    }

    pub fn opt_string(&mut self) -> Result<Option<String>> {
        match self.next() {
            Value::Null => Ok(None),
            Value::Str(s) => Ok(Some(s)),
            value => Err(self.bad(format_args!("expected string, found {}", value.kind()))),
        }
    }

    /// A list argument; null reads as empty.
    pub fn list(&mut self) -> Result<Vec<Value>> {
        match self.next() {
            Value::Null => Ok(Vec::new()),
            value => value.into_list().map_err(|e| self.bad(e)),
        }
    }
}

/// Read an integer option from a map value.
pub(crate) fn opt_int(options: &Value, key: &str) -> Option<i64> {
    options.get(key).and_then(|v| v.as_int().ok())
}

pub(crate) fn opt_bool(options: &Value, key: &str) -> bool {
    options.get(key).is_some_and(|v| v.as_bool().unwrap_or(false))
}

pub(crate) fn opt_str<'a>(options: &'a Value, key: &str) -> Option<&'a str> {
    options.get(key).and_then(|v| v.as_str().ok())
}

/// A `[num, den]` pair.
pub(crate) fn opt_rational(options: &Value, key: &str) -> Option<Rational> {
    let pair = options.get(key)?.as_list().ok()?;
    match pair {
        [num, den] => Some(Rational::new(
            i32::try_from(num.as_int().ok()?).ok()?,
            i32::try_from(den.as_int().ok()?).ok()?,
        )),
        _ => None,
    }
}

pub(crate) fn rational_value(r: Rational) -> Value {
    Value::List(vec![Value::Int(r.num as i64), Value::Int(r.den as i64)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_arguments_read_as_null() {
        let mut args = Args::new("f", vec![Value::Int(7)]);
        assert_eq!(args.handle().unwrap(), Handle(7));
        assert_eq!(args.int_or(3).unwrap(), 3);
        assert!(args.list().unwrap().is_empty());
    }

    #[test]
    fn type_errors_name_the_position() {
        let mut args = Args::new("ff_error", vec![Value::Int(1), Value::from("x")]);
        args.next();
        let err = args.int().unwrap_err();
        assert!(matches!(err, BridgeError::BadArgument { index: 1, .. }));
        assert!(err.to_string().starts_with("ff_error: bad argument 1"));
    }

    #[test]
    fn options_are_read_from_maps() {
        let options = Value::map([
            ("fin", Value::Bool(true)),
            ("limit", Value::Int(4096)),
            ("time_base", Value::from(vec![1i64, 48000])),
        ]);
        assert!(opt_bool(&options, "fin"));
        assert!(!opt_bool(&options, "unify"));
        assert_eq!(opt_int(&options, "limit"), Some(4096));
        assert_eq!(opt_rational(&options, "time_base"), Some(Rational::new(1, 48000)));
    }
}
