//! Native functions installed into the interpreter's globals.

use std::collections::HashMap;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, ErrorKind, Result};
use crate::value::{NativeFn, NativeFunction, Value};

pub fn install(globals: &mut HashMap<String, Value>) {
    let mut define = |name: &'static str, function: NativeFn| {
        globals.insert(
            name.to_string(),
            Value::Native(Rc::new(NativeFunction { name, function })),
        );
    };
    define("clock", clock);
    define("sleep", sleep);
}

/// Seconds since the Unix epoch.
fn clock(_argc: u8, _args: &[Value]) -> Result<Value> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    Ok(Value::Number(elapsed.as_secs_f64()))
}

/// Blocks the whole interpreter for the given number of seconds; there is no
/// concurrency to yield to. Returns whether the sleep actually happened.
fn sleep(argc: u8, args: &[Value]) -> Result<Value> {
    if argc != 1 {
        return Err(Error::without_location(ErrorKind::ArityMismatch {
            expected: 1,
            got: argc,
        }));
    }
    let seconds = args[0].as_number().ok_or_else(|| {
        Error::without_location(ErrorKind::TypeMismatch("sleep expects a number of seconds."))
    })?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Ok(Value::Bool(false));
    }
    thread::sleep(Duration::from_secs_f64(seconds));
    Ok(Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_defines_clock_and_sleep() {
        let mut globals = HashMap::new();
        install(&mut globals);
        assert!(matches!(globals.get("clock"), Some(Value::Native(_))));
        assert!(matches!(globals.get("sleep"), Some(Value::Native(_))));
    }

    #[test]
    fn clock_moves_forward() {
        let a = clock(0, &[]).unwrap().as_number().unwrap();
        let b = clock(0, &[]).unwrap().as_number().unwrap();
        assert!(a > 0.0);
        assert!(b >= a);
    }

    #[test]
    fn sleep_reports_success() {
        assert_eq!(sleep(1, &[Value::Number(0.0)]).unwrap(), Value::Bool(true));
        assert_eq!(
            sleep(1, &[Value::Number(-1.0)]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn sleep_rejects_bad_arguments() {
        let err = sleep(1, &[Value::string("soon")]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::TypeMismatch(_)));
        let err = sleep(0, &[]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ArityMismatch { .. }));
    }
}
