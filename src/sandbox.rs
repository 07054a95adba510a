use std::cell::RefCell;

use base64::alphabet::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use boa_engine::property::Attribute;
use boa_engine::vm::RuntimeLimits;
use boa_engine::{Context, JsArgs, JsNativeError, JsString, JsValue, NativeFunction, Source};

use crate::error::EvalError;

/// A value returned from the sandbox, detached from the engine so no
/// engine handle leaks to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<EvalOutcome>),
    /// Anything that is not representable above (functions, plain
    /// objects, symbols).
    Opaque,
}

impl EvalOutcome {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Converts an array-of-strings result. Any non-string element
    /// makes the whole conversion fail.
    pub fn into_string_array(self) -> Option<Vec<String>> {
        match self {
            Self::Array(elements) => elements
                .into_iter()
                .map(EvalOutcome::into_string)
                .collect(),
            _ => None,
        }
    }
}

/// The evaluator contract: a function from source to value.
///
/// Implementations must be isolated from host state, surface failures as
/// an error value, and keep global state between calls within a run —
/// decoders are defined once and invoked many times.
pub trait Evaluate {
    fn eval(&self, source: &str) -> Result<EvalOutcome, EvalError>;
}

/// Globals seeded into every sandbox: browser stand-ins, synchronous
/// timers, and the permissive fallback. `window`/`self`/`globalThis`
/// alias the global object itself so `typeof window` checks pass;
/// everything the engine does not define is served by `__shield`, a
/// scope proxy that claims exactly the names the global object lacks and
/// answers them with recursive permissive proxies.
const PRELUDE: &str = r#"
var __permissive = function () {
    return new Proxy(function () {}, {
        get: function (target, key) {
            if (key === Symbol.toPrimitive) {
                return function (hint) { return hint === "number" ? 0 : ""; };
            }
            if (key === "toString") return function () { return ""; };
            if (key === "valueOf") return function () { return 0; };
            if (key === "length") return 0;
            return __permissive();
        },
        has: function () { return true; },
        set: function () { return true; },
        apply: function () { return __permissive(); },
        construct: function () { return __permissive(); }
    });
};
var __shield = new Proxy({}, {
    has: function (target, key) { return !(key in globalThis); },
    get: function (target, key) {
        if (key === Symbol.unscopables) return undefined;
        return __permissive();
    },
    set: function (target, key, value) { globalThis[key] = value; return true; }
});
var window = globalThis;
var self = globalThis;
var document = __permissive();
var navigator = __permissive();
var location = __permissive();
var console = {
    log: function () {},
    info: function () {},
    warn: function () {},
    error: function () {},
    debug: function () {}
};
var setTimeout = function (callback) {
    if (typeof callback === "function") callback();
    return 0;
};
var setInterval = setTimeout;
var setImmediate = setTimeout;
var clearTimeout = function () {};
var clearInterval = function () {};
"#;

// The engine refuses code that would not finish: obfuscator self-checks
// are short, so generous caps only stop runaway fragments.
const LOOP_ITERATION_LIMIT: u64 = 500_000;
const RECURSION_LIMIT: usize = 256;
const STACK_SIZE_LIMIT: usize = 1024 * 1024;

const MAX_ARRAY_ELEMENTS: u32 = 65_536;
const MAX_CONVERSION_DEPTH: u32 = 8;

/// A bounded evaluator backed by an embedded, fully isolated engine
/// context.
///
/// Evaluation is attempted directly first; if the fragment throws
/// (typically a reference to a name only a browser would define), it is
/// retried inside a `with (__shield)` scope where unknown names resolve
/// to permissive proxies. Known globals and anything the fragment itself
/// declares always win over the shield, which keeps decoder arithmetic
/// honest.
pub struct Sandbox {
    context: RefCell<Context>,
}

impl Sandbox {
    pub fn new() -> Self {
        let mut context = Context::default();

        let mut limits = RuntimeLimits::default();
        limits.set_loop_iteration_limit(LOOP_ITERATION_LIMIT);
        limits.set_recursion_limit(RECURSION_LIMIT);
        limits.set_stack_size_limit(STACK_SIZE_LIMIT);
        context.set_runtime_limits(limits);

        register_codecs(&mut context);

        if let Err(e) = context.eval(Source::from_bytes(PRELUDE)) {
            // The prelude is fixed; a failure here means the engine
            // build lacks something it needs, and fragments will fail
            // individually with the same cause.
            tracing::warn!("sandbox prelude failed to evaluate: {e}");
        }

        Self {
            context: RefCell::new(context),
        }
    }

    /// Defines `name` as `undefined` in the sandbox's global scope.
    /// Obfuscated initializers sometimes reference their own binding.
    pub fn bind_undefined(&self, name: &str) {
        let mut context = self.context.borrow_mut();
        let _ = context.register_global_property(
            JsString::from(name),
            JsValue::undefined(),
            Attribute::all(),
        );
    }

    fn eval_raw(&self, source: &str) -> Result<EvalOutcome, EvalError> {
        let mut context = self.context.borrow_mut();
        let value = context
            .eval(Source::from_bytes(source))
            .map_err(|e| EvalError::Evaluation(e.to_string()))?;
        Ok(convert_value(&value, &mut context, 0))
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluate for Sandbox {
    fn eval(&self, source: &str) -> Result<EvalOutcome, EvalError> {
        match self.eval_raw(source) {
            Ok(value) => Ok(value),
            // Re-running the whole fragment is safe: declarations
            // re-initialize from scratch, so no partial state from the
            // failed attempt survives.
            Err(_) => self.eval_raw(&format!("with (__shield) {{ {source} }}")),
        }
    }
}

fn convert_value(value: &JsValue, context: &mut Context, depth: u32) -> EvalOutcome {
    if value.is_undefined() {
        return EvalOutcome::Undefined;
    }
    if value.is_null() {
        return EvalOutcome::Null;
    }
    if let Some(b) = value.as_boolean() {
        return EvalOutcome::Bool(b);
    }
    if let Some(n) = value.as_number() {
        return EvalOutcome::Number(n);
    }
    if value.is_string() {
        return match value.to_string(context) {
            Ok(s) => EvalOutcome::Str(s.to_std_string_escaped()),
            Err(_) => EvalOutcome::Opaque,
        };
    }
    if depth < MAX_CONVERSION_DEPTH {
        if let Some(object) = value.as_object() {
            if object.is_array() {
                let length = object
                    .get(JsString::from("length"), context)
                    .ok()
                    .and_then(|v| v.to_u32(context).ok())
                    .unwrap_or(0);
                if length > MAX_ARRAY_ELEMENTS {
                    return EvalOutcome::Opaque;
                }
                let mut elements = Vec::with_capacity(length as usize);
                for i in 0..length {
                    match object.get(i, context) {
                        Ok(element) => {
                            elements.push(convert_value(&element, context, depth + 1));
                        }
                        Err(_) => return EvalOutcome::Opaque,
                    }
                }
                return EvalOutcome::Array(elements);
            }
        }
    }
    EvalOutcome::Opaque
}

/// Installs `atob`/`btoa`. The decode side accepts missing padding the
/// way obfuscator output tends to arrive.
fn register_codecs(context: &mut Context) {
    const PAD_OPTIONAL_CONFIG: GeneralPurposeConfig =
        GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
    const PAD_OPTIONAL: GeneralPurpose = GeneralPurpose::new(&STANDARD, PAD_OPTIONAL_CONFIG);

    let atob = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let input = args
            .get_or_undefined(0)
            .to_string(ctx)?
            .to_std_string_escaped();
        let decoded = PAD_OPTIONAL
            .decode(input.trim().as_bytes())
            .map_err(|e| JsNativeError::typ().with_message(format!("atob: {e}")))?;
        // One byte per UTF-16 code unit, matching the browser.
        let text: String = decoded.iter().map(|b| *b as char).collect();
        Ok(JsValue::from(JsString::from(text)))
    });
    let _ = context.register_global_builtin_callable(JsString::from("atob"), 1, atob);

    let btoa = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let input = args
            .get_or_undefined(0)
            .to_string(ctx)?
            .to_std_string_escaped();
        let mut bytes = Vec::with_capacity(input.len());
        for c in input.chars() {
            let code = c as u32;
            if code > 0xFF {
                return Err(JsNativeError::typ()
                    .with_message("btoa: character out of latin1 range")
                    .into());
            }
            bytes.push(code as u8);
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Ok(JsValue::from(JsString::from(encoded)))
    });
    let _ = context.register_global_builtin_callable(JsString::from("btoa"), 1, btoa);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_basic_values() {
        let sandbox = Sandbox::new();
        assert_eq!(sandbox.eval("1 + 2").unwrap(), EvalOutcome::Number(3.0));
        assert_eq!(
            sandbox.eval("'a' + 'b'").unwrap(),
            EvalOutcome::Str("ab".into())
        );
    }

    #[test]
    fn test_eval_string_array_iife() {
        let sandbox = Sandbox::new();
        let result = sandbox
            .eval("(function () { return ['alpha', 'beta']; })()")
            .unwrap();
        assert_eq!(
            result.into_string_array(),
            Some(vec!["alpha".to_string(), "beta".to_string()])
        );
    }

    #[test]
    fn test_state_persists_between_calls() {
        let sandbox = Sandbox::new();
        sandbox.eval("function dec(i) { return ['x', 'y'][i]; }").unwrap();
        assert_eq!(sandbox.eval("dec(1)").unwrap(), EvalOutcome::Str("y".into()));
        assert_eq!(sandbox.eval("dec(0)").unwrap(), EvalOutcome::Str("x".into()));
    }

    #[test]
    fn test_browser_stand_ins() {
        let sandbox = Sandbox::new();
        assert_eq!(
            sandbox.eval("typeof window").unwrap(),
            EvalOutcome::Str("object".into())
        );
        // Timers run synchronously and return 0.
        assert_eq!(
            sandbox
                .eval("var r = 0; setTimeout(function () { r = 1; }) + r")
                .unwrap(),
            EvalOutcome::Number(1.0)
        );
    }

    #[test]
    fn test_unknown_names_fall_back_to_permissive() {
        let sandbox = Sandbox::new();
        // Direct evaluation throws a ReferenceError; the shield retry
        // serves a permissive proxy whose string form is empty.
        assert_eq!(
            sandbox.eval("String(definitelyNotDefined.anything)").unwrap(),
            EvalOutcome::Str(String::new())
        );
    }

    #[test]
    fn test_codecs() {
        let sandbox = Sandbox::new();
        assert_eq!(
            sandbox.eval("atob('aGVsbG8')").unwrap(),
            EvalOutcome::Str("hello".into())
        );
        assert_eq!(
            sandbox.eval("btoa('hello')").unwrap(),
            EvalOutcome::Str("aGVsbG8=".into())
        );
    }

    #[test]
    fn test_bind_undefined() {
        let sandbox = Sandbox::new();
        sandbox.bind_undefined("_0x1234");
        assert_eq!(
            sandbox.eval("typeof _0x1234").unwrap(),
            EvalOutcome::Str("undefined".into())
        );
    }

    #[test]
    fn test_runaway_loop_fails() {
        let sandbox = Sandbox::new();
        assert!(sandbox.eval("while (true) {}").is_err());
    }
}
