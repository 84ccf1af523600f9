// Service caller attribution
// Finds the innermost stack frame that belongs to the configured service
// layer so SQL observations can be attributed to the code that issued them
//
// Numan Thabit 2025 Nov

use std::backtrace::Backtrace;

pub const UNKNOWN_CALLER: &str = "[unknown]";
pub const MAX_FRAMES: usize = 50;

/// Resolves the service-layer caller of the current thread. Only invoked when
/// `collect_sql_service_caller` is enabled.
pub trait CallerResolver: Send + Sync {
    fn resolve(&self) -> Option<String>;
}

/// Resolver used when caller attribution is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCallerResolver;

impl CallerResolver for DisabledCallerResolver {
    fn resolve(&self) -> Option<String> {
        None
    }
}

/// Walks a captured backtrace, innermost frame first.
#[derive(Debug, Clone)]
pub struct BacktraceCallerResolver {
    namespace: String,
    max_frames: usize,
}

impl BacktraceCallerResolver {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            max_frames: MAX_FRAMES,
        }
    }
}

impl CallerResolver for BacktraceCallerResolver {
    fn resolve(&self) -> Option<String> {
        let trace = Backtrace::force_capture().to_string();
        first_service_frame(&trace, &self.namespace, self.max_frames)
    }
}

/// Scan rendered backtrace text (`  N: symbol` lines followed by `at file`
/// lines) for the first symbol inside `namespace`, looking at no more than
/// `max_frames` frames.
pub fn first_service_frame(trace: &str, namespace: &str, max_frames: usize) -> Option<String> {
    trace
        .lines()
        .filter_map(frame_symbol)
        .take(max_frames)
        .map(clean_symbol)
        .find(|symbol| in_namespace(symbol, namespace))
}

fn frame_symbol(line: &str) -> Option<&str> {
    let (index, symbol) = line.trim_start().split_once(": ")?;
    index
        .chars()
        .all(|c| c.is_ascii_digit())
        .then_some(symbol.trim())
        .filter(|s| !s.is_empty())
}

/// `<Type as Trait>::method::h<hash>` becomes `Type::method`.
fn clean_symbol(symbol: &str) -> String {
    let symbol = match symbol.rsplit_once("::h") {
        Some((path, hash)) if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) => {
            path
        }
        _ => symbol,
    };
    match symbol.strip_prefix('<') {
        Some(qualified) => match qualified.split_once(" as ") {
            Some((self_ty, rest)) => {
                let method = rest.split_once('>').map(|(_, m)| m).unwrap_or_default();
                format!("{self_ty}{method}")
            }
            None => qualified.replacen('>', "", 1),
        },
        None => symbol.to_string(),
    }
}

fn in_namespace(symbol: &str, namespace: &str) -> bool {
    let namespace = namespace.trim_end_matches("::");
    if namespace.is_empty() {
        return false;
    }
    symbol.starts_with(&format!("{namespace}::")) || symbol.contains(&format!("::{namespace}::"))
}
