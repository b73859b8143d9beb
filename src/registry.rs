use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A registered in-process job function: takes the parsed argument list,
/// returns the result text or an error message.
pub type JobFn = dyn Fn(&[String]) -> Result<String, String> + Send + Sync;

/// Name → function mapping for `function`-mode jobs.
///
/// Registration normally happens once at startup; tests substitute their own
/// functions freely.
#[derive(Default)]
pub struct FunctionRegistry {
    funcs: RwLock<HashMap<String, Arc<JobFn>>>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the builtin functions.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("Hello", hello);
        registry.register("Echo", echo);
        registry.register("Time", time);
        registry.register("Math", math);
        registry.register("Webhook", webhook);
        registry.register("Backup", backup);
        registry.register("Cleanup", cleanup);
        registry
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        f: impl Fn(&[String]) -> Result<String, String> + Send + Sync + 'static,
    ) {
        self.funcs
            .write()
            .expect("registry lock poisoned")
            .insert(name.into(), Arc::new(f));
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<JobFn>> {
        self.funcs
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .funcs
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

fn hello(args: &[String]) -> Result<String, String> {
    let name = args.first().map(String::as_str).unwrap_or("World");
    Ok(format!("Hello, {name}!"))
}

fn echo(args: &[String]) -> Result<String, String> {
    Ok(args.join(" "))
}

fn time(args: &[String]) -> Result<String, String> {
    let format = args.first().map(String::as_str).unwrap_or("%Y-%m-%d %H:%M:%S");
    Ok(chrono::Local::now().format(format).to_string())
}

/// Arithmetic on two numbers: `op a b`, result formatted with two decimals.
fn math(args: &[String]) -> Result<String, String> {
    if args.len() < 3 {
        return Err("Math requires at least 3 arguments: operator a b".to_string());
    }
    let a: f64 = args[1]
        .parse()
        .map_err(|_| "arguments must be numeric".to_string())?;
    let b: f64 = args[2]
        .parse()
        .map_err(|_| "arguments must be numeric".to_string())?;
    let result = match args[0].as_str() {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => {
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            a / b
        }
        op => return Err(format!("unsupported operator: {op}")),
    };
    Ok(format!("{result:.2}"))
}

fn webhook(args: &[String]) -> Result<String, String> {
    let url = args
        .first()
        .ok_or_else(|| "Webhook requires a URL argument".to_string())?;
    Ok(format!("webhook invoked: {url}"))
}

fn backup(args: &[String]) -> Result<String, String> {
    let source = args.first().map(String::as_str).unwrap_or(".");
    Ok(format!("backup of {source} requested"))
}

fn cleanup(args: &[String]) -> Result<String, String> {
    let path = args.first().map(String::as_str).unwrap_or(".");
    Ok(format!("cleanup of {path} requested"))
}
