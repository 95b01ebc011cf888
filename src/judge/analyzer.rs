//! Structural source analysis.
//!
//! Queries take the form `kind[:target]`. `SourceAnalyzer` answers them
//! from the source text alone, line by line, which is enough for the common
//! checks on small learner programs. Hosts with a real parser plug in their
//! own `StructuralAnalyzer`.
//!
//! | query                     | result                                          |
//! |---------------------------|-------------------------------------------------|
//! | `function_exists:<name>`  | `{name, parameters, lineno}` or `null`          |
//! | `function_count`          | `{count, names}`                                |
//! | `variable_usage:<name>`   | `{assigned, used, assignments, usages}` or `null` |
//! | `control_flow[:<kind>]`   | counts per construct, or `{kind, count}`        |
//! | `has_docstring[:<name>]`  | `{documented, missing}`                         |
//! | `contains:<text>`         | `{found, lines}`                                |
//!
//! `*` as a target matches any name.

use crate::config::types::{Result, SandboxError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

pub trait StructuralAnalyzer: Send + Sync {
    fn analyze(&self, code: &str, expression: &str) -> Result<Value>;
}

static FUNCTION_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(([^)]*)\)").expect("valid def pattern")
});

static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_]\w*)\s*(?:[-+*/%]|//|\*\*)?=[^=]").expect("valid assignment pattern")
});

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_]\w*").expect("valid identifier pattern"));

const CONTROL_FLOW: [(&str, &str); 5] = [
    ("if_statement", "if"),
    ("for_loop", "for"),
    ("while_loop", "while"),
    ("try_except", "try"),
    ("with_statement", "with"),
];

/// Text-based analyzer for Python-shaped source
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceAnalyzer;

struct FunctionInfo {
    name: String,
    parameters: Vec<String>,
    lineno: usize,
}

impl StructuralAnalyzer for SourceAnalyzer {
    fn analyze(&self, code: &str, expression: &str) -> Result<Value> {
        let (kind, target) = match expression.split_once(':') {
            Some((kind, target)) => (kind.trim(), Some(target.trim())),
            None => (expression.trim(), None),
        };
        log::debug!("analyzer: {} target={:?}", kind, target);

        let lines: Vec<&str> = code.lines().collect();
        match kind {
            "function_exists" => Ok(function_exists(&lines, target.unwrap_or("*"))),
            "function_count" => Ok(function_count(&lines)),
            "variable_usage" => Ok(variable_usage(&lines, target.unwrap_or("*"))),
            "control_flow" => Ok(control_flow(&lines, target)),
            "has_docstring" => Ok(docstrings(&lines, target.unwrap_or("*"))),
            "contains" => {
                let needle = target
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| SandboxError::Analysis("contains needs a target".to_string()))?;
                Ok(contains(&lines, needle))
            }
            other => Err(SandboxError::Analysis(format!("unknown query '{}'", other))),
        }
    }
}

fn target_matches(target: &str, name: &str) -> bool {
    target == "*" || target == name
}

/// Strip a trailing `#` comment. Quotes are not tracked.
fn code_part(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn functions(lines: &[&str]) -> Vec<FunctionInfo> {
    let re = &*FUNCTION_DEF;
    lines
        .iter()
        .enumerate()
        .filter_map(|(idx, line)| {
            let caps = re.captures(line)?;
            let parameters = caps[2]
                .split(',')
                .map(|p| p.split(['=', ':']).next().unwrap_or("").trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            Some(FunctionInfo {
                name: caps[1].to_string(),
                parameters,
                lineno: idx + 1,
            })
        })
        .collect()
}

fn function_exists(lines: &[&str], target: &str) -> Value {
    functions(lines)
        .into_iter()
        .find(|f| target_matches(target, &f.name))
        .map(|f| json!({"name": f.name, "parameters": f.parameters, "lineno": f.lineno}))
        .unwrap_or(Value::Null)
}

fn function_count(lines: &[&str]) -> Value {
    let names: Vec<String> = functions(lines).into_iter().map(|f| f.name).collect();
    json!({"count": names.len(), "names": names})
}

fn variable_usage(lines: &[&str], target: &str) -> Value {
    let (assign_re, ident_re) = (&*ASSIGNMENT, &*IDENTIFIER);
    let mut assignments = Vec::new();
    let mut usages = Vec::new();

    for (idx, raw) in lines.iter().enumerate() {
        let line = code_part(raw);
        let lineno = idx + 1;
        let assigned = assign_re
            .captures(line)
            .map(|caps| caps[1].to_string())
            .filter(|name| target_matches(target, name));

        // Everything right of the assignment target counts as a read
        let scan_from = match &assigned {
            Some(name) => {
                assignments.push(json!({"name": name, "lineno": lineno}));
                line.find('=').map(|i| i + 1).unwrap_or(line.len())
            }
            None => 0,
        };
        for ident in ident_re.find_iter(&line[scan_from..]) {
            let name = ident.as_str();
            if target == "*" || name == target {
                usages.push(json!({"name": name, "lineno": lineno}));
            }
        }
    }

    if assignments.is_empty() && usages.is_empty() {
        return Value::Null;
    }
    json!({
        "assigned": !assignments.is_empty(),
        "used": !usages.is_empty(),
        "assignments": assignments,
        "usages": usages,
    })
}

fn starts_with_keyword(line: &str, keyword: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with(keyword)
        && trimmed[keyword.len()..]
            .chars()
            .next()
            .map(|c| c == ' ' || c == ':' || c == '(')
            .unwrap_or(false)
}

fn control_flow(lines: &[&str], target: Option<&str>) -> Value {
    let count = |keyword: &str| {
        lines
            .iter()
            .filter(|line| starts_with_keyword(code_part(line), keyword))
            .count()
    };

    match target.filter(|t| !t.is_empty() && *t != "*") {
        Some(kind) => {
            let keyword = CONTROL_FLOW
                .iter()
                .find(|(name, keyword)| *name == kind || *keyword == kind)
                .map(|(_, keyword)| *keyword)
                .unwrap_or(kind);
            json!({"kind": kind, "count": count(keyword)})
        }
        None => {
            let mut counts = serde_json::Map::new();
            for (name, keyword) in CONTROL_FLOW {
                counts.insert(name.to_string(), json!(count(keyword)));
            }
            Value::Object(counts)
        }
    }
}

fn docstrings(lines: &[&str], target: &str) -> Value {
    let mut documented = Vec::new();
    let mut missing = Vec::new();

    for f in functions(lines) {
        if !target_matches(target, &f.name) {
            continue;
        }
        let first_body = lines
            .iter()
            .skip(f.lineno)
            .map(|line| line.trim())
            .find(|line| !line.is_empty());
        let has_doc = first_body
            .map(|line| line.starts_with("\"\"\"") || line.starts_with("'''"))
            .unwrap_or(false);
        if has_doc {
            documented.push(f.name);
        } else {
            missing.push(f.name);
        }
    }

    json!({"documented": documented, "missing": missing})
}

fn contains(lines: &[&str], needle: &str) -> Value {
    let hits: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains(needle))
        .map(|(idx, _)| idx + 1)
        .collect();
    json!({"found": !hits.is_empty(), "lines": hits})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_compile() {
        Lazy::force(&FUNCTION_DEF);
        Lazy::force(&ASSIGNMENT);
        Lazy::force(&IDENTIFIER);
    }

    const PROGRAM: &str = r#"def greet(name, punct="!"):
    """Say hello."""
    total = 0
    for c in name:
        total += 1
    return name + punct

def helper():
    pass

if __name__ == "__main__":
    print(greet("x"))
"#;

    #[test]
    fn test_function_exists() {
        let result = SourceAnalyzer.analyze(PROGRAM, "function_exists:greet").unwrap();
        assert_eq!(result["name"], "greet");
        assert_eq!(result["parameters"], json!(["name", "punct"]));
        assert_eq!(result["lineno"], 1);
        assert!(SourceAnalyzer.analyze(PROGRAM, "function_exists:absent").unwrap().is_null());
    }

    #[test]
    fn test_function_count_and_docstrings() {
        let count = SourceAnalyzer.analyze(PROGRAM, "function_count").unwrap();
        assert_eq!(count["count"], 2);
        let docs = SourceAnalyzer.analyze(PROGRAM, "has_docstring").unwrap();
        assert_eq!(docs["documented"], json!(["greet"]));
        assert_eq!(docs["missing"], json!(["helper"]));
    }

    #[test]
    fn test_variable_usage() {
        let result = SourceAnalyzer.analyze(PROGRAM, "variable_usage:total").unwrap();
        assert_eq!(result["assigned"], true);
        assert_eq!(result["assignments"][0]["lineno"], 3);
        assert!(SourceAnalyzer.analyze(PROGRAM, "variable_usage:nothing").unwrap().is_null());
    }

    #[test]
    fn test_control_flow() {
        let all = SourceAnalyzer.analyze(PROGRAM, "control_flow").unwrap();
        assert_eq!(all["for_loop"], 1);
        assert_eq!(all["if_statement"], 1);
        assert_eq!(all["while_loop"], 0);
        let one = SourceAnalyzer.analyze(PROGRAM, "control_flow:for_loop").unwrap();
        assert_eq!(one["count"], 1);
    }

    #[test]
    fn test_unknown_query_is_error() {
        assert!(matches!(
            SourceAnalyzer.analyze(PROGRAM, "halting:yes"),
            Err(SandboxError::Analysis(_))
        ));
        assert!(SourceAnalyzer.analyze(PROGRAM, "contains:").is_err());
    }
}
